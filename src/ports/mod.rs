pub mod agent_sender;
pub mod auth;
pub mod clock;
pub mod mailer;
pub mod notifier;
pub mod persistence;
pub mod webhooks;

pub use agent_sender::AgentSender;
pub use auth::ClientAuthenticator;
pub use clock::Clock;
pub use mailer::Mailer;
pub use notifier::ClientNotifier;
pub use persistence::PersistencePort;
pub use webhooks::Webhooks;
