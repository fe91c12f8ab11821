//! SMTP email delivery channel via `lettre`, configured from the same
//! env-var-driven style the teacher uses for every other external
//! credential (`NEURAL_TOKEN`, `DATABASE_URL` in `state.rs::AppState::new`).

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::ports::mailer::Mailer;

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SmtpMailerError {
    #[error("SMTP_HOST is not set")]
    MissingHost,
    #[error("SMTP_FROM is not set")]
    MissingFrom,
    #[error("invalid SMTP configuration: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

impl SmtpMailer {
    /// Builds a pooled, TLS SMTP transport from `SMTP_HOST`, `SMTP_PORT`,
    /// `SMTP_USERNAME`, `SMTP_PASSWORD`, and `SMTP_FROM`. Username/password
    /// are optional (unauthenticated relays exist); host and from are not.
    pub fn from_env() -> Result<Self, SmtpMailerError> {
        let host = std::env::var("SMTP_HOST").map_err(|_| SmtpMailerError::MissingHost)?;
        let from = std::env::var("SMTP_FROM").map_err(|_| SmtpMailerError::MissingFrom)?;
        let port: u16 = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(587);

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)?.port(port);

        if let (Ok(username), Ok(password)) = (std::env::var("SMTP_USERNAME"), std::env::var("SMTP_PASSWORD")) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.parse()?)
            .to(to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;

        self.transport.send(message).await?;
        Ok(())
    }
}
