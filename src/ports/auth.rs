//! Client bearer-credential validation. Session tokens, API keys, TOTP,
//! passkeys and SSO are explicitly external collaborators per spec.md §1
//! ("user authentication/authorization providers ... interact with the
//! core via the interfaces enumerated in §6") — this trait is that
//! interface. The Gateway never parses a token itself; it asks whichever
//! `ClientAuthenticator` the REST/auth layer wired in.

use async_trait::async_trait;

/// The authenticated identity behind a presented bearer credential.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub user_id: String,
}

#[async_trait]
pub trait ClientAuthenticator: Send + Sync {
    /// Returns the identity behind `bearer_token`, or `None` if it does
    /// not correspond to a live session/API key. A denial MUST NOT leak
    /// which part of the credential was wrong (spec.md §4.1's "failure
    /// path MUST NOT leak any identifier beyond a generic denial").
    async fn authenticate(&self, bearer_token: &str) -> Option<ClientIdentity>;
}

/// Placeholder authenticator for development and for wiring tests: trusts
/// a single static token and maps it to a fixed user id, the same
/// single-shared-secret shape the teacher used for its one `NEURAL_TOKEN`
/// (`middleware/auth.rs`). A real deployment replaces this with an
/// implementation backed by the session/API-key store (out of scope here
/// per spec.md §1).
pub struct StaticTokenAuthenticator {
    token: String,
    user_id: String,
}

impl StaticTokenAuthenticator {
    pub fn new(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl ClientAuthenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, bearer_token: &str) -> Option<ClientIdentity> {
        if crate::gateway::admission::secret_matches(&self.token, bearer_token) {
            Some(ClientIdentity { user_id: self.user_id.clone() })
        } else {
            None
        }
    }
}
