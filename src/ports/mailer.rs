use async_trait::async_trait;

/// Narrow interface for the Alert Engine's email channel. The real
/// implementation (`crate::alerts::mail::SmtpMailer`) wraps `lettre`; tests
/// substitute a recording fake.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}
