//! Connection admission: agent bearer-secret verification and client
//! session setup. Generalized from the teacher's plain `==` token compare
//! (`middleware/auth.rs`, `routes/ws.rs`) — agent secrets are long-lived
//! and node-specific, so the compare runs in constant time via `subtle`
//! to avoid leaking secret length/prefix through response timing.

use subtle::ConstantTimeEq;

/// True if `presented` matches `expected`, in time independent of where
/// (or whether) the two strings first differ.
pub fn secret_matches(expected: &str, presented: &str) -> bool {
    let expected = expected.as_bytes();
    let presented = presented.as_bytes();
    if expected.len() != presented.len() {
        return false;
    }
    expected.ct_eq(presented).into()
}

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("unknown node id")]
    UnknownNode,
    #[error("secret mismatch")]
    SecretMismatch,
}

/// Verifies an agent's handshake secret against the node record on file.
/// Does not consult connection state — a node reconnecting replaces its
/// prior connection rather than being rejected as a duplicate.
pub fn admit_agent(node: &crate::domain::Node, presented_secret: &str) -> Result<(), AdmissionError> {
    if !secret_matches(&node.secret, presented_secret) {
        return Err(AdmissionError::SecretMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_secrets_match() {
        assert!(secret_matches("abc123", "abc123"));
    }

    #[test]
    fn different_length_does_not_match() {
        assert!(!secret_matches("abc123", "abc1234"));
    }

    #[test]
    fn different_content_same_length_does_not_match() {
        assert!(!secret_matches("abc123", "abd123"));
    }
}
