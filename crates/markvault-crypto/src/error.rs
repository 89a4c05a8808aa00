//! Error types for capability operations.

use thiserror::Error;

/// Capability verification and signing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// The capability's expiry timestamp is in the past.
    #[error("Capability expired at {0}")]
    Expired(i64),

    /// The signature does not match the canonical message.
    #[error("Invalid capability signature")]
    InvalidSignature,

    /// The signing secret is unusable (empty or malformed).
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    /// A capability field could not be parsed.
    #[error("Invalid capability input: {0}")]
    InvalidInput(String),
}

/// Result type for capability operations.
pub type CapabilityResult<T> = Result<T, CapabilityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_display_contains_timestamp() {
        let err = CapabilityError::Expired(1_700_000_000);
        assert!(err.to_string().contains("1700000000"));
    }

    #[test]
    fn test_invalid_signature_display() {
        let err = CapabilityError::InvalidSignature;
        assert!(err.to_string().contains("signature"));
    }

    #[test]
    fn test_invalid_key_display() {
        let err = CapabilityError::InvalidKey("empty secret".into());
        assert!(err.to_string().contains("empty secret"));
    }
}
