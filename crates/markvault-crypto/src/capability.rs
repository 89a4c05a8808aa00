//! HMAC-based capability tokens ("signed URLs").
//!
//! A capability is a bearer credential granting time-limited read access to
//! one resource without a login session. The canonical message is
//!
//! ```text
//! {owner_id}:{resource_id}:{expires_at}:{action}
//! ```
//!
//! signed with HMAC-SHA256 under a server-held secret and transported as a
//! lowercase hex string. Nothing is persisted server-side: verification is
//! recomputation. Anyone holding a valid, unexpired tuple can read the
//! resource; there is no secondary check against the live owner/resource
//! relationship beyond what was true at issuance.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::{CapabilityError, CapabilityResult};

type HmacSha256 = Hmac<Sha256>;

/// Scope of access a capability grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityAction {
    /// Render a stored snapshot page (also covers its embedded images).
    View,
}

impl std::fmt::Display for CapabilityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::View => write!(f, "view"),
        }
    }
}

impl std::str::FromStr for CapabilityAction {
    type Err = CapabilityError;
    fn from_str(s: &str) -> CapabilityResult<Self> {
        match s {
            "view" => Ok(Self::View),
            other => Err(CapabilityError::InvalidInput(format!(
                "unknown action: {}",
                other
            ))),
        }
    }
}

/// An issued capability: hex signature plus its expiry instant.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IssuedCapability {
    pub signature: String,
    /// Unix timestamp (seconds) after which the capability is dead.
    pub expires_at: i64,
}

/// Issues and verifies capability tokens under one server-held secret.
pub struct CapabilitySigner {
    secret: Vec<u8>,
}

impl CapabilitySigner {
    /// Create a signer from the server secret.
    pub fn new(secret: impl AsRef<[u8]>) -> CapabilityResult<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(CapabilityError::InvalidKey("secret must not be empty".into()));
        }
        Ok(Self {
            secret: secret.to_vec(),
        })
    }

    /// Issue a capability valid for `ttl_seconds` from now.
    pub fn issue(
        &self,
        owner_id: Uuid,
        resource_id: Uuid,
        ttl_seconds: i64,
        action: CapabilityAction,
    ) -> IssuedCapability {
        let expires_at = Utc::now().timestamp() + ttl_seconds;
        let signature = self.sign(owner_id, resource_id, expires_at, action);
        IssuedCapability {
            signature,
            expires_at,
        }
    }

    /// Verify a capability tuple against the current wall clock.
    ///
    /// Expiry is checked before the signature so the two failure modes are
    /// distinguishable to clients without revealing anything about the
    /// secret.
    pub fn verify(
        &self,
        signature: &str,
        expires_at: i64,
        owner_id: Uuid,
        resource_id: Uuid,
        action: CapabilityAction,
    ) -> CapabilityResult<()> {
        self.verify_at(
            signature,
            expires_at,
            owner_id,
            resource_id,
            action,
            Utc::now().timestamp(),
        )
    }

    /// Clock-injected variant of [`verify`](Self::verify) for tests.
    pub fn verify_at(
        &self,
        signature: &str,
        expires_at: i64,
        owner_id: Uuid,
        resource_id: Uuid,
        action: CapabilityAction,
        now: i64,
    ) -> CapabilityResult<()> {
        if expires_at < now {
            return Err(CapabilityError::Expired(expires_at));
        }

        let raw = hex::decode(signature).map_err(|_| CapabilityError::InvalidSignature)?;

        // Mac::verify_slice is a constant-time comparison.
        let mut mac = self.mac();
        mac.update(canonical_message(owner_id, resource_id, expires_at, action).as_bytes());
        mac.verify_slice(&raw)
            .map_err(|_| CapabilityError::InvalidSignature)
    }

    /// Compute the hex signature for a capability tuple.
    pub fn sign(
        &self,
        owner_id: Uuid,
        resource_id: Uuid,
        expires_at: i64,
        action: CapabilityAction,
    ) -> String {
        let mut mac = self.mac();
        mac.update(canonical_message(owner_id, resource_id, expires_at, action).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn mac(&self) -> HmacSha256 {
        // new_from_slice only fails on zero-length keys, which new() rejects.
        HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any non-empty key")
    }
}

/// Canonical signed message: `owner:resource:expires:action`.
fn canonical_message(
    owner_id: Uuid,
    resource_id: Uuid,
    expires_at: i64,
    action: CapabilityAction,
) -> String {
    format!("{}:{}:{}:{}", owner_id, resource_id, expires_at, action)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> CapabilitySigner {
        CapabilitySigner::new("test-secret").unwrap()
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            CapabilitySigner::new(""),
            Err(CapabilityError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_signature_is_hex_sha256() {
        let sig = signer().sign(Uuid::nil(), Uuid::nil(), 1_700_000_000, CapabilityAction::View);
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sign_is_deterministic() {
        let s = signer();
        let owner = Uuid::new_v4();
        let resource = Uuid::new_v4();
        let a = s.sign(owner, resource, 1_700_000_000, CapabilityAction::View);
        let b = s.sign(owner, resource, 1_700_000_000, CapabilityAction::View);
        assert_eq!(a, b);

        // Any field change produces a different signature.
        let c = s.sign(owner, resource, 1_700_000_001, CapabilityAction::View);
        assert_ne!(a, c);
        let d = s.sign(owner, Uuid::new_v4(), 1_700_000_000, CapabilityAction::View);
        assert_ne!(a, d);
    }

    #[test]
    fn test_different_secrets_differ() {
        let a = CapabilitySigner::new("secret-a").unwrap();
        let b = CapabilitySigner::new("secret-b").unwrap();
        let owner = Uuid::new_v4();
        assert_ne!(
            a.sign(owner, owner, 1, CapabilityAction::View),
            b.sign(owner, owner, 1, CapabilityAction::View)
        );
    }

    #[test]
    fn test_verify_roundtrip() {
        let s = signer();
        let owner = Uuid::new_v4();
        let resource = Uuid::new_v4();
        let now = 1_700_000_000;
        let sig = s.sign(owner, resource, now + 60, CapabilityAction::View);
        assert!(s
            .verify_at(&sig, now + 60, owner, resource, CapabilityAction::View, now)
            .is_ok());
    }

    #[test]
    fn test_verify_rejects_expired_even_with_valid_signature() {
        let s = signer();
        let owner = Uuid::new_v4();
        let resource = Uuid::new_v4();
        let expires = 1_700_000_000;
        let sig = s.sign(owner, resource, expires, CapabilityAction::View);
        let result = s.verify_at(
            &sig,
            expires,
            owner,
            resource,
            CapabilityAction::View,
            expires + 1,
        );
        assert_eq!(result, Err(CapabilityError::Expired(expires)));
    }

    #[test]
    fn test_verify_rejects_tampered_signature() {
        let s = signer();
        let owner = Uuid::new_v4();
        let resource = Uuid::new_v4();
        let now = 1_700_000_000;
        let mut sig = s.sign(owner, resource, now + 60, CapabilityAction::View);
        // Flip one nibble.
        let last = sig.pop().unwrap();
        sig.push(if last == '0' { '1' } else { '0' });
        assert_eq!(
            s.verify_at(&sig, now + 60, owner, resource, CapabilityAction::View, now),
            Err(CapabilityError::InvalidSignature)
        );
    }

    #[test]
    fn test_verify_rejects_extended_expiry() {
        // A client cannot stretch its own TTL: expires_at is signed.
        let s = signer();
        let owner = Uuid::new_v4();
        let resource = Uuid::new_v4();
        let now = 1_700_000_000;
        let sig = s.sign(owner, resource, now + 60, CapabilityAction::View);
        assert_eq!(
            s.verify_at(&sig, now + 3600, owner, resource, CapabilityAction::View, now),
            Err(CapabilityError::InvalidSignature)
        );
    }

    #[test]
    fn test_verify_rejects_non_hex_signature() {
        let s = signer();
        assert_eq!(
            s.verify_at(
                "not-hex!",
                i64::MAX,
                Uuid::nil(),
                Uuid::nil(),
                CapabilityAction::View,
                0
            ),
            Err(CapabilityError::InvalidSignature)
        );
    }

    #[test]
    fn test_issue_sets_future_expiry() {
        let s = signer();
        let owner = Uuid::new_v4();
        let resource = Uuid::new_v4();
        let issued = s.issue(owner, resource, 86_400, CapabilityAction::View);
        assert!(issued.expires_at > Utc::now().timestamp());
        assert!(s
            .verify(
                &issued.signature,
                issued.expires_at,
                owner,
                resource,
                CapabilityAction::View
            )
            .is_ok());
    }

    #[test]
    fn test_action_roundtrip() {
        use std::str::FromStr;
        assert_eq!(CapabilityAction::View.to_string(), "view");
        assert_eq!(
            CapabilityAction::from_str("view").unwrap(),
            CapabilityAction::View
        );
        assert!(CapabilityAction::from_str("write").is_err());
    }
}
