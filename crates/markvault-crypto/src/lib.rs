//! # markvault-crypto
//!
//! Capability signing for markvault snapshot sharing.
//!
//! Stored snapshots are readable through time-limited, HMAC-signed URLs
//! that stand in for a login session on the read path. This crate holds
//! the signer, the canonical message format, and its error taxonomy.
//!
//! ## Cryptographic Primitives
//!
//! - **Signature**: HMAC-SHA256 over `owner:resource:expires:action`
//! - **Encoding**: lowercase hex
//! - **Verification**: recomputation + constant-time comparison
//!
//! ## Example
//!
//! ```rust
//! use markvault_crypto::{CapabilityAction, CapabilitySigner};
//! use uuid::Uuid;
//!
//! let signer = CapabilitySigner::new("server-secret").unwrap();
//! let owner = Uuid::new_v4();
//! let snapshot = Uuid::new_v4();
//!
//! let cap = signer.issue(owner, snapshot, 86_400, CapabilityAction::View);
//! signer
//!     .verify(&cap.signature, cap.expires_at, owner, snapshot, CapabilityAction::View)
//!     .expect("freshly issued capability verifies");
//! ```

pub mod capability;
pub mod error;

pub use capability::{CapabilityAction, CapabilitySigner, IssuedCapability};
pub use error::{CapabilityError, CapabilityResult};
