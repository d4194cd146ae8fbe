//! Core types of the Aether Vault client access layer.
//!
//! Carries the capability-based access-control nouns (intentions, contexts,
//! policies, capabilities), time-bounded credentials and the local-channel
//! wire schema. Nothing here performs I/O.

pub mod capability;
pub mod context;
pub mod credential;
pub mod error;
pub mod intention;
pub mod policy;
pub mod proto;
pub mod secret;
pub mod ttl;

pub use capability::Capability;
pub use context::Context;
pub use credential::{Credential, CredentialKind, CredentialSecret};
pub use error::{ErrorKind, Result, VaultError};
pub use intention::Intention;
pub use policy::Policy;
pub use secret::SecretValue;

/// Maximum local-channel line size in bytes (128 KB).
///
/// Client and agent must agree on this limit.
pub const MAX_FRAME_LENGTH: usize = 128 * 1024;
