//! Error taxonomy shared by every Aether Vault component.
//!
//! There is a single error type, [`VaultError`], tagged with an [`ErrorKind`].
//! Callers branch on the kind rather than on distinct error types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Channel unreachable or refused.
    Connection,
    /// Bad credentials or HTTP 401.
    Authentication,
    /// Framing, decoding or low-level I/O failure (after retries, if any).
    Transport,
    /// Policy validation failure reported by the vault or a local policy check.
    Policy,
    /// Capability request denied, or capability revoked.
    Capability,
    /// Secret operation failure (including use of a revoked credential).
    Secret,
    /// Local TTL check failed.
    TtlExpired,
    /// Invalid transport or connector configuration.
    Configuration,
}

impl ErrorKind {
    /// Stable error code, used in logs and CLI output.
    pub fn code(self) -> &'static str {
        match self {
            Self::Connection => "connection_error",
            Self::Authentication => "authentication_error",
            Self::Transport => "transport_error",
            Self::Policy => "policy_error",
            Self::Capability => "capability_error",
            Self::Secret => "secret_error",
            Self::TtlExpired => "ttl_expired",
            Self::Configuration => "configuration_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The one error type of the access layer.
///
/// Carries a human-readable message and an optional structured details map
/// for diagnostics. Details must never contain secret material.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct VaultError {
    kind: ErrorKind,
    message: String,
    details: serde_json::Map<String, serde_json::Value>,
}

impl VaultError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: serde_json::Map::new(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Policy, message)
    }

    pub fn capability(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Capability, message)
    }

    pub fn secret(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Secret, message)
    }

    pub fn ttl_expired(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TtlExpired, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Attach one diagnostic detail.
    pub fn with_detail(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.details
    }

    /// Returns `true` if reconnecting and retrying at a higher layer may succeed.
    ///
    /// Transient: connection and transport failures.
    /// Permanent: everything else.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Connection | ErrorKind::Transport)
    }

    /// Structured form for JSON output.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.kind.code(),
            "message": self.message,
            "details": self.details,
        })
    }
}

/// Result alias used across the workspace.
pub type Result<T, E = VaultError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let err = VaultError::transport("invalid JSON response");
        assert_eq!(err.to_string(), "transport_error: invalid JSON response");
    }

    #[test]
    fn constructors_set_kind() {
        assert_eq!(VaultError::connection("x").kind(), ErrorKind::Connection);
        assert_eq!(VaultError::authentication("x").kind(), ErrorKind::Authentication);
        assert_eq!(VaultError::policy("x").kind(), ErrorKind::Policy);
        assert_eq!(VaultError::capability("x").kind(), ErrorKind::Capability);
        assert_eq!(VaultError::secret("x").kind(), ErrorKind::Secret);
        assert_eq!(VaultError::ttl_expired("x").kind(), ErrorKind::TtlExpired);
        assert_eq!(VaultError::configuration("x").kind(), ErrorKind::Configuration);
    }

    #[test]
    fn details_are_accumulated() {
        let err = VaultError::transport("bad status")
            .with_detail("status", 503)
            .with_detail("endpoint", "/health");
        assert_eq!(err.details()["status"], 503);
        assert_eq!(err.details()["endpoint"], "/health");
        assert_eq!(err.message(), "bad status");
    }

    #[test]
    fn only_channel_failures_are_retryable() {
        assert!(VaultError::connection("x").is_retryable());
        assert!(VaultError::transport("x").is_retryable());
        assert!(!VaultError::authentication("x").is_retryable());
        assert!(!VaultError::ttl_expired("x").is_retryable());
    }

    #[test]
    fn to_json_uses_stable_code() {
        let json = VaultError::ttl_expired("expired").with_detail("name", "db").to_json();
        assert_eq!(json["code"], "ttl_expired");
        assert_eq!(json["message"], "expired");
        assert_eq!(json["details"]["name"], "db");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_value(ErrorKind::TtlExpired).unwrap();
        assert_eq!(json, "ttl_expired");
    }
}
