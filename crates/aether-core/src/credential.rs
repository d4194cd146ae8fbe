//! Time-bounded credentials for a specific connection kind.
//!
//! Each credential exclusively owns its secret fields. Before any connector
//! is handed a credential, [`Credential::ensure_usable`] must pass: the
//! credential must not be revoked and must not be past its TTL.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::secret::SecretValue;
use crate::ttl::{Lifetime, RevocationFlag};

/// Kind tag of a credential. Connectors are selected by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Database,
    Api,
    Tls,
    /// Mail relay.
    Smtp,
    /// Remote shell.
    Ssh,
    Custom,
}

impl CredentialKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Api => "api",
            Self::Tls => "tls",
            Self::Smtp => "smtp",
            Self::Ssh => "ssh",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_db_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "require".to_owned()
}

fn default_auth_type() -> String {
    "bearer".to_owned()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_ssh_port() -> u16 {
    22
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSecret {
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: SecretValue,
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default)]
    pub connection_params: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSecret {
    pub base_url: String,
    pub api_key: SecretValue,
    #[serde(default = "default_auth_type")]
    pub auth_type: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl ApiSecret {
    /// `Authorization` header value, e.g. `"Bearer <key>"`. Contains the secret.
    pub fn authorization_header(&self) -> SecretValue {
        let mut scheme = self.auth_type.clone();
        if let Some(first) = scheme.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        let key = String::from_utf8_lossy(self.api_key.as_bytes());
        SecretValue::from_string(format!("{scheme} {key}"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsSecret {
    pub certificate: String,
    pub private_key: SecretValue,
    #[serde(default)]
    pub ca_certificate: Option<String>,
    #[serde(default)]
    pub chain_certificates: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSecret {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: SecretValue,
    #[serde(default = "default_true")]
    pub use_tls: bool,
    #[serde(default)]
    pub use_ssl: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshSecret {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub private_key: SecretValue,
    #[serde(default)]
    pub private_key_password: Option<SecretValue>,
    #[serde(default)]
    pub known_hosts: Option<String>,
}

/// Kind-specific secret payload, tagged by `type` on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialSecret {
    Database(DatabaseSecret),
    Api(ApiSecret),
    Tls(TlsSecret),
    Smtp(SmtpSecret),
    Ssh(SshSecret),
    Custom {
        #[serde(default)]
        fields: HashMap<String, SecretValue>,
    },
}

impl CredentialSecret {
    pub fn kind(&self) -> CredentialKind {
        match self {
            Self::Database(_) => CredentialKind::Database,
            Self::Api(_) => CredentialKind::Api,
            Self::Tls(_) => CredentialKind::Tls,
            Self::Smtp(_) => CredentialKind::Smtp,
            Self::Ssh(_) => CredentialKind::Ssh,
            Self::Custom { .. } => CredentialKind::Custom,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(flatten)]
    lifetime: Lifetime,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
    #[serde(flatten)]
    secret: CredentialSecret,
    #[serde(skip)]
    revoked: RevocationFlag,
}

impl Credential {
    /// Build a credential whose expiry is derived from `created_at + ttl`.
    pub fn new(
        name: impl Into<String>,
        secret: CredentialSecret,
        ttl: Duration,
        created_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            lifetime: Lifetime::new(created_at, ttl),
            metadata: HashMap::new(),
            secret,
            revoked: RevocationFlag::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn kind(&self) -> CredentialKind {
        self.secret.kind()
    }

    pub fn secret(&self) -> &CredentialSecret {
        &self.secret
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    pub fn ttl(&self) -> Duration {
        self.lifetime.ttl()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.lifetime.created_at()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.lifetime.expires_at()
    }

    pub fn is_expired(&self) -> bool {
        self.lifetime.is_expired()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.lifetime.is_expired_at(now)
    }

    pub fn time_to_expiry(&self) -> Duration {
        self.lifetime.time_to_expiry()
    }

    pub fn time_to_expiry_at(&self, now: DateTime<Utc>) -> Duration {
        self.lifetime.time_to_expiry_at(now)
    }

    /// Fails with `TtlExpired` once the credential is past its expiry.
    pub fn validate_ttl(&self) -> Result<()> {
        self.validate_ttl_at(Utc::now())
    }

    pub fn validate_ttl_at(&self, now: DateTime<Utc>) -> Result<()> {
        if self.is_expired_at(now) {
            return Err(VaultError::ttl_expired(format!(
                "credentials {} expired at {}",
                self.name,
                self.expires_at().to_rfc3339()
            ))
            .with_detail("name", self.name.as_str())
            .with_detail("kind", self.kind().as_str()));
        }
        Ok(())
    }

    /// Mark this credential unusable for every holder. Terminal.
    ///
    /// Notifying the vault is the client facade's job.
    pub fn revoke(&self) {
        self.revoked.revoke();
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.is_revoked()
    }

    /// Gate to pass before connector use: not revoked, then not expired.
    pub fn ensure_usable(&self) -> Result<()> {
        self.ensure_usable_at(Utc::now())
    }

    pub fn ensure_usable_at(&self, now: DateTime<Utc>) -> Result<()> {
        if self.is_revoked() {
            return Err(
                VaultError::secret(format!("credentials {} were revoked", self.name))
                    .with_detail("name", self.name.as_str()),
            );
        }
        self.validate_ttl_at(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::TimeDelta;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-10T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn db_secret() -> CredentialSecret {
        CredentialSecret::Database(DatabaseSecret {
            host: "db.internal".into(),
            port: 5432,
            database: "payments".into(),
            username: "svc".into(),
            password: SecretValue::from("pw"),
            ssl_mode: "require".into(),
            connection_params: HashMap::new(),
        })
    }

    #[test]
    fn sixty_second_credential_lifecycle() {
        let cred = Credential::new("db", db_secret(), Duration::from_secs(60), Some(t0()));

        let mid = t0() + TimeDelta::seconds(30);
        assert!(!cred.is_expired_at(mid));
        assert_eq!(cred.time_to_expiry_at(mid), Duration::from_secs(30));
        assert!(cred.validate_ttl_at(mid).is_ok());

        let late = t0() + TimeDelta::seconds(61);
        assert!(cred.is_expired_at(late));
        assert_eq!(cred.time_to_expiry_at(late), Duration::ZERO);
        let err = cred.validate_ttl_at(late).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TtlExpired);
        assert!(err.message().contains("credentials db expired at"));
        assert_eq!(err.details()["kind"], "database");
    }

    #[test]
    fn revoked_credential_is_unusable_before_expiry() {
        let cred = Credential::new("db", db_secret(), Duration::from_secs(3600), None);
        let holder = cred.clone();
        assert!(holder.ensure_usable().is_ok());
        cred.revoke();
        let err = holder.ensure_usable().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Secret);
        assert!(!holder.is_expired());
    }

    #[test]
    fn debug_never_prints_secret() {
        let cred = Credential::new("db", db_secret(), Duration::from_secs(60), None);
        let debug = format!("{cred:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("\"pw\""));
    }

    #[test]
    fn deserializes_database_credential_with_defaults() {
        let cred: Credential = serde_json::from_value(serde_json::json!({
            "type": "database",
            "name": "payments-db",
            "ttl": 60,
            "created_at": "2026-05-10T08:00:00Z",
            "host": "db.internal",
            "database": "payments",
            "username": "svc",
            "password": "pw"
        }))
        .unwrap();
        assert_eq!(cred.kind(), CredentialKind::Database);
        assert_eq!(cred.expires_at(), t0() + TimeDelta::seconds(60));
        match cred.secret() {
            CredentialSecret::Database(db) => {
                assert_eq!(db.port, 5432);
                assert_eq!(db.ssl_mode, "require");
                assert_eq!(db.password.as_str(), Some("pw"));
            }
            other => panic!("unexpected secret kind: {:?}", other.kind()),
        }
    }

    #[test]
    fn deserializes_smtp_and_ssh_defaults() {
        let smtp: Credential = serde_json::from_value(serde_json::json!({
            "type": "smtp", "name": "relay", "ttl": 30,
            "host": "smtp.example.com", "username": "u", "password": "p"
        }))
        .unwrap();
        match smtp.secret() {
            CredentialSecret::Smtp(s) => {
                assert_eq!(s.port, 587);
                assert!(s.use_tls);
                assert!(!s.use_ssl);
            }
            other => panic!("unexpected secret kind: {:?}", other.kind()),
        }

        let ssh: Credential = serde_json::from_value(serde_json::json!({
            "type": "ssh", "name": "bastion", "ttl": 30,
            "host": "bastion", "username": "ops", "private_key": "-----BEGIN KEY-----"
        }))
        .unwrap();
        assert_eq!(ssh.kind(), CredentialKind::Ssh);
        match ssh.secret() {
            CredentialSecret::Ssh(s) => {
                assert_eq!(s.port, 22);
                assert!(s.private_key_password.is_none());
            }
            other => panic!("unexpected secret kind: {:?}", other.kind()),
        }
    }

    #[test]
    fn api_authorization_header_uses_scheme() {
        let secret = ApiSecret {
            base_url: "https://api.example.com".into(),
            api_key: SecretValue::from("k-123"),
            auth_type: "bearer".into(),
            headers: HashMap::new(),
        };
        assert_eq!(secret.authorization_header().as_str(), Some("Bearer k-123"));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let result: std::result::Result<Credential, _> = serde_json::from_value(serde_json::json!({
            "type": "ftp", "name": "x", "ttl": 1
        }));
        assert!(result.is_err());
    }

    #[test]
    fn kind_display_matches_wire_tag() {
        assert_eq!(CredentialKind::Smtp.to_string(), "smtp");
        assert_eq!(
            serde_json::to_value(CredentialKind::Tls).unwrap(),
            serde_json::json!("tls")
        );
    }
}
