//! Transport configuration.
//!
//! A [`TransportConfig`] selects one of the two channels. It can be built in
//! code, loaded from a TOML file, or derived from the environment:
//!
//! ```toml
//! type = "http"
//! base_url = "https://vault.example.com"
//! api_key = "..."
//! timeout = 10
//! retry_attempts = 5
//! retry_delay = 0.5
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use aether_core::error::{Result, VaultError};
use aether_core::secret::SecretValue;
use aether_core::ttl::secs;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Deserializer};

use crate::socket::{self, DEFAULT_SOCKET_PERMISSIONS};

/// Environment variable selecting the network channel.
pub const VAULT_URL_ENV: &str = "AETHER_VAULT_URL";

/// Environment variable holding the network channel API key.
pub const VAULT_API_KEY_ENV: &str = "AETHER_VAULT_API_KEY";

/// Environment variable disabling TLS verification (`1` or `true`).
pub const VAULT_INSECURE_ENV: &str = "AETHER_VAULT_INSECURE";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_delay() -> Duration {
    DEFAULT_RETRY_DELAY
}

fn default_true() -> bool {
    true
}

/// Timeout and retry settings shared by both channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    /// Deadline for one HTTP call, retries included. Unused by the local channel.
    #[serde(default = "default_timeout", with = "secs")]
    pub timeout: Duration,

    /// Total tries per logical request, including the first.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay", with = "secs")]
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    fn validate(&self) -> Result<()> {
        if self.retry_attempts == 0 {
            return Err(VaultError::configuration("retry_attempts must be > 0"));
        }
        if self.timeout.is_zero() {
            return Err(VaultError::configuration("timeout must be > 0"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Local channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct IpcConfig {
    #[serde(default = "socket::socket_path")]
    pub socket_path: PathBuf,

    /// Widest permission bits accepted on the socket file.
    #[serde(
        default = "default_socket_permissions",
        deserialize_with = "socket_permissions"
    )]
    pub socket_permissions: u32,

    #[serde(flatten)]
    pub retry: RetryPolicy,
}

fn default_socket_permissions() -> u32 {
    DEFAULT_SOCKET_PERMISSIONS
}

/// Accepts `"600"`-style octal strings or a raw integer mode (`0o600` in TOML).
fn socket_permissions<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Mode(u32),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(text) => socket::parse_mode(&text).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid socket permissions '{text}'"))
        }),
        Raw::Mode(mode) if mode <= 0o777 => Ok(mode),
        Raw::Mode(mode) => Err(serde::de::Error::custom(format!(
            "invalid socket permissions {mode:o}"
        ))),
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self::new(socket::socket_path())
    }
}

impl IpcConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            socket_permissions: DEFAULT_SOCKET_PERMISSIONS,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_permissions(mut self, mode: u32) -> Self {
        self.socket_permissions = mode;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(VaultError::configuration("socket_path must be non-empty"));
        }
        if self.socket_permissions > 0o777 {
            return Err(VaultError::configuration(format!(
                "invalid socket permissions {:o}",
                self.socket_permissions
            )));
        }
        self.retry.validate()
    }
}

// ---------------------------------------------------------------------------
// Network channel
// ---------------------------------------------------------------------------

#[derive(Clone, Deserialize)]
pub struct HttpConfig {
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<SecretValue>,

    #[serde(default = "default_true")]
    pub verify_ssl: bool,

    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(flatten)]
    pub retry: RetryPolicy,
}

impl fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("verify_ssl", &self.verify_ssl)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("retry", &self.retry)
            .finish()
    }
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            verify_ssl: true,
            headers: HashMap::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<SecretValue>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_verify_ssl(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_https(&self) -> bool {
        self.base_url.starts_with("https://")
    }

    fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            VaultError::configuration(format!("invalid base_url '{}': {e}", self.base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(VaultError::configuration(format!(
                "unsupported URL scheme '{}' (expected http or https)",
                url.scheme()
            )));
        }

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                VaultError::configuration(format!("invalid header name '{name}'"))
            })?;
            HeaderValue::from_str(value).map_err(|_| {
                VaultError::configuration(format!("invalid value for header '{name}'"))
            })?;
        }

        if let Some(key) = &self.api_key
            && HeaderValue::from_bytes(key.as_bytes()).is_err()
        {
            return Err(VaultError::configuration(
                "api_key contains characters not allowed in a header",
            ));
        }

        self.retry.validate()
    }
}

// ---------------------------------------------------------------------------
// Channel selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Ipc(IpcConfig),
    #[serde(alias = "https")]
    Http(HttpConfig),
}

impl TransportConfig {
    pub fn retry(&self) -> &RetryPolicy {
        match self {
            Self::Ipc(c) => &c.retry,
            Self::Http(c) => &c.retry,
        }
    }

    /// Reject configurations no transport can work with.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Ipc(c) => c.validate(),
            Self::Http(c) => c.validate(),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|e| VaultError::configuration(format!("invalid transport config: {e}")))
    }

    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            VaultError::configuration(format!("cannot read config {}: {e}", path.display()))
                .with_detail("path", path.display().to_string())
        })?;
        let config = Self::from_toml_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Derive a config from the process environment.
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Derive a config from `lookup`.
    ///
    /// `AETHER_VAULT_URL` selects the network channel; otherwise the local
    /// agent socket is used.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        match lookup(VAULT_URL_ENV).filter(|url| !url.trim().is_empty()) {
            Some(base_url) => {
                let insecure = lookup(VAULT_INSECURE_ENV)
                    .is_some_and(|v| matches!(v.trim(), "1" | "true"));
                let mut config = HttpConfig::new(base_url.trim()).with_verify_ssl(!insecure);
                if let Some(key) = lookup(VAULT_API_KEY_ENV).filter(|k| !k.is_empty()) {
                    config = config.with_api_key(SecretValue::from_string(key));
                }
                Self::Http(config)
            }
            None => Self::Ipc(IpcConfig::default()),
        }
    }
}

impl From<IpcConfig> for TransportConfig {
    fn from(config: IpcConfig) -> Self {
        Self::Ipc(config)
    }
}

impl From<HttpConfig> for TransportConfig {
    fn from(config: HttpConfig) -> Self {
        Self::Http(config)
    }
}
