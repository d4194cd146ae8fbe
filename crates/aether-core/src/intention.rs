//! Intentions: the action a capability request seeks to perform.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VaultError;

/// Closed set of requestable actions, written `"<domain>:<action>"` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Intention {
    #[serde(rename = "database:read")]
    DatabaseRead,
    #[serde(rename = "database:write")]
    DatabaseWrite,
    #[serde(rename = "database:admin")]
    DatabaseAdmin,
    #[serde(rename = "api:read")]
    ApiRead,
    #[serde(rename = "api:write")]
    ApiWrite,
    #[serde(rename = "api:admin")]
    ApiAdmin,
    #[serde(rename = "secret:read")]
    SecretRead,
    #[serde(rename = "secret:write")]
    SecretWrite,
    #[serde(rename = "secret:rotate")]
    SecretRotate,
    #[serde(rename = "file:read")]
    FileRead,
    #[serde(rename = "file:write")]
    FileWrite,
    #[serde(rename = "system:admin")]
    SystemAdmin,
}

impl Intention {
    pub const ALL: [Intention; 12] = [
        Self::DatabaseRead,
        Self::DatabaseWrite,
        Self::DatabaseAdmin,
        Self::ApiRead,
        Self::ApiWrite,
        Self::ApiAdmin,
        Self::SecretRead,
        Self::SecretWrite,
        Self::SecretRotate,
        Self::FileRead,
        Self::FileWrite,
        Self::SystemAdmin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DatabaseRead => "database:read",
            Self::DatabaseWrite => "database:write",
            Self::DatabaseAdmin => "database:admin",
            Self::ApiRead => "api:read",
            Self::ApiWrite => "api:write",
            Self::ApiAdmin => "api:admin",
            Self::SecretRead => "secret:read",
            Self::SecretWrite => "secret:write",
            Self::SecretRotate => "secret:rotate",
            Self::FileRead => "file:read",
            Self::FileWrite => "file:write",
            Self::SystemAdmin => "system:admin",
        }
    }

    /// Resource domain, e.g. `"database"`.
    pub fn domain(self) -> &'static str {
        self.split().0
    }

    /// Action within the domain, e.g. `"read"`.
    pub fn action(self) -> &'static str {
        self.split().1
    }

    pub fn is_admin(self) -> bool {
        self.action() == "admin"
    }

    fn split(self) -> (&'static str, &'static str) {
        // Every tag contains exactly one ':'.
        self.as_str().split_once(':').unwrap_or((self.as_str(), ""))
    }
}

impl fmt::Display for Intention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intention {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|intention| intention.as_str() == s)
            .ok_or_else(|| {
                VaultError::policy(format!("unknown intention '{s}'")).with_detail("intention", s)
            })
    }
}
