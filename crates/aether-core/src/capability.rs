//! Granted capabilities: time-bounded permissions for one intention.
//!
//! A capability is immutable once issued. When it expires or is revoked it is
//! discarded and a new one must be requested.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{Result, VaultError};
use crate::intention::Intention;
use crate::ttl::{Lifetime, RevocationFlag};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    id: String,
    intention: Intention,
    context: Context,
    policy_id: String,
    #[serde(flatten)]
    lifetime: Lifetime,
    #[serde(default)]
    constraints: HashMap<String, serde_json::Value>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
    #[serde(skip)]
    revoked: RevocationFlag,
}

impl Capability {
    /// Build a capability whose expiry is derived from `created_at + ttl`.
    pub fn new(
        id: impl Into<String>,
        intention: Intention,
        context: Context,
        policy_id: impl Into<String>,
        ttl: Duration,
        created_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: id.into(),
            intention,
            context,
            policy_id: policy_id.into(),
            lifetime: Lifetime::new(created_at, ttl),
            constraints: HashMap::new(),
            metadata: HashMap::new(),
            revoked: RevocationFlag::new(),
        }
    }

    pub fn with_constraint(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.constraints.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn intention(&self) -> Intention {
        self.intention
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn policy_id(&self) -> &str {
        &self.policy_id
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

    pub fn constraints(&self) -> &HashMap<String, serde_json::Value> {
        &self.constraints
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
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

    /// Mark this capability unusable for every holder. Terminal.
    pub fn revoke(&self) {
        self.revoked.revoke();
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.is_revoked()
    }

    pub fn is_valid(&self) -> bool {
        !self.is_revoked() && !self.is_expired()
    }

    /// Fails with `Capability` if revoked, `TtlExpired` if past expiry.
    pub fn ensure_valid(&self) -> Result<()> {
        self.ensure_valid_at(Utc::now())
    }

    pub fn ensure_valid_at(&self, now: DateTime<Utc>) -> Result<()> {
        if self.is_revoked() {
            return Err(VaultError::capability(format!("capability {} was revoked", self.id))
                .with_detail("capability_id", self.id.as_str()));
        }
        if self.is_expired_at(now) {
            return Err(VaultError::ttl_expired(format!(
                "capability {} expired at {}",
                self.id,
                self.expires_at().to_rfc3339()
            ))
            .with_detail("capability_id", self.id.as_str()));
        }
        Ok(())
    }
}
