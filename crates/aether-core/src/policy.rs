//! Vault-issued policies.
//!
//! The client only deserializes and reads policies. Evaluation is the vault's
//! job; the helpers here answer local questions about a policy document
//! (is this intention listed, which context fields are missing, what TTL cap
//! applies) without authoring or mutating it.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::context::Context;
use crate::error::{Result, VaultError};
use crate::intention::Intention;

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct Policy {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    intentions: Vec<Intention>,
    #[serde(default)]
    constraints: HashMap<Intention, serde_json::Value>,
    /// Per-intention TTL caps, in seconds on the wire.
    #[serde(default, deserialize_with = "ttl_limits")]
    ttl_limits: HashMap<Intention, Duration>,
    /// Context fields that must be present for the policy to apply.
    #[serde(default)]
    required_context: Vec<String>,
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
}

fn ttl_limits<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<HashMap<Intention, Duration>, D::Error> {
    let raw = HashMap::<Intention, f64>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(intention, secs)| {
            Duration::try_from_secs_f64(secs)
                .map(|ttl| (intention, ttl))
                .map_err(|e| {
                    serde::de::Error::custom(format!("invalid ttl limit for {intention}: {e}"))
                })
        })
        .collect()
}

impl Policy {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn intentions(&self) -> &[Intention] {
        &self.intentions
    }

    pub fn constraints(&self) -> &HashMap<Intention, serde_json::Value> {
        &self.constraints
    }

    pub fn ttl_limits(&self) -> &HashMap<Intention, Duration> {
        &self.ttl_limits
    }

    pub fn required_context(&self) -> &[String] {
        &self.required_context
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Whether the policy lists this intention.
    pub fn permits(&self, intention: Intention) -> bool {
        self.intentions.contains(&intention)
    }

    pub fn ttl_limit(&self, intention: Intention) -> Option<Duration> {
        self.ttl_limits.get(&intention).copied()
    }

    pub fn constraints_for(&self, intention: Intention) -> Option<&serde_json::Value> {
        self.constraints.get(&intention)
    }

    /// Required context fields absent from `context`, in declaration order.
    pub fn missing_context<'a>(&'a self, context: &Context) -> Vec<&'a str> {
        self.required_context
            .iter()
            .map(String::as_str)
            .filter(|field| !context.has_field(field))
            .collect()
    }

    pub fn applies_to(&self, context: &Context) -> bool {
        self.missing_context(context).is_empty()
    }

    /// Check `intention` under `context` against this document.
    ///
    /// Returns a `Policy` error naming the first violated rule.
    pub fn check(&self, intention: Intention, context: &Context) -> Result<()> {
        if !self.permits(intention) {
            return Err(VaultError::policy(format!(
                "policy '{}' does not permit {intention}",
                self.name
            ))
            .with_detail("policy_id", self.id.as_str())
            .with_detail("intention", intention.as_str()));
        }

        if let Some(field) = self.missing_context(context).first() {
            return Err(VaultError::policy(format!(
                "policy '{}' requires context field '{field}'",
                self.name
            ))
            .with_detail("policy_id", self.id.as_str())
            .with_detail("field", *field));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sample_policy() -> Policy {
        serde_json::from_value(serde_json::json!({
            "id": "pol-1",
            "name": "payments-db",
            "intentions": ["database:read", "database:write"],
            "constraints": { "database:write": { "max_rows": 100 } },
            "ttl_limits": { "database:read": 3600, "database:write": 300 },
            "required_context": ["service_id", "region"],
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-02-01T00:00:00Z"
        }))
        .unwrap()
    }

    #[test]
    fn deserializes_vault_document() {
        let policy = sample_policy();
        assert_eq!(policy.id(), "pol-1");
        assert_eq!(policy.name(), "payments-db");
        assert_eq!(policy.version(), 1);
        assert!(policy.description().is_none());
        assert_eq!(policy.intentions().len(), 2);
        assert!(policy.updated_at() > policy.created_at());
    }

    #[test]
    fn permits_only_listed_intentions() {
        let policy = sample_policy();
        assert!(policy.permits(Intention::DatabaseRead));
        assert!(!policy.permits(Intention::DatabaseAdmin));
    }

    #[test]
    fn ttl_limits_are_seconds() {
        let policy = sample_policy();
        assert_eq!(
            policy.ttl_limit(Intention::DatabaseWrite),
            Some(Duration::from_secs(300))
        );
        assert_eq!(policy.ttl_limit(Intention::SecretRead), None);
    }

    #[test]
    fn constraints_lookup_by_intention() {
        let policy = sample_policy();
        assert_eq!(
            policy.constraints_for(Intention::DatabaseWrite).unwrap()["max_rows"],
            100
        );
        assert!(policy.constraints_for(Intention::DatabaseRead).is_none());
    }

    #[test]
    fn missing_context_reports_absent_fields() {
        let policy = sample_policy();
        let ctx = Context::builder().service_id("billing").build();
        assert_eq!(policy.missing_context(&ctx), vec!["region"]);
        assert!(!policy.applies_to(&ctx));

        let full = Context::builder().service_id("billing").region("eu-west-1").build();
        assert!(policy.applies_to(&full));
    }

    #[test]
    fn check_rejects_unlisted_intention() {
        let policy = sample_policy();
        let ctx = Context::builder().service_id("s").region("r").build();
        let err = policy.check(Intention::SystemAdmin, &ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Policy);
        assert_eq!(err.details()["intention"], "system:admin");
    }

    #[test]
    fn check_rejects_missing_context() {
        let policy = sample_policy();
        let err = policy
            .check(Intention::DatabaseRead, &Context::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Policy);
        assert_eq!(err.details()["field"], "service_id");
    }

    #[test]
    fn check_accepts_matching_request() {
        let policy = sample_policy();
        let ctx = Context::builder().service_id("s").region("r").build();
        assert!(policy.check(Intention::DatabaseWrite, &ctx).is_ok());
    }

    #[test]
    fn unknown_intention_in_document_is_rejected() {
        let result: std::result::Result<Policy, _> = serde_json::from_value(serde_json::json!({
            "id": "p", "name": "n", "intentions": ["database:drop"]
        }));
        assert!(result.is_err());
    }
}
