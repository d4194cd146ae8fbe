//! Request context: who is asking, from where, and when.
//!
//! A [`Context`] is an immutable snapshot. It never carries secrets.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Environment label used when none is given.
pub const DEFAULT_ENVIRONMENT: &str = "production";

fn default_environment() -> String {
    DEFAULT_ENVIRONMENT.to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    service_id: Option<String>,

    #[serde(default = "default_environment")]
    environment: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    region: Option<String>,

    /// Correlation id for end-to-end tracing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,

    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,

    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

impl Default for Context {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn service_id(&self) -> Option<&str> {
        self.service_id.as_deref()
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Whether the named context field is present.
    ///
    /// Unknown names are looked up in `metadata`.
    pub fn has_field(&self, name: &str) -> bool {
        match name {
            "user_id" => self.user_id.is_some(),
            "service_id" => self.service_id.is_some(),
            "environment" => !self.environment.is_empty(),
            "region" => self.region.is_some(),
            "request_id" => self.request_id.is_some(),
            "timestamp" => true,
            other => self.metadata.contains_key(other),
        }
    }

    /// Copy of this context carrying a fresh correlation id.
    pub fn with_request_id(&self) -> Self {
        Self {
            request_id: Some(Uuid::new_v4().to_string()),
            ..self.clone()
        }
    }
}

#[derive(Debug, Default)]
pub struct ContextBuilder {
    user_id: Option<String>,
    service_id: Option<String>,
    environment: Option<String>,
    region: Option<String>,
    request_id: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    metadata: HashMap<String, serde_json::Value>,
}

impl ContextBuilder {
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Context {
        Context {
            user_id: self.user_id,
            service_id: self.service_id,
            environment: self.environment.unwrap_or_else(default_environment),
            region: self.region,
            request_id: self.request_id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            metadata: self.metadata,
        }
    }
}
