//! High-level vault client.
//!
//! [`VaultClient`] wraps one [`Transport`] and adds authentication state,
//! capability and credential requests, and revocation. Requests through one
//! client are serialized.

use std::collections::HashMap;
use std::time::Duration;

use aether_core::capability::Capability;
use aether_core::context::Context;
use aether_core::credential::Credential;
use aether_core::error::{Result, VaultError};
use aether_core::intention::Intention;
use aether_core::secret::SecretValue;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::transport::{Transport, TransportKind, TransportResponse, create_transport};

pub const AUTH_ENDPOINT: &str = "/auth/authenticate";
pub const CAPABILITY_ENDPOINT: &str = "/capabilities/request";
pub const CREDENTIAL_ENDPOINT: &str = "/credentials/request";

/// Header carrying the session token returned by authentication.
pub const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";

#[derive(Debug)]
struct Session {
    transport: Box<dyn Transport>,
    authenticated: bool,
    token: Option<SecretValue>,
}

#[derive(Debug)]
pub struct VaultClient {
    kind: TransportKind,
    session: Mutex<Session>,
}

/// Map a non-success response onto the error taxonomy.
fn status_error(response: &TransportResponse) -> VaultError {
    let message = response
        .error
        .clone()
        .unwrap_or_else(|| format!("HTTP {}", response.status_code));
    let err = match response.status_code {
        401 => VaultError::authentication(message),
        403 => VaultError::capability(message),
        400 | 422 => VaultError::policy(message),
        404 => VaultError::secret(message),
        _ => VaultError::transport(message),
    };
    err.with_detail("status_code", response.status_code)
}

/// Decode `data`, or `data[field]` when the payload wraps the entity.
fn hydrate<T: DeserializeOwned>(
    data: Option<serde_json::Value>,
    field: &str,
) -> std::result::Result<T, String> {
    let mut value = data.ok_or_else(|| "response carried no payload".to_owned())?;
    if let Some(inner) = value.get_mut(field).map(serde_json::Value::take) {
        value = inner;
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// Percent-encode `value` as a single path segment. Empty and dot segments
/// have no safe encoding and are refused.
fn path_segment(value: &str) -> Option<String> {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    if matches!(value, "" | "." | "..") {
        return None;
    }
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[usize::from(b >> 4)] as char);
            out.push(HEX[usize::from(b & 0x0F)] as char);
        }
    }
    Some(out)
}

impl VaultClient {
    /// Build a transport from `config` and connect it.
    pub async fn connect(config: &TransportConfig) -> Result<Self> {
        Self::with_transport(create_transport(config)?).await
    }

    /// Wrap an existing transport, connecting it if needed.
    pub async fn with_transport(mut transport: Box<dyn Transport>) -> Result<Self> {
        if !transport.is_connected() {
            transport.connect().await?;
        }
        Ok(Self {
            kind: transport.kind(),
            session: Mutex::new(Session {
                transport,
                authenticated: false,
                token: None,
            }),
        })
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.lock().await.authenticated
    }

    /// Authenticate with the vault. Credentials are passed through as-is.
    pub async fn authenticate(&self, credentials: serde_json::Value) -> Result<bool> {
        let mut session = self.session.lock().await;
        session.authenticated = false;
        session.token = None;

        let response = session
            .transport
            .send_request("POST", AUTH_ENDPOINT, Some(credentials), HashMap::new())
            .await?;
        if !response.success {
            let reason = response.error.as_deref().unwrap_or("rejected");
            return Err(
                VaultError::authentication(format!("authentication failed: {reason}"))
                    .with_detail("status_code", response.status_code),
            );
        }

        session.token = response
            .data
            .as_ref()
            .and_then(|d| d.get("token"))
            .and_then(|t| t.as_str())
            .map(SecretValue::from);
        session.authenticated = true;
        info!(kind = %self.kind, "authenticated with vault");
        Ok(true)
    }

    /// Authenticated `POST`; non-success responses become errors.
    async fn post(&self, endpoint: &str, body: serde_json::Value) -> Result<TransportResponse> {
        let mut session = self.session.lock().await;
        if !session.authenticated {
            return Err(VaultError::authentication("client is not authenticated"));
        }

        let mut headers = HashMap::new();
        if let Some(token) = &session.token
            && let Some(token) = token.as_str()
        {
            headers.insert(VAULT_TOKEN_HEADER.to_owned(), token.to_owned());
        }

        let response = session
            .transport
            .send_request("POST", endpoint, Some(body), headers)
            .await?;
        if !response.success {
            debug!(endpoint, status = response.status_code, "vault rejected request");
            return Err(status_error(&response).with_detail("endpoint", endpoint));
        }
        Ok(response)
    }

    /// Submit a capability request for `intention`.
    ///
    /// A request id is attached to the context when it has none.
    pub async fn request(
        &self,
        intention: Intention,
        context: Option<&Context>,
        data: Option<serde_json::Value>,
    ) -> Result<TransportResponse> {
        let context = match context {
            Some(ctx) if ctx.request_id().is_some() => ctx.clone(),
            Some(ctx) => ctx.with_request_id(),
            None => Context::default().with_request_id(),
        };
        let body = serde_json::json!({
            "intention": intention,
            "context": context,
            "data": data.unwrap_or_else(|| serde_json::json!({})),
        });
        self.post(CAPABILITY_ENDPOINT, body).await
    }

    /// Request a capability for `intention` lasting at most `ttl`.
    pub async fn request_capability(
        &self,
        intention: Intention,
        context: &Context,
        ttl: Duration,
    ) -> Result<Capability> {
        let data = serde_json::json!({ "ttl": ttl.as_secs_f64() });
        let response = self.request(intention, Some(context), Some(data)).await?;

        let capability: Capability = hydrate(response.data, "capability").map_err(|e| {
            VaultError::capability(format!("malformed capability in response: {e}"))
                .with_detail("intention", intention.as_str())
        })?;
        if capability.intention() != intention {
            return Err(VaultError::capability(format!(
                "vault granted {} for a {intention} request",
                capability.intention()
            ))
            .with_detail("capability_id", capability.id()));
        }
        info!(
            capability_id = capability.id(),
            %intention,
            expires_at = %capability.expires_at(),
            "capability granted"
        );
        Ok(capability)
    }

    /// Fetch the named credential under `intention`.
    pub async fn request_credential(
        &self,
        name: &str,
        intention: Intention,
        context: &Context,
    ) -> Result<Credential> {
        let context = if context.request_id().is_some() {
            context.clone()
        } else {
            context.with_request_id()
        };
        let body = serde_json::json!({
            "name": name,
            "intention": intention,
            "context": context,
        });
        let response = self.post(CREDENTIAL_ENDPOINT, body).await?;

        let credential: Credential = hydrate(response.data, "credential").map_err(|e| {
            VaultError::secret(format!("malformed credential in response: {e}"))
                .with_detail("name", name)
        })?;
        info!(
            name = credential.name(),
            kind = %credential.kind(),
            expires_at = %credential.expires_at(),
            "credential issued"
        );
        Ok(credential)
    }

    /// Revoke locally, then tell the vault.
    ///
    /// The local revocation stands even if the vault call fails.
    pub async fn revoke_capability(&self, capability: &Capability) -> Result<()> {
        capability.revoke();
        let id = path_segment(capability.id()).ok_or_else(|| {
            VaultError::capability("capability id is not a valid path segment")
                .with_detail("capability_id", capability.id())
        })?;
        let endpoint = format!("/capabilities/{id}/revoke");
        self.post(&endpoint, serde_json::json!({})).await?;
        info!(capability_id = capability.id(), "capability revoked");
        Ok(())
    }

    /// Revoke locally, then tell the vault.
    pub async fn revoke_credential(&self, credential: &Credential) -> Result<()> {
        credential.revoke();
        let name = path_segment(credential.name()).ok_or_else(|| {
            VaultError::secret("credential name is not a valid path segment")
                .with_detail("name", credential.name())
        })?;
        let endpoint = format!("/credentials/{name}/revoke");
        self.post(&endpoint, serde_json::json!({})).await?;
        info!(name = credential.name(), "credential revoked");
        Ok(())
    }

    pub async fn health_check(&self) -> bool {
        self.session.lock().await.transport.health_check().await
    }

    /// Close the transport and forget the session. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        session.authenticated = false;
        session.token = None;
        if session.transport.is_connected()
            && let Err(e) = session.transport.close().await
        {
            warn!(error = %e, "error closing transport");
            return Err(e);
        }
        Ok(())
    }
}
