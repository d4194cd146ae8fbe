//! Request/response channels to the vault.
//!
//! Two implementations share the [`Transport`] contract: [`IpcTransport`]
//! speaks newline-delimited JSON over a Unix socket, [`HttpTransport`] speaks
//! HTTP(S) with bounded retries. Use [`create_transport`] to pick one from a
//! [`TransportConfig`].

mod http;
mod ipc;

pub use http::HttpTransport;
pub use ipc::IpcTransport;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use aether_core::error::Result;
use serde::Serialize;
use tracing::debug;

use crate::config::TransportConfig;

/// Endpoint polled by [`Transport::health_check`].
pub const HEALTH_ENDPOINT: &str = "/health";

/// Boxed future returned by transport operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ipc,
    Http,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ipc => "ipc",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one logical request.
///
/// `success` holds exactly when `status_code` is in 200..=299, and `error` is
/// set whenever `success` is false.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportResponse {
    pub status_code: u16,
    pub data: Option<serde_json::Value>,
    pub headers: HashMap<String, String>,
    pub success: bool,
    pub error: Option<String>,
}

impl TransportResponse {
    /// Build a response, deriving `success` from the status and `error` from
    /// the payload's `"error"` field (or `"HTTP <status>"`).
    pub fn from_status(
        status_code: u16,
        data: Option<serde_json::Value>,
        headers: HashMap<String, String>,
    ) -> Self {
        let success = is_success(status_code);
        let error = (!success).then(|| error_message(status_code, data.as_ref()));
        Self {
            status_code,
            data,
            headers,
            success,
            error,
        }
    }

    /// The `"error"` string of the payload, if any.
    pub fn payload_error(&self) -> Option<&str> {
        self.data.as_ref()?.get("error")?.as_str()
    }
}

pub(crate) fn is_success(status_code: u16) -> bool {
    (200..300).contains(&status_code)
}

fn error_message(status_code: u16, data: Option<&serde_json::Value>) -> String {
    data.and_then(|d| d.get("error"))
        .and_then(|e| e.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| format!("HTTP {status_code}"))
}

/// A connection-oriented request/response channel.
///
/// Operations take `&mut self`, so at most one request is in flight per
/// transport. Share one across tasks behind a mutex.
pub trait Transport: Send + fmt::Debug {
    fn kind(&self) -> TransportKind;

    fn is_connected(&self) -> bool;

    /// Establish the channel. Fails with a connection error when already
    /// connected or when the endpoint cannot be reached.
    fn connect(&mut self) -> TransportFuture<'_, ()>;

    /// Release the channel. Closing a closed transport is a no-op.
    fn close(&mut self) -> TransportFuture<'_, ()>;

    /// Send one request and wait for its response.
    fn send_request<'a>(
        &'a mut self,
        method: &'a str,
        endpoint: &'a str,
        data: Option<serde_json::Value>,
        headers: HashMap<String, String>,
    ) -> TransportFuture<'a, TransportResponse>;

    /// `GET /health`; true only for a successful 200. Never errors.
    fn health_check(&mut self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            let result = self
                .send_request("GET", HEALTH_ENDPOINT, None, HashMap::new())
                .await;
            match result {
                Ok(response) => response.success && response.status_code == 200,
                Err(e) => {
                    debug!(kind = %self.kind(), error = %e, "health check failed");
                    false
                }
            }
        })
    }
}

/// Validate `config` and build the matching (unconnected) transport.
pub fn create_transport(config: &TransportConfig) -> Result<Box<dyn Transport>> {
    config.validate()?;
    let transport: Box<dyn Transport> = match config {
        TransportConfig::Ipc(c) => Box::new(IpcTransport::new(c.clone())),
        TransportConfig::Http(c) => Box::new(HttpTransport::new(c.clone())),
    };
    debug!(kind = %transport.kind(), "transport created");
    Ok(transport)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{HttpConfig, IpcConfig};
    use aether_core::error::{ErrorKind, VaultError};

    /// Scripted in-memory transport shared by facade tests.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedTransport {
        pub connected: bool,
        pub responses: Vec<Result<TransportResponse>>,
        pub requests: Vec<(String, String, Option<serde_json::Value>, HashMap<String, String>)>,
    }

    impl Transport for ScriptedTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Ipc
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn connect(&mut self) -> TransportFuture<'_, ()> {
            Box::pin(async move {
                self.connected = true;
                Ok(())
            })
        }

        fn close(&mut self) -> TransportFuture<'_, ()> {
            Box::pin(async move {
                self.connected = false;
                Ok(())
            })
        }

        fn send_request<'a>(
            &'a mut self,
            method: &'a str,
            endpoint: &'a str,
            data: Option<serde_json::Value>,
            headers: HashMap<String, String>,
        ) -> TransportFuture<'a, TransportResponse> {
            Box::pin(async move {
                self.requests
                    .push((method.to_owned(), endpoint.to_owned(), data, headers));
                if self.responses.is_empty() {
                    return Err(VaultError::transport("no scripted response"));
                }
                self.responses.remove(0)
            })
        }
    }

    #[test]
    fn from_status_derives_success_and_error() {
        let ok = TransportResponse::from_status(204, None, HashMap::new());
        assert!(ok.success);
        assert!(ok.error.is_none());

        let denied = TransportResponse::from_status(
            403,
            Some(serde_json::json!({ "error": "policy denied" })),
            HashMap::new(),
        );
        assert!(!denied.success);
        assert_eq!(denied.error.as_deref(), Some("policy denied"));
        assert_eq!(denied.payload_error(), Some("policy denied"));

        let bare = TransportResponse::from_status(502, None, HashMap::new());
        assert_eq!(bare.error.as_deref(), Some("HTTP 502"));
    }

    #[tokio::test]
    async fn health_check_true_only_for_200() {
        let mut transport = ScriptedTransport {
            responses: vec![
                Ok(TransportResponse::from_status(200, None, HashMap::new())),
                Ok(TransportResponse::from_status(204, None, HashMap::new())),
                Ok(TransportResponse::from_status(503, None, HashMap::new())),
            ],
            ..Default::default()
        };
        assert!(transport.health_check().await);
        assert!(!transport.health_check().await);
        assert!(!transport.health_check().await);
        assert_eq!(transport.requests[0].0, "GET");
        assert_eq!(transport.requests[0].1, HEALTH_ENDPOINT);
    }

    #[tokio::test]
    async fn health_check_swallows_errors() {
        let mut transport = ScriptedTransport {
            responses: vec![Err(VaultError::connection("socket gone"))],
            ..Default::default()
        };
        assert!(!transport.health_check().await);
    }

    #[test]
    fn create_transport_dispatches_on_config() {
        let ipc = create_transport(&IpcConfig::new("/tmp/aether-test.sock").into()).unwrap();
        assert_eq!(ipc.kind(), TransportKind::Ipc);
        assert!(!ipc.is_connected());

        let http =
            create_transport(&HttpConfig::new("https://vault.example.com").into()).unwrap();
        assert_eq!(http.kind(), TransportKind::Http);
        assert!(!http.is_connected());
    }

    #[test]
    fn create_transport_rejects_invalid_config() {
        let err = create_transport(&HttpConfig::new("vault.example.com").into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
