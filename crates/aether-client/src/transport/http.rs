//! HTTP(S) transport with bounded retries.
//!
//! The configured timeout bounds a whole logical request, retries included.
//!
//! Retry rules per logical request:
//! - 2xx is returned as success
//! - 401 fails immediately with an authentication error
//! - 5xx is retried after `retry_delay`; on the last attempt it is returned
//! - any other status is returned as a non-success response without retry
//! - channel failures (refused, reset, timeout) are retried; the last one
//!   becomes a transport error

use std::collections::HashMap;

use aether_core::error::{Result, VaultError};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, info, warn};

use super::{Transport, TransportFuture, TransportKind, TransportResponse};
use crate::config::HttpConfig;

fn user_agent() -> String {
    format!("aether-vault-client/{}", env!("CARGO_PKG_VERSION"))
}

/// `base` without trailing slashes, `/`, then `endpoint` without leading ones.
pub(crate) fn join_url(base: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

/// Response fully read off the wire, before any retry decision.
struct RawResponse {
    status: StatusCode,
    headers: HashMap<String, String>,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl RawResponse {
    fn into_response(self) -> TransportResponse {
        let data = decode_body(self.content_type.as_deref(), &self.body);
        TransportResponse::from_status(self.status.as_u16(), data, self.headers)
    }
}

/// Decode a response body. Never fails: undecodable bodies become
/// `{"text": <raw>}` and empty bodies become `None`.
fn decode_body(content_type: Option<&str>, body: &[u8]) -> Option<serde_json::Value> {
    if body.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_slice(body) {
        return Some(value);
    }
    let declared_json = content_type
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
    if declared_json {
        debug!("response declared JSON but did not decode; keeping raw text");
    }
    Some(serde_json::json!({ "text": String::from_utf8_lossy(body) }))
}

#[derive(Debug)]
pub struct HttpTransport {
    config: HttpConfig,
    client: Option<Client>,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn build_client(&self) -> Result<Client> {
        let mut defaults = HeaderMap::new();
        for (name, value) in &self.config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                VaultError::configuration(format!("invalid header name '{name}'"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                VaultError::configuration(format!("invalid value for header '{name}'"))
            })?;
            defaults.insert(name, value);
        }

        Client::builder()
            .user_agent(user_agent())
            .timeout(self.config.retry.timeout)
            .danger_accept_invalid_certs(!self.config.verify_ssl)
            .default_headers(defaults)
            .build()
            .map_err(|e| VaultError::connection(format!("failed to build HTTP client: {e}")))
    }

    /// Caller headers, then the bearer key on top.
    fn request_headers(&self, extra: HashMap<String, String>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in extra {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| VaultError::transport(format!("invalid header name '{name}'")))?;
            let header_value = HeaderValue::from_str(&value).map_err(|_| {
                VaultError::transport(format!("invalid value for header '{name}'"))
            })?;
            headers.insert(header_name, header_value);
        }

        if let Some(key) = &self.config.api_key {
            let mut bearer = Vec::with_capacity(key.as_bytes().len() + 7);
            bearer.extend_from_slice(b"Bearer ");
            bearer.extend_from_slice(key.as_bytes());
            let mut value = HeaderValue::from_bytes(&bearer).map_err(|_| {
                VaultError::configuration("api_key contains characters not allowed in a header")
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }
}

async fn attempt(
    client: &Client,
    method: &Method,
    url: &str,
    headers: &HeaderMap,
    data: Option<&serde_json::Value>,
) -> std::result::Result<RawResponse, reqwest::Error> {
    let mut builder = client.request(method.clone(), url).headers(headers.clone());
    if let Some(body) = data {
        builder = builder.json(body);
    }
    let response = builder.send().await?;

    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(k, v)| Some((k.as_str().to_owned(), v.to_str().ok()?.to_owned())))
        .collect();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = response.bytes().await?.to_vec();

    Ok(RawResponse {
        status,
        headers,
        content_type,
        body,
    })
}

impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn connect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.client.is_some() {
                return Err(VaultError::connection("HTTP transport already connected"));
            }
            self.client = Some(self.build_client()?);
            if !self.config.verify_ssl {
                warn!(base_url = %self.config.base_url, "TLS certificate verification disabled");
            }
            info!(base_url = %self.config.base_url, "HTTP session established");
            Ok(())
        })
    }

    fn close(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.client.take().is_some() {
                info!("HTTP session closed");
            }
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
            let client = self
                .client
                .as_ref()
                .ok_or_else(|| VaultError::connection("HTTP session not established"))?;
            let http_method = Method::from_bytes(method.as_bytes())
                .map_err(|_| VaultError::transport(format!("invalid HTTP method '{method}'")))?;
            let url = join_url(&self.config.base_url, endpoint);
            let headers = self.request_headers(headers)?;

            let attempts = self.config.retry.retry_attempts.max(1);
            let delay = self.config.retry.retry_delay;
            let deadline = self.config.retry.timeout;

            let retrying = async {
                let mut tried = 0;
                loop {
                    tried += 1;
                    let last = tried >= attempts;
                    debug!(method, %url, attempt = tried, "sending HTTP request");

                    match attempt(client, &http_method, &url, &headers, data.as_ref()).await {
                        Ok(raw) if raw.status == StatusCode::UNAUTHORIZED => {
                            return Err(VaultError::authentication(
                                "authentication failed: invalid API key",
                            )
                            .with_detail("status_code", 401));
                        }
                        Ok(raw) if raw.status.is_server_error() && !last => {
                            warn!(
                                status = raw.status.as_u16(),
                                attempt = tried,
                                attempts,
                                "server error, retrying"
                            );
                        }
                        Ok(raw) => return Ok(raw.into_response()),
                        Err(e) if last => {
                            return Err(VaultError::transport(format!(
                                "HTTP request failed after {attempts} attempts: {e}"
                            ))
                            .with_detail("url", url.as_str()));
                        }
                        Err(e) => {
                            warn!(
                                error = %e,
                                attempt = tried,
                                attempts,
                                "HTTP request failed, retrying"
                            );
                        }
                    }

                    tokio::time::sleep(delay).await;
                }
            };

            tokio::time::timeout(deadline, retrying).await.map_err(|_| {
                VaultError::transport(format!("HTTP request timed out after {deadline:?}"))
                    .with_detail("url", url.as_str())
            })?
        })
    }
}
