//! Newline-delimited JSON over a Unix domain socket.
//!
//! Each request is one [`IpcRequest`] line; the agent answers with exactly
//! one [`IpcResponse`] line. Responses are matched purely by order. There are
//! no retries and no built-in timeout on this channel.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use aether_core::MAX_FRAME_LENGTH;
use aether_core::error::{Result, VaultError};
use aether_core::proto::{IpcRequest, IpcResponse};
use futures_util::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use super::{Transport, TransportFuture, TransportKind, TransportResponse, is_success};
use crate::config::IpcConfig;
use crate::socket::verify_socket_safety;

type LineStream = Framed<UnixStream, LinesCodec>;

#[derive(Debug)]
pub struct IpcTransport {
    config: IpcConfig,
    framed: Option<LineStream>,
}

impl IpcTransport {
    pub fn new(config: IpcConfig) -> Self {
        Self {
            config,
            framed: None,
        }
    }

    pub fn config(&self) -> &IpcConfig {
        &self.config
    }
}

fn connect_error(path: &Path, e: io::Error) -> VaultError {
    let message = match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => format!(
            "failed to connect to IPC socket {}: {e} (is the vault agent running?)",
            path.display()
        ),
        _ => format!("IPC socket error at {}: {e}", path.display()),
    };
    VaultError::connection(message).with_detail("socket_path", path.display().to_string())
}

fn codec_error(e: LinesCodecError) -> VaultError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => VaultError::transport(format!(
            "IPC response exceeds {MAX_FRAME_LENGTH} bytes"
        )),
        LinesCodecError::Io(e) => VaultError::transport(format!("IPC channel error: {e}")),
    }
}

/// Write one line and read one line back.
async fn exchange(framed: &mut LineStream, line: String) -> Result<String> {
    framed.send(line).await.map_err(codec_error)?;
    let Some(frame) = framed.next().await else {
        return Err(VaultError::transport(
            "no response from IPC socket (connection closed)",
        ));
    };
    frame.map_err(codec_error)
}

fn into_response(response: IpcResponse) -> TransportResponse {
    let IpcResponse {
        status_code,
        data,
        headers,
        success,
        error,
    } = response;

    if success != is_success(status_code) {
        warn!(
            status_code,
            success, "IPC response success flag disagrees with status code"
        );
    }

    let mut out = TransportResponse::from_status(status_code, data, headers);
    if !out.success
        && let Some(error) = error
    {
        out.error = Some(error);
    }
    out
}

impl Transport for IpcTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ipc
    }

    fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    fn connect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.framed.is_some() {
                return Err(VaultError::connection("IPC transport already connected"));
            }

            let path = &self.config.socket_path;
            verify_socket_safety(path, self.config.socket_permissions)
                .map_err(|e| connect_error(path, e))?;
            let stream = UnixStream::connect(path)
                .await
                .map_err(|e| connect_error(path, e))?;

            self.framed = Some(Framed::new(
                stream,
                LinesCodec::new_with_max_length(MAX_FRAME_LENGTH),
            ));
            info!(socket = %path.display(), "connected to vault agent");
            Ok(())
        })
    }

    fn close(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if let Some(mut framed) = self.framed.take() {
                if let Err(e) = SinkExt::<String>::close(&mut framed).await {
                    debug!(error = %e, "error while shutting down IPC stream");
                }
                info!("IPC connection closed");
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
            let framed = self
                .framed
                .as_mut()
                .ok_or_else(|| VaultError::connection("IPC connection not established"))?;

            let request = IpcRequest::new(method, endpoint, data, headers);
            let line = serde_json::to_string(&request)
                .map_err(|e| VaultError::transport(format!("failed to encode IPC request: {e}")))?;

            debug!(method, endpoint, "sending IPC request");
            let reply = match exchange(framed, line).await {
                Ok(reply) => reply,
                Err(e) => {
                    // Stream position is unknown after a failed exchange.
                    self.framed = None;
                    return Err(e);
                }
            };

            let response: IpcResponse = serde_json::from_str(reply.trim()).map_err(|e| {
                VaultError::transport(format!("invalid JSON response from IPC socket: {e}"))
            })?;
            Ok(into_response(response))
        })
    }
}
