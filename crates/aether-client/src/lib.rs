//! Client access layer for Aether Vault.
//!
//! Talks to a vault over a local Unix socket or HTTP(S), and wraps either
//! channel in [`VaultClient`] for capability and credential requests.

pub mod client;
pub mod config;
pub mod connector;
pub mod socket;
pub mod transport;

pub use client::VaultClient;
pub use config::{HttpConfig, IpcConfig, RetryPolicy, TransportConfig};
pub use connector::{ConnectionHandle, Connector, ConnectorRegistry};
pub use transport::{
    HttpTransport, IpcTransport, Transport, TransportKind, TransportResponse, create_transport,
};
