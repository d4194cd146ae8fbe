//! Per-kind connectors that turn a [`Credential`] into a live connection.
//!
//! The registry only brokers acquisition and release; what a "connection" is
//! (a database pool, an SMTP session, an SSH channel) is up to each
//! [`Connector`].

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use aether_core::credential::{Credential, CredentialKind};
use aether_core::error::{Result, VaultError};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Opaque connection produced by a [`Connector`]. Downcast to the concrete type.
pub type ConnectionHandle = Arc<dyn Any + Send + Sync>;

pub type ConnectorFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

pub trait Connector: Send + Sync {
    fn open<'a>(&'a self, credential: &'a Credential) -> ConnectorFuture<'a, ConnectionHandle>;

    /// Tear down `handle` without waiting. Runs when a connection is dropped
    /// before it could be closed: the caller was cancelled or the body panicked.
    fn release(&self, handle: ConnectionHandle);

    fn close(&self, handle: ConnectionHandle) -> ConnectorFuture<'_, ()> {
        self.release(handle);
        Box::pin(async { Ok(()) })
    }
}

/// Owns an open handle until it is closed; releases it on drop otherwise.
struct OpenConnection {
    connector: Arc<dyn Connector>,
    handle: Option<ConnectionHandle>,
}

impl OpenConnection {
    fn take(&mut self) -> Option<ConnectionHandle> {
        self.handle.take()
    }
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!("connection dropped before close; releasing");
            self.connector.release(handle);
        }
    }
}

#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<CredentialKind, Arc<dyn Connector>>,
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("kinds", &self.connectors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connector` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: CredentialKind, connector: Arc<dyn Connector>) {
        self.connectors.insert(kind, connector);
    }

    pub fn get(&self, kind: CredentialKind) -> Option<&Arc<dyn Connector>> {
        self.connectors.get(&kind)
    }

    pub fn contains(&self, kind: CredentialKind) -> bool {
        self.connectors.contains_key(&kind)
    }

    /// Open a connection for `credential`, run `body`, then close it.
    pub async fn with_connection<T, F, Fut>(&self, credential: &Credential, body: F) -> Result<T>
    where
        F: FnOnce(ConnectionHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.with_connection_at(credential, Utc::now(), body).await
    }

    /// [`with_connection`](Self::with_connection) with an explicit clock.
    ///
    /// The credential is checked first: revoked or expired credentials never
    /// reach a connector. The connection is closed whether or not `body`
    /// succeeds, and released if this future is dropped or `body` panics.
    /// A close failure is reported only when `body` succeeded.
    pub async fn with_connection_at<T, F, Fut>(
        &self,
        credential: &Credential,
        now: DateTime<Utc>,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(ConnectionHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        credential.ensure_usable_at(now)?;

        let kind = credential.kind();
        let connector = self.get(kind).cloned().ok_or_else(|| {
            VaultError::configuration(format!("no connector registered for {kind} credentials"))
                .with_detail("kind", kind.as_str())
        })?;

        let handle = connector.open(credential).await?;
        debug!(name = credential.name(), %kind, "connection opened");

        let mut open = OpenConnection {
            connector: Arc::clone(&connector),
            handle: Some(Arc::clone(&handle)),
        };

        let result = body(handle).await;
        let closed = match open.take() {
            Some(handle) => connector.close(handle).await,
            None => Ok(()),
        };
        debug!(name = credential.name(), %kind, "connection closed");

        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(
                    name = credential.name(),
                    error = %close_err,
                    "failed to close connection after error"
                );
                Err(e)
            }
        }
    }
}
