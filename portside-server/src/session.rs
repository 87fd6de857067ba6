//! Session state and the package dispatch loop.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::connection::{Connection, PackageStream};
use crate::scheduler::PackageScheduler;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// A served connection together with its identity and metadata.
///
/// Sessions are shared across handler invocations via `Arc`; the underlying
/// [`Connection`] stays available for sending and closing while the receive
/// loop feeds packages into the scheduler.
pub struct Session {
    id: u64,
    started_at: Instant,
    connection: Connection,
    metadata: Mutex<HashMap<String, String>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.connection.state())
            .field("remote_addr", &self.connection.remote_addr())
            .finish()
    }
}

impl Session {
    /// Wraps a connection into a new session with a process-unique id.
    pub fn new(connection: Connection) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            started_at: Instant::now(),
            connection,
            metadata: Mutex::new(HashMap::new()),
        })
    }

    /// Process-unique session id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the session was created.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Stores a metadata entry, replacing any previous value for the key.
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata_guard().insert(key.into(), value.into());
    }

    /// Looks up a metadata entry.
    pub fn metadata(&self, key: &str) -> Option<String> {
        self.metadata_guard().get(key).cloned()
    }

    /// Removes a metadata entry, returning the previous value.
    pub fn remove_metadata(&self, key: &str) -> Option<String> {
        self.metadata_guard().remove(key)
    }

    fn metadata_guard(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.metadata.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Feeds every package from `stream` into `scheduler` until the connection
/// ends.
///
/// Each package is dispatched with a fresh child of the connection's
/// cancellation token, so closing the connection cancels all in-flight
/// handling while a handling timeout only cancels its own package.
///
/// With a serial scheduler this loop is what guarantees in-order,
/// non-overlapping handling: the next package is not pulled until the
/// previous `schedule` call returned. Pulling lazily also means a slow
/// handler applies natural backpressure instead of buffering unboundedly.
pub async fn serve_packages<P, S>(session: Arc<Session>, mut stream: PackageStream<P>, scheduler: S)
where
    P: Send + 'static,
    S: PackageScheduler<P>,
{
    crate::log_debug!(
        "session {} started (remote {:?})",
        session.id(),
        session.connection().remote_addr()
    );

    while let Some(package) = stream.next().await {
        let token = session.connection().cancellation_token().child_token();
        scheduler.schedule(&session, package, token).await;
    }

    crate::log_debug!(
        "session {} ended: {:?}",
        session.id(),
        session.connection().close_reason()
    );
}
