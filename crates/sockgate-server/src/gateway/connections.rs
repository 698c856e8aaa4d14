//! Live connection registry for one gateway.
//!
//! Every upgraded connection runs its downstream handler on its own task,
//! watched by a supervisor task. The supervisor ends either when the handler
//! finishes (natural close, or a panic) or when a termination signal arrives
//! (forced close: the handler task is aborted, dropping the transport).
//! Either way the supervisor removes the entry, so there is exactly one
//! removal path.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};

/// Bookkeeping for one live connection.
struct ConnectionEntry {
    /// Termination signal for the supervising task. Capacity 1, so repeated
    /// terminations collapse into one.
    cancel_tx: mpsc::Sender<()>,
    remote_addr: Option<SocketAddr>,
    principal: Option<String>,
    opened_at: Instant,
}

/// Snapshot of a live connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: u64,
    pub endpoint: String,
    pub remote_addr: Option<SocketAddr>,
    pub principal: Option<String>,
    pub age_secs: u64,
}

/// Registry of connections produced by one gateway.
pub struct ConnectionRegistry {
    endpoint: String,
    entries: RwLock<HashMap<u64, ConnectionEntry>>,
    /// Set by `close`; only read or written under the `entries` write lock.
    closed: AtomicBool,
    next_id: AtomicU64,
    /// Current membership count, for `wait_empty`.
    live: watch::Sender<usize>,
}

impl ConnectionRegistry {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let (live, _) = watch::channel(0);
        Self {
            endpoint: endpoint.into(),
            entries: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            live,
        }
    }

    /// Register a connection and run its handler under supervision.
    ///
    /// `make` receives the assigned id and builds the handler future. The
    /// entry is inserted before this returns, so a `terminate_all` that
    /// starts afterwards always sees it. Returns `None` without calling
    /// `make` once the registry is closed.
    pub async fn spawn_supervised<F, Fut>(
        self: &Arc<Self>,
        remote_addr: Option<SocketAddr>,
        principal: Option<String>,
        make: F,
    ) -> Option<u64>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = mpsc::channel::<()>(1);
        let id = {
            let mut entries = self.entries.write().await;
            if self.closed.load(Ordering::Acquire) {
                debug!(endpoint = %self.endpoint, "registry closed, connection refused");
                return None;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            entries.insert(
                id,
                ConnectionEntry {
                    cancel_tx,
                    remote_addr,
                    principal,
                    opened_at: Instant::now(),
                },
            );
            self.live.send_replace(entries.len());
            id
        };

        let mut handler = tokio::spawn(make(id));
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                joined = &mut handler => match joined {
                    Ok(()) => debug!(endpoint = %registry.endpoint, id, "connection closed"),
                    Err(e) => warn!(endpoint = %registry.endpoint, id, error = %e, "connection handler failed"),
                },
                _ = cancel_rx.recv() => {
                    handler.abort();
                    let _ = (&mut handler).await;
                    debug!(endpoint = %registry.endpoint, id, "connection terminated");
                }
            }
            // Later signals must see Closed while the entry is still present.
            drop(cancel_rx);
            registry.remove(id).await;
        });

        Some(id)
    }

    async fn remove(&self, id: u64) {
        let mut entries = self.entries.write().await;
        if entries.remove(&id).is_some() {
            self.live.send_replace(entries.len());
        }
    }

    fn signal(&self, entries: &HashMap<u64, ConnectionEntry>) -> usize {
        let mut signalled = 0;
        for (id, entry) in entries.iter() {
            match entry.cancel_tx.try_send(()) {
                Ok(()) => signalled += 1,
                Err(TrySendError::Full(())) => {
                    debug!(endpoint = %self.endpoint, id, "termination already pending");
                }
                Err(TrySendError::Closed(())) => {
                    debug!(endpoint = %self.endpoint, id, "connection already closed");
                }
            }
        }
        if signalled > 0 {
            info!(endpoint = %self.endpoint, count = signalled, "terminating connections");
        }
        signalled
    }

    /// Signal every live connection to close.
    ///
    /// Each signal is independent; a connection that is already closing or
    /// gone is skipped. Entries leave the registry as their tasks finish.
    /// Returns how many connections were newly signalled.
    pub async fn terminate_all(&self) -> usize {
        let entries = self.entries.read().await;
        self.signal(&entries)
    }

    /// Refuse all future registrations, then signal every live connection.
    pub async fn close(&self) -> usize {
        let entries = self.entries.write().await;
        self.closed.store(true, Ordering::Release);
        self.signal(&entries)
    }

    /// List all live connections.
    pub async fn list(&self) -> Vec<ConnectionInfo> {
        let entries = self.entries.read().await;
        let mut list: Vec<ConnectionInfo> = entries
            .iter()
            .map(|(id, e)| ConnectionInfo {
                id: *id,
                endpoint: self.endpoint.clone(),
                remote_addr: e.remote_addr,
                principal: e.principal.clone(),
                age_secs: e.opened_at.elapsed().as_secs(),
            })
            .collect();
        list.sort_by_key(|c| c.id);
        list
    }

    /// Number of live connections.
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Resolves once no connections remain.
    pub async fn wait_empty(&self) {
        let mut rx = self.live.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
