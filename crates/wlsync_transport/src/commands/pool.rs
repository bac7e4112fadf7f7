//! RCON connection pool.

use super::rcon::{RconConnection, RconParams};
use crate::error::TransportResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default time a pooled connection may stay unused before it is closed.
pub const DEFAULT_IDLE_WINDOW: Duration = Duration::from_secs(5);

/// Grace added to the idle window before the eviction check runs.
const EVICTION_GRACE: Duration = Duration::from_millis(100);

/// A pool slot for one `host:port`.
///
/// The async mutex serializes batches to the same endpoint; whoever holds
/// it owns the connection.
#[derive(Debug)]
struct PoolEntry {
    connection: tokio::sync::Mutex<Option<RconConnection>>,
    last_used: Mutex<Instant>,
}

impl PoolEntry {
    fn new() -> Self {
        Self {
            connection: tokio::sync::Mutex::new(None),
            last_used: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }
}

/// Keeps one RCON connection per `host:port` open across calls.
///
/// A connection is opened lazily, reused by every call within the idle
/// window, and closed and evicted once it has been unused for that long.
/// A failed batch drops its connection so the next call reconnects.
#[derive(Debug)]
pub struct RconPool {
    idle: Duration,
    entries: Mutex<HashMap<String, Arc<PoolEntry>>>,
}

impl RconPool {
    /// Creates a pool with the default idle window.
    pub fn new() -> Arc<Self> {
        Self::with_idle_window(DEFAULT_IDLE_WINDOW)
    }

    /// Creates a pool with a custom idle window.
    pub fn with_idle_window(idle: Duration) -> Arc<Self> {
        Arc::new(Self {
            idle,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the number of endpoints currently pooled.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is pooled.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Runs `commands` in order over the pooled connection for `params`.
    pub async fn run(
        self: &Arc<Self>,
        params: &RconParams,
        commands: &[String],
    ) -> TransportResult<Vec<String>> {
        let key = params.endpoint();
        let entry = Arc::clone(
            self.entries
                .lock()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(PoolEntry::new())),
        );

        let result = {
            let mut slot = entry.connection.lock().await;
            let result = Self::run_on(&mut slot, params, commands).await;
            entry.touch();
            result
        };

        self.schedule_eviction(key, entry);
        result
    }

    async fn run_on(
        slot: &mut Option<RconConnection>,
        params: &RconParams,
        commands: &[String],
    ) -> TransportResult<Vec<String>> {
        let mut connection = match slot.take() {
            Some(connection) => connection,
            None => RconConnection::connect(params).await?,
        };

        let mut responses = Vec::with_capacity(commands.len());
        for command in commands {
            debug!(endpoint = %params.endpoint(), %command, "rcon command");
            match connection.execute(command).await {
                Ok(response) => responses.push(response),
                Err(e) => {
                    connection.close().await;
                    return Err(e);
                }
            }
        }

        *slot = Some(connection);
        Ok(responses)
    }

    fn schedule_eviction(self: &Arc<Self>, key: String, entry: Arc<PoolEntry>) {
        let pool: Weak<Self> = Arc::downgrade(self);
        let delay = self.idle + EVICTION_GRACE;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(pool) = pool.upgrade() {
                pool.evict_if_idle(&key, &entry).await;
            }
        });
    }

    async fn evict_if_idle(&self, key: &str, entry: &Arc<PoolEntry>) {
        if entry.idle_for() < self.idle {
            return;
        }
        // In use: the current holder schedules its own check.
        let Ok(mut slot) = entry.connection.try_lock() else {
            return;
        };
        if entry.idle_for() < self.idle {
            return;
        }

        if let Some(connection) = slot.take() {
            debug!(endpoint = %key, "closing idle rcon connection");
            connection.close().await;
        }
        drop(slot);

        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|current| Arc::ptr_eq(current, entry)) {
            entries.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[tokio::test]
    async fn unreachable_endpoint_fails_and_is_evicted() {
        let pool = RconPool::with_idle_window(Duration::from_millis(20));
        // Port 1 on localhost is closed on any sane test machine
        let params = RconParams::new("127.0.0.1", 1, "pw");

        let result = pool.run(&params, &["list".to_string()]).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
        assert_eq!(pool.len(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(pool.is_empty());
    }
}
