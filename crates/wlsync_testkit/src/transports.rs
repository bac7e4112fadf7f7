//! In-memory transports.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use wlsync_engine::{WhitelistEntry, WHITELIST_FILE};
use wlsync_transport::{CommandChannel, FileAccess, TransportError, TransportResult};

/// Files held in memory.
#[derive(Debug, Default)]
pub struct MemoryFiles {
    files: Mutex<HashMap<String, Vec<u8>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryFiles {
    /// Creates an empty file set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a file set holding `entries` as the whitelist.
    pub fn with_whitelist(entries: &[WhitelistEntry]) -> Self {
        let files = Self::new();
        files.set_whitelist(entries);
        files
    }

    /// Replaces a file without counting it as a write.
    pub fn set_file(&self, name: &str, data: impl Into<Vec<u8>>) {
        self.files.lock().insert(name.to_string(), data.into());
    }

    /// Replaces the whitelist without counting it as a write.
    pub fn set_whitelist(&self, entries: &[WhitelistEntry]) {
        let data = serde_json::to_vec_pretty(entries).expect("serialize whitelist");
        self.set_file(WHITELIST_FILE, data);
    }

    /// Returns a file's contents.
    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).cloned()
    }

    /// Returns the parsed whitelist.
    pub fn whitelist(&self) -> Vec<WhitelistEntry> {
        let data = self.file(WHITELIST_FILE).expect("no whitelist file");
        serde_json::from_slice(&data).expect("whitelist is not valid json")
    }

    /// Makes every read fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileAccess for MemoryFiles {
    fn describe(&self) -> String {
        "memory://".to_string()
    }

    async fn read_file(&self, name: &str) -> TransportResult<Vec<u8>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(TransportError::Remote(format!("injected read failure: {name}")));
        }
        self.file(name).ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{name} not found"),
            ))
        })
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> TransportResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Remote(format!("injected write failure: {name}")));
        }
        self.set_file(name, data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every command batch instead of running it.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    batches: Mutex<Vec<Vec<String>>>,
    fail: AtomicBool,
}

impl RecordingChannel {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Batches received so far.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().clone()
    }

    /// All commands received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    /// Forgets recorded batches.
    pub fn clear(&self) {
        self.batches.lock().clear();
    }

    /// Makes every batch fail.
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommandChannel for RecordingChannel {
    fn describe(&self) -> String {
        "recording://".to_string()
    }

    async fn run_commands(&self, commands: &[String]) -> TransportResult<Vec<String>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout(std::time::Duration::from_secs(5)));
        }
        self.batches.lock().push(commands.to_vec());
        Ok(commands.iter().map(|_| String::new()).collect())
    }
}
