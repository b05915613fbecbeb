//! Mock storage and clock for integration tests.
//!
//! [`MockKv`] records every write so tests can assert on persistence
//! traffic, and can be switched into a failing mode to exercise retries.

use blerpc::app::ports::{Clock, KvStore, StorageError};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

#[derive(Default)]
pub struct MockKv {
    data: Mutex<HashMap<(String, String), Vec<u8>>>,
    writes: AtomicUsize,
    key_writes: Mutex<HashMap<(String, String), usize>>,
    failing: AtomicBool,
}

#[allow(dead_code)]
impl MockKv {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Successful writes to one key.
    pub fn writes_to(&self, namespace: &str, key: &str) -> usize {
        self.key_writes
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        self.data
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }

    pub fn put(&self, namespace: &str, key: &str, value: &[u8]) {
        self.data
            .lock()
            .unwrap()
            .insert((namespace.to_string(), key.to_string()), value.to_vec());
    }
}

impl KvStore for MockKv {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let data = self.get(namespace, key).ok_or(StorageError::NotFound)?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn write(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::IoError);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self
            .key_writes
            .lock()
            .unwrap()
            .entry((namespace.to_string(), key.to_string()))
            .or_default() += 1;
        self.put(namespace, key, data);
        Ok(())
    }

    fn length(&self, namespace: &str, key: &str) -> usize {
        self.get(namespace, key).map_or(0, |v| v.len())
    }
}

/// Clock advanced by hand.
#[derive(Clone, Default)]
pub struct ManualClock(Arc<AtomicU32>);

#[allow(dead_code)]
impl ManualClock {
    pub fn set(&self, ms: u32) {
        self.0.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u32) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}
