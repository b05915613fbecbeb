//! Port traits: the boundary between the RPC core and its collaborators.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ preferences / auth store / ticker
//! ```
//!
//! The key-value backend and the millisecond clock are external: the
//! [`NvsAdapter`](crate::adapters::nvs::NvsAdapter) and
//! [`SystemClock`](crate::adapters::time::SystemClock) implement these
//! traits on device and in simulation, tests supply their own mocks.
//!
//! ## Threading
//!
//! A [`KvStore`] is shared between the transport context (one-time lazy
//! loads) and the persistence ticker (all writes), so every method takes
//! `&self` and implementations must be `Send + Sync`.

// ───────────────────────────────────────────────────────────────
// Key-value storage port
// ───────────────────────────────────────────────────────────────

/// Namespaced blob storage (NVS on ESP32).
///
/// # Security
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic, with no partial writes on power loss.
///   The ESP-IDF NVS API guarantees this natively.
pub trait KvStore: Send + Sync {
    /// Read a value into `buf`. Returns the number of bytes copied.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically, replacing any previous blob.
    fn write(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Stored blob length in bytes. `0` means the key is absent.
    fn length(&self, namespace: &str, key: &str) -> usize;
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Millisecond clock used to rate-limit the persistence ticker.
///
/// Monotonic except for `u32` wraparound, which callers must tolerate.
pub trait Clock: Send {
    fn now_ms(&self) -> u32;
}

impl<F> Clock for F
where
    F: Fn() -> u32 + Send,
{
    fn now_ms(&self) -> u32 {
        self()
    }
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`KvStore`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
