//! Typed preferences with deferred, throttled persistence.
//!
//! ```text
//!  transport context                      persistence ticker
//!  ─────────────────                      ──────────────────
//!  AsyncPreference::get  (lazy load once)
//!  AsyncPreference::set ──▶ VersionedCell ──▶ PreferencePersister::tick
//!                                              try_snapshot → encode → KvStore
//! ```
//!
//! The transport side never writes to storage; it only touches memory
//! (apart from the one-time lazy load on first access). Stored data that
//! does not decode, or whose length cannot match the value's encoding, is
//! skipped with a warning and the in-memory default stands.

pub mod codec;
pub mod ticker;

extern crate alloc;
use alloc::vec;
use std::sync::Arc;

use log::{debug, warn};

use crate::app::ports::KvStore;
use crate::versioned::{CellReader, CellWriter, VersionedCell, WriteGuard};

pub use codec::{BufferCodec, ByteBuf, Persist, PostcardCodec, PrefCodec, RawCodec, TextBuf};
pub use ticker::{PersistTask, PersistenceWriter};

/// Writer half of a preference. Owned by the transport context.
pub struct AsyncPreference<T: Persist> {
    store: Arc<dyn KvStore>,
    namespace: &'static str,
    key: &'static str,
    cell: CellWriter<T>,
    loaded: bool,
}

/// Reader half of a preference. Registered with a
/// [`PersistenceWriter`].
pub struct PreferencePersister<T: Persist> {
    store: Arc<dyn KvStore>,
    namespace: &'static str,
    key: &'static str,
    cell: CellReader<T>,
}

impl<T: Persist> AsyncPreference<T> {
    /// Create a preference at `namespace`/`key` holding `default` until
    /// the stored value is loaded.
    pub fn new(
        store: Arc<dyn KvStore>,
        namespace: &'static str,
        key: &'static str,
        default: T,
    ) -> (Self, PreferencePersister<T>) {
        let (writer, reader) = VersionedCell::split(default);
        let pref = Self {
            store: Arc::clone(&store),
            namespace,
            key,
            cell: writer,
            loaded: false,
        };
        let persister = PreferencePersister {
            store,
            namespace,
            key,
            cell: reader,
        };
        (pref, persister)
    }

    /// Current value. The first call loads it from storage.
    pub fn get(&mut self) -> &T {
        self.ensure_loaded();
        self.cell.get()
    }

    /// Replace the value. Persisted by the next successful ticker round.
    pub fn set(&mut self, value: T) {
        // An explicit value supersedes whatever is stored.
        self.loaded = true;
        self.cell.set(value);
    }

    /// Mutate in place through a write guard.
    pub fn update(&mut self) -> WriteGuard<'_, T> {
        self.ensure_loaded();
        self.cell.begin_write()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn key(&self) -> (&'static str, &'static str) {
        (self.namespace, self.key)
    }

    fn ensure_loaded(&mut self) {
        if self.loaded {
            return;
        }
        self.loaded = true;
        if let Some(value) = load::<T>(self.store.as_ref(), self.namespace, self.key) {
            self.cell.restore(value);
        }
    }
}

/// Read and decode `namespace`/`key`, skipping absent or corrupt data.
pub(crate) fn load<T: Persist>(store: &dyn KvStore, namespace: &str, key: &str) -> Option<T> {
    let len = store.length(namespace, key);
    if len == 0 {
        debug!("prefs: {}/{} not stored, using default", namespace, key);
        return None;
    }
    if !<T::Codec as PrefCodec<T>>::accepts_len(len) {
        warn!(
            "prefs: {}/{} has unexpected length {}, ignoring",
            namespace, key, len
        );
        return None;
    }

    let mut buf = vec![0u8; len];
    let read = match store.read(namespace, key, &mut buf) {
        Ok(n) => n,
        Err(e) => {
            warn!("prefs: {}/{} read failed: {}", namespace, key, e);
            return None;
        }
    };

    let value = <T::Codec as PrefCodec<T>>::decode(&buf[..read]);
    if value.is_none() {
        warn!("prefs: {}/{} does not decode, ignoring", namespace, key);
    }
    value
}

/// Encode and write `value`.
pub(crate) fn save<T: Persist>(
    store: &dyn KvStore,
    namespace: &str,
    key: &str,
    value: &T,
) -> bool {
    let Some(bytes) = <T::Codec as PrefCodec<T>>::encode(value) else {
        warn!("prefs: {}/{} cannot be encoded", namespace, key);
        return false;
    };
    match store.write(namespace, key, &bytes) {
        Ok(()) => {
            debug!("prefs: {}/{} persisted ({} bytes)", namespace, key, bytes.len());
            true
        }
        Err(e) => {
            warn!("prefs: {}/{} write failed: {}", namespace, key, e);
            false
        }
    }
}

impl<T: Persist> PreferencePersister<T> {
    /// Persist the latest consistent value, if it changed.
    ///
    /// A failed write keeps the snapshot pending so the next round
    /// retries it.
    pub fn persist(&mut self) {
        self.cell.try_snapshot();
        let Some(value) = self.cell.snapshot().copied() else {
            return;
        };
        if save(self.store.as_ref(), self.namespace, self.key, &value) {
            self.cell.take_snapshot();
        }
    }

    pub fn has_pending(&self) -> bool {
        self.cell.has_snapshot()
    }
}

impl<T: Persist> PersistTask for PreferencePersister<T> {
    fn tick(&mut self) {
        self.persist();
    }
}

// ── Tests ────────────────────────────────────────────────────
