//! Paired-client credential table with recency-based eviction.
//!
//! A fixed arena of `N` slots, each holding a 16-byte client id, a 32-byte
//! shared secret and a last-seen timestamp (`0` = never used). The
//! credential table and the timestamp table live in two separate
//! [`VersionedCell`]s so a timestamp refresh does not rewrite the secrets.
//!
//! Storage layout (namespace `ble_auth`):
//!
//! | Key          | Bytes            | Contents                        |
//! |--------------|------------------|---------------------------------|
//! | `clients`    | `N * (16 + 32)`  | `[id ‖ secret]` per slot        |
//! | `timestamps` | `N * 4`          | `u32` little-endian per slot    |
//!
//! The all-zero id marks an empty slot and never matches a lookup.

use std::sync::Arc;

use log::{debug, info};

use crate::app::ports::KvStore;
use crate::config::AUTH_RECORDS;
use crate::prefs::codec::Raw;
use crate::prefs::{self, PersistTask};
use crate::versioned::{CellReader, CellWriter, VersionedCell};

pub const AUTH_NAMESPACE: &str = "ble_auth";
pub const CLIENTS_KEY: &str = "clients";
pub const TIMESTAMPS_KEY: &str = "timestamps";

/// Timestamps further apart than this are treated as clock skew.
pub const ONE_DAY_MS: u32 = 24 * 60 * 60 * 1000;

pub type ClientId = [u8; 16];
pub type Secret = [u8; 32];

const EMPTY_ID: ClientId = [0; 16];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Client {
    pub id: ClientId,
    pub secret: Secret,
}

impl Raw for Client {
    const SIZE: usize = 16 + 32;

    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id);
        out.extend_from_slice(&self.secret);
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut c = Self::default();
        c.id.copy_from_slice(&bytes[..16]);
        c.secret.copy_from_slice(&bytes[16..48]);
        c
    }
}

/// Writer half. Owned by the transport context.
pub struct AuthStore<const N: usize = AUTH_RECORDS> {
    store: Arc<dyn KvStore>,
    clients: CellWriter<[Client; N]>,
    timestamps: CellWriter<[u32; N]>,
    initialized: bool,
}

/// Reader half. Persists each table independently when it changes.
pub struct AuthStorePersister<const N: usize = AUTH_RECORDS> {
    store: Arc<dyn KvStore>,
    clients: CellReader<[Client; N]>,
    timestamps: CellReader<[u32; N]>,
}

impl<const N: usize> AuthStore<N> {
    pub fn new(store: Arc<dyn KvStore>) -> (Self, AuthStorePersister<N>) {
        let (clients_w, clients_r) = VersionedCell::split([Client::default(); N]);
        let (ts_w, ts_r) = VersionedCell::split([0u32; N]);
        let writer = Self {
            store: Arc::clone(&store),
            clients: clients_w,
            timestamps: ts_w,
            initialized: false,
        };
        let persister = AuthStorePersister {
            store,
            clients: clients_r,
            timestamps: ts_r,
        };
        (writer, persister)
    }

    pub fn has(&mut self, id: &ClientId) -> bool {
        self.find(id).is_some()
    }

    pub fn get_secret(&mut self, id: &ClientId) -> Option<Secret> {
        let idx = self.find(id)?;
        Some(self.clients.get()[idx].secret)
    }

    pub fn timestamp(&mut self, id: &ClientId) -> Option<u32> {
        let idx = self.find(id)?;
        Some(self.timestamps.get()[idx])
    }

    /// Store credentials for `id`.
    ///
    /// An existing record is overwritten in place; otherwise the slot with
    /// the smallest timestamp (first on ties) is evicted. Either way the
    /// record's timestamp resets to 0. Returns `false` for the reserved
    /// all-zero id.
    pub fn create(&mut self, id: &ClientId, secret: &Secret) -> bool {
        if *id == EMPTY_ID {
            return false;
        }
        let idx = match self.find(id) {
            Some(idx) => idx,
            None => {
                let victim = self.oldest_slot();
                debug!("auth: evicting slot {} for new client", victim);
                victim
            }
        };

        let mut clients = self.clients.begin_write();
        let mut timestamps = self.timestamps.begin_write();
        clients[idx] = Client {
            id: *id,
            secret: *secret,
        };
        timestamps[idx] = 0;
        drop(timestamps);
        drop(clients);

        info!("auth: client stored in slot {}", idx);
        true
    }

    /// Record that `id` was seen at `timestamp`. Returns `false` if the
    /// client is unknown.
    ///
    /// The stored value only changes on an explicit reset (`0`), a forward
    /// jump of more than a day, or any backward movement; small forward
    /// steps are absorbed to limit flash writes. Other records more than a
    /// day ahead of the new timestamp are clamped down to it.
    pub fn set_timestamp(&mut self, id: &ClientId, timestamp: u32) -> bool {
        let Some(idx) = self.find(id) else {
            return false;
        };

        let current = self.timestamps.get()[idx];
        let changed = timestamp == 0
            || timestamp > current.saturating_add(ONE_DAY_MS)
            || current > timestamp;
        if !changed {
            return true;
        }

        let limit = timestamp.saturating_add(ONE_DAY_MS);
        let mut ts = self.timestamps.begin_write();
        ts[idx] = timestamp;
        for (i, other) in ts.iter_mut().enumerate() {
            if i != idx && *other != 0 && *other > limit {
                *other = timestamp;
            }
        }
        true
    }

    /// Number of occupied slots.
    pub fn len(&mut self) -> usize {
        self.ensure_loaded();
        self.clients.get().iter().filter(|c| c.id != EMPTY_ID).count()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    fn find(&mut self, id: &ClientId) -> Option<usize> {
        self.ensure_loaded();
        if *id == EMPTY_ID {
            return None;
        }
        self.clients.get().iter().position(|c| c.id == *id)
    }

    fn oldest_slot(&self) -> usize {
        self.timestamps
            .get()
            .iter()
            .enumerate()
            .min_by_key(|&(i, ts)| (*ts, i))
            .map_or(0, |(i, _)| i)
    }

    fn ensure_loaded(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        let store = self.store.as_ref();
        if let Some(clients) = prefs::load::<[Client; N]>(store, AUTH_NAMESPACE, CLIENTS_KEY) {
            self.clients.restore(clients);
        }
        if let Some(ts) = prefs::load::<[u32; N]>(store, AUTH_NAMESPACE, TIMESTAMPS_KEY) {
            self.timestamps.restore(ts);
        }
    }
}

impl<const N: usize> AuthStorePersister<N> {
    pub fn persist(&mut self) {
        let store = self.store.as_ref();

        self.clients.try_snapshot();
        if let Some(clients) = self.clients.snapshot().copied() {
            if prefs::save(store, AUTH_NAMESPACE, CLIENTS_KEY, &clients) {
                self.clients.take_snapshot();
            }
        }

        self.timestamps.try_snapshot();
        if let Some(ts) = self.timestamps.snapshot().copied() {
            if prefs::save(store, AUTH_NAMESPACE, TIMESTAMPS_KEY, &ts) {
                self.timestamps.take_snapshot();
            }
        }
    }
}

impl<const N: usize> PersistTask for AuthStorePersister<N> {
    fn tick(&mut self) {
        self.persist();
    }
}

// ── Tests ────────────────────────────────────────────────────
