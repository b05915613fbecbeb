//! Lock-free single-writer / single-reader versioned cell.
//!
//! The transport context mutates small pieces of state synchronously; a
//! low-priority ticker copies them out and persists them. No mutex sits
//! between the two: a version counter tells the reader whether its copy
//! can be trusted.
//!
//! ```text
//!   writer                          reader (ticker)
//!   ──────                          ───────────────
//!   version += 1   (odd: busy)      v1 = version
//!   mutate value                    skip if v1 odd or v1 == last accepted
//!   version += 1   (even: stable)   copy value
//!                                   v2 = version
//!                                   accept copy iff v1 == v2
//! ```
//!
//! The parity convention is load-bearing: an odd version means a write is
//! in progress. A copy taken across a write is discarded and the next
//! round picks up the newer value, so persistence is eventual: not every
//! intermediate value is guaranteed to reach storage.
//!
//! [`VersionedCell::split`] hands out exactly one [`CellWriter`] and one
//! [`CellReader`]. Neither handle is `Clone`, which is how the
//! single-writer / single-reader invariant is enforced. Writes go through
//! a [`WriteGuard`], so every begin is paired with an end.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering, fence};
use std::sync::Arc;

/// Shared core: the guarded value and its version counter.
pub struct VersionedCell<T> {
    value: UnsafeCell<T>,
    version: AtomicU32,
}

// SAFETY: the value is only mutated through the unique `CellWriter`
// (inside a `WriteGuard`, version odd) and only read by the unique
// `CellReader` through a volatile copy that is discarded unless the version
// was even and unchanged around the copy. `T: Copy` guarantees a discarded
// torn copy owns no resources and needs no drop.
unsafe impl<T: Copy + Send> Sync for VersionedCell<T> {}

impl<T: Copy + Send> VersionedCell<T> {
    /// Create a cell holding `value` and split it into its two handles.
    pub fn split(value: T) -> (CellWriter<T>, CellReader<T>) {
        let cell = Arc::new(Self {
            value: UnsafeCell::new(value),
            version: AtomicU32::new(0),
        });
        let writer = CellWriter {
            cell: Arc::clone(&cell),
            published: false,
            _not_sync: PhantomData,
        };
        let reader = CellReader {
            cell,
            snapshot: None,
            last_accepted: 0,
        };
        (writer, reader)
    }

    /// Current version. Even means stable, odd means a write is in progress.
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }
}

// ── Writer side ──────────────────────────────────────────────

/// Unique mutating handle. Lives in the transport context.
pub struct CellWriter<T> {
    cell: Arc<VersionedCell<T>>,
    /// Set once the first write bumps the version.
    published: bool,
    _not_sync: PhantomData<core::cell::Cell<()>>,
}

impl<T: Copy + Send> CellWriter<T> {
    /// Borrow the current value.
    ///
    /// The writer is the only mutator and the reader never writes, so a
    /// shared borrow here cannot observe a concurrent modification.
    pub fn get(&self) -> &T {
        // SAFETY: mutation requires `&mut self` (via `begin_write`), which
        // cannot coexist with this borrow.
        unsafe { &*self.cell.value.get() }
    }

    /// Replace the value under the write protocol.
    pub fn set(&mut self, value: T) {
        *self.begin_write() = value;
    }

    /// Start a write. The version becomes odd until the guard is dropped.
    pub fn begin_write(&mut self) -> WriteGuard<'_, T> {
        self.published = true;
        self.cell.version.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::Release);
        WriteGuard {
            cell: &self.cell,
            _exclusive: PhantomData,
        }
    }

    /// Install a value restored from storage without announcing it to the
    /// reader (it is already durable).
    ///
    /// Before the first write the version is still 0, which equals the
    /// reader's initial accepted version, so the reader never copies and a
    /// plain store is race-free. After a write has been published this
    /// falls back to [`set`](Self::set).
    pub fn restore(&mut self, value: T) {
        if self.published {
            self.set(value);
            return;
        }
        // SAFETY: version is 0 and the reader skips version 0 (see above).
        unsafe {
            *self.cell.value.get() = value;
        }
    }

    pub fn version(&self) -> u32 {
        self.cell.version()
    }
}

/// RAII write section. Dereferences to the guarded value; dropping it
/// commits the write (version becomes even again).
pub struct WriteGuard<'a, T> {
    cell: &'a VersionedCell<T>,
    _exclusive: PhantomData<&'a mut T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard is created from `&mut CellWriter`, so it is the
        // only live accessor on the writer side.
        unsafe { &*self.cell.value.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above; the reader discards any copy taken while the
        // version is odd.
        unsafe { &mut *self.cell.value.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.cell.version.fetch_add(1, Ordering::Release);
    }
}

// ── Reader side ──────────────────────────────────────────────

/// Unique snapshotting handle. Lives in the persistence ticker.
pub struct CellReader<T> {
    cell: Arc<VersionedCell<T>>,
    snapshot: Option<T>,
    last_accepted: u32,
}

impl<T: Copy + Send> CellReader<T> {
    /// Try to take a consistent copy of the value.
    ///
    /// Returns `true` when a new snapshot was accepted. Returns `false`
    /// when nothing changed since the last accepted version, a write is in
    /// progress, or a write raced the copy.
    pub fn try_snapshot(&mut self) -> bool {
        self.try_snapshot_interleaved(|| {})
    }

    /// [`try_snapshot`](Self::try_snapshot) with `between` run after the
    /// copy and before the version is checked again.
    #[inline]
    fn try_snapshot_interleaved(&mut self, between: impl FnOnce()) -> bool {
        let before = self.cell.version.load(Ordering::Acquire);
        if before % 2 != 0 || before == self.last_accepted {
            return false;
        }

        // SAFETY: reading through `MaybeUninit<T>` places no validity
        // requirement on a possibly torn copy; it is only assumed
        // initialised once the version check below proves no write
        // overlapped it.
        let copy = unsafe {
            core::ptr::read_volatile(self.cell.value.get().cast::<MaybeUninit<T>>().cast_const())
        };
        between();
        fence(Ordering::Acquire);
        let after = self.cell.version.load(Ordering::Relaxed);

        if before != after {
            return false;
        }

        // SAFETY: version was even and unchanged across the copy.
        self.snapshot = Some(unsafe { copy.assume_init() });
        self.last_accepted = before;
        true
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Borrow the pending snapshot, if any.
    pub fn snapshot(&self) -> Option<&T> {
        self.snapshot.as_ref()
    }

    /// Take the pending snapshot, clearing the pending flag.
    pub fn take_snapshot(&mut self) -> Option<T> {
        self.snapshot.take()
    }

    pub fn last_accepted_version(&self) -> u32 {
        self.last_accepted
    }
}

// ── Tests ────────────────────────────────────────────────────
