//! RcHashTable: per-entry reference counting atop ChainedHashTable.
//!
//! Every value is wrapped in an [`Entry`] that owns a [`RefCounter`] and a
//! lifecycle state. `insert` starts the count at one, `refinc` hands out
//! another reference, `refdec`/`delete` give one back, and the entry leaves
//! the table the moment its count reaches zero. `delete` on a shared entry
//! marks it so no new references are handed out while existing holders
//! drain.
//!
//! Single-threaded. See `SyncRcHashTable` for the lock-coupled variant,
//! which reuses the same `Entry` state machine.

use crate::chained_table::{ChainedHashTable, Dispose};
use crate::comparator::{EqComparator, KeyComparator};
use crate::error::{Error, Release, ResizeStatus};
use crate::ref_counter::{Destructor, Disposal, RefCounter};

/// Outcome of giving back one reference. On the transition to zero the value
/// comes back detached, so the caller can unlink the entry before any
/// destructor runs.
pub(crate) type Released<V> = (Release, Option<Disposal<V>>);

/// Lifecycle of one entry.
///
/// `Active` accepts new references. `Marked` was deleted while still held:
/// it refuses new references but still accepts releases. `Freed` is
/// terminal; the count reached zero (or the value was extracted) and the
/// entry is only waiting to be unlinked.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EntryState {
    Active,
    Marked,
    Freed,
}

#[derive(Debug)]
pub struct Entry<V> {
    rc: RefCounter<V>,
    state: EntryState,
}

impl<V> Entry<V> {
    pub fn new(value: V, destructor: Option<Destructor<V>>) -> Self {
        Self {
            rc: RefCounter::new(value, destructor),
            state: EntryState::Active,
        }
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn count(&self) -> usize {
        self.rc.count()
    }

    pub fn value(&self) -> Option<&V> {
        self.rc.object()
    }

    /// Take a new reference. Refused once the entry is marked or freed.
    pub(crate) fn acquire(&mut self) -> Option<&V> {
        if self.state != EntryState::Active {
            return None;
        }
        self.rc.incref().ok()?;
        self.rc.object()
    }

    /// Give back one reference. Reaching zero leaves the entry `Freed`
    /// before the value is handed back for disposal.
    pub(crate) fn release(&mut self) -> Result<Released<V>, Error> {
        if self.state == EntryState::Freed {
            return Err(Error::NotFound);
        }
        let (released, disposal) = self.rc.decref_deferred();
        if released.is_freed() {
            self.state = EntryState::Freed;
        }
        Ok((released, disposal))
    }

    /// Give back one reference and refuse any new ones from now on.
    pub(crate) fn delete(&mut self) -> Result<Released<V>, Error> {
        let (released, disposal) = self.release()?;
        if let Release::Live(_) = released {
            self.state = EntryState::Marked;
        }
        Ok((released, disposal))
    }

    /// Detach the destructor and move the value out. The entry is freed
    /// without the destructor ever running.
    pub(crate) fn extract(&mut self) -> Option<V> {
        if self.state == EntryState::Freed {
            return None;
        }
        self.state = EntryState::Freed;
        self.rc.set_destructor(None);
        self.rc.take_object()
    }

    /// Destroy the value regardless of outstanding references.
    pub(crate) fn teardown(&mut self) {
        self.rc.force_free();
        self.state = EntryState::Freed;
    }
}

pub struct RcHashTable<K, V, C = EqComparator> {
    table: ChainedHashTable<K, Entry<V>, C>,
}

impl<K, V> RcHashTable<K, V>
where
    K: Eq,
{
    /// Panics if the bucket array cannot be allocated; see `try_new`.
    pub fn new(capacity: usize) -> Self {
        Self::with_comparator(capacity, EqComparator)
    }

    pub fn try_new(capacity: usize) -> Result<Self, Error> {
        Self::try_with_comparator(capacity, EqComparator)
    }
}

impl<K, V, C> RcHashTable<K, V, C>
where
    C: KeyComparator<K>,
{
    pub fn with_comparator(capacity: usize, comparator: C) -> Self {
        Self::adopt(ChainedHashTable::with_comparator(capacity, comparator))
    }

    /// Fails with `AllocationFailure` when the initial bucket array cannot
    /// be allocated.
    pub fn try_with_comparator(capacity: usize, comparator: C) -> Result<Self, Error> {
        ChainedHashTable::try_with_comparator(capacity, comparator).map(Self::adopt)
    }

    fn adopt(mut table: ChainedHashTable<K, Entry<V>, C>) -> Self {
        table.set_value_destructor(Some(Box::new(|mut entry: Entry<V>| entry.teardown())));
        Self { table }
    }

    pub fn set_key_destructor(&mut self, destructor: Option<Dispose<K>>) {
        self.table.set_key_destructor(destructor);
    }

    pub fn set_max_load_factor(&mut self, percentage: u32) {
        self.table.set_max_load_factor(percentage);
    }

    pub fn set_min_load_factor(&mut self, percentage: u32) {
        self.table.set_min_load_factor(percentage);
    }

    pub fn set_max_rehash_steps(&mut self, steps: u32) {
        self.table.set_max_rehash_steps(steps);
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn contains_key(&mut self, key: &K, hash: u64) -> bool {
        self.table.contains_key(key, hash)
    }

    /// Current reference count of a key, if present.
    pub fn ref_count(&mut self, key: &K, hash: u64) -> Option<usize> {
        self.table.lookup(key, hash).map(Entry::count)
    }

    pub fn state(&mut self, key: &K, hash: u64) -> Option<EntryState> {
        self.table.lookup(key, hash).map(Entry::state)
    }

    /// Insert `value` with a reference count of one. On `DuplicateKey` the
    /// value is dropped without running `destructor`: it was never adopted.
    pub fn insert(
        &mut self,
        key: K,
        hash: u64,
        value: V,
        destructor: Option<Destructor<V>>,
    ) -> Result<ResizeStatus, Error> {
        self.table.insert(key, hash, Entry::new(value, destructor))
    }

    /// Take the value out of the table without destroying it, whatever its
    /// reference count. The status reports whether the shrink this removal
    /// called for had to be deferred.
    pub fn remove(&mut self, key: &K, hash: u64) -> Result<(V, ResizeStatus), Error> {
        let handle = self.table.find(key, hash).ok_or(Error::NotFound)?;
        let value = self
            .table
            .get_mut(handle)
            .and_then(Entry::extract)
            .ok_or(Error::NotFound)?;
        let status = self.table.remove_by_handle(handle)?;
        Ok((value, status))
    }

    /// Drop one reference and mark the entry for removal. Frees it right
    /// away when this was the last reference; otherwise reports
    /// `Release::Live` (pending) and refuses further `refinc`s.
    pub fn delete(&mut self, key: &K, hash: u64) -> Result<(Release, ResizeStatus), Error> {
        self.give_back(key, hash, Entry::delete)
    }

    /// Take one more reference, returning a clone of the value. `None` when
    /// the key is absent or marked for removal.
    pub fn refinc(&mut self, key: &K, hash: u64) -> Option<V>
    where
        V: Clone,
    {
        let handle = self.table.find(key, hash)?;
        self.table.get_mut(handle)?.acquire().cloned()
    }

    /// Give back one reference, freeing the entry when the count reaches
    /// zero. Once freed, the status reports whether unlinking it had to
    /// defer a shrink; a live release is always `Ready`.
    pub fn refdec(&mut self, key: &K, hash: u64) -> Result<(Release, ResizeStatus), Error> {
        self.give_back(key, hash, Entry::release)
    }

    /// A freed entry is unlinked before its destructor runs, so a panicking
    /// destructor cannot leave a zero-count entry in the table.
    fn give_back(
        &mut self,
        key: &K,
        hash: u64,
        op: fn(&mut Entry<V>) -> Result<Released<V>, Error>,
    ) -> Result<(Release, ResizeStatus), Error> {
        let handle = self.table.find(key, hash).ok_or(Error::NotFound)?;
        let (released, disposal) = op(self.table.get_mut(handle).ok_or(Error::NotFound)?)?;
        let unlinked = if released.is_freed() {
            self.table.remove_by_handle(handle)
        } else {
            Ok(ResizeStatus::Ready)
        };
        if let Some(disposal) = disposal {
            disposal.run();
        }
        Ok((released, unlinked?))
    }

    /// Destroy the table, force-freeing every surviving value regardless of
    /// its reference count. Same as dropping it.
    pub fn free(self) {}
}
