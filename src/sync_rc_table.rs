//! SyncRcHashTable: the reference-counted table behind fine-grained locks.
//!
//! One `parking_lot::Mutex` guards the chained table and one more guards
//! each entry. Operations on an existing key use lock coupling:
//!
//! 1. take the table lock and locate the entry;
//! 2. take the entry lock, then release the table lock;
//! 3. mutate the entry (detach its value if the count reaches zero);
//! 4. release the entry lock, and if the entry was freed, retake the table
//!    lock and unlink it by handle;
//! 5. with no lock held, run the destructor of a detached value.
//!
//! The table lock is therefore only ever held for structural work, and the
//! lock order is always table before entry. Entries are shared through an
//! `Arc` so a thread can keep working on one after the table lock is gone.
//!
//! Destructors may call back into the table. User code that does run under
//! an entry lock (`V::clone` in `refinc`) must not; debug builds turn such
//! a call into a panic instead of a deadlock (see `lock_order`).
//!
//! A freed entry stays linked for the short window between steps 3 and 4.
//! During that window it is invisible to `refinc`, `refdec`, `delete`,
//! `remove`, `contains_key` and `ref_count`, but a concurrent `insert` of the
//! same key still reports `DuplicateKey`.

use crate::chained_table::{ChainedHashTable, Dispose, Handle};
use crate::comparator::{EqComparator, KeyComparator};
use crate::error::{Error, Release, ResizeStatus};
use crate::lock_order::DebugLockOrder;
use crate::rc_table::{Entry, EntryState, Released};
use crate::ref_counter::Destructor;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::{debug, trace};

type SharedEntry<V> = Arc<Mutex<Entry<V>>>;

pub struct SyncRcHashTable<K, V, C = EqComparator> {
    table: Mutex<ChainedHashTable<K, SharedEntry<V>, C>>,
    order: DebugLockOrder,
}

impl<K, V> SyncRcHashTable<K, V>
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

impl<K, V, C> SyncRcHashTable<K, V, C>
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

    fn adopt(mut table: ChainedHashTable<K, SharedEntry<V>, C>) -> Self {
        table.set_value_destructor(Some(Box::new(|shared: SharedEntry<V>| {
            shared.lock().teardown();
        })));
        Self {
            table: Mutex::new(table),
            order: DebugLockOrder::new(),
        }
    }

    fn lock_table(&self) -> MutexGuard<'_, ChainedHashTable<K, SharedEntry<V>, C>> {
        self.order.check_table_lock();
        self.table.lock()
    }

    /// Lock-coupled access to one entry: `f` runs under the entry lock only.
    fn with_entry<R>(
        &self,
        key: &K,
        hash: u64,
        f: impl FnOnce(&mut Entry<V>) -> R,
    ) -> Option<(Handle, R)> {
        let mut table = self.lock_table();
        let handle = table.find(key, hash)?;
        let shared = table.get(handle)?.clone();
        let mut entry = shared.lock();
        let scope = self.order.enter_entry();
        drop(table);

        let out = f(&mut *entry);
        drop(entry);
        drop(scope);
        Some((handle, out))
    }

    /// Physically remove an entry that was freed under its entry lock.
    fn unlink(&self, handle: Handle) -> ResizeStatus {
        match self.lock_table().remove_by_handle(handle) {
            Ok(status) => {
                trace!(?status, "unlinked freed entry");
                status
            }
            Err(err) => {
                debug!(%err, "freed entry was already unlinked");
                ResizeStatus::Ready
            }
        }
    }

    pub fn set_key_destructor(&self, destructor: Option<Dispose<K>>) {
        self.lock_table().set_key_destructor(destructor);
    }

    pub fn set_max_load_factor(&self, percentage: u32) {
        self.lock_table().set_max_load_factor(percentage);
    }

    pub fn set_min_load_factor(&self, percentage: u32) {
        self.lock_table().set_min_load_factor(percentage);
    }

    pub fn set_max_rehash_steps(&self, steps: u32) {
        self.lock_table().set_max_rehash_steps(steps);
    }

    /// Number of linked entries, including any freed entry still waiting to
    /// be unlinked.
    pub fn len(&self) -> usize {
        self.lock_table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_table().is_empty()
    }

    /// Like `len`, but advances an in-flight resize by one step.
    pub fn size(&self) -> usize {
        self.lock_table().size()
    }

    pub fn capacity(&self) -> usize {
        self.lock_table().capacity()
    }

    pub fn contains_key(&self, key: &K, hash: u64) -> bool {
        matches!(
            self.with_entry(key, hash, |e| e.state() != EntryState::Freed),
            Some((_, true))
        )
    }

    pub fn ref_count(&self, key: &K, hash: u64) -> Option<usize> {
        self.with_entry(key, hash, |e| (e.state() != EntryState::Freed).then_some(e.count()))
            .and_then(|(_, count)| count)
    }

    pub fn state(&self, key: &K, hash: u64) -> Option<EntryState> {
        self.with_entry(key, hash, |e| e.state())
            .map(|(_, state)| state)
    }

    /// Insert `value` with a reference count of one. The entry is built
    /// before the table lock is taken.
    pub fn insert(
        &self,
        key: K,
        hash: u64,
        value: V,
        destructor: Option<Destructor<V>>,
    ) -> Result<ResizeStatus, Error> {
        let entry = Arc::new(Mutex::new(Entry::new(value, destructor)));
        self.lock_table().insert(key, hash, entry)
    }

    /// Take the value out without destroying it, whatever its count. Holds
    /// the table lock throughout so the extraction and the unlink are one
    /// step to every other thread.
    pub fn remove(&self, key: &K, hash: u64) -> Result<(V, ResizeStatus), Error> {
        let mut table = self.lock_table();
        let handle = table.find(key, hash).ok_or(Error::NotFound)?;
        let shared = table.get(handle).ok_or(Error::NotFound)?.clone();
        let value = shared.lock().extract().ok_or(Error::NotFound)?;
        let status = table.remove_by_handle(handle)?;
        Ok((value, status))
    }

    /// Drop one reference and mark the entry for removal. See
    /// `RcHashTable::delete`.
    pub fn delete(&self, key: &K, hash: u64) -> Result<(Release, ResizeStatus), Error> {
        self.give_back(key, hash, Entry::delete)
    }

    /// Take one more reference. `None` when absent, marked, or freed.
    pub fn refinc(&self, key: &K, hash: u64) -> Option<V>
    where
        V: Clone,
    {
        self.with_entry(key, hash, |e| e.acquire().cloned())
            .and_then(|(_, value)| value)
    }

    pub fn refdec(&self, key: &K, hash: u64) -> Result<(Release, ResizeStatus), Error> {
        self.give_back(key, hash, Entry::release)
    }

    fn give_back(
        &self,
        key: &K,
        hash: u64,
        op: fn(&mut Entry<V>) -> Result<Released<V>, Error>,
    ) -> Result<(Release, ResizeStatus), Error> {
        let (handle, outcome) = self.with_entry(key, hash, op).ok_or(Error::NotFound)?;
        let (released, disposal) = outcome?;
        let status = if released.is_freed() {
            self.unlink(handle)
        } else {
            ResizeStatus::Ready
        };
        if let Some(disposal) = disposal {
            disposal.run();
        }
        Ok((released, status))
    }

    /// Destroy the table, force-freeing every surviving value. Taking `self`
    /// by value guarantees no other operation is in flight.
    pub fn free(self) {}
}
