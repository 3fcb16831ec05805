//! Debug-only lock-order checker.
//!
//! `SyncRcHashTable` always takes its table lock before an entry lock, never
//! the reverse. User code that runs under an entry lock (a value's `clone`
//! during `refinc`) and calls back into the same table would break that
//! order and deadlock. In debug builds
//! each thread records the tables whose entry locks it currently holds, and
//! asking for one of those tables' lock panics instead. In release builds
//! this compiles to a zero-cost no-op.

#[cfg(debug_assertions)]
use core::cell::RefCell;
#[cfg(not(debug_assertions))]
use core::marker::PhantomData;
#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(debug_assertions)]
static NEXT_TABLE_ID: AtomicUsize = AtomicUsize::new(1);

#[cfg(debug_assertions)]
thread_local! {
    static HELD_ENTRY_LOCKS: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Per-table identity for the checker. Embed one in each synchronized table
/// and call `check_table_lock` before every table-lock acquisition.
#[derive(Debug)]
pub struct DebugLockOrder {
    #[cfg(debug_assertions)]
    id: usize,
}

impl DebugLockOrder {
    pub fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Assert the current thread holds none of this table's entry locks.
    #[inline]
    pub fn check_table_lock(&self) {
        #[cfg(debug_assertions)]
        HELD_ENTRY_LOCKS.with(|held| {
            assert!(
                !held.borrow().contains(&self.id),
                "lock order violation: table lock requested while holding one of its entry locks"
            );
        });
    }

    /// Record that the current thread holds one of this table's entry locks
    /// until the returned scope is dropped.
    #[inline]
    pub fn enter_entry(&self) -> EntryLockScope<'_> {
        #[cfg(debug_assertions)]
        {
            HELD_ENTRY_LOCKS.with(|held| held.borrow_mut().push(self.id));
            EntryLockScope { owner: self }
        }

        #[cfg(not(debug_assertions))]
        {
            EntryLockScope { _z: PhantomData }
        }
    }
}

impl Default for DebugLockOrder {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII scope returned by `DebugLockOrder::enter_entry`.
pub struct EntryLockScope<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugLockOrder,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
}

impl<'a> Drop for EntryLockScope<'a> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        HELD_ENTRY_LOCKS.with(|held| {
            let mut held = held.borrow_mut();
            let pos = held.iter().rposition(|&id| id == self.owner.id);
            debug_assert!(pos.is_some());
            if let Some(pos) = pos {
                held.remove(pos);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::DebugLockOrder;

    #[test]
    fn table_lock_without_entry_lock_is_ok() {
        let order = DebugLockOrder::new();
        order.check_table_lock();
        let scope = order.enter_entry();
        drop(scope);
        order.check_table_lock();
    }

    #[test]
    fn other_tables_are_unaffected() {
        let a = DebugLockOrder::new();
        let b = DebugLockOrder::new();
        let _scope = a.enter_entry();
        b.check_table_lock();
    }

    #[cfg(debug_assertions)]
    #[test]
    fn reversed_order_panics_in_debug() {
        let order = DebugLockOrder::new();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = order.enter_entry();
            // Taking the table lock now would deadlock.
            order.check_table_lock();
        }));
        assert!(res.is_err(), "expected lock order violation to panic in debug builds");
        // The scope was released during unwinding.
        order.check_table_lock();
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn reversed_order_is_noop_in_release() {
        let order = DebugLockOrder::new();
        let _scope = order.enter_entry();
        order.check_table_lock();
    }
}
