//! rc-hashtable: a hash table whose values are individually reference
//! counted, in single-threaded and lock-coupled concurrent forms.
//!
//! Removing an object from a lookup structure must not invalidate the
//! references other holders already obtained from it. Here every value
//! carries its own count: it is destroyed exactly once, when the last holder
//! gives its reference back, even if the entry was deleted from the table
//! while holders were still active.
//!
//! Internal Design:
//!
//! Summary
//! - Layers:
//!   - RefCounter<T>: a counted owner of one object and its destructor.
//!   - ChainedHashTable<K, V, C>: separately chained table keyed by a
//!     caller-supplied `u64` hash. Grows and shrinks by incremental
//!     rehashing so no single call pays for a whole resize.
//!   - RcHashTable<K, V, C>: stores one `Entry` (a RefCounter plus a
//!     lifecycle state) per key and unlinks it when its count reaches zero.
//!   - SyncRcHashTable<K, V, C>: the same entries behind a table mutex and
//!     per-entry mutexes, with lock coupling between the two.
//!
//! Constraints
//! - Keys are never hashed by the tables; the caller passes the hash with
//!   every call and the table stores it alongside the key.
//! - Key equality is pluggable through `KeyComparator`.
//! - Duplicate inserts fail and leave the existing entry untouched.
//! - Read operations take `&mut self` on the single-threaded layers: while
//!   a resize is in flight every call migrates a bounded number of nodes.
//!
//! Incremental rehashing
//! - A resize allocates the new bucket array and then moves at most
//!   `max_rehash_steps` nodes (or empty buckets) per operation. Until the
//!   old generation is drained, lookups consult both generations and
//!   inserts go to the new one.
//! - Bucket arrays are allocated fallibly. A resize that cannot allocate
//!   is deferred (`ResizeStatus::Deferred`); the table keeps working at its
//!   current capacity. `delete`, `refdec` and `remove` pass that status on
//!   alongside their result, and `try_new` reports a failed initial
//!   allocation as `Error::AllocationFailure`.
//!
//! Entry lifecycle
//! - Active: accepts `refinc`. `refdec` to zero frees and unlinks.
//! - Marked: `delete` while other references are outstanding. Refuses new
//!   references, still drains.
//! - Freed: terminal. `remove` reaches it without running the destructor by
//!   handing the value back to the caller.
//!
//! Locking
//! - Lock order is table before entry. A release that frees an entry
//!   detaches the value, unlinks the entry, and only then runs the
//!   destructor with no lock held. User code that still runs under an
//!   entry lock (`V::clone` in `refinc`) must not call back into the same
//!   table; debug builds detect that and panic rather than deadlock.
//! - Dropping (or `free`ing) any table force-destroys surviving values
//!   regardless of their counts.
//!
//! Overflow semantics
//! - A count overflowing `usize` aborts the process, as with `Rc`.

pub mod chained_table;
pub mod comparator;
pub mod error;
pub mod lock_order;
pub mod rc_table;
pub mod ref_counter;
pub mod sync_rc_table;

#[cfg(test)]
mod chained_table_proptest;

pub use chained_table::{ChainedHashTable, Dispose, Handle, LoadPolicy};
pub use comparator::{EqComparator, KeyComparator};
pub use error::{Error, Release, ResizeStatus};
pub use rc_table::{Entry, EntryState, RcHashTable};
pub use ref_counter::{Destructor, Disposal, RefCounter};
pub use sync_rc_table::SyncRcHashTable;
