//! ChainedHashTable: separate chaining over power-of-two bucket arrays with
//! incremental (amortized) resizing.
//!
//! Nodes live in a `SlotMap` arena owned by the table; buckets hold the arena
//! key of their chain head and each node links to the next. Because nodes
//! never move in the arena, a [`Handle`] stays valid while its node migrates
//! between generations during a resize.
//!
//! Resizing never happens in one step. When a threshold is crossed the table
//! allocates a second generation (twice or half the capacity) and every later
//! insert/remove/lookup/size call migrates at most `max_rehash_steps` units of
//! work from the old generation into the new one. Read operations therefore
//! take `&mut self`: they may perform this bounded maintenance work.
//!
//! The table never hashes keys. Every keyed call carries the caller's
//! precomputed `u64` hash and the table only compares keys through its
//! [`KeyComparator`].

use crate::comparator::{EqComparator, KeyComparator};
use crate::error::{Error, ResizeStatus};
use core::fmt;
use core::mem;
use slotmap::{new_key_type, SlotMap};
use tracing::{debug, warn};

new_key_type! {
    struct NodeKey;
}

pub const DEFAULT_MAX_LOAD_FACTOR: u32 = 75;
pub const DEFAULT_MIN_LOAD_FACTOR: u32 = 10;
pub const DEFAULT_MAX_REHASH_STEPS: u32 = 5;

/// Disposal hook applied to every key or value the table destroys.
pub type Dispose<T> = Box<dyn Fn(T) + Send>;

/// Resize tunables. Load factors are percentages of the bucket count.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LoadPolicy {
    pub max_load_factor: u32,
    pub min_load_factor: u32,
    pub max_rehash_steps: u32,
}

impl Default for LoadPolicy {
    fn default() -> Self {
        Self {
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
            min_load_factor: DEFAULT_MIN_LOAD_FACTOR,
            max_rehash_steps: DEFAULT_MAX_REHASH_STEPS,
        }
    }
}

/// Stable reference to one node. Survives migration between generations;
/// stops resolving once the node is removed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle(NodeKey);

struct Node<K, V> {
    key: K,
    hash: u64,
    value: V,
    next: Option<NodeKey>,
}

/// One concrete bucket array.
#[derive(Default)]
struct Generation {
    buckets: Vec<Option<NodeKey>>,
    bitmask: u64,
    len: usize,
}

impl Generation {
    fn try_new(capacity: usize) -> Option<Self> {
        debug_assert!(capacity.is_power_of_two());
        let mut buckets = Vec::new();
        buckets.try_reserve_exact(capacity).ok()?;
        buckets.resize(capacity, None);
        Some(Self {
            buckets,
            bitmask: (capacity - 1) as u64,
            len: 0,
        })
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    fn index(&self, hash: u64) -> usize {
        (hash & self.bitmask) as usize
    }

    fn clear(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = None);
        self.len = 0;
    }
}

/// Either a single generation, or an in-flight migration from `old` into
/// `new` where every bucket of `old` below `cursor` is already empty.
enum Layout {
    Stable(Generation),
    Resizing {
        old: Generation,
        new: Generation,
        cursor: usize,
    },
}

impl Default for Layout {
    fn default() -> Self {
        Layout::Stable(Generation::default())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Side {
    Primary,
    Secondary,
}

impl Layout {
    fn get(&self, side: Side) -> Option<&Generation> {
        match (self, side) {
            (Layout::Stable(g), Side::Primary) => Some(g),
            (Layout::Stable(_), Side::Secondary) => None,
            (Layout::Resizing { old, .. }, Side::Primary) => Some(old),
            (Layout::Resizing { new, .. }, Side::Secondary) => Some(new),
        }
    }

    fn get_mut(&mut self, side: Side) -> Option<&mut Generation> {
        match (self, side) {
            (Layout::Stable(g), Side::Primary) => Some(g),
            (Layout::Stable(_), Side::Secondary) => None,
            (Layout::Resizing { old, .. }, Side::Primary) => Some(old),
            (Layout::Resizing { new, .. }, Side::Secondary) => Some(new),
        }
    }

    /// The generation new keys land in: the only one, or the one being
    /// migrated into.
    fn target(&self) -> &Generation {
        match self {
            Layout::Stable(g) => g,
            Layout::Resizing { new, .. } => new,
        }
    }

    fn insertion_side(&self) -> Side {
        match self {
            Layout::Stable(_) => Side::Primary,
            Layout::Resizing { .. } => Side::Secondary,
        }
    }

    fn is_resizing(&self) -> bool {
        matches!(self, Layout::Resizing { .. })
    }
}

pub struct ChainedHashTable<K, V, C = EqComparator> {
    nodes: SlotMap<NodeKey, Node<K, V>>,
    layout: Layout,
    comparator: C,
    key_destructor: Option<Dispose<K>>,
    value_destructor: Option<Dispose<V>>,
    policy: LoadPolicy,
    min_capacity: usize,
    grow_threshold: usize,
    shrink_threshold: usize,
    #[cfg(test)]
    deny_resizes: bool,
}

impl<K, V> ChainedHashTable<K, V>
where
    K: Eq,
{
    /// Create a table with at least `capacity` buckets (rounded up to a power
    /// of two). The rounded capacity is the floor the table never shrinks
    /// below.
    pub fn new(capacity: usize) -> Self {
        Self::with_comparator(capacity, EqComparator)
    }

    pub fn try_new(capacity: usize) -> Result<Self, Error> {
        Self::try_with_comparator(capacity, EqComparator)
    }
}

impl<K, V, C> ChainedHashTable<K, V, C>
where
    C: KeyComparator<K>,
{
    pub fn with_comparator(capacity: usize, comparator: C) -> Self {
        Self::try_with_comparator(capacity, comparator).expect("capacity overflow")
    }

    pub fn try_with_comparator(capacity: usize, comparator: C) -> Result<Self, Error> {
        let capacity = capacity
            .max(1)
            .checked_next_power_of_two()
            .ok_or(Error::AllocationFailure)?;
        let generation = Generation::try_new(capacity).ok_or(Error::AllocationFailure)?;
        let mut table = Self {
            nodes: SlotMap::with_key(),
            layout: Layout::Stable(generation),
            comparator,
            key_destructor: None,
            value_destructor: None,
            policy: LoadPolicy::default(),
            min_capacity: capacity,
            grow_threshold: 0,
            shrink_threshold: 0,
            #[cfg(test)]
            deny_resizes: false,
        };
        table.update_thresholds();
        Ok(table)
    }

    pub fn set_key_destructor(&mut self, destructor: Option<Dispose<K>>) {
        self.key_destructor = destructor;
    }

    pub fn set_value_destructor(&mut self, destructor: Option<Dispose<V>>) {
        self.value_destructor = destructor;
    }

    pub fn set_max_load_factor(&mut self, percentage: u32) {
        self.policy.max_load_factor = percentage;
        self.update_thresholds();
    }

    pub fn set_min_load_factor(&mut self, percentage: u32) {
        self.policy.min_load_factor = percentage;
        self.update_thresholds();
    }

    /// Bound the migration work done per call. Zero disables automatic
    /// resizing altogether; a resize already in flight still completes with
    /// the previous budget.
    pub fn set_max_rehash_steps(&mut self, steps: u32) {
        if steps == 0 {
            self.policy.max_load_factor = u32::MAX;
            self.policy.min_load_factor = 0;
            self.update_thresholds();
        } else {
            self.policy.max_rehash_steps = steps;
        }
    }

    pub fn policy(&self) -> LoadPolicy {
        self.policy
    }

    /// Number of entries, without any maintenance work.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of entries. Advances an in-flight resize by one step.
    pub fn size(&mut self) -> usize {
        let n = self.len();
        self.rehash_step();
        n
    }

    /// Bucket count of the generation new keys go to.
    pub fn capacity(&self) -> usize {
        self.layout.target().capacity()
    }

    pub fn min_capacity(&self) -> usize {
        self.min_capacity
    }

    pub fn is_resizing(&self) -> bool {
        self.layout.is_resizing()
    }

    /// Entries per bucket. While resizing this is measured against the
    /// generation being migrated into.
    pub fn load_factor(&self) -> f64 {
        self.len() as f64 / self.capacity() as f64
    }

    /// Insert a new key. Fails with `DuplicateKey` when an equal key is
    /// already present in either generation; the rejected key and value are
    /// dropped without running the destructors.
    pub fn insert(&mut self, key: K, hash: u64, value: V) -> Result<ResizeStatus, Error> {
        if self.locate_key(&key, hash).is_some() {
            self.rehash_step();
            return Err(Error::DuplicateKey);
        }
        self.link(key, hash, value);
        Ok(self.maintain())
    }

    /// Upsert: overwrite the value of an existing key (returning the old
    /// value untouched by destructors) or insert the pair like `insert`.
    pub fn replace(&mut self, key: K, hash: u64, value: V) -> Option<V> {
        if let Some((_, _, k)) = self.locate_key(&key, hash) {
            let old = mem::replace(&mut self.nodes[k].value, value);
            self.rehash_step();
            return Some(old);
        }
        self.link(key, hash, value);
        self.maintain();
        None
    }

    /// Remove a key, running the key and value destructors on the pair.
    pub fn remove(&mut self, key: &K, hash: u64) -> Result<ResizeStatus, Error> {
        let found = self.locate_key(key, hash);
        self.remove_located(found)
    }

    /// Remove the node `handle` refers to. Stale handles report `NotFound`.
    pub fn remove_by_handle(&mut self, handle: Handle) -> Result<ResizeStatus, Error> {
        let found = self
            .nodes
            .get(handle.0)
            .map(|n| n.hash)
            .and_then(|hash| self.locate(hash, |k, _| k == handle.0));
        self.remove_located(found)
    }

    pub fn lookup(&mut self, key: &K, hash: u64) -> Option<&V> {
        let handle = self.find(key, hash)?;
        self.get(handle)
    }

    pub fn lookup_mut(&mut self, key: &K, hash: u64) -> Option<&mut V> {
        let handle = self.find(key, hash)?;
        self.get_mut(handle)
    }

    pub fn contains_key(&mut self, key: &K, hash: u64) -> bool {
        self.find(key, hash).is_some()
    }

    /// Locate a key and return a stable handle to its node.
    pub fn find(&mut self, key: &K, hash: u64) -> Option<Handle> {
        let found = self.locate_key(key, hash).map(|(_, _, k)| Handle(k));
        self.rehash_step();
        found
    }

    pub fn get(&self, handle: Handle) -> Option<&V> {
        self.nodes.get(handle.0).map(|n| &n.value)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut V> {
        self.nodes.get_mut(handle.0).map(|n| &mut n.value)
    }

    pub fn key(&self, handle: Handle) -> Option<&K> {
        self.nodes.get(handle.0).map(|n| &n.key)
    }

    /// Destroy every entry. A resizing table collapses into one empty
    /// generation at the capacity it was resizing to.
    pub fn flush(&mut self) {
        self.layout = match mem::take(&mut self.layout) {
            Layout::Stable(mut g) | Layout::Resizing { new: mut g, .. } => {
                g.clear();
                Layout::Stable(g)
            }
        };
        self.destroy_all();
    }

    /// Destroy the table and everything in it. Same as dropping it.
    pub fn free(self) {}

    fn locate<F>(&self, hash: u64, hit: F) -> Option<(Side, Option<NodeKey>, NodeKey)>
    where
        F: Fn(NodeKey, &Node<K, V>) -> bool,
    {
        for side in [Side::Primary, Side::Secondary] {
            if let Some(generation) = self.layout.get(side) {
                if let Some((prev, k)) = search(&self.nodes, generation, hash, &hit) {
                    return Some((side, prev, k));
                }
            }
        }
        None
    }

    fn locate_key(&self, key: &K, hash: u64) -> Option<(Side, Option<NodeKey>, NodeKey)> {
        self.locate(hash, |_, n| self.comparator.equal(key, &n.key))
    }

    /// Push a new node on the head of its chain in the insertion generation.
    fn link(&mut self, key: K, hash: u64, value: V) {
        let side = self.layout.insertion_side();
        let generation = self
            .layout
            .get_mut(side)
            .expect("insertion side always has a generation");
        let idx = generation.index(hash);
        let next = generation.buckets[idx];
        let k = self.nodes.insert(Node {
            key,
            hash,
            value,
            next,
        });
        generation.buckets[idx] = Some(k);
        generation.len += 1;
    }

    fn remove_located(
        &mut self,
        found: Option<(Side, Option<NodeKey>, NodeKey)>,
    ) -> Result<ResizeStatus, Error> {
        let removed = found.map(|(side, prev, k)| {
            let generation = self
                .layout
                .get_mut(side)
                .expect("located generation must exist");
            unlink(&mut self.nodes, generation, prev, k)
        });
        let was_found = removed.is_some();
        if let Some(node) = removed {
            dispose(&self.key_destructor, &self.value_destructor, node);
        }
        let status = self.maintain();
        if was_found {
            Ok(status)
        } else {
            Err(Error::NotFound)
        }
    }

    /// Post-mutation upkeep: advance a running resize, or start one if a
    /// threshold was crossed.
    fn maintain(&mut self) -> ResizeStatus {
        if self.layout.is_resizing() {
            self.rehash_step();
            ResizeStatus::Ready
        } else {
            self.check_thresholds()
        }
    }

    fn check_thresholds(&mut self) -> ResizeStatus {
        let Layout::Stable(current) = &self.layout else {
            return ResizeStatus::Ready;
        };
        let (len, capacity) = (current.len, current.capacity());
        let target = if self.grow_threshold < len {
            capacity.checked_mul(2)
        } else if len < self.shrink_threshold {
            Some(capacity / 2)
        } else {
            return ResizeStatus::Ready;
        };
        #[cfg(test)]
        let target = target.filter(|_| !self.deny_resizes);
        let Some(new) = target.and_then(Generation::try_new) else {
            warn!(capacity, len, ?target, "resize deferred: could not allocate generation");
            return ResizeStatus::Deferred;
        };
        debug!(from = capacity, to = new.capacity(), len, "starting incremental resize");
        self.layout = match mem::take(&mut self.layout) {
            Layout::Stable(old) => Layout::Resizing {
                old,
                new,
                cursor: 0,
            },
            other => other,
        };
        self.update_thresholds();
        self.rehash_step();
        ResizeStatus::Ready
    }

    /// One bounded unit of migration: each of up to `max_rehash_steps`
    /// iterations moves the head node of the cursor bucket, or advances the
    /// cursor past an empty bucket. Finishing the last bucket promotes the
    /// new generation.
    fn rehash_step(&mut self) {
        let Layout::Resizing { old, new, cursor } = &mut self.layout else {
            return;
        };
        let mut finished = false;
        for _ in 0..self.policy.max_rehash_steps {
            match old.buckets[*cursor] {
                Some(k) => {
                    let node = &mut self.nodes[k];
                    old.buckets[*cursor] = node.next;
                    let idx = new.index(node.hash);
                    node.next = new.buckets[idx];
                    new.buckets[idx] = Some(k);
                    old.len -= 1;
                    new.len += 1;
                }
                None if *cursor + 1 < old.capacity() => *cursor += 1,
                None => {
                    finished = true;
                    break;
                }
            }
        }
        if finished {
            self.promote();
        }
    }

    fn promote(&mut self) {
        if let Layout::Resizing { old, new, .. } = mem::take(&mut self.layout) {
            debug_assert_eq!(old.len, 0);
            debug!(capacity = new.capacity(), len = new.len, "incremental resize complete");
            self.layout = Layout::Stable(new);
        }
    }

    fn update_thresholds(&mut self) {
        let capacity = self.layout.target().capacity();
        self.grow_threshold = percent_of(capacity, self.policy.max_load_factor);
        self.shrink_threshold = if capacity != self.min_capacity {
            percent_of(capacity, self.policy.min_load_factor)
        } else {
            0
        };
    }

    /// Make every later resize fail as if its bucket array could not be
    /// allocated.
    #[cfg(test)]
    pub(crate) fn deny_resizes(&mut self, deny: bool) {
        self.deny_resizes = deny;
    }

    /// Walk every chain and assert the structural invariants.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let mut seen = 0;
        for side in [Side::Primary, Side::Secondary] {
            let Some(generation) = self.layout.get(side) else {
                continue;
            };
            assert!(generation.capacity().is_power_of_two());
            assert!(generation.capacity() >= self.min_capacity);
            let mut in_generation = 0;
            for (i, head) in generation.buckets.iter().enumerate() {
                let mut cur = *head;
                while let Some(k) = cur {
                    let node = &self.nodes[k];
                    assert_eq!(generation.index(node.hash), i, "node in wrong bucket");
                    in_generation += 1;
                    cur = node.next;
                }
            }
            assert_eq!(in_generation, generation.len);
            seen += in_generation;
        }
        assert_eq!(seen, self.nodes.len());
        if let Layout::Resizing { old, cursor, .. } = &self.layout {
            assert!(old.buckets[..*cursor].iter().all(Option::is_none));
        }
    }
}

impl<K, V, C> ChainedHashTable<K, V, C> {
    fn destroy_all(&mut self) {
        let (kd, vd) = (&self.key_destructor, &self.value_destructor);
        for (_, node) in self.nodes.drain() {
            dispose(kd, vd, node);
        }
    }
}

impl<K, V, C> Drop for ChainedHashTable<K, V, C> {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

impl<K, V, C> fmt::Debug for ChainedHashTable<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainedHashTable")
            .field("len", &self.nodes.len())
            .field("capacity", &self.layout.target().capacity())
            .field("resizing", &self.layout.is_resizing())
            .field("policy", &self.policy)
            .finish()
    }
}

fn search<K, V, F>(
    nodes: &SlotMap<NodeKey, Node<K, V>>,
    generation: &Generation,
    hash: u64,
    hit: &F,
) -> Option<(Option<NodeKey>, NodeKey)>
where
    F: Fn(NodeKey, &Node<K, V>) -> bool,
{
    let mut prev = None;
    let mut cur = generation.buckets[generation.index(hash)];
    while let Some(k) = cur {
        let node = &nodes[k];
        if hit(k, node) {
            return Some((prev, k));
        }
        prev = cur;
        cur = node.next;
    }
    None
}

fn unlink<K, V>(
    nodes: &mut SlotMap<NodeKey, Node<K, V>>,
    generation: &mut Generation,
    prev: Option<NodeKey>,
    target: NodeKey,
) -> Node<K, V> {
    let node = nodes.remove(target).expect("chained node must be live");
    match prev {
        Some(p) => nodes[p].next = node.next,
        None => {
            let idx = generation.index(node.hash);
            generation.buckets[idx] = node.next;
        }
    }
    generation.len -= 1;
    node
}

fn dispose<K, V>(kd: &Option<Dispose<K>>, vd: &Option<Dispose<V>>, node: Node<K, V>) {
    let Node { key, value, .. } = node;
    match kd {
        Some(d) => d(key),
        None => drop(key),
    }
    match vd {
        Some(d) => d(value),
        None => drop(value),
    }
}

fn percent_of(capacity: usize, percentage: u32) -> usize {
    let scaled = capacity as u128 * percentage as u128 / 100;
    usize::try_from(scaled).unwrap_or(usize::MAX)
}
