//! Key comparison seam.
//!
//! The tables never hash keys; callers pass a precomputed hash. Equality is
//! likewise pluggable: `EqComparator` defers to `K: Eq`, and any
//! `Fn(&K, &K) -> bool` closure can be supplied instead.

/// Decides whether two keys are the same key.
pub trait KeyComparator<K: ?Sized> {
    fn equal(&self, a: &K, b: &K) -> bool;
}

/// Comparator backed by the key's own `Eq` implementation.
#[derive(Copy, Clone, Debug, Default)]
pub struct EqComparator;

impl<K: ?Sized + Eq> KeyComparator<K> for EqComparator {
    #[inline]
    fn equal(&self, a: &K, b: &K) -> bool {
        a == b
    }
}

impl<K: ?Sized, F> KeyComparator<K> for F
where
    F: Fn(&K, &K) -> bool,
{
    #[inline]
    fn equal(&self, a: &K, b: &K) -> bool {
        self(a, b)
    }
}
