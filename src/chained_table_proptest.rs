#![cfg(test)]

// Model test for ChainedHashTable kept inside the crate so it can check the
// table's structural invariants after every operation.

use crate::chained_table::ChainedHashTable;
use crate::error::Error;
use proptest::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug)]
enum Op {
    Insert(usize, i32),
    Replace(usize, i32),
    Remove(usize),
    Lookup(usize),
    Mutate(usize, i32),
    Size,
    Flush,
    Policy(u32, u32),
    Steps(u32),
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, u64, usize, Vec<Op>)> {
    let masks = proptest::sample::select(vec![0u64, 0x3, 0xff, u64::MAX]);
    (proptest::collection::vec("[a-z]{0,4}", 1..=24), masks, 0usize..=8).prop_flat_map(
        |(pool, mask, capacity)| {
            let idx = 0..pool.len();
            let op = prop_oneof![
                4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| Op::Insert(i, v)),
                2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| Op::Replace(i, v)),
                3 => idx.clone().prop_map(Op::Remove),
                2 => idx.clone().prop_map(Op::Lookup),
                1 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| Op::Mutate(i, d)),
                1 => Just(Op::Size),
                1 => Just(Op::Flush),
                1 => (50u32..=200, 0u32..=25).prop_map(|(max, min)| Op::Policy(max, min)),
                1 => (0u32..=6).prop_map(Op::Steps),
            ];
            proptest::collection::vec(op, 1..150)
                .prop_map(move |ops| (pool.clone(), mask, capacity, ops))
        },
    )
}

// A narrow mask forces long collision chains.
fn hash_of(key: &str, mask: u64) -> u64 {
    let mut h = DefaultHasher::new();
    key.hash(&mut h);
    h.finish() & mask
}

// Property: equivalence against std::collections::HashMap.
// - Duplicate inserts fail; replace upserts and hands back the old value.
// - Every key in the model is found with the model's value, during resizes too.
// - The value destructor runs once per value removed or flushed, never for
//   replaced or rejected values.
// - Every node sits in the bucket its hash selects, per-generation counts
//   add up, and capacities stay powers of two at or above the floor.
proptest! {
    #![proptest_config(ProptestConfig { cases: 96, .. ProptestConfig::default() })]
    #[test]
    fn prop_matches_hashmap((pool, mask, capacity, ops) in arb_scenario()) {
        let disposed = Arc::new(AtomicUsize::new(0));
        let mut sut: ChainedHashTable<String, i32> = ChainedHashTable::new(capacity);
        let d = disposed.clone();
        sut.set_value_destructor(Some(Box::new(move |_| { d.fetch_add(1, Ordering::SeqCst); })));
        let floor = sut.min_capacity();
        let mut model: HashMap<String, i32> = HashMap::new();
        let mut expected_disposals = 0usize;

        for op in ops {
            match op {
                Op::Insert(i, v) => {
                    let k = pool[i].clone();
                    let res = sut.insert(k.clone(), hash_of(&k, mask), v);
                    if model.contains_key(&k) {
                        prop_assert_eq!(res, Err(Error::DuplicateKey));
                    } else {
                        prop_assert!(res.is_ok());
                        model.insert(k, v);
                    }
                }
                Op::Replace(i, v) => {
                    let k = pool[i].clone();
                    let old = sut.replace(k.clone(), hash_of(&k, mask), v);
                    prop_assert_eq!(old, model.insert(k, v));
                }
                Op::Remove(i) => {
                    let k = &pool[i];
                    let res = sut.remove(k, hash_of(k, mask));
                    if model.remove(k).is_some() {
                        prop_assert!(res.is_ok());
                        expected_disposals += 1;
                    } else {
                        prop_assert_eq!(res, Err(Error::NotFound));
                    }
                }
                Op::Lookup(i) => {
                    let k = &pool[i];
                    prop_assert_eq!(sut.lookup(k, hash_of(k, mask)), model.get(k));
                }
                Op::Mutate(i, d) => {
                    let k = &pool[i];
                    match (sut.lookup_mut(k, hash_of(k, mask)), model.get_mut(k)) {
                        (Some(a), Some(b)) => {
                            *a = a.wrapping_add(d);
                            *b = b.wrapping_add(d);
                        }
                        (None, None) => {}
                        (a, b) => prop_assert!(false, "presence mismatch: {:?} vs {:?}", a, b),
                    }
                }
                Op::Size => {
                    prop_assert_eq!(sut.size(), model.len());
                }
                Op::Flush => {
                    expected_disposals += model.len();
                    model.clear();
                    sut.flush();
                    prop_assert!(!sut.is_resizing());
                }
                Op::Policy(max, min) => {
                    sut.set_max_load_factor(max);
                    sut.set_min_load_factor(min);
                }
                Op::Steps(n) => sut.set_max_rehash_steps(n),
            }

            sut.check_invariants();
            prop_assert_eq!(sut.len(), model.len());
            prop_assert_eq!(sut.is_empty(), model.is_empty());
            prop_assert!(sut.capacity() >= floor);
            prop_assert_eq!(disposed.load(Ordering::SeqCst), expected_disposals);
        }

        for (k, v) in &model {
            prop_assert_eq!(sut.lookup(k, hash_of(k, mask)), Some(v));
        }
        let live = model.len();
        drop(sut);
        prop_assert_eq!(disposed.load(Ordering::SeqCst), expected_disposals + live);
    }
}
