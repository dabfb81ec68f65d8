#![cfg(test)]

// Property tests for HashedBuffer kept inside the crate so they can reach
// the internal consistency check.

use crate::buffer::tests::IdentityBuildHasher;
use crate::buffer::HashedBuffer;
use crate::error::Error;
use core::hash::BuildHasher;
use hashbrown::hash_map::DefaultHashBuilder;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Append(u64, i32),
    DestroyAt(usize),
    ReplaceAt(usize, u64, i32),
    ReplaceRange(usize, usize, Vec<(u64, i32)>),
    Truncate(usize),
    Reserve(usize),
    Snapshot,
    Find(u64),
}

// Keys are drawn from a few residues spread across multiples of 64, so
// with the identity hasher most of them share ideal buckets in any table
// of up to 64 buckets.
fn arb_key() -> impl Strategy<Value = u64> {
    (0u64..6, 0u64..4).prop_map(|(residue, lap)| residue + lap * 64)
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        4 => (arb_key(), any::<i32>()).prop_map(|(k, v)| Op::Append(k, v)),
        2 => any::<usize>().prop_map(Op::DestroyAt),
        2 => (any::<usize>(), arb_key(), any::<i32>()).prop_map(|(i, k, v)| Op::ReplaceAt(i, k, v)),
        2 => (
            any::<usize>(),
            any::<usize>(),
            proptest::collection::vec((arb_key(), any::<i32>()), 0..5)
        )
            .prop_map(|(a, b, new)| Op::ReplaceRange(a, b, new)),
        1 => (0usize..8).prop_map(Op::Truncate),
        1 => (0usize..20).prop_map(Op::Reserve),
        1 => Just(Op::Snapshot),
        2 => arb_key().prop_map(Op::Find),
    ];
    proptest::collection::vec(op, 1..80)
}

fn contents<S>(b: &HashedBuffer<u64, i32, S>) -> Vec<(u64, i32)> {
    b.iter().map(|(k, v)| (*k, *v)).collect()
}

fn model_position(model: &[(u64, i32)], key: u64) -> Option<usize> {
    model.iter().position(|&(k, _)| k == key)
}

// Property: state-machine equivalence against a Vec of (key, value) pairs.
// Invariants exercised after every operation:
// - Occupancy count, header count and bucket map length agree.
// - Every element is found by probing from its ideal bucket.
// - Positions and buckets form a bijection.
// - Position order matches the model, including after growth.
// - Snapshots taken by cloning never observe later mutations.
fn run<S: BuildHasher + Clone>(hasher: S, ops: Vec<Op>) -> Result<(), TestCaseError> {
    let mut sut: HashedBuffer<u64, i32, S> = HashedBuffer::with_capacity_and_hasher(0, hasher);
    let mut model: Vec<(u64, i32)> = Vec::new();
    let mut snapshots: Vec<(HashedBuffer<u64, i32, S>, Vec<(u64, i32)>)> = Vec::new();

    for op in ops {
        match op {
            Op::Append(k, v) => {
                sut.ensure_unique_with_capacity(sut.len() + 1);
                match sut.append(k, v) {
                    Ok(position) => {
                        prop_assert!(model_position(&model, k).is_none());
                        prop_assert_eq!(position, model.len());
                        model.push((k, v));
                    }
                    Err(e) => {
                        let position = model_position(&model, k);
                        prop_assert!(position.is_some(), "duplicate reported for absent key");
                        prop_assert_eq!(e, Error::DuplicateElement { position: position.unwrap() });
                    }
                }
            }
            Op::DestroyAt(i) => {
                if !model.is_empty() {
                    let i = i % model.len();
                    sut.ensure_unique();
                    let removed = sut.destroy_at(i);
                    prop_assert_eq!(removed, model.remove(i));
                }
            }
            Op::ReplaceAt(i, k, v) => {
                let i = if model.is_empty() { i % 2 } else { i % (model.len() + 1) };
                sut.ensure_unique();
                let got = sut.replace_at(i, k, v);
                if i >= model.len() {
                    prop_assert_eq!(got, Err(Error::PositionOutOfRange { position: i, len: model.len() }));
                } else if model[i].0 == k {
                    let old = std::mem::replace(&mut model[i].1, v);
                    prop_assert_eq!(got, Ok((k, old)));
                } else if let Some(p) = model_position(&model, k) {
                    prop_assert_eq!(got, Err(Error::DuplicateElement { position: p }));
                } else {
                    let old = std::mem::replace(&mut model[i], (k, v));
                    prop_assert_eq!(got, Ok(old));
                }
            }
            Op::ReplaceRange(a, b, new) => {
                let len = model.len();
                let (mut a, mut b) = (a % (len + 1), b % (len + 1));
                if a > b {
                    std::mem::swap(&mut a, &mut b);
                }
                sut.ensure_unique_with_capacity(len - (b - a) + new.len());
                let removed = sut.replace_range(a..b, new.clone());
                let expected_removed: Vec<_> = model.drain(a..b).collect();
                prop_assert_eq!(removed, Ok(expected_removed));
                let mut inserted = Vec::new();
                for (k, v) in new {
                    let present = model_position(&model, k).is_some()
                        || inserted.iter().any(|&(ik, _)| ik == k);
                    if !present {
                        inserted.push((k, v));
                    }
                }
                model.splice(a..a, inserted);
            }
            Op::Truncate(n) => {
                sut.ensure_unique();
                sut.truncate(n);
                model.truncate(n);
            }
            Op::Reserve(n) => {
                let before = sut.capacity();
                sut.reserve(n);
                prop_assert!(sut.capacity() >= before);
            }
            Op::Snapshot => {
                if snapshots.len() < 4 {
                    snapshots.push((sut.clone(), model.clone()));
                }
            }
            Op::Find(k) => {
                prop_assert_eq!(sut.position_of(&k), model_position(&model, k));
                prop_assert_eq!(sut.contains(&k), model_position(&model, k).is_some());
            }
        }

        sut.assert_consistent();
        prop_assert_eq!(contents(&sut), model.clone());
        prop_assert_eq!(sut.len(), model.len());
        for (snapshot, expected) in &snapshots {
            prop_assert_eq!(&contents(snapshot), expected);
        }
    }
    for (snapshot, _) in &snapshots {
        snapshot.assert_consistent();
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn prop_state_machine_colliding_hasher(ops in arb_ops()) {
        run(IdentityBuildHasher, ops)?;
    }

    #[test]
    fn prop_state_machine_default_hasher(ops in arb_ops()) {
        run(DefaultHashBuilder::default(), ops)?;
    }
}
