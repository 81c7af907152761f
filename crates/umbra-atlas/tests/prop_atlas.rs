use proptest::prelude::*;
use std::collections::HashMap;
use umbra_atlas::{AtlasCache, UnboundedPages};

#[derive(Clone, Debug)]
enum Op {
    Alloc(u32, u16, u16),
    Free(u32),
    Flush,
    NextFrame,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u32..24, 1u16..=96, 1u16..=96).prop_map(|(o, w, h)| Op::Alloc(o, w, h)),
        2 => (0u32..24).prop_map(Op::Free),
        1 => Just(Op::Flush),
        1 => Just(Op::NextFrame),
    ]
}

proptest! {
    // Tiling and back-reference invariants must hold at every step of a
    // random alloc/free/flush sequence, and eviction must spare blocks
    // referenced in the current frame.
    #[test]
    fn invariants_hold_under_random_ops(ops in proptest::collection::vec(op_strategy(), 1..200)) {
        let mut cache = AtlasCache::new(128, 2);
        let mut frame = 1u32;
        let mut stamped: HashMap<u32, u32> = HashMap::new();
        for op in ops {
            match op {
                Op::Alloc(owner, w, h) => {
                    if cache.region_for(owner).is_some() {
                        cache.release_owner(owner);
                        stamped.remove(&owner);
                    }
                    match cache.alloc_block(owner, w, h, frame, &mut UnboundedPages) {
                        Ok(id) => {
                            prop_assert_eq!(cache.region_for(owner), Some(id));
                            cache.touch(id, frame);
                            stamped.insert(owner, frame);
                        }
                        Err(_) => prop_assert_eq!(cache.region_for(owner), None),
                    }
                }
                Op::Free(owner) => {
                    cache.release_owner(owner);
                    stamped.remove(&owner);
                    prop_assert_eq!(cache.region_for(owner), None);
                }
                Op::Flush => {
                    cache.flush_old(frame);
                    for (owner, at) in &stamped {
                        if *at == frame {
                            prop_assert!(
                                cache.region_for(*owner).is_some(),
                                "flush evicted a current-frame block"
                            );
                        }
                    }
                    stamped.retain(|owner, _| cache.region_for(*owner).is_some());
                }
                Op::NextFrame => frame += 1,
            }
            cache.self_check();
        }
    }
}
