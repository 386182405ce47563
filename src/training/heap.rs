//! Array-backed binary min-heap over `(key, slot)` pairs.
//!
//! Run sets use the heap to order factor runs: by mean response for
//! regression, by category-1 concentration for binary classification, or by
//! uniform draws when subsampling very wide factors. The heap lives inside
//! the level arena; all operations work on a borrowed pair slice.
//!
//! Ties carry no ordering guarantee; callers must not depend on tie order.

/// One heap entry: a sort key and the run slot it refers to.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BhPair {
    pub key: f64,
    pub slot: u32,
}

#[inline]
fn parent(idx: usize) -> Option<usize> {
    if idx == 0 {
        None
    } else {
        Some((idx - 1) >> 1)
    }
}

/// Insert `(key, slot)` at position `slot` and sift up.
///
/// Callers insert slots in order `0..run_count`, so the slot doubles as the
/// append position.
pub fn insert(pairs: &mut [BhPair], slot: u32, key: f64) {
    let mut idx = slot as usize;
    pairs[idx] = BhPair { key, slot };
    while let Some(par) = parent(idx) {
        if pairs[par].key <= key {
            break;
        }
        pairs.swap(par, idx);
        idx = par;
    }
}

/// Pop the `pop` smallest keys, writing their slots into `out[0..pop]` in
/// ascending-key order.
pub fn depopulate(pairs: &mut [BhPair], out: &mut [u32], pop: usize) {
    debug_assert!(pop <= pairs.len());
    for bot in (0..pop).rev() {
        out[pop - (1 + bot)] = slot_pop(pairs, bot);
    }
}

/// Pop the root, refill with the element at `bot`, and sift down.
fn slot_pop(pairs: &mut [BhPair], bot: usize) -> u32 {
    let popped = pairs[0].slot;
    if bot == 0 {
        return popped;
    }

    pairs[0] = pairs[bot];
    let refile = pairs[0];
    let mut idx = 0usize;
    loop {
        let desc_l = 2 * idx + 1;
        let desc_r = 2 * idx + 2;
        let mut child = idx;
        if desc_l < bot && pairs[desc_l].key < pairs[child].key {
            child = desc_l;
        }
        if desc_r < bot && pairs[desc_r].key < pairs[child].key {
            child = desc_r;
        }
        if child == idx {
            break;
        }
        pairs.swap(idx, child);
        idx = child;
    }
    debug_assert_eq!(pairs[idx], refile);

    popped
}
