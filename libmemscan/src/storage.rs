//! Match Storage -- the compact, per-region candidate set the scanner
//! filters across scan rounds.
//!
//! Grounded on the teacher's `InteractiveScanner`/`MemoryMapper` grouping of
//! matches by source region (`interactive.rs`, `memmap.rs`), generalized
//! into the dense-then-sparse representation spec.md §4.C calls for: a
//! per-region dense buffer keeps memory proportional to region size until
//! enough slots are cleared, at which point the group compacts to a sparse
//! `(offset, value)` list.

use crate::value::Value;

/// Below this fraction of present slots, a dense group compacts to sparse.
const SPARSE_THRESHOLD_NUM: usize = 1;
const SPARSE_THRESHOLD_DEN: usize = 8;

enum Slots {
    Dense(Vec<Option<Value>>),
    Sparse(Vec<(usize, Value)>),
}

/// Byte length covering a dense group's slots 0..slot_count at `stride`
/// spacing, each slot `value_size` bytes wide (slots may overlap when
/// `stride < value_size`, as with an "all" scan level).
fn dense_span(slot_count: usize, stride: usize, value_size: usize) -> usize {
    if slot_count == 0 {
        0
    } else {
        (slot_count - 1) * stride + value_size
    }
}

/// One contiguous region's worth of retained candidates.
struct MatchGroup {
    base_addr: usize,
    stride: usize,
    slots: Slots,
}

impl MatchGroup {
    fn count(&self) -> usize {
        match &self.slots {
            Slots::Dense(v) => v.iter().filter(|s| s.is_some()).count(),
            Slots::Sparse(v) => v.len(),
        }
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (usize, Value)> + '_> {
        let base = self.base_addr;
        let stride = self.stride;
        match &self.slots {
            Slots::Dense(v) => Box::new(
                v.iter()
                    .enumerate()
                    .filter_map(move |(i, s)| s.map(|val| (base + i * stride, val))),
            ),
            Slots::Sparse(v) => Box::new(v.iter().map(move |&(off, val)| (base + off, val))),
        }
    }

    /// `bulk_reread(base_addr, len)` re-reads the group's whole dense span
    /// in one call when the group is still dense, per spec.md §4.D
    /// ("re-read the contiguous byte buffer in one call if the group is
    /// still dense; otherwise gather individual reads"). `decode` turns a
    /// byte slice starting at a slot's offset into a `Value`; `value_size`
    /// is how many bytes `decode` consumes. Sparse groups fall back to
    /// `reread`, one address at a time.
    #[allow(clippy::too_many_arguments)]
    fn filter_in_place(
        &mut self,
        reread: &mut dyn FnMut(usize) -> Option<Value>,
        bulk_reread: &mut dyn FnMut(usize, usize) -> Option<Vec<u8>>,
        decode: &dyn Fn(&[u8]) -> Option<Value>,
        value_size: usize,
        predicate: &mut dyn FnMut(usize, &Value, &Value) -> bool,
    ) {
        let base = self.base_addr;
        let stride = self.stride;
        match &mut self.slots {
            Slots::Dense(v) => {
                let span = dense_span(v.len(), stride, value_size);
                let buf = bulk_reread(base, span);
                for (i, slot) in v.iter_mut().enumerate() {
                    let Some(old) = slot else { continue };
                    let addr = base + i * stride;
                    let local = i * stride;
                    let new_val = buf
                        .as_deref()
                        .filter(|b| local + value_size <= b.len())
                        .and_then(|b| decode(&b[local..]));
                    match new_val {
                        None => *slot = None,
                        Some(new_val) => {
                            if predicate(addr, old, &new_val) {
                                *slot = Some(new_val);
                            } else {
                                *slot = None;
                            }
                        }
                    }
                }
            }
            Slots::Sparse(v) => {
                v.retain_mut(|(off, old)| {
                    let addr = base + *off;
                    match reread(addr) {
                        None => false,
                        Some(new_val) => {
                            let keep = predicate(addr, old, &new_val);
                            if keep {
                                *old = new_val;
                            }
                            keep
                        }
                    }
                });
            }
        }
        self.maybe_compact();
    }

    /// Same dense-bulk-vs-sparse-individual split as
    /// [`filter_in_place`](Self::filter_in_place), but never drops a slot --
    /// a read that comes back short or absent just leaves the stored value
    /// untouched.
    fn refresh(
        &mut self,
        reread: &mut dyn FnMut(usize) -> Option<Value>,
        bulk_reread: &mut dyn FnMut(usize, usize) -> Option<Vec<u8>>,
        decode: &dyn Fn(&[u8]) -> Option<Value>,
        value_size: usize,
    ) {
        let base = self.base_addr;
        let stride = self.stride;
        match &mut self.slots {
            Slots::Dense(v) => {
                let span = dense_span(v.len(), stride, value_size);
                let buf = bulk_reread(base, span);
                for (i, slot) in v.iter_mut().enumerate() {
                    if slot.is_none() {
                        continue;
                    }
                    let local = i * stride;
                    if let Some(new_val) = buf
                        .as_deref()
                        .filter(|b| local + value_size <= b.len())
                        .and_then(|b| decode(&b[local..]))
                    {
                        *slot = Some(new_val);
                    }
                }
            }
            Slots::Sparse(v) => {
                for (off, val) in v.iter_mut() {
                    let addr = base + *off;
                    if let Some(new_val) = reread(addr) {
                        *val = new_val;
                    }
                }
            }
        }
    }

    fn maybe_compact(&mut self) {
        if let Slots::Dense(v) = &self.slots {
            let total = v.len();
            let present = v.iter().filter(|s| s.is_some()).count();
            if total > 0 && present * SPARSE_THRESHOLD_DEN < total * SPARSE_THRESHOLD_NUM {
                let stride = self.stride;
                let sparse: Vec<(usize, Value)> = v
                    .iter()
                    .enumerate()
                    .filter_map(|(i, s)| s.map(|val| (i * stride, val)))
                    .collect();
                self.slots = Slots::Sparse(sparse);
            }
        }
    }
}

/// Ordered sequence of per-region groups. Iteration yields `(addr, value)`
/// in ascending address order per group, groups in insertion order -- the
/// teacher's match-listing order and spec.md §5's ordering guarantee.
#[derive(Default)]
pub struct MatchStorage {
    groups: Vec<MatchGroup>,
    count: usize,
}

impl MatchStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a region snapshot. `slots[i]` is the value at
    /// `base_addr + i * stride`, or `None` if that slot didn't match.
    pub fn add_region_snapshot(&mut self, base_addr: usize, stride: usize, slots: Vec<Option<Value>>) {
        let present = slots.iter().filter(|s| s.is_some()).count();
        if present == 0 {
            return;
        }
        self.count += present;
        self.groups.push(MatchGroup {
            base_addr,
            stride,
            slots: Slots::Dense(slots),
        });
    }

    pub fn get_matches_count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn iterate_val<F: FnMut(usize, Value)>(&self, mut f: F, max: Option<usize>) {
        let mut emitted = 0usize;
        for group in &self.groups {
            for (addr, val) in group.iter() {
                if max.is_some_and(|m| emitted >= m) {
                    return;
                }
                f(addr, val);
                emitted += 1;
            }
        }
    }

    /// Re-read every present slot and retain it iff
    /// `predicate(addr, old_value, new_value)` holds. Per spec.md §4.D, a
    /// group still dense is re-read in a single contiguous `bulk_reread`
    /// call; a group already compacted to sparse is re-read address by
    /// address via `reread`. `decode`/`value_size` turn the bulk buffer
    /// back into `Value`s. A slot that comes back unreadable (whole-group
    /// `bulk_reread` failure, or a sparse `reread` returning `None`) is
    /// dropped unconditionally -- spec.md §4.D's "slot whose underlying
    /// region has been unmapped is dropped silently".
    pub fn filter_in_place(
        &mut self,
        mut reread: impl FnMut(usize) -> Option<Value>,
        mut bulk_reread: impl FnMut(usize, usize) -> Option<Vec<u8>>,
        decode: impl Fn(&[u8]) -> Option<Value>,
        value_size: usize,
        mut predicate: impl FnMut(usize, &Value, &Value) -> bool,
    ) {
        for group in &mut self.groups {
            group.filter_in_place(&mut reread, &mut bulk_reread, &decode, value_size, &mut predicate);
        }
        self.groups.retain(|g| g.count() > 0);
        self.count = self.groups.iter().map(MatchGroup::count).sum();
    }

    /// Overwrite stored values with freshly-read ones without removing any
    /// slot (spec.md §4.C) -- used by `update()`, which per spec.md §8
    /// property 4 must never change `matches_count`. Dense groups are
    /// re-read in one `bulk_reread` call, sparse groups address by address,
    /// the same split `filter_in_place` uses.
    pub fn refresh_values(
        &mut self,
        mut reread: impl FnMut(usize) -> Option<Value>,
        mut bulk_reread: impl FnMut(usize, usize) -> Option<Vec<u8>>,
        decode: impl Fn(&[u8]) -> Option<Value>,
        value_size: usize,
    ) {
        for group in &mut self.groups {
            group.refresh(&mut reread, &mut bulk_reread, &decode, value_size);
        }
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn v(n: i32) -> Option<Value> {
        Some(Value::I32(n))
    }

    #[test]
    fn count_and_iteration_order() {
        let mut storage = MatchStorage::new();
        storage.add_region_snapshot(0x1000, 4, vec![v(1), None, v(3)]);
        storage.add_region_snapshot(0x2000, 4, vec![None, v(20)]);
        assert_eq!(storage.get_matches_count(), 3);

        let mut seen = Vec::new();
        storage.iterate_val(|addr, val| seen.push((addr, val)), None);
        assert_eq!(
            seen,
            vec![
                (0x1000, Value::I32(1)),
                (0x1008, Value::I32(3)),
                (0x2004, Value::I32(20)),
            ]
        );
    }

    #[test]
    fn iterate_respects_max() {
        let mut storage = MatchStorage::new();
        storage.add_region_snapshot(0x1000, 4, vec![v(1), v(2), v(3)]);
        let mut seen = Vec::new();
        storage.iterate_val(|addr, val| seen.push((addr, val)), Some(2));
        assert_eq!(seen.len(), 2);
    }

    /// Test-only decode matching the `i32::to_ne_bytes`/`from_ne_bytes`
    /// encoding the bulk buffers below are built with.
    fn decode_i32(bytes: &[u8]) -> Option<Value> {
        let raw: [u8; 4] = bytes[..4].try_into().ok()?;
        Some(Value::I32(i32::from_ne_bytes(raw)))
    }

    #[test]
    fn filter_in_place_drops_non_matching_and_unmapped() {
        let mut storage = MatchStorage::new();
        storage.add_region_snapshot(0x1000, 4, vec![v(1), v(2), v(3)]);

        // Dense bulk re-read covers addr 0x1000 -> 1 (unchanged, keep) and
        // 0x1004 -> 99 (changed, but predicate wants "unchanged" => drop);
        // the buffer is truncated before 0x1008, simulating that slot's
        // region having gone away -- dropped silently, same as `reread`
        // returning `None` would for a sparse group.
        storage.filter_in_place(
            |_addr| None,
            |_base, _len| Some([1i32.to_ne_bytes(), 99i32.to_ne_bytes()].concat()),
            decode_i32,
            4,
            |_, old, new| old.values_equal(new),
        );

        assert_eq!(storage.get_matches_count(), 1);
        let mut seen = Vec::new();
        storage.iterate_val(|addr, val| seen.push((addr, val)), None);
        assert_eq!(seen, vec![(0x1000, Value::I32(1))]);
    }

    #[test]
    fn refresh_values_never_drops_slots() {
        let mut storage = MatchStorage::new();
        storage.add_region_snapshot(0x1000, 4, vec![v(1), v(2)]);
        // Bulk buffer only covers the first slot (0x1000); the second
        // slot's bytes are missing, simulating a short read -- it must keep
        // its old value rather than being dropped.
        storage.refresh_values(
            |_addr| None,
            |_base, _len| Some(42i32.to_ne_bytes().to_vec()),
            decode_i32,
            4,
        );
        assert_eq!(storage.get_matches_count(), 2);
        let mut seen = Vec::new();
        storage.iterate_val(|addr, val| seen.push((addr, val)), None);
        assert_eq!(seen, vec![(0x1000, Value::I32(42)), (0x1004, Value::I32(2))]);
    }

    #[test]
    fn compacts_to_sparse_below_threshold() {
        let mut storage = MatchStorage::new();
        let slots: Vec<Option<Value>> = (0..100).map(v).collect();
        storage.add_region_snapshot(0x1000, 4, slots);
        // Drop all but 5 of 100 slots (< 12.5%).
        storage.filter_in_place(
            |addr| {
                let idx = (addr - 0x1000) / 4;
                Some(Value::I32(idx as i32))
            },
            |_base, len| {
                let mut buf = vec![0u8; len];
                let mut off = 0usize;
                while off + 4 <= len {
                    let idx = (off / 4) as i32;
                    buf[off..off + 4].copy_from_slice(&idx.to_ne_bytes());
                    off += 4;
                }
                Some(buf)
            },
            decode_i32,
            4,
            |addr, _, _| (addr - 0x1000) / 4 < 5,
        );
        assert_eq!(storage.get_matches_count(), 5);
        assert!(matches!(storage.groups[0].slots, Slots::Sparse(_)));
    }
}
