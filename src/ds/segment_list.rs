//! Sentinel-based doubly linked segments over one slot vector.
//!
//! One `SegmentList` holds every entry of a policy plus one sentinel per
//! segment (window, probation, protected, ...). Links are `SlotId`s, so
//! moving an entry between segments is an O(1) relink without pointer
//! aliasing. Released slots are chained through their own storage and
//! handed out again by the next `insert`.
//!
//! ## Architecture
//!
//! ```text
//!   slots: Vec<Slot<T>>
//!   ┌────────┬──────────────────────────────────────────────────┐
//!   │ SlotId │ Slot                                             │
//!   ├────────┼──────────────────────────────────────────────────┤
//!   │ 0      │ Sentinel { prev: 2, next: 1 }                    │  window
//!   │ 1      │ Entry { A, prev: 0, next: 2, linked }            │
//!   │ 2      │ Entry { B, prev: 1, next: 0, linked }            │
//!   │ 3      │ Sentinel { prev: 3, next: 3 }                    │  probation (empty)
//!   │ 4      │ Vacant { next_free: None }      ◄── free_head    │
//!   └────────┴──────────────────────────────────────────────────┘
//!
//!   s_win ─► [A] ◄──► [B] ◄── s_win      (cyclic through the sentinel)
//!          head (LRU)   tail (MRU)
//! ```
//!
//! ## Operations
//! - `append_tail` / `append_head`: link a detached entry next to a sentinel
//! - `unlink`: detach a linked entry (the slot stays allocated)
//! - `move_to_tail`: `unlink` + `append_tail`, possibly into another segment
//! - `free`: release a detached entry's slot and return its value
//!
//! Linking an already linked entry, or unlinking a detached one, is an
//! [`InvariantError`]; the caller's bookkeeping is broken at that point.
//!
//! ## Performance
//! - every link operation: O(1), no allocation
//! - `insert`: O(1) amortized (vacant slots are reused first)
//! - `iter` / `validate`: O(n) in the segment length

use crate::error::InvariantError;

/// Handle to a sentinel or entry of a [`SegmentList`].
///
/// Stays valid until the entry is freed; the slot may then be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
enum Slot<T> {
    /// `next` is the segment head, `prev` its tail.
    Sentinel { prev: SlotId, next: SlotId },
    /// Self-linked while detached.
    Entry {
        value: T,
        prev: SlotId,
        next: SlotId,
        linked: bool,
    },
    Vacant { next_free: Option<SlotId> },
}

/// Entries threaded through sentinel-headed segments.
#[derive(Debug)]
pub struct SegmentList<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<SlotId>,
    entries: usize,
}

impl<T> SegmentList<T> {
    /// Creates a list with no segments.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            entries: 0,
        }
    }

    /// Allocates a new, empty segment and returns its sentinel.
    pub fn new_sentinel(&mut self) -> SlotId {
        self.allocate(|id| Slot::Sentinel { prev: id, next: id })
    }

    /// Allocates a detached entry holding `value`.
    pub fn insert(&mut self, value: T) -> SlotId {
        self.entries += 1;
        self.allocate(move |id| Slot::Entry {
            value,
            prev: id,
            next: id,
            linked: false,
        })
    }

    /// Releases a detached entry and returns its value.
    pub fn free(&mut self, id: SlotId) -> Result<T, InvariantError> {
        if self.entry_linked(id)? {
            return Err(InvariantError::new(format!(
                "invalid state: freeing linked entry {}",
                id.index()
            )));
        }
        let vacant = Slot::Vacant {
            next_free: self.free_head,
        };
        let Some(slot) = self.slots.get_mut(id.0) else {
            return Err(free_slot(id));
        };
        match std::mem::replace(slot, vacant) {
            Slot::Entry { value, .. } => {
                self.free_head = Some(id);
                self.entries -= 1;
                Ok(value)
            },
            other => {
                *slot = other;
                Err(InvariantError::new(format!("entry {} vanished", id.index())))
            },
        }
    }

    /// Number of entries (sentinels excluded), linked or not.
    pub fn len(&self) -> usize {
        self.entries
    }

    /// Returns `true` if no entries are allocated.
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Returns the entry value for `id`; `None` for sentinels and free slots.
    pub fn get(&self, id: SlotId) -> Option<&T> {
        match self.slots.get(id.0) {
            Some(Slot::Entry { value, .. }) => Some(value),
            _ => None,
        }
    }

    /// Returns a mutable entry value for `id`.
    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        match self.slots.get_mut(id.0) {
            Some(Slot::Entry { value, .. }) => Some(value),
            _ => None,
        }
    }

    /// Returns `true` if `id` is an entry currently linked into a segment.
    pub fn is_linked(&self, id: SlotId) -> bool {
        matches!(self.slots.get(id.0), Some(Slot::Entry { linked: true, .. }))
    }

    /// Returns `true` if the segment behind `sentinel` has no entries.
    pub fn is_segment_empty(&self, sentinel: SlotId) -> bool {
        self.first(sentinel).is_none()
    }

    /// Returns the head (oldest) entry of a segment.
    pub fn first(&self, sentinel: SlotId) -> Option<SlotId> {
        match self.slots.get(sentinel.0) {
            Some(Slot::Sentinel { next, .. }) if *next != sentinel => Some(*next),
            _ => None,
        }
    }

    /// Returns the tail (newest) entry of a segment.
    pub fn last(&self, sentinel: SlotId) -> Option<SlotId> {
        match self.slots.get(sentinel.0) {
            Some(Slot::Sentinel { prev, .. }) if *prev != sentinel => Some(*prev),
            _ => None,
        }
    }

    /// Returns the entry after `id`, or `None` when `id` is the segment tail.
    pub fn next_entry(&self, id: SlotId) -> Option<SlotId> {
        let (_, next) = self.links(id).ok()?;
        self.get(next).map(|_| next)
    }

    /// Returns the entry before `id`, or `None` when `id` is the segment head.
    pub fn prev_entry(&self, id: SlotId) -> Option<SlotId> {
        let (prev, _) = self.links(id).ok()?;
        self.get(prev).map(|_| prev)
    }

    /// Links a detached entry at the tail of the segment.
    pub fn append_tail(&mut self, id: SlotId, sentinel: SlotId) -> Result<(), InvariantError> {
        self.check_linkable(id, sentinel)?;
        let (tail, _) = self.links(sentinel)?;
        self.link_between(id, tail, sentinel)
    }

    /// Links a detached entry at the head of the segment.
    pub fn append_head(&mut self, id: SlotId, sentinel: SlotId) -> Result<(), InvariantError> {
        self.check_linkable(id, sentinel)?;
        let (_, head) = self.links(sentinel)?;
        self.link_between(id, sentinel, head)
    }

    /// Detaches a linked entry from whatever segment holds it.
    pub fn unlink(&mut self, id: SlotId) -> Result<(), InvariantError> {
        if !self.entry_linked(id)? {
            return Err(InvariantError::new(format!(
                "invalid state: entry {} is not linked",
                id.index()
            )));
        }
        let (prev, next) = self.links(id)?;
        *self.links_mut(prev)?.1 = next;
        *self.links_mut(next)?.0 = prev;

        let (own_prev, own_next) = self.links_mut(id)?;
        *own_prev = id;
        *own_next = id;
        self.set_linked(id, false)
    }

    /// Moves a linked entry to the tail of `sentinel`'s segment.
    pub fn move_to_tail(&mut self, id: SlotId, sentinel: SlotId) -> Result<(), InvariantError> {
        if self.last(sentinel) == Some(id) {
            return Ok(());
        }
        self.unlink(id)?;
        self.append_tail(id, sentinel)
    }

    /// Iterates a segment from head to tail.
    pub fn iter(&self, sentinel: SlotId) -> SegmentIter<'_, T> {
        SegmentIter {
            list: self,
            current: self.first(sentinel),
        }
    }

    /// Walks a segment checking link symmetry; returns the entry count.
    pub fn validate(&self, sentinel: SlotId) -> Result<usize, InvariantError> {
        if !self.is_sentinel(sentinel) {
            return Err(not_a_sentinel(sentinel));
        }

        let (tail, head) = self.links(sentinel)?;
        let mut count = 0usize;
        let mut prev = sentinel;
        let mut current = head;
        while current != sentinel {
            let linked = self.entry_linked(current)?;
            let (back, next) = self.links(current)?;
            if !linked || back != prev {
                return Err(InvariantError::new(format!(
                    "broken link at entry {} (prev {} expected {})",
                    current.index(),
                    back.index(),
                    prev.index()
                )));
            }
            count += 1;
            if count > self.entries {
                return Err(InvariantError::new("segment cycle does not close"));
            }
            prev = current;
            current = next;
        }
        if tail != prev {
            return Err(InvariantError::new(format!(
                "sentinel {} tail link is stale",
                sentinel.index()
            )));
        }
        Ok(count)
    }

    fn allocate(&mut self, build: impl FnOnce(SlotId) -> Slot<T>) -> SlotId {
        let reusable = self.free_head.and_then(|id| match self.slots.get(id.0) {
            Some(Slot::Vacant { next_free }) => Some((id, *next_free)),
            _ => None,
        });
        match reusable {
            Some((id, next_free)) => {
                self.free_head = next_free;
                self.slots[id.0] = build(id);
                id
            },
            None => {
                self.free_head = None;
                let id = SlotId(self.slots.len());
                self.slots.push(build(id));
                id
            },
        }
    }

    fn is_sentinel(&self, id: SlotId) -> bool {
        matches!(self.slots.get(id.0), Some(Slot::Sentinel { .. }))
    }

    /// Link state of an entry; sentinels and free slots are errors.
    fn entry_linked(&self, id: SlotId) -> Result<bool, InvariantError> {
        match self.slots.get(id.0) {
            Some(Slot::Entry { linked, .. }) => Ok(*linked),
            Some(Slot::Sentinel { .. }) => Err(InvariantError::new(format!(
                "slot {} is a sentinel, not an entry",
                id.index()
            ))),
            _ => Err(free_slot(id)),
        }
    }

    fn check_linkable(&self, id: SlotId, sentinel: SlotId) -> Result<(), InvariantError> {
        if !self.is_sentinel(sentinel) {
            return Err(not_a_sentinel(sentinel));
        }
        if self.entry_linked(id)? {
            return Err(InvariantError::new(format!(
                "invalid state: entry {} is already linked",
                id.index()
            )));
        }
        Ok(())
    }

    fn link_between(
        &mut self,
        id: SlotId,
        prev: SlotId,
        next: SlotId,
    ) -> Result<(), InvariantError> {
        *self.links_mut(prev)?.1 = id;
        *self.links_mut(next)?.0 = id;
        let (own_prev, own_next) = self.links_mut(id)?;
        *own_prev = prev;
        *own_next = next;
        self.set_linked(id, true)
    }

    fn links(&self, id: SlotId) -> Result<(SlotId, SlotId), InvariantError> {
        match self.slots.get(id.0) {
            Some(Slot::Sentinel { prev, next } | Slot::Entry { prev, next, .. }) => {
                Ok((*prev, *next))
            },
            _ => Err(free_slot(id)),
        }
    }

    fn links_mut(&mut self, id: SlotId) -> Result<(&mut SlotId, &mut SlotId), InvariantError> {
        match self.slots.get_mut(id.0) {
            Some(Slot::Sentinel { prev, next } | Slot::Entry { prev, next, .. }) => Ok((prev, next)),
            _ => Err(free_slot(id)),
        }
    }

    fn set_linked(&mut self, id: SlotId, state: bool) -> Result<(), InvariantError> {
        match self.slots.get_mut(id.0) {
            Some(Slot::Entry { linked, .. }) => {
                *linked = state;
                Ok(())
            },
            _ => Err(free_slot(id)),
        }
    }
}

impl<T> Default for SegmentList<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn free_slot(id: SlotId) -> InvariantError {
    InvariantError::new(format!("slot {} is free", id.index()))
}

fn not_a_sentinel(id: SlotId) -> InvariantError {
    InvariantError::new(format!("slot {} is not a sentinel", id.index()))
}

/// Iterator over `(SlotId, &T)` from segment head to tail.
pub struct SegmentIter<'a, T> {
    list: &'a SegmentList<T>,
    current: Option<SlotId>,
}

impl<'a, T> Iterator for SegmentIter<'a, T> {
    type Item = (SlotId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let value = self.list.get(id)?;
        self.current = self.list.next_entry(id);
        Some((id, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &SegmentList<u64>, sentinel: SlotId) -> Vec<u64> {
        list.iter(sentinel).map(|(_, v)| *v).collect()
    }

    // ==============================================
    // Linking
    // ==============================================

    mod linking {
        use super::*;

        #[test]
        fn empty_segment_is_self_linked() {
            let mut list: SegmentList<u64> = SegmentList::new();
            let s = list.new_sentinel();
            assert!(list.is_segment_empty(s));
            assert_eq!(list.first(s), None);
            assert_eq!(list.last(s), None);
            assert_eq!(list.validate(s), Ok(0));
            assert!(list.is_empty());
        }

        #[test]
        fn append_tail_and_head_order() {
            let mut list = SegmentList::new();
            let s = list.new_sentinel();
            let a = list.insert(1);
            let b = list.insert(2);
            let c = list.insert(3);
            list.append_tail(a, s).unwrap();
            list.append_tail(b, s).unwrap();
            list.append_head(c, s).unwrap();

            assert_eq!(keys(&list, s), vec![3, 1, 2]);
            assert_eq!(list.first(s), Some(c));
            assert_eq!(list.last(s), Some(b));
            assert_eq!(list.validate(s), Ok(3));
            assert_eq!(list.len(), 3);
        }

        #[test]
        fn move_between_segments() {
            let mut list = SegmentList::new();
            let window = list.new_sentinel();
            let probation = list.new_sentinel();
            let a = list.insert(10);
            let b = list.insert(20);
            list.append_tail(a, window).unwrap();
            list.append_tail(b, window).unwrap();

            list.move_to_tail(a, probation).unwrap();
            assert_eq!(keys(&list, window), vec![20]);
            assert_eq!(keys(&list, probation), vec![10]);

            list.move_to_tail(b, window).unwrap();
            assert_eq!(keys(&list, window), vec![20]);
            assert_eq!(list.validate(window), Ok(1));
            assert_eq!(list.validate(probation), Ok(1));
        }

        #[test]
        fn next_and_prev_stop_at_sentinel() {
            let mut list = SegmentList::new();
            let s = list.new_sentinel();
            let a = list.insert(1);
            let b = list.insert(2);
            list.append_tail(a, s).unwrap();
            list.append_tail(b, s).unwrap();

            assert_eq!(list.next_entry(a), Some(b));
            assert_eq!(list.next_entry(b), None);
            assert_eq!(list.prev_entry(b), Some(a));
            assert_eq!(list.prev_entry(a), None);
        }
    }

    // ==============================================
    // Link State Errors
    // ==============================================

    mod link_state {
        use super::*;

        #[test]
        fn unlink_unlinked_entry_is_invalid_state() {
            let mut list = SegmentList::new();
            let s = list.new_sentinel();
            let a = list.insert(1u64);

            let err = list.unlink(a).unwrap_err();
            assert!(err.message().contains("invalid state"));

            list.append_tail(a, s).unwrap();
            list.unlink(a).unwrap();
            assert!(list.unlink(a).is_err());
            assert!(!list.is_linked(a));
        }

        #[test]
        fn double_link_is_invalid_state() {
            let mut list = SegmentList::new();
            let s = list.new_sentinel();
            let a = list.insert(1u64);
            list.append_tail(a, s).unwrap();
            assert!(list.append_tail(a, s).is_err());
            assert!(list.append_head(a, s).is_err());
            assert_eq!(list.validate(s), Ok(1));
        }

        #[test]
        fn sentinel_is_not_an_entry() {
            let mut list: SegmentList<u64> = SegmentList::new();
            let s = list.new_sentinel();
            let other = list.new_sentinel();
            assert!(list.unlink(s).is_err());
            assert!(list.append_tail(other, s).is_err());
            assert!(list.free(s).is_err());
            assert_eq!(list.get(s), None);
            assert_eq!(list.validate(s), Ok(0));
        }
    }

    // ==============================================
    // Slot Reuse
    // ==============================================

    mod slot_reuse {
        use super::*;

        #[test]
        fn free_requires_detached_entry() {
            let mut list = SegmentList::new();
            let s = list.new_sentinel();
            let a = list.insert(5u64);
            list.append_tail(a, s).unwrap();
            assert!(list.free(a).is_err());

            list.unlink(a).unwrap();
            assert_eq!(list.free(a), Ok(5));
            assert!(list.is_empty());
            assert!(list.free(a).is_err());
            assert_eq!(list.get(a), None);
        }

        #[test]
        fn freed_slots_are_reused_last_in_first_out() {
            let mut list = SegmentList::new();
            let s = list.new_sentinel();
            let a = list.insert(1u64);
            let b = list.insert(2u64);
            list.free(a).unwrap();
            list.free(b).unwrap();

            let c = list.insert(3);
            let d = list.insert(4);
            let e = list.insert(5);
            assert_eq!(c.index(), b.index());
            assert_eq!(d.index(), a.index());
            assert!(e.index() > s.index().max(a.index()).max(b.index()));
            assert_eq!(list.len(), 3);
        }

        #[test]
        fn reused_slot_starts_detached() {
            let mut list = SegmentList::new();
            let s = list.new_sentinel();
            let a = list.insert(1u64);
            list.append_tail(a, s).unwrap();
            list.unlink(a).unwrap();
            list.free(a).unwrap();

            let b = list.insert(2);
            assert_eq!(b.index(), a.index());
            assert!(!list.is_linked(b));
            assert_eq!(list.validate(s), Ok(0));
            list.append_tail(b, s).unwrap();
            assert_eq!(keys(&list, s), vec![2]);
        }
    }
}
