//! Completion tracker.
//!
//! A fixed-capacity arena of descriptors that have been executed (or have
//! stopped at an exception) but whose completion has not yet been retired.
//! Entries leave in FIFO order, so the head is always the oldest descriptor
//! still owed to the caller. That head is what `dmpoll` reports and what
//! `retry_after_exception` restarts.
//!
//! ```text
//!   slots (arena)                 queue (FIFO of slot indices)
//!  ┌────┬────┬────┬────┐          head            tail
//!  │ e7 │    │ e5 │ e6 │  ◄────── [ 2 ] [ 3 ] [ 0 ]
//!  └────┴────┴────┴────┘
//!          ▲ free list
//! ```

use std::collections::VecDeque;

use thiserror::Error;

use super::transfer::ActiveDescriptor;
use super::DescriptorState;

/// How a tracked descriptor's completion is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionKind {
    /// Inserted by a fresh fetch
    #[default]
    Normal,
    /// Updated in place by a retry after an exception
    Restarted,
}

/// A descriptor held by the tracker.
#[derive(Debug, Clone)]
pub struct TrackedEntry {
    pub id: u64,
    pub desc: ActiveDescriptor,
    pub kind: CompletionKind,
    /// Times this entry was restarted after an exception
    pub restarts: u32,
}

/// Returned when every slot is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("descriptor tracker full ({capacity} entries)")]
pub struct TrackerFull {
    pub capacity: usize,
}

/// Bounded FIFO of in-flight descriptors.
#[derive(Debug, Clone)]
pub struct DescriptorTracker {
    slots: Vec<Option<TrackedEntry>>,
    free: Vec<usize>,
    queue: VecDeque<usize>,
    next_id: u64,
}

impl DescriptorTracker {
    /// Create a tracker with room for `capacity` descriptors.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            // Reversed so slot 0 is handed out first
            free: (0..capacity).rev().collect(),
            queue: VecDeque::with_capacity(capacity),
            next_id: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Track `desc`, assigning the next id.
    pub fn insert(&mut self, mut desc: ActiveDescriptor) -> Result<u64, TrackerFull> {
        let slot = self.free.pop().ok_or(TrackerFull { capacity: self.capacity() })?;
        self.next_id += 1;
        let id = self.next_id;
        desc.id = id;
        self.slots[slot] = Some(TrackedEntry { id, desc, kind: CompletionKind::Normal, restarts: 0 });
        self.queue.push_back(slot);
        Ok(id)
    }

    /// Oldest tracked entry.
    pub fn peek_head(&self) -> Option<&TrackedEntry> {
        let slot = *self.queue.front()?;
        self.slots[slot].as_ref()
    }

    pub fn peek_head_mut(&mut self) -> Option<&mut TrackedEntry> {
        let slot = *self.queue.front()?;
        self.slots[slot].as_mut()
    }

    /// Replace the head's descriptor after a restart, keeping its id.
    pub fn restart_head(&mut self, mut desc: ActiveDescriptor) -> Option<u64> {
        let entry = self.peek_head_mut()?;
        desc.id = entry.id;
        entry.desc = desc;
        entry.kind = CompletionKind::Restarted;
        entry.restarts += 1;
        Some(entry.id)
    }

    /// Settle the state of entry `id` now that its execution has ended.
    pub fn complete(&mut self, id: u64) -> Option<DescriptorState> {
        let entry = self.iter_mut().find(|e| e.id == id)?;
        entry.desc.state = entry.desc.state.settled();
        Some(entry.desc.state)
    }

    /// Remove retired entries from the head, oldest first.
    ///
    /// Stops at the first entry still pending, so order is preserved.
    pub fn pop_done(&mut self) -> Vec<TrackedEntry> {
        let mut popped = Vec::new();
        while let Some(&slot) = self.queue.front() {
            let retired = self.slots[slot]
                .as_ref()
                .is_some_and(|e| e.desc.state.is_retired());
            if !retired {
                break;
            }
            self.queue.pop_front();
            if let Some(entry) = self.slots[slot].take() {
                popped.push(entry);
            }
            self.free.push(slot);
        }
        popped
    }

    /// Give up on every entry waiting for a retry so it can be retired.
    pub fn abandon_exceptions(&mut self) -> usize {
        let mut abandoned = 0;
        for entry in self.iter_mut() {
            if entry.desc.state == DescriptorState::ExceptRunning {
                entry.desc.state = DescriptorState::ExceptError;
                abandoned += 1;
            }
        }
        abandoned
    }

    /// Entries in FIFO order.
    pub fn iter(&self) -> impl Iterator<Item = &TrackedEntry> {
        self.queue.iter().filter_map(move |&slot| self.slots[slot].as_ref())
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut TrackedEntry> {
        let order: Vec<usize> = self.queue.iter().copied().collect();
        self.slots
            .iter_mut()
            .enumerate()
            .filter(move |(slot, _)| order.contains(slot))
            .filter_map(|(_, entry)| entry.as_mut())
    }

    /// Drop every entry. Ids keep counting up.
    pub fn clear(&mut self) {
        while let Some(slot) = self.queue.pop_front() {
            self.slots[slot] = None;
            self.free.push(slot);
        }
    }
}

impl Default for DescriptorTracker {
    fn default() -> Self {
        Self::new(super::DESC_TRACKER_CAPACITY)
    }
}
