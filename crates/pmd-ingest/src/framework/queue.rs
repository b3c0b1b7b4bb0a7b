//! Ordered work queue and reorder buffer
//!
//! Units get a dispatch sequence number when they leave the queue. Units
//! that fail are requeued under the same number and go out before any new
//! unit. Completed units wait in the reorder buffer until every earlier
//! sequence number has been committed.

use std::collections::{BTreeMap, HashMap, VecDeque};

use super::types::{FetchUnit, Plan};

/// Work queue seeded from a plan
#[derive(Debug)]
pub struct WorkQueue {
    retry: VecDeque<(u64, FetchUnit)>,
    fresh: VecDeque<FetchUnit>,
    offsets: Option<(u64, u32)>,
    next_seq: u64,
    /// No unit with a sequence number above this is dispatched
    limit: Option<u64>,
    requeues: HashMap<u64, u32>,
}

impl WorkQueue {
    pub fn new(plan: Plan) -> Self {
        let mut queue = Self {
            retry: VecDeque::new(),
            fresh: VecDeque::new(),
            offsets: None,
            next_seq: 0,
            limit: None,
            requeues: HashMap::new(),
        };
        match plan {
            Plan::Chained(unit) => queue.fresh.push_back(unit),
            Plan::Offsets { start, limit } => queue.offsets = Some((start, limit)),
            Plan::Windows(units) => queue.fresh.extend(units),
            Plan::Finished => {}
        }
        queue
    }

    /// Next unit to dispatch, retries first
    pub fn next(&mut self) -> Option<(u64, FetchUnit)> {
        if let Some(entry) = self.retry.pop_front() {
            return Some(entry);
        }
        if self.limit.is_some_and(|limit| self.next_seq > limit) {
            return None;
        }

        let unit = match self.fresh.pop_front() {
            Some(unit) => unit,
            None => {
                let (offset, limit) = self.offsets.as_mut()?;
                let unit = FetchUnit::Offset {
                    offset: *offset,
                    limit: *limit,
                };
                *offset += u64::from(*limit);
                unit
            }
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        Some((seq, unit))
    }

    /// Add a unit revealed by a response (next cursor)
    pub fn reveal(&mut self, unit: FetchUnit) {
        self.fresh.push_back(unit);
    }

    /// Put a failed unit back; returns how many times it has been requeued
    pub fn requeue(&mut self, seq: u64, unit: FetchUnit) -> u32 {
        let count = self.requeues.entry(seq).or_insert(0);
        *count += 1;
        self.retry.push_back((seq, unit));
        *count
    }

    pub fn requeues(&self, seq: u64) -> u32 {
        self.requeues.get(&seq).copied().unwrap_or(0)
    }

    /// Upstream ended at `seq`; nothing after it is dispatched
    pub fn end_at(&mut self, seq: u64) {
        self.limit = Some(self.limit.map_or(seq, |limit| limit.min(seq)));
        self.fresh.clear();
        self.offsets = None;
        self.retry.retain(|(s, _)| *s <= seq);
    }

    pub fn end_seq(&self) -> Option<u64> {
        self.limit
    }

    /// Stop producing new units; requeued ones are dropped too
    pub fn close(&mut self) {
        self.retry.clear();
        self.fresh.clear();
        self.offsets = None;
        self.limit = Some(self.next_seq.saturating_sub(1));
    }
}

/// Holds completed units until they can be committed in dispatch order
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    pending: BTreeMap<u64, T>,
    next: u64,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self {
            pending: BTreeMap::new(),
            next: 0,
        }
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, seq: u64, item: T) {
        self.pending.insert(seq, item);
    }

    /// Next item if every earlier sequence number has been taken
    pub fn pop_ready(&mut self) -> Option<(u64, T)> {
        let item = self.pending.remove(&self.next)?;
        let seq = self.next;
        self.next += 1;
        Some((seq, item))
    }

    /// Completed units still waiting on an earlier one
    pub fn waiting(&self) -> usize {
        self.pending.len()
    }
}
