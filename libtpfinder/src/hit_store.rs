use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::constants::TICKS_PER_SAMPLE;
use super::kernel::Hit;

/// A hit tagged with the timestamp of the window it was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPrimitive {
    pub window_timestamp: u64,
    pub channel: u16,
    pub end_index: u32,
    pub charge: i32,
    pub time_over_threshold: i32,
}

impl TriggerPrimitive {
    pub fn new(window_timestamp: u64, hit: &Hit) -> Self {
        Self {
            window_timestamp,
            channel: hit.channel,
            end_index: hit.end_index,
            charge: hit.charge,
            time_over_threshold: hit.time_over_threshold,
        }
    }

    /// Absolute timestamp of the first tick back under threshold
    pub fn end_timestamp(&self) -> u64 {
        self.window_timestamp + self.end_index as u64 * TICKS_PER_SAMPLE
    }

    /// Absolute timestamp of the first tick over threshold
    pub fn start_timestamp(&self) -> u64 {
        self.end_timestamp()
            .saturating_sub(self.time_over_threshold.max(0) as u64 * TICKS_PER_SAMPLE)
    }
}

/// Time ordered, bounded store of trigger primitives.
///
/// Batches are appended in window order. Once more than `capacity` primitives are held
/// the oldest are evicted.
#[derive(Debug, Clone)]
pub struct HitStore {
    capacity: usize,
    primitives: VecDeque<TriggerPrimitive>,
    evicted: u64,
}

impl HitStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            primitives: VecDeque::with_capacity(capacity.min(1 << 16)),
            evicted: 0,
        }
    }

    /// Append all hits of one window
    pub fn push_batch(&mut self, window_timestamp: u64, hits: &[Hit]) {
        for hit in hits {
            self.primitives
                .push_back(TriggerPrimitive::new(window_timestamp, hit));
        }
        while self.primitives.len() > self.capacity {
            self.primitives.pop_front();
            self.evicted += 1;
        }
    }

    /// Every primitive whose window timestamp lies in `[start, end]`, in insertion order
    pub fn in_range(&self, start: u64, end: u64) -> Vec<TriggerPrimitive> {
        self.primitives
            .iter()
            .filter(|p| p.window_timestamp >= start && p.window_timestamp <= end)
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of primitives dropped to stay within capacity
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &TriggerPrimitive> {
        self.primitives.iter()
    }
}
