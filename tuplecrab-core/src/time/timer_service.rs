use super::*;
use std::collections::BTreeMap;

/// Pending timers ordered by fire time.
///
/// Entries registered for the same instant fire in registration order.
pub struct TimerQueue<T> {
    timers: BTreeMap<(EventTime, u64), T>,
    seq: u64,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            timers: BTreeMap::new(),
            seq: 0,
        }
    }

    /// Register `item` to fire at `fire_at`.
    pub fn register(&mut self, fire_at: EventTime, item: T) {
        self.seq += 1;
        self.timers.insert((fire_at, self.seq), item);
    }

    /// Remove and return the earliest timer with `fire_at <= now`.
    pub fn pop_due(&mut self, now: EventTime) -> Option<(EventTime, T)> {
        let (&(fire_at, _), _) = self.timers.first_key_value()?;
        if fire_at > now {
            return None;
        }
        self.timers
            .pop_first()
            .map(|((fire_at, _), item)| (fire_at, item))
    }

    /// Drain all timers with `fire_at <= now`, earliest first.
    pub fn drain_due(&mut self, now: EventTime) -> Vec<(EventTime, T)> {
        let mut fired = Vec::new();
        while let Some(due) = self.pop_due(now) {
            fired.push(due);
        }
        fired
    }

    /// Remove every pending timer regardless of fire time.
    pub fn drain_all(&mut self) -> Vec<T> {
        std::mem::take(&mut self.timers).into_values().collect()
    }

    /// Fire time of the earliest pending timer, or `None`.
    pub fn next_timer(&self) -> Option<EventTime> {
        self.timers.keys().next().map(|(fire_at, _)| *fire_at)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
