use super::*;

/// Tuples of one key, oldest first, each with its insertion time.
pub(crate) struct Partition<T> {
    pub(crate) tuples: VecDeque<(T, EventTime)>,
    pub(crate) timer: Option<TaskHandle>,
}

impl<T: Tuple> Partition<T> {
    pub(crate) fn new() -> Self {
        Self {
            tuples: VecDeque::new(),
            timer: None,
        }
    }

    /// Drop the oldest tuples until at most `n` remain.
    pub(crate) fn evict_to_count(&mut self, n: usize) -> usize {
        let excess = self.tuples.len().saturating_sub(n);
        self.tuples.drain(..excess);
        excess
    }

    /// Drop tuples that have been in the partition for `age` or longer.
    pub(crate) fn evict_older(&mut self, age: Duration, now: EventTime) -> usize {
        let cutoff = now - duration_ms(age);
        let mut evicted = 0;
        while self.tuples.front().is_some_and(|(_, at)| *at <= cutoff) {
            self.tuples.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub(crate) fn oldest(&self) -> Option<EventTime> {
        self.tuples.front().map(|(_, at)| *at)
    }

    pub(crate) fn contents(&self) -> Vec<T> {
        self.tuples.iter().map(|(t, _)| t.clone()).collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<T> {
        self.tuples.drain(..).map(|(t, _)| t).collect()
    }

    pub(crate) fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}
