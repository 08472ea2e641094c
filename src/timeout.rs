//! Delta queue of timeouts
//!
//! Each entry stores its delay relative to the previous entry, so only the head has to be compared
//! against the current time. The queue is driven by the processor thread, which sleeps
//! [TimeoutQueue::time_to_next] and then pops exactly one due entry.
use alloc::vec::Vec;
use embassy_time::{Duration, Instant};

struct Entry<T> {
    /// Delay relative to the previous entry
    delta: Duration,
    item: T,
}

/// Ordered timeout list
pub struct TimeoutQueue<T> {
    entries: Vec<Entry<T>>,

    /// Time the queue was last serviced, the head delay is relative to it
    last_time: Instant,
}

impl<T> TimeoutQueue<T> {
    pub fn new(now: Instant) -> Self {
        Self {
            entries: Vec::new(),
            last_time: now,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Schedules `item` to be due `time` after `now`
    pub fn add(&mut self, now: Instant, time: Duration, item: T) {
        let mut delta = time;
        if self.entries.is_empty() {
            self.last_time = now;
        } else {
            // Head delay is counted from the last service time, not from now
            delta += now.saturating_duration_since(self.last_time);
        }

        let mut index = 0;
        while index < self.entries.len() {
            let entry = &mut self.entries[index];
            if entry.delta > delta {
                entry.delta -= delta;
                break;
            }
            delta -= entry.delta;
            index += 1;
        }

        self.entries.insert(index, Entry { delta, item });
    }

    /// Removes the first entry matching `predicate`. The delay of the removed entry is added to its
    /// successor, so later entries keep their due time.
    pub fn remove(&mut self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        let index = self.entries.iter().position(|entry| predicate(&entry.item))?;
        let entry = self.entries.remove(index);

        if let Some(next) = self.entries.get_mut(index) {
            next.delta += entry.delta;
        }

        Some(entry.item)
    }

    /// Time until the head entry is due, None for an empty queue
    pub fn time_to_next(&self, now: Instant) -> Option<Duration> {
        let head = self.entries.first()?;
        let elapsed = now.saturating_duration_since(self.last_time);

        if elapsed >= head.delta {
            return Some(Duration::from_ticks(0));
        }
        Some(head.delta - elapsed)
    }

    /// Removes and returns the head entry if it is due
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        if self.time_to_next(now)? > Duration::from_ticks(0) {
            return None;
        }

        // Successors stay relative to the due time of the head, not to the late service time
        let entry = self.entries.remove(0);
        self.last_time += entry.delta;
        Some(entry.item)
    }
}
