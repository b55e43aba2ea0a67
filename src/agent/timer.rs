//! Time source and timer queue of the agent.
//!
//! The agent runs on a single thread and never sleeps by itself. Timers are kept in a
//! queue and fire when the host calls [`crate::agent::Agent::tick`].

use chrono::{DateTime, Utc};
use std::cell::Cell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};

pub trait Clock {
    /// Monotonic time since some fixed instant.
    fn now(&self) -> Duration;

    /// Wall clock time.
    fn wall(&self) -> DateTime<Utc>;
}

pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that moves only when told. Clones share the same time.
#[derive(Clone, Default)]
pub struct ManualClock {
    elapsed: Rc<Cell<Duration>>,
    origin: DateTime<Utc>,
}

impl ManualClock {
    /// Create a clock, wall time starts at `origin`.
    pub fn new(origin: DateTime<Utc>) -> Self {
        Self {
            elapsed: Rc::default(),
            origin,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.elapsed.set(self.elapsed.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.elapsed.get()
    }

    fn wall(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.elapsed.get())
            .map(|elapsed| self.origin + elapsed)
            .unwrap_or(self.origin)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Timers ordered by deadline, timers with equal deadlines fire in scheduling order.
pub struct TimerQueue<T> {
    heap: BinaryHeap<Reverse<(Duration, TimerId)>>,
    payloads: HashMap<TimerId, T>,
    next_id: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            payloads: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, deadline: Duration, payload: T) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.heap.push(Reverse((deadline, id)));
        self.payloads.insert(id, payload);
        id
    }

    /// Cancel a timer. Return its payload if timer was not fired yet.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        self.payloads.remove(&id)
    }

    /// Take the earliest timer with deadline not later than `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<(TimerId, T)> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if !self.payloads.contains_key(&id) {
                self.heap.pop();
                continue;
            }
            if deadline > now {
                return None;
            }
            self.heap.pop();
            return self.payloads.remove(&id).map(|payload| (id, payload));
        }
        None
    }

    /// Deadline of the earliest active timer.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.heap
            .iter()
            .filter(|Reverse((_, id))| self.payloads.contains_key(id))
            .map(|Reverse((deadline, _))| *deadline)
            .min()
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}
