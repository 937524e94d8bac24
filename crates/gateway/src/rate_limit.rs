use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::clock::SharedClock;

/// Sliding-window budget for outbound feed requests.
///
/// Shared by every clone, so all handlers draw from the same allowance. A budget of zero
/// requests per window is unlimited.
#[derive(Clone)]
pub struct RequestBudget {
    issued: Arc<Mutex<VecDeque<Instant>>>,
    per_window: u32,
    window: Duration,
    clock: SharedClock,
}

impl RequestBudget {
    pub fn new(per_window: u32, window: Duration, clock: SharedClock) -> Self {
        Self {
            issued: Arc::new(Mutex::new(VecDeque::new())),
            per_window,
            window,
            clock,
        }
    }

    pub fn is_limited(&self) -> bool {
        self.per_window > 0
    }

    /// Takes one request slot, or returns false when the current window is spent.
    pub fn try_acquire(&self) -> bool {
        if !self.is_limited() {
            return true;
        }

        let now = self.clock.now();
        let mut issued = match self.issued.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        expire(&mut issued, now, self.window);
        if issued.len() >= self.per_window as usize {
            return false;
        }
        issued.push_back(now);
        true
    }

    /// Slots left in the current window; `None` when unlimited.
    pub fn remaining(&self) -> Option<u32> {
        if !self.is_limited() {
            return None;
        }

        let now = self.clock.now();
        let mut issued = match self.issued.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        expire(&mut issued, now, self.window);
        Some(self.per_window.saturating_sub(issued.len() as u32))
    }
}

fn expire(issued: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while issued
        .front()
        .is_some_and(|at| now.duration_since(*at) >= window)
    {
        issued.pop_front();
    }
}
