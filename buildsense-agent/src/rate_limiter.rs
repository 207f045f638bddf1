use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

/// Process-wide budget for external reasoning calls: at most `capacity`
/// grants inside any rolling `window`.
///
/// Every granted unit is logged with its grant instant and only expires once
/// it falls out of the window, so the budget cannot be exceeded by bursts at
/// window edges. Denial is a routing signal for the caller, not an error.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    window: Duration,
    grants: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            grants: Mutex::new(VecDeque::with_capacity(capacity as usize)),
        }
    }

    pub fn per_minute(capacity: u32) -> Self {
        Self::new(capacity, Duration::from_secs(60))
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Tokens that could be granted right now.
    pub fn available(&self) -> u32 {
        let now = Instant::now();
        let mut grants = self.lock();
        self.expire(&mut grants, now);
        self.capacity.saturating_sub(grants.len() as u32)
    }

    /// Take `cost` tokens if they are all available now. Never waits.
    pub fn try_acquire(&self, cost: u32) -> bool {
        self.try_acquire_at(cost, Instant::now()).is_ok()
    }

    /// Wait for `cost` tokens until `deadline` at the latest. Returns `false`
    /// without waiting when the tokens cannot free up before the deadline.
    pub async fn acquire_blocking(&self, cost: u32, deadline: Instant) -> bool {
        loop {
            let retry_at = match self.try_acquire_at(cost, Instant::now()) {
                Ok(()) => return true,
                Err(None) => return false,
                Err(Some(retry_at)) => retry_at,
            };
            if retry_at > deadline {
                return false;
            }
            tokio::time::sleep_until(retry_at).await;
        }
    }

    /// `Err(Some(t))`: retry at `t`. `Err(None)`: can never be satisfied.
    fn try_acquire_at(&self, cost: u32, now: Instant) -> Result<(), Option<Instant>> {
        if cost == 0 {
            return Ok(());
        }
        if cost > self.capacity {
            return Err(None);
        }

        let mut grants = self.lock();
        self.expire(&mut grants, now);

        let in_use = grants.len();
        let cost = cost as usize;
        let capacity = self.capacity as usize;
        if in_use + cost <= capacity {
            grants.extend(std::iter::repeat(now).take(cost));
            return Ok(());
        }

        // The grant that has to expire before `cost` tokens are free again.
        let blocking = in_use + cost - capacity - 1;
        Err(grants.get(blocking).map(|granted| *granted + self.window))
    }

    fn expire(&self, grants: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = grants.front() {
            if now.duration_since(*oldest) >= self.window {
                grants.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        // The critical sections never panic midway; a poisoned log is still
        // consistent.
        self.grants
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
