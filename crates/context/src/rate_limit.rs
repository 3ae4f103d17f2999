//! Per-target outbound rate limiting.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use qq_agent_common::types::TargetKey;

/// Rejection carrying how long the caller should wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Rate limited. Try again in {:.1}s", .retry_after.as_secs_f64())]
pub struct RateLimited {
    pub retry_after: Duration,
}

/// Reservation handed out by [`RateLimiter::try_acquire`]; give it back with
/// [`RateLimiter::rollback`] when the send fails.
#[derive(Debug)]
#[must_use]
pub struct Permit {
    key: TargetKey,
    acquired_at: Instant,
    previous: Option<Instant>,
}

/// One last-sent timestamp per target. Check and update happen under a
/// single lock, so two sends to the same target cannot both pass.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_sent: Mutex<HashMap<TargetKey, Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Build from a seconds value; negative or non-finite values disable limiting.
    #[must_use]
    pub fn from_secs(secs: f64) -> Self {
        Self::new(Duration::try_from_secs_f64(secs).unwrap_or_default())
    }

    pub fn try_acquire(&self, key: &TargetKey) -> Result<Permit, RateLimited> {
        let now = Instant::now();
        let mut last_sent = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        let previous = last_sent.get(key).copied();
        if let Some(last) = previous {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.interval {
                return Err(RateLimited {
                    retry_after: self.interval - elapsed,
                });
            }
        }
        last_sent.insert(key.clone(), now);
        Ok(Permit {
            key: key.clone(),
            acquired_at: now,
            previous,
        })
    }

    /// Restore the state from before `permit` was taken, unless a later
    /// acquisition already replaced it.
    pub fn rollback(&self, permit: Permit) {
        let mut last_sent = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        if last_sent.get(&permit.key) != Some(&permit.acquired_at) {
            return;
        }
        match permit.previous {
            Some(previous) => {
                last_sent.insert(permit.key, previous);
            },
            None => {
                last_sent.remove(&permit.key);
            },
        }
    }
}
