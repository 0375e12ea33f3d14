//! Export rate limiting.
//!
//! Each owner gets an independent hourly quota of export requests.

use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovRateLimiter,
};
use std::{
    collections::HashMap,
    num::NonZeroU32,
    sync::{Arc, PoisonError, RwLock},
};
use uuid::Uuid;

type OwnerRateLimiter = GovRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-owner export limiter shared across requests.
pub struct ExportRateLimiterState {
    limiters: RwLock<HashMap<Uuid, Arc<OwnerRateLimiter>>>,
    quota: Quota,
    rate_limit_per_hour: u32,
    clock: DefaultClock,
}

impl ExportRateLimiterState {
    /// Returns `None` when the limit is 0 (disabled).
    pub fn new(rate_limit_per_hour: u32) -> Option<Self> {
        let per_hour = NonZeroU32::new(rate_limit_per_hour)?;
        Some(Self {
            limiters: RwLock::new(HashMap::new()),
            quota: Quota::per_hour(per_hour),
            rate_limit_per_hour,
            clock: DefaultClock::default(),
        })
    }

    pub fn rate_limit_per_hour(&self) -> u32 {
        self.rate_limit_per_hour
    }

    fn get_or_create_limiter(&self, owner_id: Uuid) -> Arc<OwnerRateLimiter> {
        {
            let limiters = self.limiters.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(limiter) = limiters.get(&owner_id) {
                return limiter.clone();
            }
        }

        let mut limiters = self.limiters.write().unwrap_or_else(PoisonError::into_inner);
        limiters
            .entry(owner_id)
            .or_insert_with(|| Arc::new(GovRateLimiter::direct(self.quota)))
            .clone()
    }

    /// Returns Ok(()) if allowed, or Err with retry-after seconds.
    pub fn check(&self, owner_id: Uuid) -> Result<(), u64> {
        let limiter = self.get_or_create_limiter(owner_id);

        match limiter.check() {
            Ok(_) => Ok(()),
            Err(not_until) => {
                let wait_time = not_until.wait_time_from(self.clock.now());
                Err(wait_time.as_secs().max(1))
            }
        }
    }
}

impl std::fmt::Debug for ExportRateLimiterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self
            .limiters
            .read()
            .map(|l| l.len())
            .unwrap_or_default();
        f.debug_struct("ExportRateLimiterState")
            .field("rate_limit_per_hour", &self.rate_limit_per_hour)
            .field("active_limiters", &active)
            .finish()
    }
}
