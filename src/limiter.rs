//! Adaptive rate limiting for upstream requests.
//!
//! Every permit computes `base + jitter`, and every Nth permit doubles the
//! base and widens the jitter range, so sustained runs periodically cool
//! down instead of presenting a steady cadence. The delay computation and
//! the `last_permit` update happen under one lock acquisition: two callers
//! can never schedule from the same stale timestamp, even though the sleep
//! itself runs outside the lock.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub base_delay_secs: f64,
    /// Uniform jitter range added to every ordinary permit.
    pub jitter_secs: (f64, f64),
    /// Every Nth permit becomes a cooldown (doubled base, wider jitter).
    /// Zero disables cooldowns.
    pub cooldown_every: u64,
    pub cooldown_jitter_secs: (f64, f64),
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 60.0,
            jitter_secs: (10.0, 20.0),
            cooldown_every: 10,
            cooldown_jitter_secs: (30.0, 60.0),
        }
    }
}

impl RateLimiterConfig {
    /// A configuration with no spacing at all, for tests and dry runs.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            base_delay_secs: 0.0,
            jitter_secs: (0.0, 0.0),
            cooldown_every: 0,
            cooldown_jitter_secs: (0.0, 0.0),
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    last_permit: Option<Instant>,
    request_count: u64,
}

/// Enforces minimum spacing between permitted requests across all workers.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState {
                last_permit: None,
                request_count: 0,
            }),
        }
    }

    /// Block until the next request is permitted. Returns the permit
    /// timestamp that was scheduled for this caller.
    ///
    /// For any two consecutive permits the scheduled gap is at least the
    /// delay computed at acquisition time; there is no upper bound.
    pub fn acquire(&self) -> Instant {
        let permit_at = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            state.request_count += 1;
            let delay = self.compute_delay(state.request_count);

            let now = Instant::now();
            let permit_at = match state.last_permit {
                Some(last) => {
                    let earliest = last + delay;
                    if earliest > now {
                        earliest
                    } else {
                        now
                    }
                }
                // First request in this process goes out immediately.
                None => now,
            };
            state.last_permit = Some(permit_at);
            permit_at
        };

        let now = Instant::now();
        if permit_at > now {
            let wait = permit_at - now;
            tracing::debug!(wait_secs = wait.as_secs_f64(), "rate limiting");
            std::thread::sleep(wait);
        }
        permit_at
    }

    fn compute_delay(&self, request_count: u64) -> Duration {
        let mut rng = rand::thread_rng();
        let is_cooldown =
            self.config.cooldown_every > 0 && request_count % self.config.cooldown_every == 0;

        let secs = if is_cooldown {
            let (lo, hi) = self.config.cooldown_jitter_secs;
            self.config.base_delay_secs * 2.0 + sample_jitter(&mut rng, lo, hi)
        } else {
            let (lo, hi) = self.config.jitter_secs;
            self.config.base_delay_secs + sample_jitter(&mut rng, lo, hi)
        };
        Duration::from_secs_f64(secs.max(0.0))
    }
}

fn sample_jitter<R: Rng>(rng: &mut R, lo: f64, hi: f64) -> f64 {
    if hi > lo {
        rng.gen_range(lo..hi)
    } else {
        lo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fixed(base_ms: u64) -> RateLimiterConfig {
        RateLimiterConfig {
            base_delay_secs: base_ms as f64 / 1000.0,
            jitter_secs: (0.0, 0.0),
            cooldown_every: 0,
            cooldown_jitter_secs: (0.0, 0.0),
        }
    }

    #[test]
    fn first_permit_is_immediate() {
        let limiter = RateLimiter::new(fixed(5_000));
        let before = Instant::now();
        limiter.acquire();
        assert!(
            before.elapsed() < Duration::from_millis(500),
            "first acquire must not wait out the base delay"
        );
    }

    #[test]
    fn consecutive_permits_are_spaced_by_the_computed_delay() {
        let limiter = RateLimiter::new(fixed(30));
        let permits: Vec<Instant> = (0..4).map(|_| limiter.acquire()).collect();
        for pair in permits.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(
                gap >= Duration::from_millis(30),
                "scheduled gap {gap:?} below the 30ms delay"
            );
        }
    }

    #[test]
    fn concurrent_acquirers_never_schedule_from_a_stale_timestamp() {
        let limiter = Arc::new(RateLimiter::new(fixed(20)));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = Arc::clone(&limiter);
            handles.push(std::thread::spawn(move || {
                (0..3).map(|_| limiter.acquire()).collect::<Vec<_>>()
            }));
        }

        let mut permits: Vec<Instant> = handles
            .into_iter()
            .flat_map(|handle| handle.join().expect("worker panicked"))
            .collect();
        permits.sort();

        // Nine permits scheduled from nine distinct timestamps: if two
        // callers ever read the same stale `last_permit`, two scheduled
        // times would collide or land inside the same window.
        for pair in permits.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(
                gap >= Duration::from_millis(20),
                "two permits scheduled {gap:?} apart; stale read suspected"
            );
        }
    }

    #[test]
    fn cooldown_permit_doubles_the_base_delay() {
        let config = RateLimiterConfig {
            base_delay_secs: 0.02,
            jitter_secs: (0.0, 0.0),
            cooldown_every: 2,
            cooldown_jitter_secs: (0.0, 0.0),
        };
        let limiter = RateLimiter::new(config);
        let first = limiter.acquire();
        let second = limiter.acquire(); // request 2: cooldown, 2 * 20ms
        let third = limiter.acquire(); // request 3: ordinary, 20ms

        assert!(second - first >= Duration::from_millis(40));
        assert!(third - second >= Duration::from_millis(20));
    }

    #[test]
    fn unlimited_config_never_sleeps() {
        let limiter = RateLimiter::new(RateLimiterConfig::unlimited());
        let before = Instant::now();
        for _ in 0..50 {
            limiter.acquire();
        }
        assert!(before.elapsed() < Duration::from_millis(500));
    }
}
