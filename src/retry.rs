//! Per-item retry orchestration.
//!
//! Drives one item through `NotStarted → Pending → {Completed,
//! PermanentlyFailed}`: consult the permanent-failure gate, claim the item,
//! run bounded attempts through the rate limiter and the fetcher, normalize
//! on success, and route terminal failures through the classifier into the
//! durable audit trail. Control flow runs on explicit outcomes, never on
//! string-matching errors at the call site.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::classify::{classify, FailureCategory};
use crate::error::SgResult;
use crate::fetch::CaptionFetcher;
use crate::limiter::RateLimiter;
use crate::model::{FailureRecord, ItemId, Transcript};
use crate::normalize::normalize;
use crate::store::JobStore;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per item within one run.
    pub attempt_budget: u32,
    /// Exponential backoff base; attempt `n` waits `base^n` seconds plus
    /// jitter before re-attempting.
    pub backoff_base_secs: f64,
    pub backoff_jitter_secs: (f64, f64),
    /// Per-attempt fetch deadline.
    pub fetch_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_budget: 1,
            backoff_base_secs: 2.0,
            backoff_jitter_secs: (5.0, 15.0),
            fetch_timeout: Duration::from_secs(120),
        }
    }
}

/// Terminal result of processing one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Fetched, normalized, persisted, marked completed.
    Completed,
    /// Already in the completed set; nothing attempted.
    AlreadyCompleted,
    /// On the permanent-failure list; no network call, no state change.
    SkippedPermanentFailure,
    /// Non-retryable classification or exhausted budget; now permanent.
    Failed(FailureCategory),
}

pub struct RetryController<'a> {
    store: &'a JobStore,
    limiter: &'a RateLimiter,
    fetcher: &'a dyn CaptionFetcher,
    policy: RetryPolicy,
    language: String,
}

impl<'a> RetryController<'a> {
    pub fn new(
        store: &'a JobStore,
        limiter: &'a RateLimiter,
        fetcher: &'a dyn CaptionFetcher,
        policy: RetryPolicy,
        language: impl Into<String>,
    ) -> Self {
        Self {
            store,
            limiter,
            fetcher,
            policy,
            language: language.into(),
        }
    }

    /// Run the full state machine for one item. `persist` is called exactly
    /// once, with the normalized transcript, before the item is marked
    /// completed. A `persist` error is a local storage problem, not an
    /// upstream failure: it propagates to the caller without touching the
    /// failure log or the permanent-failure list, and the item's `pending`
    /// claim stands until the next store open recovers it.
    pub fn process<F>(&self, id: &ItemId, mut persist: F) -> SgResult<ItemOutcome>
    where
        F: FnMut(&ItemId, &Transcript) -> SgResult<()>,
    {
        // The one-way gate runs before anything else, even on the first
        // call of a fresh process: failures persist across runs.
        if self.store.is_permanently_failed(id) {
            tracing::debug!(item = %id, "previously failed, skipping");
            return Ok(ItemOutcome::SkippedPermanentFailure);
        }
        if self.store.is_completed(id) {
            tracing::debug!(item = %id, "already completed");
            return Ok(ItemOutcome::AlreadyCompleted);
        }

        self.store.mark_pending(id)?;

        let mut last_category = FailureCategory::Other;
        let mut last_message = String::from("no attempt recorded");

        for attempt in 1..=self.policy.attempt_budget.max(1) {
            self.limiter.acquire();
            if let Err(error) = self.store.note_request_time(now_unix()) {
                tracing::warn!(item = %id, %error, "failed to persist request time");
            }

            let result = self
                .fetcher
                .fetch(id, &self.language, self.policy.fetch_timeout)
                .map_err(|failure| failure.message)
                .and_then(|payload| normalize(&payload).map_err(|error| error.to_string()));

            match result {
                Ok(transcript) => {
                    persist(id, &transcript)?;
                    self.store.mark_completed(id)?;
                    tracing::info!(item = %id, spans = transcript.spans.len(), "completed");
                    return Ok(ItemOutcome::Completed);
                }
                Err(message) => {
                    let category = classify(&message);
                    tracing::warn!(
                        item = %id,
                        attempt,
                        category = %category,
                        "attempt failed: {message}"
                    );
                    last_category = category;
                    last_message = message;

                    if !category.is_retryable() {
                        break;
                    }
                    if attempt < self.policy.attempt_budget {
                        std::thread::sleep(self.backoff_delay(attempt));
                    }
                }
            }
        }

        self.store
            .record_failure(&FailureRecord::new(id.clone(), last_category, last_message))?;
        self.store.record_permanent_failure(id)?;
        self.store.clear_pending(id)?;
        Ok(ItemOutcome::Failed(last_category))
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let (lo, hi) = self.policy.backoff_jitter_secs;
        let jitter = if hi > lo {
            rand::thread_rng().gen_range(lo..hi)
        } else {
            lo
        };
        let secs = self.policy.backoff_base_secs.max(0.0).powi(attempt as i32) + jitter;
        Duration::from_secs_f64(secs.max(0.0))
    }
}

fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
