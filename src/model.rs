use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::{classify, FailureCategory};

// ---------------------------------------------------------------------------
// ItemId
// ---------------------------------------------------------------------------

/// Stable 11-character identifier for one media item. The primary key for
/// all durable state: status file entries, failure log rows, output
/// artifact names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub const LEN: usize = 11;

    /// Validate a bare identifier token: exactly 11 characters drawn from
    /// `[A-Za-z0-9_-]`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.len() == Self::LEN && raw.chars().all(is_id_char) {
            Some(Self(raw.to_owned()))
        } else {
            None
        }
    }

    /// Extract an identifier from one input line: a full watch-page URL, a
    /// short-link URL, an embed URL, or a bare id.
    #[must_use]
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        for marker in ["watch?v=", "youtu.be/", "embed/", "v="] {
            if let Some(idx) = line.find(marker) {
                return Self::leading_id(&line[idx + marker.len()..]);
            }
        }
        Self::parse(line)
    }

    fn leading_id(rest: &str) -> Option<Self> {
        let token: String = rest.chars().take_while(|c| is_id_char(*c)).collect();
        Self::parse(&token)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

// ---------------------------------------------------------------------------
// Captioned spans and transcripts
// ---------------------------------------------------------------------------

/// One timed unit of caption text. Invariants: `text` is non-empty after
/// trimming, `start_seconds` and `duration_seconds` are non-negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionedSpan {
    pub text: String,
    pub start_seconds: f64,
    pub duration_seconds: f64,
}

/// Ordered caption sequence for one item, as produced by the normalizer:
/// source order preserved, exact `(start, text)` duplicates removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub spans: Vec<CaptionedSpan>,
}

impl Transcript {
    #[must_use]
    pub fn new(spans: Vec<CaptionedSpan>) -> Self {
        Self { spans }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Render the persisted-output form: one line per span, with consecutive
    /// same-text entries collapsed. When `timestamps` is set each line is
    /// prefixed with `[HH:MM:SS]`.
    #[must_use]
    pub fn display_lines(&self, timestamps: bool) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.spans.len());
        let mut previous: Option<&str> = None;
        for span in &self.spans {
            let text = span.text.trim();
            if previous == Some(text) {
                continue;
            }
            if timestamps {
                lines.push(format!("[{}] {text}", format_timestamp(span.start_seconds)));
            } else {
                lines.push(text.to_owned());
            }
            previous = Some(text);
        }
        lines
    }
}

/// Convert a second offset to `HH:MM:SS` display form.
#[must_use]
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

// ---------------------------------------------------------------------------
// Durable job state
// ---------------------------------------------------------------------------

/// Per-run durable record, persisted as `status.json`. The JobStore is the
/// only writer and maintains `completed ∩ pending = ∅`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub completed: BTreeSet<ItemId>,
    /// Items claimed by an in-flight attempt. A non-empty set on load means
    /// the previous process died mid-attempt.
    #[serde(default)]
    pub pending: BTreeSet<ItemId>,
    /// Wall-clock time of the most recent upstream request, for crash
    /// diagnostics only. Never read back for rate-limit correctness.
    #[serde(default)]
    pub last_request_unix: Option<f64>,
    #[serde(default)]
    pub processed_count: u64,
}

/// One logged failure event. An item may appear multiple times across
/// retries and runs.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    pub item_id: ItemId,
    pub timestamp: DateTime<Utc>,
    pub category: FailureCategory,
    pub message: String,
}

impl FailureRecord {
    #[must_use]
    pub fn new(item_id: ItemId, category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            item_id,
            timestamp: Utc::now(),
            category,
            message: message.into(),
        }
    }

    /// Render the append-only failure-log line form:
    /// `[<rfc3339>] [<item>] <category>: <message>`.
    #[must_use]
    pub fn to_log_line(&self) -> String {
        format!(
            "[{}] [{}] {}: {}",
            self.timestamp.to_rfc3339(),
            self.item_id,
            self.category,
            self.message.replace('\n', " ")
        )
    }

    /// Parse one failure-log line. Unknown category tokens fall back to
    /// classifying the message text, so the log stays readable even if a
    /// future fetch backend appends new message variants.
    #[must_use]
    pub fn parse_log_line(line: &str) -> Option<Self> {
        let line = line.trim();
        let rest = line.strip_prefix('[')?;
        let (ts_text, rest) = rest.split_once(']')?;
        let rest = rest.trim_start().strip_prefix('[')?;
        let (id_text, rest) = rest.split_once(']')?;

        let item_id = ItemId::parse(id_text)?;
        let timestamp = DateTime::parse_from_rfc3339(ts_text).ok()?.with_timezone(&Utc);

        let body = rest.trim_start();
        let (category, message) = match body.split_once(':') {
            Some((token, tail)) => match FailureCategory::from_label(token.trim()) {
                Some(category) => (category, tail.trim().to_owned()),
                None => (classify(body), body.to_owned()),
            },
            None => (classify(body), body.to_owned()),
        };

        Some(Self {
            item_id,
            timestamp,
            category,
            message,
        })
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Post-hoc iteration summary emitted by the planner alongside the next
/// retry batch file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationReport {
    pub date: String,
    pub iteration: u32,
    pub original_count: usize,
    pub downloaded_count: usize,
    pub missing_count: usize,
    pub retry_count: usize,
    pub skipped_no_captions: usize,
    pub skipped_unavailable: usize,
    pub skipped_failed: usize,
    pub next_batch_file: String,
}

/// End-of-run counters for one pipeline invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Items handed to the worker pool after filtering.
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
    /// Items filtered out up front or short-circuited by prior state.
    pub skipped: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempted {}, completed {}, failed {}, skipped {}",
            self.attempted, self.completed, self.failed, self.skipped
        )
    }
}
