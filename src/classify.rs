//! Failure classification: maps opaque upstream error text into a fixed
//! taxonomy. Deliberately coarse substring matching, centralized in one
//! table so new upstream message variants need exactly one edit.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Malformed input line; no attempt is ever made.
    InvalidIdentifier,
    /// Upstream throttling (HTTP 429 or an explicit rate-limit phrase).
    RateLimited,
    /// Captions disabled, absent, or missing in the target language.
    CaptionsUnavailable,
    /// Item removed, private, or region-blocked.
    ItemUnavailable,
    /// Transient transport failure.
    NetworkError,
    /// Per-attempt deadline exceeded.
    Timeout,
    /// Payload matched no known caption format, or yielded zero entries.
    ParseError,
    Other,
}

impl FailureCategory {
    /// Whether the retry controller may re-attempt this category within the
    /// current run's budget. Everything else goes straight to the
    /// permanent-failure list.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::NetworkError | Self::Timeout | Self::ParseError
        )
    }

    /// The snake_case token used in the failure log and reports.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::InvalidIdentifier => "invalid_identifier",
            Self::RateLimited => "rate_limited",
            Self::CaptionsUnavailable => "captions_unavailable",
            Self::ItemUnavailable => "item_unavailable",
            Self::NetworkError => "network_error",
            Self::Timeout => "timeout",
            Self::ParseError => "parse_error",
            Self::Other => "other",
        }
    }

    #[must_use]
    pub fn from_label(token: &str) -> Option<Self> {
        match token {
            "invalid_identifier" => Some(Self::InvalidIdentifier),
            "rate_limited" => Some(Self::RateLimited),
            "captions_unavailable" => Some(Self::CaptionsUnavailable),
            "item_unavailable" => Some(Self::ItemUnavailable),
            "network_error" => Some(Self::NetworkError),
            "timeout" => Some(Self::Timeout),
            "parse_error" => Some(Self::ParseError),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Ordered pattern table: the first matching substring wins, so more
/// specific phrases sit above generic ones.
const PATTERNS: &[(&str, FailureCategory)] = &[
    ("429", FailureCategory::RateLimited),
    ("too many requests", FailureCategory::RateLimited),
    ("rate-limit", FailureCategory::RateLimited),
    ("rate limit", FailureCategory::RateLimited),
    ("no subtitles found", FailureCategory::CaptionsUnavailable),
    ("no transcript", FailureCategory::CaptionsUnavailable),
    ("no captions", FailureCategory::CaptionsUnavailable),
    ("subtitles are disabled", FailureCategory::CaptionsUnavailable),
    ("transcripts disabled", FailureCategory::CaptionsUnavailable),
    ("requested language", FailureCategory::CaptionsUnavailable),
    ("video unavailable", FailureCategory::ItemUnavailable),
    ("not available", FailureCategory::ItemUnavailable),
    ("unavailable", FailureCategory::ItemUnavailable),
    ("private", FailureCategory::ItemUnavailable),
    ("removed", FailureCategory::ItemUnavailable),
    ("region", FailureCategory::ItemUnavailable),
    ("timed out", FailureCategory::Timeout),
    ("timeout", FailureCategory::Timeout),
    ("connection", FailureCategory::NetworkError),
    ("network", FailureCategory::NetworkError),
    ("dns", FailureCategory::NetworkError),
    ("temporary failure", FailureCategory::NetworkError),
    ("no caption format", FailureCategory::ParseError),
    ("no valid subtitles", FailureCategory::ParseError),
    ("caption parse", FailureCategory::ParseError),
    ("parse", FailureCategory::ParseError),
    ("invalid identifier", FailureCategory::InvalidIdentifier),
    ("invalid url", FailureCategory::InvalidIdentifier),
];

/// Classify an error message into the fixed taxonomy. Case-insensitive,
/// first match wins, unmatched text maps to `Other`.
#[must_use]
pub fn classify(message: &str) -> FailureCategory {
    let lowered = message.to_lowercase();
    for (pattern, category) in PATTERNS {
        if lowered.contains(pattern) {
            return *category;
        }
    }
    FailureCategory::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_429_and_throttle_phrases_are_rate_limited() {
        assert_eq!(classify("HTTP Error 429"), FailureCategory::RateLimited);
        assert_eq!(classify("Too Many Requests"), FailureCategory::RateLimited);
        assert_eq!(classify("hit the rate-limit"), FailureCategory::RateLimited);
    }

    #[test]
    fn missing_subtitle_phrases_are_captions_unavailable() {
        assert_eq!(
            classify("No subtitles found for the specified language"),
            FailureCategory::CaptionsUnavailable
        );
        assert_eq!(
            classify("Subtitles are disabled for this video"),
            FailureCategory::CaptionsUnavailable
        );
        assert_eq!(
            classify("no transcript available"),
            FailureCategory::CaptionsUnavailable
        );
    }

    #[test]
    fn unavailable_phrases_are_item_unavailable() {
        assert_eq!(classify("Video unavailable"), FailureCategory::ItemUnavailable);
        assert_eq!(
            classify("This video is private"),
            FailureCategory::ItemUnavailable
        );
        assert_eq!(
            classify("blocked in your region"),
            FailureCategory::ItemUnavailable
        );
    }

    #[test]
    fn transport_failures_split_timeout_and_network() {
        assert_eq!(classify("fetch timed out after 120s"), FailureCategory::Timeout);
        assert_eq!(classify("connection reset by peer"), FailureCategory::NetworkError);
        assert_eq!(classify("DNS resolution failed"), FailureCategory::NetworkError);
    }

    #[test]
    fn parse_failures_and_unknown_text() {
        assert_eq!(
            classify("caption parse failure: no caption format marker recognized"),
            FailureCategory::ParseError
        );
        assert_eq!(classify("something entirely new"), FailureCategory::Other);
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(classify("TOO MANY REQUESTS"), FailureCategory::RateLimited);
        assert_eq!(classify("NO SUBTITLES FOUND"), FailureCategory::CaptionsUnavailable);
    }

    #[test]
    fn retryable_split_matches_policy() {
        for category in [
            FailureCategory::RateLimited,
            FailureCategory::NetworkError,
            FailureCategory::Timeout,
            FailureCategory::ParseError,
        ] {
            assert!(category.is_retryable(), "{category} should be retryable");
        }
        for category in [
            FailureCategory::InvalidIdentifier,
            FailureCategory::CaptionsUnavailable,
            FailureCategory::ItemUnavailable,
            FailureCategory::Other,
        ] {
            assert!(!category.is_retryable(), "{category} should be permanent");
        }
    }

    #[test]
    fn labels_round_trip() {
        let all = [
            FailureCategory::InvalidIdentifier,
            FailureCategory::RateLimited,
            FailureCategory::CaptionsUnavailable,
            FailureCategory::ItemUnavailable,
            FailureCategory::NetworkError,
            FailureCategory::Timeout,
            FailureCategory::ParseError,
            FailureCategory::Other,
        ];
        for category in all {
            assert_eq!(FailureCategory::from_label(category.label()), Some(category));
        }
        assert!(FailureCategory::from_label("bogus").is_none());
    }

    #[test]
    fn specific_patterns_win_over_generic_ones() {
        // "no subtitles found ... unavailable" must classify by the earlier,
        // more specific pattern.
        assert_eq!(
            classify("No subtitles found; video page unavailable"),
            FailureCategory::CaptionsUnavailable
        );
    }
}
