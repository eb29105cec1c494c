//! Subtitle normalization: one raw caption payload in, one canonical
//! ordered span sequence out.
//!
//! The upstream serves captions in at least three incompatible encodings.
//! The payload is sniffed once, then dispatched to one of three pure
//! parsers that all produce `Vec<CaptionedSpan>`, so each format's edge
//! cases stay isolated and independently testable.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::{SgError, SgResult};
use crate::model::{CaptionedSpan, Transcript};

/// Wire encodings the normalizer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionFormat {
    /// Flat `<text start="..." dur="...">` element list (timedtext XML).
    XmlTimedText,
    /// JSON document with an `events` array of segmented cues (json3).
    JsonEvents,
    /// SRT-style alternating timecode / text blocks.
    SrtCues,
}

impl CaptionFormat {
    pub fn label(self) -> &'static str {
        match self {
            Self::XmlTimedText => "xml",
            Self::JsonEvents => "json-events",
            Self::SrtCues => "srt",
        }
    }
}

/// Sniff the payload for a format marker. Checked in precedence order; the
/// first match wins.
#[must_use]
pub fn sniff_format(payload: &str) -> Option<CaptionFormat> {
    if payload.contains("<text start=") {
        Some(CaptionFormat::XmlTimedText)
    } else if payload.contains("events") {
        Some(CaptionFormat::JsonEvents)
    } else if payload.contains("-->") {
        Some(CaptionFormat::SrtCues)
    } else {
        None
    }
}

/// Parse a raw payload into a canonical transcript: sniff, dispatch,
/// identity-dedup. An unrecognized or empty payload is a parse failure —
/// retryable by policy, since it may stem from a transient empty response.
pub fn normalize(payload: &str) -> SgResult<Transcript> {
    let format = sniff_format(payload).ok_or_else(|| {
        SgError::Parse("no caption format marker recognized in payload".to_owned())
    })?;

    let spans = match format {
        CaptionFormat::XmlTimedText => parse_xml_like(payload),
        CaptionFormat::JsonEvents => parse_json_events(payload),
        CaptionFormat::SrtCues => parse_srt_like(payload),
    };

    let spans = dedup_identity(spans);
    if spans.is_empty() {
        return Err(SgError::Parse(format!(
            "no valid subtitles found in {} payload",
            format.label()
        )));
    }

    tracing::debug!(format = format.label(), spans = spans.len(), "normalized payload");
    Ok(Transcript::new(spans))
}

// ---------------------------------------------------------------------------
// XML-like timedtext
// ---------------------------------------------------------------------------

/// Extract `<text>` elements from a timedtext document. Elements missing a
/// `start` attribute, or with a non-numeric one, are silently dropped;
/// `dur` defaults to zero.
#[must_use]
pub fn parse_xml_like(payload: &str) -> Vec<CaptionedSpan> {
    let mut spans = Vec::new();
    let mut rest = payload;

    while let Some(open) = rest.find("<text") {
        let after = &rest[open + "<text".len()..];
        let Some(tag_end) = after.find('>') else {
            break;
        };
        let attrs = &after[..tag_end];
        let tail = &after[tag_end + 1..];

        let (body, next) = if attrs.trim_end().ends_with('/') {
            ("", tail)
        } else if let Some(close) = tail.find("</text>") {
            (&tail[..close], &tail[close + "</text>".len()..])
        } else {
            ("", tail)
        };

        if let Some(start) = attr_value(attrs, "start").and_then(|v| v.parse::<f64>().ok()) {
            let duration = attr_value(attrs, "dur")
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0);
            let text = unescape_entities(body);
            let text = text.trim();
            if !text.is_empty() {
                spans.push(CaptionedSpan {
                    text: text.to_owned(),
                    start_seconds: start.max(0.0),
                    duration_seconds: duration.max(0.0),
                });
            }
        }

        rest = next;
    }

    spans
}

fn attr_value<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{name}=\"");
    let idx = attrs.find(&needle)?;
    let value = &attrs[idx + needle.len()..];
    let end = value.find('"')?;
    Some(&value[..end])
}

fn unescape_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
}

// ---------------------------------------------------------------------------
// JSON events (json3)
// ---------------------------------------------------------------------------

/// Extract cues from a json3 `events` document. Each event with a non-empty
/// segment list contributes one span; malformed events are dropped. A
/// payload that is not valid JSON yields no spans.
#[must_use]
pub fn parse_json_events(payload: &str) -> Vec<CaptionedSpan> {
    let Ok(document) = serde_json::from_str::<Value>(payload) else {
        return Vec::new();
    };
    let Some(events) = document.get("events").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut spans = Vec::new();
    for event in events {
        let Some(segments) = event.get("segs").and_then(Value::as_array) else {
            continue;
        };
        if segments.is_empty() {
            continue;
        }

        let start_ms = event.get("tStartMs").and_then(Value::as_f64).unwrap_or(0.0);
        let duration_ms = event.get("dDurationMs").and_then(Value::as_f64).unwrap_or(0.0);

        let text = segments
            .iter()
            .filter_map(|segment| segment.get("utf8").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        spans.push(CaptionedSpan {
            text: text.to_owned(),
            start_seconds: (start_ms / 1000.0).max(0.0),
            duration_seconds: (duration_ms / 1000.0).max(0.0),
        });
    }

    spans
}

// ---------------------------------------------------------------------------
// SRT-like cues
// ---------------------------------------------------------------------------

/// Parse alternating timecode-line / text-line blocks. A malformed timecode
/// line is skipped by advancing one line rather than aborting the parse.
#[must_use]
pub fn parse_srt_like(payload: &str) -> Vec<CaptionedSpan> {
    let lines: Vec<&str> = payload
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let mut spans = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if !line.contains("-->") {
            i += 1;
            continue;
        }

        let Some((start_text, end_text)) = line.split_once("-->") else {
            i += 1;
            continue;
        };
        let parsed = srt_time_to_seconds(start_text.trim())
            .zip(srt_time_to_seconds(end_text.trim()));
        let Some((start, end)) = parsed else {
            i += 1;
            continue;
        };

        if let Some(text) = lines.get(i + 1) {
            let text = text.trim();
            if !text.is_empty() && !text.contains("-->") {
                spans.push(CaptionedSpan {
                    text: text.to_owned(),
                    start_seconds: start.max(0.0),
                    duration_seconds: (end - start).max(0.0),
                });
            }
        }
        i += 2;
    }

    spans
}

/// Parse `HH:MM:SS[,|.]mmm` timecodes, tolerating bare `SS` and `MM:SS`.
#[must_use]
pub fn srt_time_to_seconds(text: &str) -> Option<f64> {
    let (clock, millis) = match text.split_once([',', '.']) {
        Some((clock, ms_text)) => (clock, ms_text.trim().parse::<f64>().ok()?),
        None => (text, 0.0),
    };

    let parts: Vec<f64> = clock
        .split(':')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;

    let seconds = match parts.as_slice() {
        [hours, minutes, seconds] => hours * 3600.0 + minutes * 60.0 + seconds,
        [minutes, seconds] => minutes * 60.0 + seconds,
        [seconds] => *seconds,
        _ => return None,
    };
    Some(seconds + millis / 1000.0)
}

// ---------------------------------------------------------------------------
// Identity dedup
// ---------------------------------------------------------------------------

/// Remove exact `(start, text)` duplicates, keeping first occurrence and
/// source order. Independent of the display-time consecutive collapse.
#[must_use]
pub fn dedup_identity(spans: Vec<CaptionedSpan>) -> Vec<CaptionedSpan> {
    let mut seen: HashSet<(u64, String)> = HashSet::with_capacity(spans.len());
    spans
        .into_iter()
        .filter(|span| seen.insert((span.start_seconds.to_bits(), span.text.clone())))
        .collect()
}
