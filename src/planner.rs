//! Iteration planning: turn a prior run's gaps into the next run's input.
//!
//! A pure core computes the retry batch from in-memory sets; a thin I/O
//! shell gathers those sets from disk (output artifacts, permanent-failure
//! list, classified failure log), writes the next batch file with each
//! identifier's original source-line form preserved, and emits a report.
//! Re-running with unchanged inputs yields an identical batch and report,
//! apart from the date field and the monotonically increasing iteration
//! number.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::classify::FailureCategory;
use crate::error::{SgError, SgResult};
use crate::model::{FailureRecord, IterationReport, ItemId};
use crate::pipeline::read_input_lines;
use crate::store::{ERROR_LOG_FILE, FAILED_ITEMS_FILE};

/// The pure planning result: retry lines in original input order, plus the
/// counts that feed the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationPlan {
    pub retry_lines: Vec<String>,
    pub original_count: usize,
    pub downloaded_count: usize,
    pub missing_count: usize,
    pub skipped_no_captions: usize,
    pub skipped_unavailable: usize,
    pub skipped_failed: usize,
}

/// Compute the next retry batch.
///
/// `missing = original − downloaded`; items whose failure log classifies
/// them as captions-unavailable or item-unavailable are skipped; everything
/// else missing is retried, each under its first original source line.
#[must_use]
pub fn plan_iteration(
    original_lines: &[String],
    downloaded: &BTreeSet<ItemId>,
    permanently_failed: &BTreeSet<ItemId>,
    failures: &[FailureRecord],
) -> IterationPlan {
    // First occurrence of each id wins, preserving input order.
    let mut ordered: Vec<(ItemId, String)> = Vec::new();
    let mut seen: HashSet<ItemId> = HashSet::new();
    for line in original_lines {
        if let Some(id) = ItemId::from_line(line) {
            if seen.insert(id.clone()) {
                ordered.push((id, line.clone()));
            }
        }
    }

    let mut no_captions: BTreeSet<&ItemId> = BTreeSet::new();
    let mut unavailable: BTreeSet<&ItemId> = BTreeSet::new();
    for record in failures {
        match record.category {
            FailureCategory::CaptionsUnavailable => {
                no_captions.insert(&record.item_id);
            }
            FailureCategory::ItemUnavailable => {
                unavailable.insert(&record.item_id);
            }
            _ => {}
        }
    }

    let mut retry_lines = Vec::new();
    let mut missing_count = 0usize;
    let mut skipped_no_captions = 0usize;
    let mut skipped_unavailable = 0usize;
    for (id, line) in &ordered {
        if downloaded.contains(id) {
            continue;
        }
        missing_count += 1;
        if no_captions.contains(id) {
            skipped_no_captions += 1;
        } else if unavailable.contains(id) {
            skipped_unavailable += 1;
        } else {
            retry_lines.push(line.clone());
        }
    }

    IterationPlan {
        retry_lines,
        original_count: ordered.len(),
        downloaded_count: ordered
            .iter()
            .filter(|(id, _)| downloaded.contains(id))
            .count(),
        missing_count,
        skipped_no_captions,
        skipped_unavailable,
        skipped_failed: permanently_failed.len(),
    }
}

/// Scan the output directory for successfully produced artifacts:
/// `<11-char id>.txt` files.
pub fn scan_downloaded(output_dir: &Path) -> SgResult<BTreeSet<ItemId>> {
    let mut downloaded = BTreeSet::new();
    let Ok(entries) = fs::read_dir(output_dir) else {
        return Ok(downloaded);
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(".txt") {
            if let Some(id) = ItemId::parse(stem) {
                downloaded.insert(id);
            }
        }
    }
    Ok(downloaded)
}

fn read_failed_set(path: &Path) -> BTreeSet<ItemId> {
    let Ok(text) = fs::read_to_string(path) else {
        return BTreeSet::new();
    };
    text.lines().filter_map(ItemId::parse).collect()
}

fn read_failure_log(path: &Path) -> Vec<FailureRecord> {
    let Ok(text) = fs::read_to_string(path) else {
        return Vec::new();
    };
    text.lines().filter_map(FailureRecord::parse_log_line).collect()
}

/// First iteration number whose batch file does not yet exist beside the
/// original input.
#[must_use]
pub fn next_iteration_number(input: &Path) -> u32 {
    let parent = input.parent().unwrap_or_else(|| Path::new("."));
    let mut n = 1;
    while parent.join(format!("retry_iteration_{n}.txt")).exists() {
        n += 1;
    }
    n
}

/// Run the planner end to end: read every durable artifact, compute the
/// plan, write the next batch file and the report.
pub fn run_planner(input: &Path, output_dir: &Path) -> SgResult<IterationReport> {
    let original_lines = read_input_lines(input)?;
    if original_lines.is_empty() {
        return Err(SgError::NoInput(format!(
            "{} contains no input lines",
            input.display()
        )));
    }

    let downloaded = scan_downloaded(output_dir)?;
    let permanently_failed = read_failed_set(&output_dir.join(FAILED_ITEMS_FILE));
    let failures = read_failure_log(&output_dir.join(ERROR_LOG_FILE));

    let plan = plan_iteration(&original_lines, &downloaded, &permanently_failed, &failures);

    let iteration = next_iteration_number(input);
    let batch_path = batch_path(input, iteration);
    let mut body = plan.retry_lines.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    fs::write(&batch_path, body)?;

    let report = IterationReport {
        date: Utc::now().to_rfc3339(),
        iteration,
        original_count: plan.original_count,
        downloaded_count: plan.downloaded_count,
        missing_count: plan.missing_count,
        retry_count: plan.retry_lines.len(),
        skipped_no_captions: plan.skipped_no_captions,
        skipped_unavailable: plan.skipped_unavailable,
        skipped_failed: plan.skipped_failed,
        next_batch_file: batch_path.display().to_string(),
    };

    fs::create_dir_all(output_dir)?;
    let report_path = output_dir.join(format!("iteration_{iteration}_report.json"));
    fs::write(&report_path, serde_json::to_string_pretty(&report)?)?;

    tracing::info!(
        iteration,
        retry = report.retry_count,
        batch = %batch_path.display(),
        "iteration plan written"
    );
    Ok(report)
}

#[must_use]
pub fn batch_path(input: &Path, iteration: u32) -> PathBuf {
    let parent = input.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("retry_iteration_{iteration}.txt"))
}
