//! Batch acquisition: fans the filtered input set out to a worker pool
//! driving the retry controller, fans results back into the store and
//! per-item output artifacts.
//!
//! One item's failure never aborts the batch; workers isolate errors per
//! item, log them, and move on. Completion order across items is
//! scheduling-dependent and not promised.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::cli::ShutdownController;
use crate::error::{SgError, SgResult};
use crate::fetch::CaptionFetcher;
use crate::limiter::{RateLimiter, RateLimiterConfig};
use crate::model::{ItemId, RunSummary, Transcript};
use crate::retry::{ItemOutcome, RetryController, RetryPolicy};
use crate::store::JobStore;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub language: String,
    /// Fixed worker pool size. Defaults to 1 to respect upstream limits;
    /// the shared store and limiter stay correct at any size.
    pub workers: usize,
    /// Prefix output lines with `[HH:MM:SS]`.
    pub timestamps: bool,
    pub limiter: RateLimiterConfig,
    pub retry: RetryPolicy,
}

/// One queued work unit: the parsed id plus its original source line, kept
/// so iteration artifacts can preserve the line form.
#[derive(Debug, Clone)]
pub struct InputItem {
    pub id: ItemId,
    pub source_line: String,
}

/// Read the input artifact: newline-delimited, blank lines ignored.
pub fn read_input_lines(path: &Path) -> SgResult<Vec<String>> {
    let text = fs::read_to_string(path)
        .map_err(|error| SgError::NoInput(format!("{}: {error}", path.display())))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}

/// Run one acquisition batch to completion and return the summary counts.
pub fn run_batch(
    config: &PipelineConfig,
    store: &JobStore,
    fetcher: &dyn CaptionFetcher,
) -> SgResult<RunSummary> {
    let lines = read_input_lines(&config.input)?;
    if lines.is_empty() {
        return Err(SgError::NoInput(format!(
            "{} contains no input lines",
            config.input.display()
        )));
    }

    fs::create_dir_all(&config.output_dir)?;

    let mut queue = VecDeque::new();
    let mut seen: HashSet<ItemId> = HashSet::new();
    let mut invalid = 0usize;
    let mut skipped = 0usize;

    for line in lines {
        let Some(id) = ItemId::from_line(&line) else {
            tracing::warn!(line = %line, "invalid identifier in input");
            store.record_invalid_line(&line)?;
            invalid += 1;
            continue;
        };
        if !seen.insert(id.clone()) {
            continue;
        }
        if store.is_completed(&id) || store.is_permanently_failed(&id) {
            skipped += 1;
            continue;
        }
        queue.push_back(InputItem {
            id,
            source_line: line,
        });
    }

    let attempted = queue.len();
    if attempted == 0 {
        tracing::info!("no new items to process (all completed or previously failed)");
    } else {
        tracing::info!(count = attempted, "processing new items");
    }

    let limiter = RateLimiter::new(config.limiter.clone());
    let queue = Mutex::new(queue);
    let completed = AtomicUsize::new(0);
    let failed = AtomicUsize::new(invalid);
    let short_circuited = AtomicUsize::new(0);

    let workers = config.workers.max(1);
    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                let controller = RetryController::new(
                    store,
                    &limiter,
                    fetcher,
                    config.retry.clone(),
                    config.language.clone(),
                );
                loop {
                    if ShutdownController::is_shutting_down() {
                        tracing::info!("shutdown requested, draining worker");
                        break;
                    }
                    let item = {
                        let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
                        queue.pop_front()
                    };
                    let Some(item) = item else {
                        break;
                    };

                    let outcome = controller.process(&item.id, |id, transcript| {
                        write_transcript(&config.output_dir, id, transcript, config.timestamps)
                    });
                    match outcome {
                        Ok(ItemOutcome::Completed) => {
                            completed.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(ItemOutcome::Failed(category)) => {
                            tracing::warn!(item = %item.id, %category, "permanently failed");
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(ItemOutcome::AlreadyCompleted)
                        | Ok(ItemOutcome::SkippedPermanentFailure) => {
                            short_circuited.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(error) => {
                            // Per-item isolation: log and continue the batch.
                            tracing::error!(item = %item.id, %error, "item processing error");
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
    });

    let summary = RunSummary {
        attempted,
        completed: completed.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
        skipped: skipped + short_circuited.load(Ordering::Relaxed),
    };
    tracing::info!(%summary, "run finished");
    Ok(summary)
}

/// Persist one completed transcript as `<id>.txt` in the output directory,
/// with the display-form consecutive-duplicate collapse applied.
pub fn write_transcript(
    output_dir: &Path,
    id: &ItemId,
    transcript: &Transcript,
    timestamps: bool,
) -> SgResult<()> {
    let path = output_path(output_dir, id);
    let mut body = transcript.display_lines(timestamps).join("\n");
    body.push('\n');
    fs::write(&path, body)?;
    tracing::debug!(item = %id, path = %path.display(), "transcript saved");
    Ok(())
}

#[must_use]
pub fn output_path(output_dir: &Path, id: &ItemId) -> PathBuf {
    output_dir.join(format!("{id}.txt"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn read_input_skips_blank_lines() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("items.txt");
        fs::write(&path, "aaaaaaaaaaa\n\n   \nbbbbbbbbbbb\n").expect("write input");
        let lines = read_input_lines(&path).expect("read");
        assert_eq!(lines, vec!["aaaaaaaaaaa", "bbbbbbbbbbb"]);
    }

    #[test]
    fn read_input_missing_file_is_no_input() {
        let dir = TempDir::new().expect("tempdir");
        let err = read_input_lines(&dir.path().join("absent.txt")).expect_err("missing");
        assert!(matches!(err, SgError::NoInput(_)));
    }

    #[test]
    fn write_transcript_applies_display_collapse() {
        let dir = TempDir::new().expect("tempdir");
        let id = ItemId::parse("aaaaaaaaaaa").expect("id");
        let transcript = Transcript::new(vec![
            crate::model::CaptionedSpan {
                text: "x".into(),
                start_seconds: 0.0,
                duration_seconds: 1.0,
            },
            crate::model::CaptionedSpan {
                text: "x".into(),
                start_seconds: 1.0,
                duration_seconds: 1.0,
            },
        ]);
        write_transcript(dir.path(), &id, &transcript, true).expect("write");
        let text = fs::read_to_string(output_path(dir.path(), &id)).expect("read back");
        assert_eq!(text, "[00:00:00] x\n");
    }
}
