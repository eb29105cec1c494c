//! Durable, crash-recoverable job state.
//!
//! One store owns every durable artifact for a run directory:
//!
//! - `status.json` — the JobStatus record, rewritten atomically (temp file
//!   in the same directory, then rename) on every mutation, so a torn
//!   write is never read back as valid.
//! - `error_log.txt` — append-only failure records.
//! - `failed_items.txt` — append-only permanent-failure list, a one-way
//!   gate consulted before any attempt.
//!
//! All mutations are serialized behind one mutex, and the mutation plus its
//! persistence complete before the lock is released: a reader can never
//! observe half of a compound update.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tempfile::NamedTempFile;

use crate::error::{SgError, SgResult};
use crate::model::{FailureRecord, ItemId, JobStatus};

pub const STATUS_FILE: &str = "status.json";
pub const ERROR_LOG_FILE: &str = "error_log.txt";
pub const FAILED_ITEMS_FILE: &str = "failed_items.txt";

#[derive(Debug)]
struct StoreInner {
    status: JobStatus,
    failed: BTreeSet<ItemId>,
}

#[derive(Debug)]
pub struct JobStore {
    dir: PathBuf,
    inner: Mutex<StoreInner>,
}

impl JobStore {
    /// Open (or create) the store under `dir`.
    ///
    /// An unreadable or unparseable status file loads as fresh-empty with a
    /// warning rather than failing the run. Items left `pending` by a
    /// crashed process are cleared back to unattempted: no partial fetch
    /// state is recoverable, so they must be retried from scratch.
    pub fn open(dir: &Path) -> SgResult<Self> {
        fs::create_dir_all(dir)?;

        let mut status = load_status(&dir.join(STATUS_FILE));
        if !status.pending.is_empty() {
            tracing::info!(
                count = status.pending.len(),
                "recovering items left pending by an interrupted run"
            );
            status.pending.clear();
        }

        let failed = load_failed_set(&dir.join(FAILED_ITEMS_FILE))?;

        let store = Self {
            dir: dir.to_owned(),
            inner: Mutex::new(StoreInner { status, failed }),
        };
        store.with_inner(|_| Ok(()))?; // persist the recovered status
        Ok(store)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn error_log_path(&self) -> PathBuf {
        self.dir.join(ERROR_LOG_FILE)
    }

    #[must_use]
    pub fn failed_items_path(&self) -> PathBuf {
        self.dir.join(FAILED_ITEMS_FILE)
    }

    /// Consistent snapshot of the current status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.lock().status.clone()
    }

    #[must_use]
    pub fn is_completed(&self, id: &ItemId) -> bool {
        self.lock().status.completed.contains(id)
    }

    #[must_use]
    pub fn is_permanently_failed(&self, id: &ItemId) -> bool {
        self.lock().failed.contains(id)
    }

    /// Claim an item for an in-flight attempt. A no-op for items already
    /// completed, preserving `completed ∩ pending = ∅`.
    pub fn mark_pending(&self, id: &ItemId) -> SgResult<()> {
        self.with_inner(|inner| {
            if !inner.status.completed.contains(id) {
                inner.status.pending.insert(id.clone());
            }
            Ok(())
        })
    }

    /// Record a successful completion: leaves `pending`, enters
    /// `completed`, bumps the processed counter.
    pub fn mark_completed(&self, id: &ItemId) -> SgResult<()> {
        self.with_inner(|inner| {
            inner.status.pending.remove(id);
            if inner.status.completed.insert(id.clone()) {
                inner.status.processed_count += 1;
            }
            Ok(())
        })
    }

    pub fn clear_pending(&self, id: &ItemId) -> SgResult<()> {
        self.with_inner(|inner| {
            inner.status.pending.remove(id);
            Ok(())
        })
    }

    /// Best-effort persistence of the last upstream request time, for crash
    /// diagnostics. Liveness never depends on reading this back.
    pub fn note_request_time(&self, unix_seconds: f64) -> SgResult<()> {
        self.with_inner(|inner| {
            inner.status.last_request_unix = Some(unix_seconds);
            Ok(())
        })
    }

    /// Add an item to the permanent-failure list. Once present the item is
    /// never re-attempted by the pipeline; only the planner may re-queue it.
    pub fn record_permanent_failure(&self, id: &ItemId) -> SgResult<()> {
        let mut inner = self.lock();
        if inner.failed.insert(id.clone()) {
            append_line(&self.dir.join(FAILED_ITEMS_FILE), id.as_str())?;
        }
        Ok(())
    }

    /// Append one failure record to the error log.
    pub fn record_failure(&self, record: &FailureRecord) -> SgResult<()> {
        // Serialized with the same mutex so interleaved workers cannot
        // shear log lines.
        let _inner = self.lock();
        append_line(&self.dir.join(ERROR_LOG_FILE), &record.to_log_line())
    }

    /// Log a malformed input line. No ItemId exists to key durable state,
    /// so the entry uses a fixed marker token that log parsing skips.
    pub fn record_invalid_line(&self, line: &str) -> SgResult<()> {
        let _inner = self.lock();
        let entry = format!(
            "[{}] [invalid-line] invalid_identifier: {}",
            chrono::Utc::now().to_rfc3339(),
            line.replace('\n', " ")
        );
        append_line(&self.dir.join(ERROR_LOG_FILE), &entry)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one mutation and persist the status atomically before the lock
    /// is released.
    fn with_inner<F>(&self, mutate: F) -> SgResult<()>
    where
        F: FnOnce(&mut StoreInner) -> SgResult<()>,
    {
        let mut inner = self.lock();
        mutate(&mut inner)?;
        debug_assert!(
            inner.status.completed.is_disjoint(&inner.status.pending),
            "completed and pending must stay disjoint"
        );
        persist_status(&self.dir, &inner.status)
    }
}

fn load_status(path: &Path) -> JobStatus {
    match fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(status) => status,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "unreadable status file, starting fresh");
                JobStatus::default()
            }
        },
        Err(_) => JobStatus::default(),
    }
}

fn load_failed_set(path: &Path) -> SgResult<BTreeSet<ItemId>> {
    let mut failed = BTreeSet::new();
    let Ok(text) = fs::read_to_string(path) else {
        return Ok(failed);
    };
    for line in text.lines() {
        if let Some(id) = ItemId::parse(line) {
            failed.insert(id);
        }
    }
    Ok(failed)
}

/// Write the status file via a sibling temp file and atomic rename. Either
/// the new status is fully persisted or the prior file is left intact.
fn persist_status(dir: &Path, status: &JobStatus) -> SgResult<()> {
    let mut temp = NamedTempFile::new_in(dir)
        .map_err(|error| SgError::Storage(format!("status temp file: {error}")))?;
    serde_json::to_writer_pretty(&mut temp, status)?;
    temp.flush()?;
    temp.persist(dir.join(STATUS_FILE))
        .map_err(|error| SgError::Storage(format!("status rename: {error}")))?;
    Ok(())
}

fn append_line(path: &Path, line: &str) -> SgResult<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FailureCategory;
    use tempfile::TempDir;

    fn id(raw: &str) -> ItemId {
        ItemId::parse(raw).expect("test id")
    }

    #[test]
    fn completed_and_pending_stay_disjoint() {
        let dir = TempDir::new().expect("tempdir");
        let store = JobStore::open(dir.path()).expect("open");
        let item = id("aaaaaaaaaaa");

        store.mark_pending(&item).expect("pending");
        store.mark_completed(&item).expect("completed");
        let status = store.status();
        assert!(status.completed.contains(&item));
        assert!(status.pending.is_empty());

        // Re-claiming a completed item must not re-enter pending.
        store.mark_pending(&item).expect("pending again");
        let status = store.status();
        assert!(status.pending.is_empty());
        assert!(status.completed.contains(&item));
    }

    #[test]
    fn status_survives_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let item = id("bbbbbbbbbbb");
        {
            let store = JobStore::open(dir.path()).expect("open");
            store.mark_pending(&item).expect("pending");
            store.mark_completed(&item).expect("completed");
            store.note_request_time(1_756_000_000.0).expect("note");
        }
        let store = JobStore::open(dir.path()).expect("reopen");
        let status = store.status();
        assert!(status.completed.contains(&item));
        assert_eq!(status.processed_count, 1);
        assert!(status.last_request_unix.is_some());
    }

    #[test]
    fn leftover_pending_is_cleared_on_open() {
        let dir = TempDir::new().expect("tempdir");
        let item = id("ccccccccccc");
        {
            let store = JobStore::open(dir.path()).expect("open");
            // Simulate a crash between mark_pending and its resolution.
            store.mark_pending(&item).expect("pending");
        }
        let store = JobStore::open(dir.path()).expect("reopen");
        let status = store.status();
        assert!(status.pending.is_empty(), "crashed pending must be recovered");
        assert!(!status.completed.contains(&item), "recovery must not fake completion");
    }

    #[test]
    fn corrupt_status_file_loads_fresh() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join(STATUS_FILE), "{ torn wri").expect("corrupt file");
        let store = JobStore::open(dir.path()).expect("open despite corruption");
        assert_eq!(store.status(), JobStatus::default());
    }

    #[test]
    fn permanent_failures_are_a_one_way_gate_across_reopens() {
        let dir = TempDir::new().expect("tempdir");
        let item = id("ddddddddddd");
        {
            let store = JobStore::open(dir.path()).expect("open");
            store.record_permanent_failure(&item).expect("record");
            // Recording twice must not duplicate the file entry.
            store.record_permanent_failure(&item).expect("record again");
        }
        let store = JobStore::open(dir.path()).expect("reopen");
        assert!(store.is_permanently_failed(&item));

        let text = fs::read_to_string(store.failed_items_path()).expect("failed list");
        assert_eq!(text.lines().filter(|l| *l == item.as_str()).count(), 1);
    }

    #[test]
    fn failure_log_lines_parse_back() {
        let dir = TempDir::new().expect("tempdir");
        let store = JobStore::open(dir.path()).expect("open");
        let record = FailureRecord::new(
            id("eeeeeeeeeee"),
            FailureCategory::Timeout,
            "fetch timed out after 120s",
        );
        store.record_failure(&record).expect("append");

        let text = fs::read_to_string(store.error_log_path()).expect("log");
        let parsed = FailureRecord::parse_log_line(text.lines().next().expect("one line"))
            .expect("parseable");
        assert_eq!(parsed.item_id, record.item_id);
        assert_eq!(parsed.category, FailureCategory::Timeout);
    }

    #[test]
    fn status_file_is_always_valid_json() {
        let dir = TempDir::new().expect("tempdir");
        let store = JobStore::open(dir.path()).expect("open");
        for n in 0..20u8 {
            let item = id(&format!("item{n:07}"));
            store.mark_pending(&item).expect("pending");
            if n % 2 == 0 {
                store.mark_completed(&item).expect("completed");
            } else {
                store.clear_pending(&item).expect("clear");
            }
            let text = fs::read_to_string(dir.path().join(STATUS_FILE)).expect("status");
            let _: JobStatus = serde_json::from_str(&text).expect("valid json after mutation");
        }
    }
}
