//! The narrow seam to the upstream caption source.
//!
//! The pipeline only ever sees `fetch(id, language, timeout) -> payload or
//! failure message`; everything upstream of that line (credentials, URLs,
//! transport) stays behind this trait. The failure message is opaque here
//! and is translated by the classifier, never string-matched at call sites.

use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::model::ItemId;

/// An upstream fetch failure, carried as unstructured message text for the
/// classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub message: String,
}

impl FetchFailure {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Fetches the raw caption payload for one item in one language.
pub trait CaptionFetcher: Send + Sync {
    fn fetch(
        &self,
        id: &ItemId,
        language: &str,
        timeout: Duration,
    ) -> Result<String, FetchFailure>;
}

// ---------------------------------------------------------------------------
// yt-dlp subprocess fetcher
// ---------------------------------------------------------------------------

/// Default fetcher: shells out to `yt-dlp` to download the subtitle track
/// (manual or auto-generated) for the requested language into a scratch
/// directory, then returns the file contents as the raw payload.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    program: String,
    cookies: Option<PathBuf>,
}

impl YtDlpFetcher {
    #[must_use]
    pub fn new(cookies: Option<PathBuf>) -> Self {
        Self {
            program: "yt-dlp".to_owned(),
            cookies,
        }
    }

    #[must_use]
    pub fn with_program(program: impl Into<String>, cookies: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cookies,
        }
    }
}

impl CaptionFetcher for YtDlpFetcher {
    fn fetch(
        &self,
        id: &ItemId,
        language: &str,
        timeout: Duration,
    ) -> Result<String, FetchFailure> {
        if which::which(&self.program).is_err() {
            return Err(FetchFailure::new(format!(
                "missing command `{}` on PATH",
                self.program
            )));
        }

        let scratch = tempfile::tempdir()
            .map_err(|error| FetchFailure::new(format!("scratch dir: {error}")))?;
        let template = scratch.path().join("%(id)s");

        let mut args: Vec<String> = vec![
            "--skip-download".to_owned(),
            "--write-subs".to_owned(),
            "--write-auto-subs".to_owned(),
            "--sub-langs".to_owned(),
            language.to_owned(),
            "--no-warnings".to_owned(),
            "--quiet".to_owned(),
            "-o".to_owned(),
            template.display().to_string(),
        ];
        if let Some(cookies) = &self.cookies {
            args.push("--cookies".to_owned());
            args.push(cookies.display().to_string());
        }
        args.push(format!("https://www.youtube.com/watch?v={id}"));

        run_with_timeout(&self.program, &args, timeout)?;

        // yt-dlp names the track `<id>.<lang>.<ext>`; take whichever
        // extension it chose.
        let entries = std::fs::read_dir(scratch.path())
            .map_err(|error| FetchFailure::new(format!("scratch dir read: {error}")))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(id.as_str()) && name.len() > ItemId::LEN {
                return std::fs::read_to_string(entry.path())
                    .map_err(|error| FetchFailure::new(format!("subtitle read: {error}")));
            }
        }

        Err(FetchFailure::new(format!(
            "No subtitles found for the requested language `{language}`"
        )))
    }
}

/// Run a subprocess with a hard deadline: spawn with piped output, drain
/// the pipes on reader threads, poll `try_wait`, and kill on expiry.
fn run_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<(), FetchFailure> {
    let rendered = format!("{} {}", program, args.join(" "));
    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| FetchFailure::new(format!("spawn `{rendered}`: {error}")))?;
    let started_at = Instant::now();

    let mut stderr_pipe = child.stderr.take();
    let (stderr_tx, stderr_rx) = std::sync::mpsc::channel();
    thread::spawn(move || {
        use std::io::Read;
        let mut buf = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = stderr_tx.send(buf);
    });

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let stderr = stderr_rx
                    .recv_timeout(Duration::from_millis(100))
                    .unwrap_or_default();
                let stderr = String::from_utf8_lossy(&stderr);
                let stderr = stderr.trim();
                if status.success() {
                    return Ok(());
                }
                let detail = if stderr.is_empty() {
                    format!("command failed (status {status})")
                } else {
                    stderr.to_owned()
                };
                return Err(FetchFailure::new(detail));
            }
            Ok(None) => {}
            Err(error) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(FetchFailure::new(format!("wait `{rendered}`: {error}")));
            }
        }

        if started_at.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(FetchFailure::new(format!(
                "fetch timed out after {}s",
                timeout.as_secs()
            )));
        }

        thread::sleep(Duration::from_millis(20));
    }
}
