use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::error::{SgError, SgResult};
use crate::limiter::RateLimiterConfig;
use crate::pipeline::PipelineConfig;
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Graceful Ctrl+C shutdown
// ---------------------------------------------------------------------------

/// Global flag indicating that a shutdown signal has been received.
static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);

/// Coordinates graceful Ctrl+C shutdown.
///
/// When a signal is received the controller sets a global `AtomicBool`,
/// which workers poll between items via
/// [`ShutdownController::is_shutting_down`]. In-flight items finish their
/// state machine so the store is never left mid-mutation; remaining queue
/// entries are simply not started and stay eligible for the next run.
pub struct ShutdownController;

impl ShutdownController {
    /// Install the Ctrl+C signal handler. Errors are non-fatal (signal
    /// handling is best-effort), so callers may log and continue.
    pub fn install() -> SgResult<()> {
        ctrlc::set_handler(|| {
            SHUTDOWN_FLAG.store(true, Ordering::SeqCst);
            tracing::info!("shutdown signal received (Ctrl+C)");
        })
        .map_err(|e| SgError::Io(std::io::Error::other(format!("ctrlc handler: {e}"))))?;
        Ok(())
    }

    /// Returns `true` once a Ctrl+C (or programmatic trigger) has been
    /// received.
    #[must_use]
    pub fn is_shutting_down() -> bool {
        SHUTDOWN_FLAG.load(Ordering::SeqCst)
    }

    /// Programmatically trigger the shutdown flag (internal cancel paths
    /// and tests).
    pub fn trigger_shutdown() {
        SHUTDOWN_FLAG.store(true, Ordering::SeqCst);
    }

    /// Reset the shutdown flag (for testing only).
    #[cfg(test)]
    pub fn reset() {
        SHUTDOWN_FLAG.store(false, Ordering::SeqCst);
    }

    /// The exit code the binary should use when exiting due to a signal.
    #[must_use]
    pub const fn signal_exit_code() -> i32 {
        130 // Convention: 128 + SIGINT(2)
    }
}

// ---------------------------------------------------------------------------
// Command surface
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "subgrab")]
#[command(about = "Resumable, rate-respecting batch caption acquisition")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Acquire captions for every item in the input batch.
    Run(RunArgs),
    /// Compute the next retry batch from a prior run's gaps.
    Plan(PlanArgs),
    /// Print the durable job status for an output directory.
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Input file: one watch URL, short link, or bare id per line.
    #[arg(value_name = "INPUT")]
    pub input_pos: Option<PathBuf>,

    /// Input file (alternative to the positional form).
    #[arg(long, short)]
    pub input: Option<PathBuf>,

    /// Directory for transcripts and durable job state.
    #[arg(long, default_value = "extracted-transcripts")]
    pub output: PathBuf,

    /// Target caption language code.
    #[arg(long, default_value = "ar")]
    pub language: String,

    /// Worker pool size. Keep at 1 unless the upstream tolerates bursts.
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Attempts per item before it is recorded as permanently failed.
    #[arg(long, default_value_t = 1)]
    pub attempts: u32,

    /// Base spacing between upstream requests, in seconds.
    #[arg(long, default_value_t = 60.0)]
    pub base_delay_secs: f64,

    /// Uniform jitter added to every request delay, in seconds.
    #[arg(long, default_value_t = 10.0)]
    pub jitter_min_secs: f64,
    #[arg(long, default_value_t = 20.0)]
    pub jitter_max_secs: f64,

    /// Every Nth request doubles the base delay with wider jitter.
    /// Zero disables cooldowns.
    #[arg(long, default_value_t = 10)]
    pub cooldown_every: u64,
    #[arg(long, default_value_t = 30.0)]
    pub cooldown_jitter_min_secs: f64,
    #[arg(long, default_value_t = 60.0)]
    pub cooldown_jitter_max_secs: f64,

    /// Per-attempt fetch deadline, in seconds.
    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,

    /// Prefix output lines with [HH:MM:SS] timestamps.
    #[arg(long)]
    pub timestamps: bool,

    /// Cookies file handed to the fetch backend.
    #[arg(long)]
    pub cookies: Option<PathBuf>,
}

impl RunArgs {
    /// The effective input path: flag wins over positional, default
    /// `items.txt` otherwise.
    #[must_use]
    pub fn input_path(&self) -> PathBuf {
        self.input
            .clone()
            .or_else(|| self.input_pos.clone())
            .unwrap_or_else(|| PathBuf::from("items.txt"))
    }

    pub fn to_pipeline_config(&self) -> SgResult<PipelineConfig> {
        if self.jitter_min_secs > self.jitter_max_secs {
            return Err(SgError::InvalidRequest(
                "jitter-min-secs must not exceed jitter-max-secs".to_owned(),
            ));
        }
        if self.cooldown_jitter_min_secs > self.cooldown_jitter_max_secs {
            return Err(SgError::InvalidRequest(
                "cooldown-jitter-min-secs must not exceed cooldown-jitter-max-secs".to_owned(),
            ));
        }
        if self.attempts == 0 {
            return Err(SgError::InvalidRequest(
                "attempts must be at least 1".to_owned(),
            ));
        }

        Ok(PipelineConfig {
            input: self.input_path(),
            output_dir: self.output.clone(),
            language: self.language.clone(),
            workers: self.workers.max(1),
            timestamps: self.timestamps,
            limiter: RateLimiterConfig {
                base_delay_secs: self.base_delay_secs,
                jitter_secs: (self.jitter_min_secs, self.jitter_max_secs),
                cooldown_every: self.cooldown_every,
                cooldown_jitter_secs: (
                    self.cooldown_jitter_min_secs,
                    self.cooldown_jitter_max_secs,
                ),
            },
            retry: RetryPolicy {
                attempt_budget: self.attempts,
                backoff_base_secs: 2.0,
                backoff_jitter_secs: (5.0, 15.0),
                fetch_timeout: Duration::from_secs(self.timeout_secs),
            },
        })
    }
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// The original input file the prior run consumed.
    #[arg(long, short)]
    pub input: PathBuf,

    /// The prior run's output directory.
    #[arg(long, default_value = "extracted-transcripts")]
    pub output: PathBuf,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Output directory holding the durable job state.
    #[arg(long, default_value = "extracted-transcripts")]
    pub output: PathBuf,
}
