//! Tracing setup for the subgrab binary.
//!
//! Filtering comes from `RUST_LOG` (default `subgrab=info`); output goes
//! to stderr so transcript paths printed on stdout stay machine-readable.
//! Setting `RUST_LOG_FORMAT=json` switches to line-delimited JSON for log
//! shippers.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Repeated calls are no-ops, so tests may
/// call this freely.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("subgrab=info"));

    let json_mode = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json_mode {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}
