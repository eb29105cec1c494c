use clap::Parser;
use subgrab::cli::{Cli, Command, ShutdownController};
use subgrab::error::SgResult;
use subgrab::fetch::YtDlpFetcher;
use subgrab::store::JobStore;
use subgrab::{pipeline, planner};

fn main() {
    subgrab::logging::init();

    if let Err(e) = ShutdownController::install() {
        tracing::warn!("failed to install Ctrl+C handler: {e}");
    }

    match run() {
        Ok(code) => {
            if ShutdownController::is_shutting_down() {
                std::process::exit(ShutdownController::signal_exit_code());
            }
            std::process::exit(code);
        }
        Err(error) => {
            eprintln!("error[{}]: {error}", error.error_code());
            std::process::exit(1);
        }
    }
}

fn run() -> SgResult<i32> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            let config = args.to_pipeline_config()?;
            let store = JobStore::open(&config.output_dir)?;
            let fetcher = YtDlpFetcher::new(args.cookies.clone());

            let summary = pipeline::run_batch(&config, &store, &fetcher)?;
            let status = store.status();

            println!("Processing complete: {summary}");
            println!("Total completed across runs: {}", status.completed.len());
            println!("Failed items logged in: {}", store.failed_items_path().display());
            println!("Transcripts saved in: {}", config.output_dir.display());
            println!("Error log saved in: {}", store.error_log_path().display());

            Ok(if summary.failed > 0 { 2 } else { 0 })
        }
        Command::Plan(args) => {
            let report = planner::run_planner(&args.input, &args.output)?;

            println!("Iteration {} plan", report.iteration);
            println!("Original items: {}", report.original_count);
            println!("Successfully downloaded: {}", report.downloaded_count);
            println!("Missing: {}", report.missing_count);
            println!("- Will retry: {}", report.retry_count);
            println!("- Skipped (no captions): {}", report.skipped_no_captions);
            println!("- Skipped (unavailable): {}", report.skipped_unavailable);
            println!("- On permanent-failure list: {}", report.skipped_failed);
            println!("Next batch file: {}", report.next_batch_file);
            Ok(0)
        }
        Command::Status(args) => {
            let store = JobStore::open(&args.output)?;
            let status = store.status();
            println!("Completed: {}", status.completed.len());
            println!("Pending: {}", status.pending.len());
            println!("Processed this store: {}", status.processed_count);
            match status.last_request_unix {
                Some(at) => println!("Last upstream request (unix): {at:.0}"),
                None => println!("Last upstream request: never"),
            }
            Ok(0)
        }
    }
}
