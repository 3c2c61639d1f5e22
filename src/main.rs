// TailSleuth - main.rs
//
// Headless entry point. Handles:
// 1. CLI argument parsing
// 2. config.toml loading and logging initialisation
// 3. Feeding stdin into an in-memory log file watched by a line-count analysis
// 4. Writing a snapshot of the analysis once stdin is exhausted

use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tailsleuth::app::change_notifier::ChangeNotifier;
use tailsleuth::app::registry::{AnalysisRegistry, RegistrySettings};
use tailsleuth::app::scheduler::{PooledScheduler, TaskScheduler};
use tailsleuth::core::analyser::LineCountEngine;
use tailsleuth::core::log_file::{InMemoryLogFile, LogFile};
use tailsleuth::core::model::{AnalyserTemplate, AnalysisTemplate};
use tailsleuth::platform::config::{load_config, PlatformPaths};
use tailsleuth::platform::fs::RealFilesystem;
use tailsleuth::util::{constants, error::error_chain, logging};

/// Upper bound on how long to wait for the analysis to catch up with stdin.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// TailSleuth - count lines arriving on stdin and snapshot the result.
///
/// Lines are read from stdin into an in-memory log file, analysed
/// periodically, and a snapshot of the final analysis is written on EOF.
#[derive(Parser, Debug)]
#[command(name = "TailSleuth", version, about)]
struct Cli {
    /// Name recorded in the snapshot's analysis template.
    #[arg(short = 'n', long = "name", default_value = "stdin")]
    name: String,

    /// Directory containing config.toml (platform default if omitted).
    #[arg(short = 'c', long = "config-dir")]
    config_dir: Option<PathBuf>,

    /// Directory the snapshot is written to (overrides config and default).
    #[arg(short = 's', long = "snapshot-dir")]
    snapshot_dir: Option<PathBuf>,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let platform_paths = PlatformPaths::resolve();
    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(|| platform_paths.config_dir.clone());
    let (config, config_warnings) = load_config(&config_dir);

    logging::init(cli.debug, config.log_level.as_deref());
    for warning in &config_warnings {
        tracing::warn!(error = %warning, "Config warning; using default for this value");
    }

    tracing::info!(
        version = constants::APP_VERSION,
        debug = cli.debug,
        "TailSleuth starting"
    );

    let scheduler: Arc<dyn TaskScheduler> = match PooledScheduler::new(config.worker_threads) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!(error = %error_chain(&e), "Failed to start scheduler");
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let snapshot_dir = cli
        .snapshot_dir
        .or(config.snapshot_dir.clone())
        .unwrap_or(platform_paths.snapshot_dir);
    let settings = RegistrySettings {
        poll_interval: config.poll_interval,
        snapshot_dir,
        snapshot_extension: config.snapshot_extension.clone(),
    };
    let registry = AnalysisRegistry::new(
        Arc::clone(&scheduler),
        Arc::new(RealFilesystem),
        Arc::new(LineCountEngine),
        settings,
    );

    let template = AnalysisTemplate::new(cli.name).with_analyser(AnalyserTemplate::new(
        "lines",
        constants::LINE_COUNT_ANALYSER_KIND,
    ));
    let handle = match registry.create_new_analysis(template) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let Some(analysis) = registry.get(handle) else {
        eprintln!("Error: analysis {handle} vanished after creation");
        return ExitCode::FAILURE;
    };

    let log_file = Arc::new(InMemoryLogFile::new());
    analysis.add_log_file(Arc::clone(&log_file) as Arc<dyn LogFile>);

    // Consumer side: drain coalesced change notifications on a frame timer
    // and report progress, the way a viewer would refresh its line list.
    let changes = Arc::new(ChangeNotifier::new());
    let _subscription = changes.register(
        Arc::clone(&log_file) as Arc<dyn LogFile>,
        config.listener_minimum_interval,
        config.max_lines_per_batch,
    );
    let progress = {
        let changes = Arc::clone(&changes);
        let log_file = Arc::clone(&log_file);
        scheduler.schedule_periodic(
            "progress",
            config.refresh_interval,
            Box::new(move || {
                let drained = changes.drain();
                if drained > 0 {
                    tracing::debug!(
                        changes = drained,
                        lines = log_file.count(),
                        max_width = changes.max_line_width(),
                        "Log file grew"
                    );
                }
            }),
        )
    };

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        match line {
            Ok(line) => log_file.add_line(line),
            Err(e) => {
                tracing::warn!(error = %e, "Stopped reading stdin");
                break;
            }
        }
    }
    log_file.flush();
    tracing::info!(lines = log_file.count(), "Reached end of input");

    // A tick that starts after EOF sees every line; wait until one has
    // completed, i.e. two ticks past the current count.
    let target = analysis.tick_count() + 2;
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    while analysis.tick_count() < target && Instant::now() < deadline {
        std::thread::sleep(config.poll_interval / 2);
    }
    scheduler.cancel(progress);

    let completion = match registry.save_snapshot(handle, analysis.template()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    completion.wait();

    let writer = registry.snapshot_writer();
    let failed = writer.failed_writes() > 0;
    if !failed {
        println!("{}", writer.target_path().display());
    }

    drop(analysis);
    registry.remove(handle);
    tracing::info!("TailSleuth finished");

    if failed {
        eprintln!("Error: snapshot could not be written (see log)");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
