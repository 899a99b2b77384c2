//! Wireless Daemon Signal Probe (wlprobe)
//!
//! Conformance/debugging probe that watches a set of daemon signals on the
//! D-Bus and reports whether they were observed within a hard timeout.
//!
//! # Usage
//!
//! ```bash
//! # Wait for a scan to complete on the system bus (requires root/sudo)
//! sudo wlprobe --topic fi.w1.wpa_supplicant1.Interface.ScanDone
//!
//! # Wait until either signal shows up on the session bus
//! wlprobe --session --any \
//!     --topic fi.w1.wpa_supplicant1.Interface.ScanDone \
//!     --topic fi.w1.wpa_supplicant1.Interface.BSSAdded
//! ```
//!
//! Exit codes: 0 pass, 1 fail, 77 skip (signals never observed and
//! `--timeout-skips` was given).

use clap::Parser;
use libwlharness::config::HarnessConfig;
use libwlharness::dbus_bus::DbusBus;
use libwlharness::error::HarnessResult;
use libwlharness::orchestrator::Orchestrator;
use libwlharness::report::Report;
use libwlharness::scenario::Scenario;
use std::path::PathBuf;
use tokio::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Wireless Daemon Signal Probe
#[derive(Parser, Debug)]
#[command(name = "wlprobe")]
#[command(author = "wlharness contributors")]
#[command(version)]
#[command(about = "Watch wireless daemon D-Bus signals under a hard timeout", long_about = None)]
struct Args {
    /// Signal topic to watch, as <interface>.<Member>; repeatable
    #[arg(long, required = true)]
    topic: Vec<String>,

    /// Satisfied when any one topic is seen (default: all topics)
    #[arg(long)]
    any: bool,

    /// Use the session bus instead of the system bus
    #[arg(long)]
    session: bool,

    /// Hard timeout in milliseconds (default from config)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Treat a timeout as skip (exit 77) instead of fail
    #[arg(long)]
    timeout_skips: bool,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the rendered report into the configured report directory
    #[arg(long)]
    save_report: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> HarnessResult<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };

    init_logging(&args, &config);

    info!("Starting wlprobe");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // The system bus typically needs root to see daemon signals
    #[cfg(target_os = "linux")]
    {
        if !args.session {
            let uid = unsafe { libc::getuid() };
            if uid != 0 {
                warn!("Not running as root - system bus signals may be filtered");
            }
        }
    }

    let mut bus = if args.session {
        DbusBus::session().await?
    } else {
        DbusBus::system().await?
    };

    let hard_timeout =
        Duration::from_millis(args.timeout_ms.unwrap_or(config.defaults.hard_timeout_ms));

    let topics = args.topic.clone();
    info!(
        "Watching {} topic(s), {} required, hard timeout {:?}",
        topics.len(),
        if args.any { "any" } else { "all" },
        hard_timeout
    );

    let scenario = build_watch_scenario(&topics, args.any);
    let outcome = Orchestrator::new(&mut bus).run(scenario, hard_timeout).await;

    let report = if args.timeout_skips {
        Report::timeout_as_skip(&outcome, "expected signals not observed")
    } else {
        Report::from_outcome(&outcome)
    };

    println!("{}", report.render());

    if args.save_report {
        save_report(&config, &report)?;
    }

    let code = match &report.verdict {
        libwlharness::report::Verdict::Pass => 0,
        libwlharness::report::Verdict::Fail(_) => 1,
        libwlharness::report::Verdict::Skip(_) => 77,
    };
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// One flag per topic; satisfied when all (or any) are set
fn build_watch_scenario(topics: &[String], any: bool) -> Scenario {
    let mut builder = Scenario::builder("signal_watch");

    for topic in topics {
        let flag = topic.clone();
        builder = builder.on(topic, move |state, _ctx, note| {
            debug!("observed {}: {}", note.topic, note.payload);
            state.capture(&note.topic, note.payload.clone());
            state.set(&flag);
            Ok(())
        });
    }

    let wanted: Vec<String> = topics.to_vec();
    builder.satisfied_when(move |state| {
        if any {
            wanted.iter().any(|t| state.is_set(t))
        } else {
            wanted.iter().all(|t| state.is_set(t))
        }
    })
}

/// Write the rendered report into the report directory
fn save_report(config: &HarnessConfig, report: &Report) -> HarnessResult<()> {
    config.ensure_directories()?;
    let filename = format!(
        "wlprobe-{}.txt",
        report.finished_at.format("%Y%m%d-%H%M%S")
    );
    let path = config.paths.report_dir.join(filename);
    std::fs::write(&path, report.render())?;
    info!("Report written to {:?}", path);
    Ok(())
}

/// Initialize logging based on command-line arguments and config
fn init_logging(args: &Args, config: &HarnessConfig) {
    let log_level = if args.verbose {
        "debug"
    } else {
        args.log_level.as_deref().unwrap_or(config.defaults.log_level.as_str())
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("wlprobe={},libwlharness={}", log_level, log_level))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(atty::is(atty::Stream::Stdout))
        .init();
}
