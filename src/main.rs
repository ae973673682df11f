//! wit-guest CLI entry point.
//!
//! Installs the in-process host, runs the lifecycle audit of the guest
//! ownership types against it and prints the report.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wit_guest_common::{ConfigFile, DestructorTiming, HandleMode};
use wit_guest_host::{AuditReport, audit, runtime};

#[derive(Parser)]
#[command(name = "wit-guest")]
#[command(about = "Audit guest-side canonical ABI ownership against an in-process host", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "WIT_GUEST_CONFIG")]
    config: Option<PathBuf>,

    /// Override the handle representation.
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Override when destructors run.
    #[arg(long, value_enum)]
    timing: Option<TimingArg>,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Integer,
    Pointer,
}

impl From<ModeArg> for HandleMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Integer => HandleMode::Integer,
            ModeArg::Pointer => HandleMode::Pointer,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TimingArg {
    Immediate,
    Deferred,
}

impl From<TimingArg> for DestructorTiming {
    fn from(arg: TimingArg) -> Self {
        match arg {
            TimingArg::Immediate => DestructorTiming::Immediate,
            TimingArg::Deferred => DestructorTiming::Deferred,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wit_guest=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConfigFile::default(),
    };
    if let Some(mode) = cli.mode {
        config.host.handle_mode = mode.into();
    }
    if let Some(timing) = cli.timing {
        config.host.destructor_timing = timing.into();
    }

    info!(
        config = ?cli.config,
        handle_mode = %config.host.handle_mode,
        imports = config.imports.len(),
        "Configuration loaded"
    );

    runtime::install(config.host.clone());
    let report = audit::run(&config.audit, &config.imports);

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{json}");
    } else {
        print_report(&report);
    }

    let failures = report.failures();
    if !failures.is_empty() {
        anyhow::bail!("{} of {} checks failed", failures.len(), report.checks.len());
    }
    Ok(())
}

fn print_report(report: &AuditReport) {
    println!(
        "mode: {}  timing: {:?}  iterations: {}",
        report.mode, report.timing, report.iterations
    );
    for check in &report.checks {
        let status = if check.passed { "ok" } else { "FAILED" };
        match &check.detail {
            Some(detail) => println!("  {status:<6} {}  ({detail})", check.name),
            None => println!("  {status:<6} {}", check.name),
        }
    }
    let host = &report.host;
    println!(
        "host: {} registered, {} drop requests, {} destructors, {} imports ({} released), {} faults",
        host.registered,
        host.drop_requests,
        host.destructors_run,
        host.imports_created,
        host.imports_released,
        host.faults
    );
}
