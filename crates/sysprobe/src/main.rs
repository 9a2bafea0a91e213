//! sysprobe - process, file and network activity capture
//!
//! Attaches eBPF programs to syscall tracepoints and streams what they see
//! as JSON lines.

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use sysprobe_capture::config::{self, ArgvCapture, CaptureConfig, ConfigLoader, TaskOffsets};
use sysprobe_capture::{
    resolve_task_offsets, CaptureStats, EbpfCollector, OffsetSource, Preflight,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sysprobe")]
#[command(version)]
#[command(about = "Process, file and network activity capture via eBPF", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output format for logs and the check report (text, json)
    #[arg(short, long, global = true)]
    format: Option<String>,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "SYSPROBE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach probes and stream events to stdout (requires root or CAP_BPF)
    Run(RunArgs),

    /// Check whether this host can run the probes
    Check,

    /// Print the effective configuration
    Config,
}

#[derive(clap::Args, Default)]
struct RunArgs {
    /// Path to the compiled eBPF object
    #[arg(long)]
    bytecode: Option<PathBuf>,

    /// Disable process start capture
    #[arg(long)]
    no_process: bool,

    /// Disable file open capture
    #[arg(long)]
    no_file: bool,

    /// Disable network connect capture
    #[arg(long)]
    no_network: bool,

    /// Record full command lines instead of the executable path
    #[arg(long)]
    argv: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = ConfigLoader::new().with_cli_path(cli.config.clone()).load();
    let mut sysprobe_config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => CaptureConfig::default(),
    };
    if let Some(format) = &cli.format {
        sysprobe_config.log.format = format.clone();
    }

    init_logging(&sysprobe_config, cli.verbose)?;
    match loaded {
        Ok(_) => info!("Configuration loaded successfully"),
        Err(e) => warn!("Failed to load configuration: {}, using defaults", e),
    }

    match cli.command {
        Commands::Run(args) => {
            let merged = merge_run_config(sysprobe_config, args);
            config::validate(&merged)?;
            run_command(merged).await
        }
        Commands::Check => check_command(&sysprobe_config, json_output(&sysprobe_config)),
        Commands::Config => {
            print!("{}", config::to_toml(&sysprobe_config)?);
            Ok(())
        }
    }
}

/// `RUST_LOG` wins, then `-v`, then the configured level. Logs go to stderr;
/// stdout carries events.
fn init_logging(config: &CaptureConfig, verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => config.log.level.to_lowercase(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if config.log.format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
    .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

/// Merge CLI arguments with config file settings.
/// Flags only ever narrow or enable; absent flags keep the configured value.
fn merge_run_config(mut config: CaptureConfig, args: RunArgs) -> CaptureConfig {
    if let Some(path) = args.bytecode {
        config.capture.bytecode_path = Some(path);
    }
    if args.no_process {
        config.capture.process = false;
    }
    if args.no_file {
        config.capture.file = false;
    }
    if args.no_network {
        config.capture.network = false;
    }
    if args.argv && config.capture.argv == ArgvCapture::Off {
        config.capture.argv = ArgvCapture::On;
    }
    config
}

async fn run_command(config: CaptureConfig) -> anyhow::Result<()> {
    let preflight = Preflight::detect();
    for warning in preflight.warnings() {
        warn!("{}", warning);
    }
    let problems = preflight.problems();
    if !problems.is_empty() {
        for problem in &problems {
            error!("{}", problem);
        }
        anyhow::bail!("eBPF capture unavailable on this host (see `sysprobe check`)");
    }

    info!("Starting sysprobe...");
    let (tx, mut rx) = mpsc::channel(config.capture.queue_depth);
    let mut collector = EbpfCollector::new(&config);
    collector.start(tx).await?;

    eprintln!();
    eprintln!("  sysprobe v{}", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("  Press Ctrl+C to stop");
    eprintln!();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(event) = received else { break };
                let mut out = std::io::stdout().lock();
                let written = serde_json::to_writer(&mut out, &event)
                    .map_err(std::io::Error::from)
                    .and_then(|_| out.write_all(b"\n"));
                if let Err(e) = written {
                    error!("Failed to write event: {}", e);
                    break;
                }
            }
            result = &mut shutdown => {
                result?;
                break;
            }
        }
    }

    collector.stop().await?;
    log_summary(&collector.stats());
    info!("sysprobe stopped");

    Ok(())
}

fn log_summary(stats: &CaptureStats) {
    info!(
        process_start = stats.process_start,
        file_open = stats.file_open,
        connect = stats.connect,
        decode_errors = stats.decode_errors,
        forward_failures = stats.forward_failures,
        "Captured {} events",
        stats.events()
    );
}

fn json_output(config: &CaptureConfig) -> bool {
    config.log.format.eq_ignore_ascii_case("json")
}

fn check_command(config: &CaptureConfig, json: bool) -> anyhow::Result<()> {
    let preflight = Preflight::detect();
    let (task, task_source) = resolve_task_offsets(config.task);
    let problems = preflight.problems();
    let warnings = preflight.warnings();

    if json {
        let report = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "host": preflight,
            "bytecode_path": config.capture.bytecode_path,
            "argv_capture": config.capture.argv.enabled(preflight.wsl),
            "task_offsets": task,
            "task_offsets_source": task_source,
            "warnings": warnings,
            "problems": problems,
            "ready": problems.is_empty(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_check_report(config, &preflight, task_offsets_line(task, task_source));
        println!();
        for warning in &warnings {
            println!("  warning: {}", warning);
        }
        for problem in &problems {
            println!("  problem: {}", problem);
        }
        println!();
    }

    if !problems.is_empty() {
        anyhow::bail!("host is not ready for eBPF capture");
    }
    if !json {
        println!("Ready.");
    }
    Ok(())
}

fn task_offsets_line(task: TaskOffsets, source: OffsetSource) -> String {
    match source {
        OffsetSource::Unresolved => "unresolved (ppid will be 0)".to_string(),
        OffsetSource::Config | OffsetSource::Btf => format!(
            "real_parent={:#x} tgid={:#x} (from {})",
            task.real_parent,
            task.tgid,
            if source == OffsetSource::Btf { "BTF" } else { "config" }
        ),
    }
}

fn print_check_report(config: &CaptureConfig, preflight: &Preflight, task_offsets: String) {
    println!();
    println!("sysprobe v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!(
        "Platform: {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    println!();
    println!("Host:");
    println!("  Running as root: {}", preflight.root);
    println!("  CAP_BPF + CAP_PERFMON: {}", preflight.cap_bpf);
    println!("  BPF filesystem: {}", preflight.bpffs);
    println!("  BTF available: {}", preflight.btf);
    match preflight.kernel {
        Some((major, minor, patch)) => println!("  Kernel: {}.{}.{}", major, minor, patch),
        None => println!("  Kernel: unknown"),
    }
    println!("  WSL: {}", preflight.wsl);

    println!();
    println!("Configuration:");
    match &config.capture.bytecode_path {
        Some(path) => println!(
            "  Bytecode: {} ({})",
            path.display(),
            if path.exists() { "found" } else { "missing" }
        ),
        None => println!("  Bytecode: not configured"),
    }
    println!(
        "  Argv capture: {}",
        config.capture.argv.enabled(preflight.wsl)
    );
    println!("  task_struct offsets: {}", task_offsets);
}
