//! rsync-supervisor - run rsync under supervision from the command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rsync_supervisor::capture::{CaptureError, OutputCapture};
use rsync_supervisor::classify::{parse_version, ErrorPatterns, PatternError, RsyncVariant};
use rsync_supervisor::config::{Config, ConfigError, ConfigLoader};
use rsync_supervisor::display;
use rsync_supervisor::supervisor::{
    OutputLineError, OutputSink, ProcessHandle, RunReport, Supervisor, SupervisorError,
    DEFAULT_CORRELATION_ID, VERSION_FLAG,
};

#[derive(Parser)]
#[command(
    name = "rsync-supervisor",
    about = "Run rsync with output monitoring and error detection",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file to use instead of the default search paths.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run rsync with the given arguments.
    Run {
        /// Path to the rsync executable.
        #[arg(long)]
        rsync: Option<PathBuf>,
        /// Treat the executable as openrsync.
        #[arg(long)]
        openrsync: bool,
        /// Correlation id reported back on completion.
        #[arg(long = "hidden-id")]
        hidden_id: Option<String>,
        /// Mirror output lines to this file.
        #[arg(long)]
        capture_file: Option<PathBuf>,
        /// Print the run report as JSON instead of streaming output.
        #[arg(long)]
        json: bool,
        /// Do not print progress updates.
        #[arg(long)]
        no_progress: bool,
        /// Arguments passed to rsync.
        #[arg(last = true, required = true)]
        args: Vec<String>,
    },
    /// Probe the rsync executable and report its flavour.
    Version {
        /// Path to the rsync executable.
        #[arg(long)]
        rsync: Option<PathBuf>,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Terminal host for a supervised run.
struct ConsoleSink {
    executable: Option<PathBuf>,
    patterns: ErrorPatterns,
    echo_lines: bool,
    show_progress: bool,
    process: Mutex<Option<ProcessHandle>>,
}

impl ConsoleSink {
    fn current_process(&self) -> Option<ProcessHandle> {
        self.process.lock().ok().and_then(|guard| guard.clone())
    }
}

impl OutputSink for ConsoleSink {
    fn resolve_executable(&self) -> Option<PathBuf> {
        self.executable.clone()
    }

    fn check_line(&self, line: &str) -> Result<(), OutputLineError> {
        self.patterns.classify(line)
    }

    fn set_process(&self, process: Option<ProcessHandle>) {
        if let Ok(mut guard) = self.process.lock() {
            *guard = process;
        }
    }

    fn report_error(&self, error: SupervisorError) {
        display::print_run_error(&error);
    }

    fn report_progress(&self, lines: usize) {
        if self.show_progress {
            display::print_progress(lines);
        }
    }

    fn report_completion(&self, output: Option<Vec<String>>, correlation_id: &str) {
        tracing::debug!(
            correlation_id = %correlation_id,
            lines = output.as_ref().map_or(0, Vec::len),
            "Run completion received"
        );
    }

    fn live_line(&self, line: &str) {
        if self.echo_lines {
            display::print_line(line);
        }
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Pick the executable from the command line, the config file, or `PATH`.
fn resolve_rsync(explicit: Option<PathBuf>, config: &Config, openrsync: bool) -> Option<PathBuf> {
    if let Some(path) = explicit.or_else(|| config.rsync.path.clone()) {
        return Some(path);
    }
    let names: &[&str] = if openrsync {
        &["openrsync", "rsync"]
    } else {
        &["rsync"]
    };
    names.iter().find_map(|name| which::which(name).ok())
}

/// Run `--version` and detect the flavour from its output.
async fn probe_version(
    executable: Option<PathBuf>,
    config: &Config,
) -> Result<(Option<RsyncVariant>, Option<String>), CliError> {
    let sink = Arc::new(ConsoleSink {
        executable,
        patterns: ErrorPatterns::new(),
        echo_lines: false,
        show_progress: false,
        process: Mutex::new(None),
    });
    let report = Supervisor::new([VERSION_FLAG], sink)
        .correlation_id("version-probe")
        .config(config.supervisor.clone())
        .launch()?
        .wait()
        .await?;
    let banner = report.output.join("\n");
    Ok((RsyncVariant::detect(&banner), parse_version(&banner)))
}

struct RunOptions {
    rsync: Option<PathBuf>,
    openrsync: bool,
    hidden_id: Option<String>,
    capture_file: Option<PathBuf>,
    json: bool,
    no_progress: bool,
    args: Vec<String>,
}

async fn run(options: RunOptions, mut config: Config) -> Result<RunReport, CliError> {
    let executable = resolve_rsync(options.rsync, &config, options.openrsync);

    let variant = if options.openrsync {
        RsyncVariant::OpenRsync
    } else if let Some(variant) = config.rsync.variant {
        variant
    } else {
        match probe_version(executable.clone(), &config).await {
            Ok((Some(variant), _)) => variant,
            Ok((None, _)) => RsyncVariant::default(),
            Err(e) => {
                tracing::debug!(error = %e, "Version probe failed, assuming rsync 3");
                RsyncVariant::default()
            }
        }
    };

    if let Some(file) = options.capture_file {
        config.capture.enabled = true;
        config.capture.file = Some(file);
    }
    let sink = Arc::new(ConsoleSink {
        executable: executable.clone(),
        patterns: ErrorPatterns::with_custom_patterns(config.rsync.error_patterns.as_slice())?,
        echo_lines: !options.json,
        show_progress: !options.json && !options.no_progress,
        process: Mutex::new(None),
    });

    let correlation_id = options
        .hidden_id
        .unwrap_or_else(|| DEFAULT_CORRELATION_ID.to_string());
    let mut supervisor = Supervisor::new(options.args, sink.clone())
        .correlation_id(correlation_id.clone())
        .report_progress(!options.no_progress)
        .variant(variant)
        .config(config.supervisor.clone());
    if config.capture.enabled {
        supervisor = supervisor.capture(OutputCapture::from_config(&config.capture).await?);
    }

    if !options.json {
        let shown = executable
            .as_ref()
            .map_or_else(|| "rsync".to_string(), |p| p.display().to_string());
        display::print_launch(&shown, supervisor.arguments(), &correlation_id);
    }

    let handle = supervisor.launch()?;

    let interrupt_sink = Arc::clone(&sink);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, terminating rsync");
            if let Some(process) = interrupt_sink.current_process() {
                process.terminate();
            }
        }
    });

    let report = handle.wait().await;
    interrupt.abort();
    let report = report?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        display::print_report(&report);
    }
    Ok(report)
}

fn exit_code(report: &RunReport) -> ExitCode {
    match (report.exit_code, report.signal) {
        (Some(0), _) if report.error_discovered => ExitCode::FAILURE,
        (Some(code), _) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        (None, Some(signal)) => ExitCode::from(u8::try_from(128 + signal).unwrap_or(1)),
        (None, None) => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let loader = cli
        .config
        .map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            display::print_error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Run {
            rsync,
            openrsync,
            hidden_id,
            capture_file,
            json,
            no_progress,
            args,
        } => {
            let options = RunOptions {
                rsync,
                openrsync,
                hidden_id,
                capture_file,
                json,
                no_progress,
                args,
            };
            run(options, config).await.map(|report| exit_code(&report))
        }
        Commands::Version { rsync } => {
            let executable = resolve_rsync(rsync, &config, false);
            probe_version(executable, &config)
                .await
                .map(|(variant, version)| {
                    display::print_variant(variant, version.as_deref());
                    if variant.is_some() {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::FAILURE
                    }
                })
        }
    };

    match result {
        Ok(code) => code,
        Err(CliError::Supervisor(e)) => {
            display::print_run_error(&e);
            ExitCode::FAILURE
        }
        Err(e) => {
            display::print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}
