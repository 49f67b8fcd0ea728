//! Farmhand Command-Line Interface
//!
//! Submits jobs and pipelines to HTCondor or LSF, tracks them, and wraps
//! running processes for the monitoring service.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::common::{Session, WaitArgs};
use commands::{dag, jobs, shadow, submit};

/// Farmhand - dependency-aware job submission for batch farms
#[derive(Parser)]
#[command(name = "farmhand")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (defaults to $FARMHAND_CONFIG, then ~/.farmhand/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Batch backend (HTCondor, LSF); overrides the configuration
    #[arg(short, long, global = true)]
    backend: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a single job
    Submit {
        /// Job name
        name: String,

        /// Number of identical processes
        #[arg(short = 'n', long, default_value = "1")]
        processes: u32,

        /// Minimum number of successful processes
        #[arg(long)]
        min_success: Option<u32>,

        /// Standard output path ({jIndex}, {jID} and {subTag} are expanded)
        #[arg(short = 'o', long)]
        stdout: Option<String>,

        /// Standard error path
        #[arg(short = 'e', long)]
        stderr: Option<String>,

        /// Backend argument, `key=value` or `key:backend=value`
        #[arg(short = 'a', long = "arg")]
        arguments: Vec<String>,

        /// Script submitted when no command is given
        #[arg(long)]
        stdin_script: Option<PathBuf>,

        #[command(flatten)]
        wait: WaitArgs,

        /// Command to run
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Submit a pipeline manifest
    Dag {
        /// Manifest file (YAML)
        manifest: PathBuf,

        /// Pipeline label (defaults to the manifest's label)
        #[arg(short, long)]
        label: Option<String>,

        /// Submission tag distinguishing concurrent submissions
        #[arg(short, long)]
        tag: Option<String>,

        /// Submit node by node, waiting for each (for backends without native dependencies)
        #[arg(long)]
        sequential: bool,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Query job status
    Status {
        /// Native job identifier
        id: String,
    },

    /// Wait for a job to finish
    Wait {
        /// Native job identifier
        id: String,

        /// Maximum polling attempts (unlimited if omitted)
        #[arg(long)]
        attempts: Option<u32>,

        /// Seconds between attempts
        #[arg(long, default_value = "60")]
        interval: u64,

        /// HTCondor user log of the submission
        #[arg(long)]
        log: Option<String>,
    },

    /// Request removal of a job
    Kill {
        /// Native job identifier
        id: String,
    },

    /// List the current user's jobs
    List,

    /// Show the captured output of a job
    Logs {
        /// Native job identifier
        id: String,

        /// Standard output file
        #[arg(long)]
        stdout_path: Option<String>,

        /// Standard error file
        #[arg(long)]
        stderr_path: Option<String>,
    },

    /// Run a command and report its lifecycle to the monitoring service
    Shadow {
        /// Regex whose matches send a heartbeat; named groups `current` and `upper` carry progress
        #[arg(long)]
        capture: Option<String>,

        /// Keep running when the server asks to stop
        #[arg(long)]
        insist: bool,

        /// Monitoring address (defaults to $FARMHAND_MONITORING_URL)
        #[arg(long)]
        address: Option<String>,

        /// Task label (defaults to $FARMHAND_TASK_LABEL)
        #[arg(long)]
        task: Option<String>,

        /// Process signature, `name` or `array:job` (defaults to the batch environment)
        #[arg(long)]
        process: Option<String>,

        /// Command to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Handle errors
    match run(cli).await {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", style("Error:").red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// Execute the command, returning the process exit code.
async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = cli.config.as_deref();
    let backend = cli.backend.as_deref();

    match cli.command {
        Commands::Submit {
            name,
            processes,
            min_success,
            stdout,
            stderr,
            arguments,
            stdin_script,
            wait,
            command,
        } => {
            let session = Session::open(config, backend)?;
            let request = submit::SubmitRequest {
                name,
                processes,
                min_success,
                stdout,
                stderr,
                arguments,
                stdin_script,
                command,
            };
            submit::execute(&session, request, &wait).await?;
        }

        Commands::Dag {
            manifest,
            label,
            tag,
            sequential,
            wait,
        } => {
            let options = dag::DagOptions {
                label,
                tag,
                sequential,
            };
            dag::execute(config, backend, &manifest, &options, &wait).await?;
        }

        Commands::Status { id } => {
            let session = Session::open(config, backend)?;
            jobs::status(&session, &id).await?;
        }

        Commands::Wait {
            id,
            attempts,
            interval,
            log,
        } => {
            let session = Session::open(config, backend)?;
            jobs::wait(&session, &id, attempts, interval, log.as_deref()).await?;
        }

        Commands::Kill { id } => {
            let session = Session::open(config, backend)?;
            jobs::kill(&session, &id).await?;
        }

        Commands::List => {
            let session = Session::open(config, backend)?;
            jobs::list(&session).await?;
        }

        Commands::Logs {
            id,
            stdout_path,
            stderr_path,
        } => {
            let session = Session::open(config, backend)?;
            jobs::logs(&session, &id, stdout_path.as_deref(), stderr_path.as_deref()).await?;
        }

        Commands::Shadow {
            capture,
            insist,
            address,
            task,
            process,
            command,
        } => {
            let options = shadow::ShadowOptions {
                capture,
                insist,
                address,
                task,
                process,
            };
            return shadow::execute(options, &command).await;
        }
    }

    Ok(0)
}
