//! `cluster-dl` command-line front-end

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use cluster_dl::logging::init_logging;
use cluster_dl::{
    Config, Dispatcher, Endpoint, FetchConfig, FetchOutcome, HttpFetcher, Result,
    WorkerService, read_manifest, shutdown_signal,
};

#[derive(Parser)]
#[command(name = "cluster-dl", version)]
#[command(about = "Distribute file downloads across worker machines", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept jobs over TCP and download them until told to shut down
    Worker(WorkerArgs),
    /// Send a job manifest to the workers round-robin, then shut them down
    Dispatch(DispatchArgs),
    /// Download a single URL locally
    Fetch(FetchArgs),
}

#[derive(Args)]
struct WorkerArgs {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:42069
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Number of concurrent downloads
    #[arg(long)]
    pool_size: Option<usize>,

    /// Seconds without response data before an attempt is abandoned
    #[arg(long)]
    timeout: Option<u64>,

    /// Total attempts per download
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Save as name[N].ext instead of skipping existing files
    #[arg(long)]
    allow_rename: bool,
}

#[derive(Args)]
struct DispatchArgs {
    /// JSON-lines job manifest
    #[arg(long)]
    manifest: PathBuf,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker endpoint (host or host:port), repeatable; replaces configured endpoints
    #[arg(long = "endpoint")]
    endpoints: Vec<Endpoint>,

    /// Do not send jobs whose destination already exists locally
    #[arg(long)]
    skip_existing: bool,

    /// On Ctrl+C, still tell every worker to shut down
    #[arg(long)]
    shutdown_on_interrupt: bool,
}

#[derive(Args)]
struct FetchArgs {
    /// Source URL
    url: String,

    /// Destination file path
    dest: PathBuf,

    /// Save as name[N].ext instead of skipping an existing file
    #[arg(long)]
    allow_rename: bool,

    /// Total attempts
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Seconds without response data before an attempt is abandoned
    #[arg(long)]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Worker(args) => run_worker(args).await,
        Command::Dispatch(args) => run_dispatch(args).await,
        Command::Fetch(args) => run_fetch(args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, code = e.error_code(), "cluster-dl failed");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_toml_file(path),
        None => Ok(Config::default()),
    }
}

fn apply_fetch_overrides(
    fetch: &mut FetchConfig,
    timeout: Option<u64>,
    max_attempts: Option<u32>,
    allow_rename: bool,
) {
    if let Some(secs) = timeout {
        fetch.idle_timeout = Duration::from_secs(secs);
    }
    if let Some(n) = max_attempts {
        fetch.retry.max_attempts = n;
    }
    if allow_rename {
        fetch.allow_rename = true;
    }
}

async fn run_worker(args: WorkerArgs) -> Result<ExitCode> {
    let mut config = load_config(args.config.as_deref())?.worker;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(size) = args.pool_size {
        config.pool_size = size;
    }
    apply_fetch_overrides(
        &mut config.fetch,
        args.timeout,
        args.max_attempts,
        args.allow_rename,
    );

    let service = WorkerService::bind_http(config).await?;
    let token = service.shutdown_token();
    tokio::spawn(async move {
        let signal = shutdown_signal().await;
        tracing::info!(%signal, "Stopping worker, in-flight downloads will finish");
        token.cancel();
    });

    let summary = service.serve().await?;
    Ok(if summary.exhausted == 0 && summary.panicked == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_dispatch(args: DispatchArgs) -> Result<ExitCode> {
    let mut config = load_config(args.config.as_deref())?.dispatcher;
    if !args.endpoints.is_empty() {
        config.endpoints = args.endpoints;
    }
    if args.skip_existing {
        config.skip_existing = true;
    }

    let jobs = read_manifest(&args.manifest)?;
    let dispatcher = Dispatcher::new(config)?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        let signal = shutdown_signal().await;
        tracing::info!(%signal, "Stopping dispatch");
        trigger.cancel();
    });

    let report = dispatcher
        .dispatch_until(jobs, &cancel, args.shutdown_on_interrupt)
        .await;

    for (endpoint, count) in dispatcher.endpoints().iter().zip(&report.assigned) {
        tracing::info!(endpoint = %endpoint, jobs = count, "Assigned");
    }
    for job in &report.lost {
        tracing::error!(name = %job.name, url = %job.url, "Not delivered");
    }

    Ok(if report.lost.is_empty() && report.unsent == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_fetch(args: FetchArgs) -> Result<ExitCode> {
    let mut config = FetchConfig::default();
    apply_fetch_overrides(&mut config, args.timeout, args.max_attempts, args.allow_rename);

    let fetcher = HttpFetcher::new(config)?;
    let outcome = fetcher.fetch(&args.url, &args.dest, &fetcher.options()).await;
    println!("{}", serde_json::to_string(&outcome)?);

    Ok(match outcome {
        FetchOutcome::Exhausted { .. } => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}
