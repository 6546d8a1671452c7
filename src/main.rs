//! Sumi-Relay main entry point
//!
//! This is the command-line interface for the Sumi-Relay crawl orchestrator.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use sumi_relay::config::{load_config_with_hash, Config};
use sumi_relay::output::{print_status, ExportMode};
use sumi_relay::proxy::{sync_proxies, WebshareProvider};
use sumi_relay::{JobSubmission, RelayEngine};
use tracing_subscriber::EnvFilter;

/// Sumi-Relay: a proxy-rotating crawl orchestrator
///
/// Sumi-Relay fetches batches of URLs through a rotating proxy pool,
/// adapting its request rate and retrying stalled fetches, and stores
/// structured content for export.
#[derive(Parser, Debug)]
#[command(name = "sumi-relay")]
#[command(version = "1.0.0")]
#[command(about = "A proxy-rotating crawl orchestrator", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "relay.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a job from URLs (arguments, or one per line in --file)
    Submit {
        urls: Vec<String>,

        /// Read URLs from a file, one per line
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Concurrent workers (1-20)
        #[arg(short, long, default_value_t = 1)]
        workers: u32,

        /// Allowed proxy country codes
        #[arg(long = "country", value_delimiter = ',')]
        countries: Vec<String>,

        /// Pick proxies round-robin instead of least-recently-used
        #[arg(long)]
        reshuffle: bool,

        /// Capture screenshots
        #[arg(long)]
        debug: bool,

        /// Start the job right away and wait for it
        #[arg(long)]
        start: bool,
    },

    /// Run a pending job in the foreground until it finishes
    Start { job_id: i64 },

    /// Continue a killed or failed job in the foreground
    Resume { job_id: i64 },

    /// Kill a running job
    Kill { job_id: i64 },

    /// Clear a job's fetch state so it can run again
    Reset { job_id: i64 },

    /// Show a job's status
    Status {
        job_id: i64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export a job's content as a JSON array
    Export {
        job_id: i64,

        /// structured or raw
        #[arg(short, long, default_value = "structured")]
        mode: ExportMode,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export one URL's content
    ExportUrl { url_id: i64 },

    /// Pull proxies from the configured provider
    SyncProxies,

    /// List the proxy pool
    Proxies,

    /// List countries with available proxies
    Countries,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    match cli.command {
        Command::SyncProxies => handle_sync_proxies(config).await,
        command => {
            let engine = RelayEngine::from_config(config)?;
            run_command(&engine, command).await
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_relay=info,warn"),
            1 => EnvFilter::new("sumi_relay=debug,info"),
            2 => EnvFilter::new("sumi_relay=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(io::stderr)
        .init();
}

async fn run_command(engine: &RelayEngine, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Submit {
            urls,
            file,
            workers,
            countries,
            reshuffle,
            debug,
            start,
        } => {
            let mut all = urls;
            if let Some(path) = file {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                all.extend(text.lines().map(str::to_string));
            }

            let job_id = engine.submit_job(JobSubmission {
                urls: all,
                worker_count: workers,
                proxy_countries: countries,
                reshuffle_proxies: reshuffle,
                debug_mode: debug,
            })?;
            println!("{}", job_id);

            if start {
                let status = engine.start(job_id)?.wait().await?;
                println!("Job {} finished: {}", job_id, status);
            }
        }
        Command::Start { job_id } => {
            let status = engine.start(job_id)?.wait().await?;
            println!("Job {} finished: {}", job_id, status);
        }
        Command::Resume { job_id } => {
            let status = engine.resume(job_id)?.wait().await?;
            println!("Job {} finished: {}", job_id, status);
        }
        Command::Kill { job_id } => {
            engine.kill(job_id)?;
            println!("Job {} killed", job_id);
        }
        Command::Reset { job_id } => {
            engine.reset(job_id)?;
            println!("Job {} reset", job_id);
        }
        Command::Status { job_id, json } => {
            let report = engine.status(job_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_status(&report);
            }
        }
        Command::Export {
            job_id,
            mode,
            output,
        } => {
            let written = match output {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    engine.export(job_id, mode, BufWriter::new(file))?
                }
                None => engine.export(job_id, mode, io::stdout().lock())?,
            };
            tracing::info!("Exported {} entries", written);
        }
        Command::ExportUrl { url_id } => {
            let value = engine.export_url(url_id)?;
            let mut stdout = io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &value)?;
            writeln!(stdout)?;
        }
        Command::Proxies => {
            let proxies = engine.proxy_pool().list()?;
            println!("=== Proxies ({}) ===\n", proxies.len());
            for proxy in proxies {
                println!(
                    "  {:<22} {:<3} {:<8} last used {}",
                    proxy.address(),
                    proxy.country_code.as_deref().unwrap_or("-"),
                    if proxy.is_blocked { "blocked" } else { "ok" },
                    proxy
                        .last_used_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string())
                );
            }
        }
        Command::Countries => {
            for country in engine.proxy_pool().available_countries()? {
                println!("{}", country);
            }
        }
        Command::SyncProxies => bail!("sync-proxies runs without an engine"),
    }

    Ok(())
}

async fn handle_sync_proxies(config: Config) -> anyhow::Result<()> {
    let Some(provider_config) = config.proxy_provider.clone() else {
        bail!("No [proxy-provider] section in the configuration");
    };

    let store = sumi_relay::storage::open_store(std::path::Path::new(
        &config.storage.database_path,
    ))?;
    let provider = WebshareProvider::new(provider_config)?;
    let count = sync_proxies(&provider, &store).await?;
    println!("Synced {} proxies", count);
    Ok(())
}
