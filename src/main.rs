//! Cacheprog CLI
//!
//! Entry point for the `cacheprog` binary. Run it as `GOCACHEPROG`:
//!
//!   GOCACHEPROG="cacheprog local --cache-dir /tmp/go-cache" go build ./...
//!
//! Stdin and stdout carry the protocol; diagnostics go to stderr or the log
//! file.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cacheprog::store::{LocalStore, Provider, StoreError, TieredStore};
use cacheprog::{ConfigError, Engine, EngineError, FileConfig, RemoteOverrides};

#[derive(Parser)]
#[command(name = "cacheprog")]
#[command(about = "External build cache program for GOCACHEPROG", version)]
struct Cli {
    /// Maximum number of concurrent cache operations (default: 2 x CPUs)
    #[arg(long, global = true)]
    concurrent: Option<usize>,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true, hide = true)]
    logfile: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (default: info)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Path to a TOML config file
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the cache from a local directory
    Local {
        /// Cache directory (default: /tmp/go-cache)
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },

    /// Serve the cache from a local directory backed by a remote object store
    Remote {
        /// Cache directory (default: /tmp/go-cache)
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Object store endpoint URL
        #[arg(long, env = "CACHEPROG_REMOTE_ENDPOINT")]
        endpoint: Option<String>,

        /// Bucket holding the cache entries
        #[arg(long, env = "CACHEPROG_REMOTE_BUCKET")]
        bucket: Option<String>,

        /// Service instance ID sent with every request
        #[arg(long, env = "CACHEPROG_REMOTE_RESOURCEINSTANCEID")]
        resource_instance_id: Option<String>,

        /// Objects smaller than this many bytes stay local (default: 1024)
        #[arg(long)]
        min_upload_size: Option<u64>,

        /// Bearer token for the object store
        #[arg(long, env = "CACHEPROG_REMOTE_APIKEY", hide = true, hide_env_values = true)]
        api_key: Option<String>,
    },
}

#[derive(Debug, Error)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open log file {path}: {source}")]
    Logfile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to start runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("failed to open cache: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] EngineError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "cacheprog failed");
            eprintln!("Error: {}", error_chain(&e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), RunError> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    init_tracing(
        &file.log_level(cli.log_level.clone()),
        file.logfile(cli.logfile.clone()),
    )?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(RunError::Runtime)?;

    let result = runtime.block_on(serve(cli, file));
    // The stdin reader may still be parked on a blocking read after a failed
    // session; exit without joining it
    runtime.shutdown_background();
    result
}

async fn serve(cli: Cli, file: FileConfig) -> Result<(), RunError> {
    let engine_config = file.engine_config(cli.concurrent);

    let provider: Arc<dyn Provider> = match cli.command {
        Commands::Local { cache_dir } => {
            let cache_dir = file.cache_dir(cache_dir);
            info!(cache_dir = %cache_dir.display(), "using local cache");
            Arc::new(LocalStore::new(&cache_dir)?)
        }
        Commands::Remote {
            cache_dir,
            endpoint,
            bucket,
            resource_instance_id,
            min_upload_size,
            api_key,
        } => {
            let cache_dir = file.cache_dir(cache_dir);
            let remote = file.remote_config(RemoteOverrides {
                endpoint,
                bucket,
                api_key,
                resource_instance_id,
            });
            let tiered = file.tiered_config(min_upload_size);
            info!(
                cache_dir = %cache_dir.display(),
                endpoint = %remote.endpoint,
                bucket = %remote.bucket,
                "using tiered cache"
            );
            Arc::new(TieredStore::connect(&cache_dir, remote, tiered).await?)
        }
    };

    let engine = Engine::new(provider, engine_config);
    engine.run(tokio::io::stdin(), tokio::io::stdout()).await?;
    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` takes precedence over `level`.
fn init_tracing(level: &str, logfile: Option<PathBuf>) -> Result<(), RunError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    // Stdout carries the protocol, so logs never go there
    let result = match logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|source| RunError::Logfile { path, source })?;
            builder
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .try_init()
        }
        None => builder.with_writer(io::stderr).try_init(),
    };

    if let Err(e) = result {
        eprintln!("Warning: failed to install log subscriber: {}", e);
    }
    Ok(())
}

/// Render an error with its sources, outermost first.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
