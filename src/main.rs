//! tonproxy - REST proxy for TON blockchain data
//!
//! Main entry point for the tonproxy CLI.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tonapi::TonApi;
use tonproxy::cache::{CacheStore, SqliteCacheStore};
use tonproxy::config::{validate_config_result, ProxyConfig};
use tonproxy::pagination::PaginationEngine;
use tonproxy::server::ProxyServer;
use tonproxy::upstream::TonApiEventSource;

/// tonproxy - TON data proxy with a paged transaction cache
#[derive(Parser, Debug)]
#[command(name = "tonproxy")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/tonproxy/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Interface to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config and PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show transaction cache statistics
    CacheStats,

    /// Fetch one page of an account's history through the cache
    Page {
        /// Cache key (raw account address, e.g. 0:83df...)
        key: String,

        /// Page size
        #[arg(short, long)]
        limit: Option<usize>,

        /// Page index, starting at 0
        #[arg(short, long)]
        page: Option<usize>,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    if let Err(e) = tonproxy::logging::init(level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> tonproxy::Result<()> {
    if let Commands::Init { force } = cli.command {
        return handle_init_command(cli.config, force);
    }

    let mut config = match cli.config {
        Some(ref path) => ProxyConfig::load(path)?,
        None => ProxyConfig::load_default()?,
    };
    config.apply_env();

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            validate_config_result(&config)?;

            let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
            runtime.block_on(async {
                let server = ProxyServer::from_config(&config)?;
                server.run(&config.server.bind_addr()).await
            })
        }
        Commands::CacheStats => {
            let store = SqliteCacheStore::open(&config.storage).with_context(|| {
                format!("opening cache at {}", config.storage.path.display())
            })?;
            let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
            let stats = runtime.block_on(store.stats())?;

            println!("Cache: {}", config.storage.path.display());
            println!("  Records:  {}", stats.record_count);
            println!("  Complete: {}", stats.complete_count);
            println!("  Events:   {}", stats.event_count);
            Ok(())
        }
        Commands::Page { key, limit, page } => {
            validate_config_result(&config)?;
            let limit = limit.unwrap_or(config.pagination.limit);
            let page = page.unwrap_or(config.pagination.page);

            let api = Arc::new(TonApi::new(config.tonapi.client_config())?);
            let source = Arc::new(TonApiEventSource::new(
                api,
                config.pagination.initiator_only,
            ));
            let store = Arc::new(SqliteCacheStore::open(&config.storage).with_context(|| {
                format!("opening cache at {}", config.storage.path.display())
            })?);
            let engine =
                PaginationEngine::new(source, store, config.pagination.fetch_batch_size);

            let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
            let result = runtime.block_on(engine.get_page(&key, limit, page))?;

            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::Init { .. } => Ok(()),
    }
}

fn handle_init_command(path: Option<PathBuf>, force: bool) -> tonproxy::Result<()> {
    let path = path.unwrap_or_else(ProxyConfig::default_path);

    if path.exists() && !force {
        return Err(tonproxy::ProxyError::Config(format!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        )));
    }

    ProxyConfig::default()
        .save(&path)
        .with_context(|| format!("writing config to {}", path.display()))?;
    println!("Created configuration at {}", path.display());
    println!();
    println!("Set TONAPI_KEY in the environment, then start the server with:");
    println!("  tonproxy serve");
    Ok(())
}
