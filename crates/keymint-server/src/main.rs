//! Keymint Server — headless keychain daemon.
//!
//! Serves the keychain engine over a small line-delimited JSON protocol
//! on TCP. Accounts are watch-only: the process never sees private key
//! material.
//!
//! # Usage
//!
//! ```bash
//! keymint-server --config /path/to/keymint.toml
//! keymint-server --check    # Validate config and store, then exit
//! keymint-server --validate # Validate config only
//! ```

mod config;
mod daemon;
mod wire;

use anyhow::{Context, Result};
use std::path::PathBuf;

fn main() -> Result<()> {
    // Parse CLI args (minimal — no clap dependency needed)
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = PathBuf::from("keymint.toml");
    let mut check_store = false;
    let mut validate_only = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = PathBuf::from(&args[i]);
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--check" => {
                check_store = true;
            }
            "--validate" => {
                validate_only = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("keymint-server {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    // Load config; a missing file means pure defaults.
    let mut server_config = if config_path.exists() {
        config::ServerConfig::from_file(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        config::ServerConfig::default()
    };

    // Apply env overrides
    server_config.apply_env_overrides();

    // Validate
    server_config
        .validate()
        .context("Configuration validation failed")?;

    // Init logger
    std::env::set_var("RUST_LOG", &server_config.server.log_level);
    env_logger::init();

    if validate_only {
        println!("Configuration is valid.");
        println!("  Listen:  {}", server_config.server.listen_addr);
        println!("  Backend: {:?}", server_config.store.backend);
        println!("  Store:   {}", server_config.store.path.display());
        println!("  Timeout: {} ms", server_config.server.request_timeout_ms);
        return Ok(());
    }

    if check_store {
        daemon::build_engine(&server_config).context("Store check failed")?;
        println!("Configuration and store are usable.");
        return Ok(());
    }

    // Build tokio runtime
    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;

    let outcome = rt.block_on(async {
        tokio::select! {
            result = daemon::run(server_config) => result,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received shutdown signal. Exiting…");
                Ok(())
            }
        }
    });

    if let Err(e) = outcome {
        log::error!("Server error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"Keymint Server — headless HD keychain daemon

USAGE:
    keymint-server [OPTIONS]

OPTIONS:
    -c, --config <PATH>   Config file path (default: keymint.toml)
    --check               Validate config and open the store, then exit
    --validate            Validate config file and exit
    -h, --help            Show this help message
    -V, --version         Show version

ENVIRONMENT VARIABLES (override config file):
    KEYMINT_LISTEN_ADDR         TCP listen address (host:port)
    KEYMINT_LOG_LEVEL           Log level (error/warn/info/debug/trace)
    KEYMINT_REQUEST_TIMEOUT_MS  Per-request deadline in milliseconds
    KEYMINT_STORE_BACKEND       Store backend (memory/sqlite)
    KEYMINT_STORE_PATH          SQLite database path

EXAMPLES:
    # Run with a config file
    keymint-server --config /etc/keymint/keymint.toml

    # Development: volatile store on a custom port
    KEYMINT_STORE_BACKEND=memory KEYMINT_LISTEN_ADDR=127.0.0.1:7000 keymint-server
"#
    );
}
