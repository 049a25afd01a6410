//! Jarsmith - Entry Point
//!
//! Runs the job engine: HTTP API, dispatcher pool and persisted job store.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use jarsmith::app::options::AppOptions;
use jarsmith::app::run::run;
use jarsmith::logs::{init_logging, LogOptions};
use jarsmith::storage::layout::StorageLayout;
use jarsmith::storage::settings::SettingsStore;
use jarsmith::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings record, created on first start
    let settings = match SettingsStore::load_or_init(layout.settings_file()).await {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            eprintln!("Unable to load settings: {e}");
            std::process::exit(1);
        }
    };
    let current = settings.settings().await;

    // Initialize logging, the guard flushes the file writer on exit
    let log_options = LogOptions {
        log_level: current.log_level.clone(),
        json_format: current.log_json,
        log_dir: Some(
            current
                .log_dir
                .clone()
                .unwrap_or_else(|| layout.logs_dir().path().to_path_buf()),
        ),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(layout, &current);
    info!(
        "Running jarsmith {} with options: {:?}",
        version.version, options
    );
    if let Err(e) = run(options, settings, await_shutdown_signal()).await {
        error!("Failed to run the engine: {e}");
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, waiting for Ctrl+C only");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
