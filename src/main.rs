pub mod models {
    pub mod netatmo;
}

pub mod cache;
pub mod client;
pub mod config;
pub mod emit;
pub mod exporter;
pub mod exposition;
pub mod fetch;
pub mod measure;
pub mod merge;
pub mod server;

use crate::client::NetatmoClient;
use crate::config::Config;
use crate::exporter::Exporter;
use crate::server::AppState;
use clap::Parser;
use log::{error, info};
use std::sync::Arc;

pub fn run(cfg: Config) -> Result<(), String> {
    // 1) Log effective config
    info!(
        "Config loaded (listen={}, api_url={}, initial_lookback={}s, scrape_timeout={}s, request_timeout={}s)",
        cfg.listen, cfg.api_url, cfg.initial_lookback_secs, cfg.scrape_timeout_secs, cfg.request_timeout_secs
    );

    // 2) Init Netatmo client
    let client_config = cfg.client_config().map_err(|e| e.to_string())?;
    let client = NetatmoClient::new(client_config)
        .map_err(|e| format!("Netatmo auth failed (credentials invalid?): {}", e))?;
    info!("Authenticated to Netatmo API");

    // 3) Serve scrapes until a shutdown signal arrives
    let state = AppState {
        exporter: Arc::new(Exporter::new(client, cfg.initial_lookback())),
        scrape_timeout: cfg.scrape_timeout(),
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Starting async runtime failed: {}", e))?;
    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(&cfg.listen)
            .await
            .map_err(|e| format!("Binding {} failed: {}", cfg.listen, e))?;
        server::serve(listener, state, server::shutdown_signal())
            .await
            .map_err(|e| format!("HTTP server failed: {}", e))
    })?;

    info!("Stopped");
    Ok(())
}

fn main() {
    let loaded_env = match config::env_file_from_args(std::env::args_os()).and_then(config::load_env) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    let cfg = Config::parse();

    info!(
        "netatmo-exporter {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(cfg) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
