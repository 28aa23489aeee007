//! parkwatchd - HTTP query service
//!
//! This daemon:
//! 1. Loads configuration (PARKWATCH_CONFIG + PARKWATCH_* overrides)
//! 2. Serves `GET /`, running one session per request and answering `{"vagas": n}`
//! 3. Stops on Ctrl-C, cancelling any session in flight

use anyhow::{Context, Result};
use std::sync::mpsc;

use parkwatch::api::{ApiConfig, ApiServer, ConfiguredRunner};
use parkwatch::ParkwatchConfig;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ParkwatchConfig::load()?;
    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
    };
    log::info!(
        "parkwatchd watching {} with detector {}",
        config.source.path,
        config.detector.backend
    );
    let api_handle = ApiServer::new(api_config, ConfiguredRunner::new(config)).spawn()?;
    log::info!("query api listening on http://{}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("parkwatchd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
