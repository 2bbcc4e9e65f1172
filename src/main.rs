use std::sync::Arc;

use voltronic_bridge::options::Options;
use voltronic_bridge::prelude::*;

#[tokio::main]
async fn main() {
    let options = Options::new();

    // logging needs the configured level, so a bad config only goes to stderr
    let config = match ConfigWrapper::new(&options.config_file) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Fatal: failed to load config {}: {:#}", options.config_file, err);
            std::process::exit(1);
        }
    };

    if let Err(e) = voltronic_bridge::init_logging(config.loglevel()) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    config.log_summary(&options.config_file);

    // Create a channel for shutdown signaling
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // Handle Ctrl+C
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                if let Err(e) = shutdown_tx.send(()) {
                    error!("Failed to send shutdown signal: {}", e);
                }
            }
            Err(e) => {
                // no way to be told to stop, so just keep running
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });

    if let Err(e) = voltronic_bridge::app(shutdown_rx, config, Arc::new(SerialConnector)).await {
        eprintln!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}
