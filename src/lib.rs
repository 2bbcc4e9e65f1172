pub mod channels;    // Inter-component communication channels
pub mod config;      // Configuration loading and validation
pub mod coordinator; // Per-inverter task registry
pub mod error;       // Error taxonomy
pub mod mqtt;        // MQTT client and messaging
pub mod options;     // Command line options parsing
pub mod prelude;     // Common imports and types
pub mod voltronic;   // Inverter serial protocol and poll loop

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

const MQTT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

use crate::mqtt::Mqtt;
use crate::prelude::*;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Initializes logging. `RUST_LOG` wins over `default_level`, which is
/// normally the configured `loglevel`.
pub fn init_logging(default_level: &str) -> Result<()> {
    log_builder(env_logger::Env::default().default_filter_or(default_level)).try_init()?;
    Ok(())
}

fn log_builder(env: env_logger::Env) -> env_logger::Builder {
    let mut builder = env_logger::Builder::from_env(env);
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never);
    builder
}

/// Runs the bridge until `shutdown_rx` fires.
pub async fn app(
    mut shutdown_rx: broadcast::Receiver<()>,
    config: ConfigWrapper,
    connector: Arc<dyn Connector>,
) -> Result<()> {
    info!("voltronic-bridge {} starting", CARGO_PKG_VERSION);

    let channels = Channels::new();
    let mut coordinator = Coordinator::new(config.clone(), channels.clone(), connector);

    info!("  Creating MQTT client...");
    let mqtt = Arc::new(Mqtt::new(config.clone(), channels.clone(), coordinator.stats.clone()));
    let messages = channels.to_mqtt.subscribe();
    let mqtt_clone = mqtt.clone();
    let mut mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt_clone.start(messages).await {
            error!("MQTT task failed: {}", e);
        }
    });

    info!("  Starting inverters...");
    let started = coordinator.start();
    if started == 0 {
        warn!("no enabled inverters with a port configured, only publishing availability");
    } else {
        info!("Started {} inverter(s): {}", started, coordinator.inverter_names().join(", "));
    }

    // Wait for shutdown signal
    let _ = shutdown_rx.recv().await;
    info!("Shutdown signal received, stopping components...");

    coordinator.stop().await;
    mqtt.stop();
    // a publish stuck on an unreachable broker would otherwise hold us here
    match tokio::time::timeout(MQTT_STOP_TIMEOUT, &mut mqtt_handle).await {
        Ok(Err(e)) => error!("Error waiting for MQTT task: {}", e),
        Ok(Ok(())) => {}
        Err(_) => {
            warn!("MQTT task did not stop within {}s, aborting", MQTT_STOP_TIMEOUT.as_secs());
            mqtt_handle.abort();
        }
    }

    if let Ok(stats) = coordinator.stats.lock() {
        stats.print_summary();
    }

    info!("Application shutdown complete");
    Ok(())
}
