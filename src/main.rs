mod bridge;
mod cli;
mod domain;
mod infrastructure;
#[cfg(test)]
mod testing;

use crate::bridge::{Bridge, BridgeError, RelayStats, ShutdownSignal};
use crate::domain::settings::BridgeSettings;
use crate::infrastructure::bluetooth::connection::{default_adapter, BtleplugLink};
use crate::infrastructure::bluetooth::scanner::BtleplugScanner;
use crate::infrastructure::logging::init_logger;
use crate::infrastructure::mqtt::MqttTransport;
use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let cli = cli::Cli::parse();

    let mut settings = match BridgeSettings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(1);
        }
    };
    cli.apply(&mut settings);

    let _logging_guard = init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {:#}", e))
        .ok();

    match run(settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            let code = e.downcast_ref::<BridgeError>().map_or(1, BridgeError::exit_code);
            ExitCode::from(code)
        }
    }
}

fn run(settings: BridgeSettings) -> anyhow::Result<()> {
    let config = settings.validate().context("invalid configuration")?;
    info!("Starting BLE-MQTT bridge for {:?}", config.device.logical_name);

    let shutdown = ShutdownSignal::new();
    shutdown.install_signal_handler()?;

    // Link scheduler: every link operation and relayed write runs here
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime for the link")?;

    rt.block_on(async move {
        let adapter = default_adapter().await?;
        let bus = MqttTransport::new(
            config.endpoint.clone(),
            config.credentials.clone(),
            config.timeout,
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let stats = tokio::spawn(RelayStats::collect(events_rx));

        let bridge = Bridge::new(
            config,
            BtleplugScanner::new(adapter.clone()),
            BtleplugLink::new(adapter),
            bus,
        )
        .with_reporter(events_tx);
        let result = bridge.run(shutdown.token()).await;

        match tokio::time::timeout(Duration::from_secs(1), stats).await {
            Ok(Ok(stats)) => stats.log_summary(),
            _ => warn!("Relay statistics unavailable"),
        }

        result.map_err(anyhow::Error::from)
    })
}
