use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use log::{error, info};

mod config;
mod error;
#[cfg(test)]
mod fakes;
mod indicator;
mod manager;
mod messages;
mod presence;
mod scanner;
mod system;
mod webhook;
mod wifi;

use indicator::Indicator as _;

#[derive(Parser, Debug)]
#[command(version, about = "Watches an RFID reader and reports tag presence to a webhook")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let args = Args::parse();
    let config = config::AppConfig::load(&args.config)?;
    let endpoint = config.endpoint()?;
    info!(
        "Loaded {} network(s), webhook {}:{}{}",
        config.wifi.networks.len(),
        endpoint.host(),
        endpoint.port(),
        endpoint.path()
    );

    let colors = config.indicator_colors();
    let mut indicator = system::LogIndicator::new(config.brightness());
    indicator.set_color(colors.connecting);

    let reader = system::UidFileReader::new(config.uid_path(), config.firmware_path());
    let poller = match scanner::SensorPoller::start(reader, config.poller_settings()).await {
        Ok(poller) => poller,
        Err(err) => match indicator::halt(&mut indicator, colors.error, &err).await {},
    };

    let session = wifi::NetworkSession::new(
        system::NmcliLink::new(config.interface()),
        system::TimedatectlClock::new(),
        config.wifi.networks.clone(),
        config.session_settings(),
        colors,
    );
    let transport = webhook::HttpTransport::new().context("building HTTP client")?;
    let dispatcher =
        webhook::NotificationDispatcher::new(transport, endpoint, config.webhook_timeout());

    let mut core = manager::Manager::new(
        poller,
        session,
        dispatcher,
        indicator,
        colors,
        config.loop_timing(),
    );
    core.bring_up().await;
    info!("Setup complete!");

    core.run_loop(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for shutdown signal: {:?}", err);
            std::future::pending::<()>().await;
        }
    })
    .await;

    Ok(())
}
