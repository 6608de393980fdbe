mod clock;
mod config;
mod devices;
mod endpoint;
mod engine;
mod gateway;
mod mqtt;
mod scheduler;
mod state;
mod web;

use anyhow::{Context, Result};
use clap::Parser;
use rumqttc::{AsyncClient, MqttOptions};
use std::{sync::Arc, time::Duration};
use time::UtcOffset;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use clock::{resolve_offset, SystemClock};
use config::Config;
use devices::ReadingCache;
use gateway::MqttGateway;
use scheduler::Controller;
use state::SystemState;

/// Light-integrating irrigation controller.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.toml")]
    config: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // ── Config file ─────────────────────────────────────────────────
    let cfg = config::load(&cli.config)?;
    for w in cfg.warnings() {
        warn!("config: {w}");
    }

    // The local offset is only readable while we are still single-threaded.
    let offset = resolve_offset(cfg.utc_offset.as_deref())?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?
        .block_on(run(cfg, offset))
}

async fn run(cfg: Config, offset: UtcOffset) -> Result<()> {
    let settings = cfg.controller_settings()?;
    let registry = Arc::new(cfg.registry());
    info!(
        devices = registry.len(),
        utc_offset = %offset,
        trigger_level = cfg.trigger_level,
        reset_midnight = cfg.reset_midnight,
        "controller starting"
    );

    // ── Shared state (ephemeral, for the status API) ────────────────
    let shared = Arc::new(RwLock::new(SystemState::new()));
    shared
        .write()
        .await
        .record_system("controller started".to_string());

    let readings = Arc::new(RwLock::new(ReadingCache::new(Duration::from_secs(
        cfg.mqtt.stale_after_sec as u64,
    ))));

    // ── Web server ──────────────────────────────────────────────────
    let web_state = Arc::clone(&shared);
    tokio::spawn(async move {
        if let Err(e) = web::serve(web_state).await {
            error!("{e:#}");
        }
    });

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new(&cfg.mqtt.client_id, &cfg.mqtt.host, cfg.mqtt.port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    if let (Some(user), Some(pass)) = (&cfg.mqtt.username, &cfg.mqtt.password) {
        mqttoptions.set_credentials(user, pass);
    }

    let (client, eventloop) = AsyncClient::new(mqttoptions, 20);
    info!(host = %cfg.mqtt.host, port = cfg.mqtt.port, "mqtt client configured");

    tokio::spawn(gateway::pump(
        eventloop,
        client.clone(),
        Arc::clone(&readings),
        Arc::clone(&registry),
        Arc::clone(&shared),
    ));

    // ── Control loop ────────────────────────────────────────────────
    let gateway = MqttGateway::new(registry, readings, client, settings.gateway_timeout);
    let controller = Controller::new(settings, gateway, SystemClock::new(offset), shared);
    controller.run().await;

    Ok(())
}
