#[cfg(feature = "bh1750")]
mod bh1750;
#[cfg(feature = "sim")]
mod sim;

#[cfg(not(any(feature = "sim", feature = "bh1750")))]
compile_error!("enable at least one light source feature: `sim` or `bh1750`");

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::{env, str::FromStr, time::Duration};
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct LightMsg {
    ts: i64,
    light: f64,
}

#[derive(Debug, Deserialize)]
struct IrrigateMsg {
    ts: i64,
}

fn light_topic(serial: &str) -> String {
    format!("tele/{serial}/light")
}

fn irrigate_topic(serial: &str) -> String {
    format!("dose/{serial}/irrigate")
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Light source
// ---------------------------------------------------------------------------

enum LightSource {
    #[cfg(feature = "sim")]
    Sim(sim::LightSim),
    #[cfg(feature = "bh1750")]
    Bh1750(bh1750::Bh1750),
}

impl LightSource {
    /// Real hardware when built with `bh1750`, otherwise the simulator.
    fn from_env() -> Result<Self> {
        #[cfg(feature = "bh1750")]
        {
            let addr = env_or("BH1750_ADDR", bh1750::DEFAULT_ADDR);
            Ok(Self::Bh1750(bh1750::Bh1750::new(addr)?))
        }
        #[cfg(not(feature = "bh1750"))]
        {
            let scenario =
                sim::Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
            let day_s: f64 = env_or("SIM_DAY_S", 86_400.0);
            info!(scenario = %scenario, day_s, "using simulated light sensor");
            Ok(Self::Sim(sim::LightSim::new(scenario, day_s)))
        }
    }

    fn read(&mut self) -> Result<f64> {
        match self {
            #[cfg(feature = "sim")]
            Self::Sim(sim) => Ok(sim.sample()),
            #[cfg(feature = "bh1750")]
            Self::Bh1750(dev) => dev.read_irradiance(),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env_or("MQTT_PORT", 1883);
    let serial = env::var("NODE_SERIAL").unwrap_or_else(|_| "ICL-0001".to_string());
    // A node may also drive a doser registered under its own serial.
    let doser_serial = env::var("DOSER_SERIAL").unwrap_or_else(|_| serial.clone());
    let sample_every_s: u64 = env_or("SAMPLE_EVERY_S", 30);

    let mut source = LightSource::from_env()?;

    let mut mqttoptions = MqttOptions::new(format!("irrigation-node-{serial}"), broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    let command_topic = irrigate_topic(&doser_serial);
    let sub_client = client.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("node connected to mqtt");
                    if let Err(e) = sub_client
                        .subscribe(&command_topic, QoS::AtLeastOnce)
                        .await
                    {
                        warn!("subscribe {command_topic} failed: {e}");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) if p.topic == command_topic => {
                    match serde_json::from_slice::<IrrigateMsg>(&p.payload) {
                        Ok(cmd) => info!(
                            doser = %doser_serial,
                            requested_at = cmd.ts,
                            "irrigation started"
                        ),
                        Err(e) => warn!(topic = %p.topic, "bad irrigate command: {e}"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt error: {e}. retrying...");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let topic = light_topic(&serial);
    info!(topic = %topic, every_s = sample_every_s, "publishing light telemetry");

    loop {
        match source.read() {
            Ok(light) => {
                let msg = LightMsg {
                    ts: now_unix(),
                    light,
                };
                let payload = serde_json::to_vec(&msg)?;
                if let Err(e) = client
                    .publish(&topic, QoS::AtLeastOnce, false, payload)
                    .await
                {
                    error!("publish error: {e}");
                } else {
                    info!(ts = msg.ts, light = format!("{light:.1}"), "published light");
                }
            }
            Err(e) => error!("light read failed: {e:#}"),
        }

        sleep(Duration::from_secs(sample_every_s)).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
