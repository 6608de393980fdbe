//! Device gateway: light reads and forced irrigation, addressed to a growroom
//! or a single device.
//!
//! The control loop only sees the [`Gateway`] trait. [`MqttGateway`] backs it
//! with the static device registry, the telemetry cache fed by [`pump`], and
//! MQTT publishes for irrigation commands.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::devices::{Device, DeviceKind, DeviceRegistry, SharedReadings};
use crate::endpoint::DeviceRef;
use crate::mqtt::{
    extract_light_serial, irrigate_topic, parse_light, IrrigateMsg, LIGHT_SUBSCRIPTION,
};
use crate::state::SharedState;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("growroom '{0}' doesn't exist")]
    GrowroomNotFound(String),
    #[error("{0} not found")]
    DeviceNotFound(String),
    #[error("{device} is not a {expected:?} device")]
    WrongKind { device: String, expected: DeviceKind },
    #[error("no fresh light reading for {0}")]
    NoReading(String),
    #[error("growroom '{0}' has no irrigation-capable devices")]
    NoIrrigators(String),
    #[error(
        "irrigation failed on {failed:?} ({} of {attempted} devices) in growroom '{growroom}'",
        .failed.len()
    )]
    PartialIrrigation {
        growroom: String,
        failed: Vec<String>,
        attempted: usize,
    },
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("gateway call timed out after {0:?}")]
    Timeout(Duration),
}

/// Growroom irrigation must bound each member command itself: the caller
/// puts no deadline around the whole fan-out.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn read_growroom_light(&self, growroom: &str) -> Result<f64, GatewayError>;
    async fn read_device_light(&self, device: &DeviceRef) -> Result<f64, GatewayError>;
    async fn irrigate_growroom(&self, growroom: &str) -> Result<(), GatewayError>;
    async fn irrigate_device(&self, device: &DeviceRef) -> Result<(), GatewayError>;
}

/// Where irrigation commands go. Split out so a growroom fan-out can be
/// exercised without a broker.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn irrigate(&self, serial: &str) -> Result<(), GatewayError>;
}

#[async_trait]
impl CommandSink for AsyncClient {
    async fn irrigate(&self, serial: &str) -> Result<(), GatewayError> {
        let payload = serde_json::to_vec(&IrrigateMsg { ts: now_unix() })
            .map_err(|e| GatewayError::Publish(e.to_string()))?;
        self.publish(irrigate_topic(serial), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| GatewayError::Publish(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// MQTT-backed gateway
// ---------------------------------------------------------------------------

pub struct MqttGateway<S> {
    registry: Arc<DeviceRegistry>,
    readings: SharedReadings,
    sink: S,
    /// Applied to each doser command of a growroom fan-out.
    command_timeout: Duration,
}

impl<S: CommandSink> MqttGateway<S> {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        readings: SharedReadings,
        sink: S,
        command_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            readings,
            sink,
            command_timeout,
        }
    }

    fn device_of_kind(&self, r: &DeviceRef, kind: DeviceKind) -> Result<&Device, GatewayError> {
        let dev = self
            .registry
            .find(r)
            .ok_or_else(|| GatewayError::DeviceNotFound(r.to_string()))?;
        if dev.kind != kind {
            return Err(GatewayError::WrongKind {
                device: r.to_string(),
                expected: kind,
            });
        }
        Ok(dev)
    }
}

#[async_trait]
impl<S: CommandSink> Gateway for MqttGateway<S> {
    /// Mean of the fresh readings of the growroom's climate devices.
    async fn read_growroom_light(&self, growroom: &str) -> Result<f64, GatewayError> {
        if !self.registry.growroom_exists(growroom) {
            return Err(GatewayError::GrowroomNotFound(growroom.to_string()));
        }
        let cache = self.readings.read().await;
        let values: Vec<f64> = self
            .registry
            .members(growroom, DeviceKind::Climate)
            .iter()
            .filter_map(|d| cache.fresh(&d.serial))
            .collect();
        if values.is_empty() {
            return Err(GatewayError::NoReading(format!("growroom '{growroom}'")));
        }
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }

    async fn read_device_light(&self, device: &DeviceRef) -> Result<f64, GatewayError> {
        let dev = self.device_of_kind(device, DeviceKind::Climate)?;
        self.readings
            .read()
            .await
            .fresh(&dev.serial)
            .ok_or_else(|| GatewayError::NoReading(device.to_string()))
    }

    async fn irrigate_growroom(&self, growroom: &str) -> Result<(), GatewayError> {
        if !self.registry.growroom_exists(growroom) {
            return Err(GatewayError::GrowroomNotFound(growroom.to_string()));
        }
        let dosers = self.registry.members(growroom, DeviceKind::Doser);
        if dosers.is_empty() {
            return Err(GatewayError::NoIrrigators(growroom.to_string()));
        }

        let mut failed = Vec::new();
        for dev in &dosers {
            let sent = timeout(self.command_timeout, self.sink.irrigate(&dev.serial))
                .await
                .unwrap_or(Err(GatewayError::Timeout(self.command_timeout)));
            match sent {
                Ok(()) => info!(growroom, serial = %dev.serial, "irrigation forced"),
                Err(e) => {
                    warn!(growroom, serial = %dev.serial, "forcing irrigation failed: {e}");
                    failed.push(dev.serial.clone());
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::PartialIrrigation {
                growroom: growroom.to_string(),
                failed,
                attempted: dosers.len(),
            })
        }
    }

    async fn irrigate_device(&self, device: &DeviceRef) -> Result<(), GatewayError> {
        let dev = self.device_of_kind(device, DeviceKind::Doser)?;
        self.sink.irrigate(&dev.serial).await?;
        info!(serial = %dev.serial, "irrigation forced");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Event pump
// ---------------------------------------------------------------------------

/// Poll the MQTT event loop forever, feeding telemetry into the cache.
/// Intended to be `tokio::spawn`-ed from main.
pub async fn pump(
    mut eventloop: EventLoop,
    client: AsyncClient,
    readings: SharedReadings,
    registry: Arc<DeviceRegistry>,
    shared: SharedState,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                if let Err(e) = handle_publish(&p.topic, &p.payload, &readings, &registry).await {
                    warn!(topic = %p.topic, "{e}");
                    shared.write().await.record_error(e);
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                // Subscriptions do not survive a clean-session reconnect.
                if let Err(e) = client.subscribe(LIGHT_SUBSCRIPTION, QoS::AtLeastOnce).await {
                    warn!("mqtt subscribe failed: {e}");
                }
                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. reconnecting...");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_error(format!("mqtt error: {e}"));
                drop(st);

                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

async fn handle_publish(
    topic: &str,
    payload: &[u8],
    readings: &SharedReadings,
    registry: &DeviceRegistry,
) -> Result<(), String> {
    let Some(serial) = extract_light_serial(topic) else {
        debug!(topic, "unhandled topic");
        return Ok(());
    };
    let msg = parse_light(payload).map_err(|e| format!("{e} from {serial}"))?;
    if registry.find_serial(serial).is_none() {
        debug!(serial, "telemetry from unregistered device");
        return Ok(());
    }
    debug!(serial, ts = msg.ts, light = msg.light, "telemetry");
    readings.write().await.record(serial, msg.light);
    Ok(())
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::ReadingCache;
    use std::sync::Mutex;
    use tokio::sync::RwLock;

    /// Records every serial it is asked to irrigate; fails for the listed
    /// ones and never answers for the hung ones.
    #[derive(Default)]
    struct RecordingSink {
        fail_for: Vec<String>,
        hang_for: Vec<String>,
        attempts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandSink for RecordingSink {
        async fn irrigate(&self, serial: &str) -> Result<(), GatewayError> {
            self.attempts.lock().unwrap().push(serial.to_string());
            if self.hang_for.iter().any(|s| s == serial) {
                std::future::pending::<()>().await;
            }
            if self.fail_for.iter().any(|s| s == serial) {
                Err(GatewayError::Publish("broker gone".into()))
            } else {
                Ok(())
            }
        }
    }

    fn dev(serial: &str, name: &str, room: &str, kind: DeviceKind) -> Device {
        Device {
            serial: serial.into(),
            name: name.into(),
            growroom: room.into(),
            kind,
        }
    }

    fn registry() -> Arc<DeviceRegistry> {
        Arc::new(DeviceRegistry::new(vec![
            dev("ICL-1", "Climate A", "Room 1", DeviceKind::Climate),
            dev("ICL-2", "Climate B", "Room 1", DeviceKind::Climate),
            dev("IDS-1", "Doser A", "Room 1", DeviceKind::Doser),
            dev("IDS-2", "Doser B", "Room 1", DeviceKind::Doser),
            dev("IDS-3", "Doser C", "Room 1", DeviceKind::Doser),
            dev("ICL-3", "Climate C", "Room 2", DeviceKind::Climate),
        ]))
    }

    fn readings() -> SharedReadings {
        Arc::new(RwLock::new(ReadingCache::new(Duration::from_secs(300))))
    }

    fn gateway(sink: RecordingSink) -> (MqttGateway<RecordingSink>, SharedReadings) {
        let r = readings();
        (
            MqttGateway::new(registry(), Arc::clone(&r), sink, Duration::from_secs(10)),
            r,
        )
    }

    // -- Light reads --------------------------------------------------------

    #[tokio::test]
    async fn growroom_light_is_mean_of_fresh_climates() {
        let (gw, r) = gateway(RecordingSink::default());
        {
            let mut c = r.write().await;
            c.record("ICL-1", 400.0);
            c.record("ICL-2", 600.0);
        }
        assert_eq!(gw.read_growroom_light("Room 1").await.unwrap(), 500.0);
    }

    #[tokio::test]
    async fn growroom_light_ignores_missing_members() {
        let (gw, r) = gateway(RecordingSink::default());
        r.write().await.record("ICL-2", 250.0);
        assert_eq!(gw.read_growroom_light("Room 1").await.unwrap(), 250.0);
    }

    #[tokio::test]
    async fn unknown_growroom_fails() {
        let (gw, _r) = gateway(RecordingSink::default());
        assert!(matches!(
            gw.read_growroom_light("Room 9").await,
            Err(GatewayError::GrowroomNotFound(_))
        ));
    }

    #[tokio::test]
    async fn growroom_without_readings_fails() {
        let (gw, _r) = gateway(RecordingSink::default());
        assert!(matches!(
            gw.read_growroom_light("Room 2").await,
            Err(GatewayError::NoReading(_))
        ));
    }

    #[tokio::test]
    async fn device_light_by_name_and_serial() {
        let (gw, r) = gateway(RecordingSink::default());
        r.write().await.record("ICL-3", 123.0);
        assert_eq!(
            gw.read_device_light(&DeviceRef::Name("Climate C".into()))
                .await
                .unwrap(),
            123.0
        );
        assert_eq!(
            gw.read_device_light(&DeviceRef::Serial("ICL-3".into()))
                .await
                .unwrap(),
            123.0
        );
    }

    #[tokio::test]
    async fn device_light_unknown_device_fails() {
        let (gw, _r) = gateway(RecordingSink::default());
        assert!(matches!(
            gw.read_device_light(&DeviceRef::Serial("NOPE".into())).await,
            Err(GatewayError::DeviceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn device_light_from_doser_fails() {
        let (gw, _r) = gateway(RecordingSink::default());
        assert!(matches!(
            gw.read_device_light(&DeviceRef::Serial("IDS-1".into())).await,
            Err(GatewayError::WrongKind { .. })
        ));
    }

    // -- Irrigation ---------------------------------------------------------

    #[tokio::test]
    async fn growroom_irrigation_hits_every_doser() {
        let (gw, _r) = gateway(RecordingSink::default());
        gw.irrigate_growroom("Room 1").await.unwrap();
        assert_eq!(
            *gw.sink.attempts.lock().unwrap(),
            vec!["IDS-1", "IDS-2", "IDS-3"]
        );
    }

    #[tokio::test]
    async fn growroom_irrigation_continues_after_failure() {
        let sink = RecordingSink {
            fail_for: vec!["IDS-1".into()],
            ..Default::default()
        };
        let (gw, _r) = gateway(sink);
        let err = gw.irrigate_growroom("Room 1").await.unwrap_err();

        // All three attempted even though the first one failed.
        assert_eq!(
            *gw.sink.attempts.lock().unwrap(),
            vec!["IDS-1", "IDS-2", "IDS-3"]
        );
        match err {
            GatewayError::PartialIrrigation {
                failed, attempted, ..
            } => {
                assert_eq!(failed, vec!["IDS-1"]);
                assert_eq!(attempted, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_doser_times_out_and_rest_are_still_commanded() {
        let sink = RecordingSink {
            hang_for: vec!["IDS-1".into()],
            ..Default::default()
        };
        let (gw, _r) = gateway(sink);
        let err = gw.irrigate_growroom("Room 1").await.unwrap_err();

        assert_eq!(
            *gw.sink.attempts.lock().unwrap(),
            vec!["IDS-1", "IDS-2", "IDS-3"]
        );
        match err {
            GatewayError::PartialIrrigation {
                failed, attempted, ..
            } => {
                assert_eq!(failed, vec!["IDS-1"]);
                assert_eq!(attempted, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn growroom_without_dosers_fails() {
        let (gw, _r) = gateway(RecordingSink::default());
        assert!(matches!(
            gw.irrigate_growroom("Room 2").await,
            Err(GatewayError::NoIrrigators(_))
        ));
    }

    #[tokio::test]
    async fn device_irrigation_by_name() {
        let (gw, _r) = gateway(RecordingSink::default());
        gw.irrigate_device(&DeviceRef::Name("Doser B".into()))
            .await
            .unwrap();
        assert_eq!(*gw.sink.attempts.lock().unwrap(), vec!["IDS-2"]);
    }

    #[tokio::test]
    async fn device_irrigation_on_climate_fails_without_publishing() {
        let (gw, _r) = gateway(RecordingSink::default());
        assert!(matches!(
            gw.irrigate_device(&DeviceRef::Serial("ICL-1".into())).await,
            Err(GatewayError::WrongKind { .. })
        ));
        assert!(gw.sink.attempts.lock().unwrap().is_empty());
    }

    // -- Telemetry handling -------------------------------------------------

    #[tokio::test]
    async fn handle_publish_records_reading() {
        let r = readings();
        let reg = registry();
        handle_publish("tele/ICL-1/light", br#"{"ts":1,"light":42.0}"#, &r, &reg)
            .await
            .unwrap();
        assert_eq!(r.read().await.fresh("ICL-1"), Some(42.0));
    }

    #[tokio::test]
    async fn handle_publish_rejects_bad_payload() {
        let r = readings();
        let reg = registry();
        let err = handle_publish("tele/ICL-1/light", b"not json", &r, &reg)
            .await
            .unwrap_err();
        assert!(err.contains("ICL-1"), "{err}");
        assert_eq!(r.read().await.fresh("ICL-1"), None);
    }

    #[tokio::test]
    async fn handle_publish_skips_unregistered_serial() {
        let r = readings();
        let reg = registry();
        handle_publish("tele/ROGUE-9/light", br#"{"ts":1,"light":42.0}"#, &r, &reg)
            .await
            .unwrap();
        assert_eq!(r.read().await.fresh("ROGUE-9"), None);
    }

    #[tokio::test]
    async fn handle_publish_ignores_other_topics() {
        let r = readings();
        let reg = registry();
        handle_publish("dose/IDS-1/irrigate", b"{}", &r, &reg)
            .await
            .unwrap();
    }
}
