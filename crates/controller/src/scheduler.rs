//! Control loop: samples light on one interval, reports status on another,
//! and forces irrigation when the engine says the light budget is spent.
//!
//! Both schedules are served by one loop in deadline order, so sampling and
//! status ticks run one at a time against an engine the loop owns outright.
//!
//! ```text
//! sample tick ──▶ read light (source) ──▶ engine ──[trigger]──▶ irrigate (target)
//! status tick ──▶ engine snapshot ──▶ log + shared state
//! ```

use std::time::Duration;

use tokio::time::{sleep_until, timeout, Instant};
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::endpoint::Endpoint;
use crate::engine::{Engine, EngineSettings, SampleOutcome};
use crate::gateway::{Gateway, GatewayError};
use crate::state::SharedState;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub engine: EngineSettings,
    pub source: Endpoint,
    pub target: Endpoint,
    pub status_interval: Duration,
    pub gateway_timeout: Duration,
}

pub struct Controller<G, C> {
    gateway: G,
    clock: C,
    engine: Engine,
    source: Endpoint,
    target: Endpoint,
    sample_interval: Duration,
    status_interval: Duration,
    gateway_timeout: Duration,
    shared: SharedState,
}

/// Periodic deadline. A tick that runs past its successor's deadline pushes
/// the schedule back instead of bunching the missed ticks.
#[derive(Debug, Clone, Copy)]
struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    fn first_after(start: Instant, period: Duration) -> Self {
        Self {
            period,
            next: start + period,
        }
    }

    fn advance(&mut self, now: Instant) {
        self.next += self.period;
        if self.next <= now {
            self.next = now + self.period;
        }
    }
}

impl<G: Gateway, C: Clock> Controller<G, C> {
    pub fn new(settings: ControllerSettings, gateway: G, clock: C, shared: SharedState) -> Self {
        let today = clock.now().day();
        Self {
            engine: Engine::new(settings.engine, today),
            sample_interval: Duration::from_secs(settings.engine.sample_interval_sec),
            status_interval: settings.status_interval,
            gateway_timeout: settings.gateway_timeout,
            source: settings.source,
            target: settings.target,
            gateway,
            clock,
            shared,
        }
    }

    /// Run forever. Intended to be the last thing main awaits.
    pub async fn run(mut self) {
        let start = Instant::now();
        let mut sampling = Ticker::first_after(start, self.sample_interval);
        let mut status = Ticker::first_after(start, self.status_interval);

        info!(
            source = %self.source,
            irrigation_target = %self.target,
            sample_sec = self.sample_interval.as_secs(),
            status_sec = self.status_interval.as_secs(),
            "control loop started"
        );

        loop {
            // Earliest deadline runs first. On a tie the sample goes first so
            // the snapshot reflects it.
            if sampling.next <= status.next {
                sleep_until(sampling.next).await;
                self.sample_tick().await;
                sampling.advance(Instant::now());
            } else {
                sleep_until(status.next).await;
                self.status_tick().await;
                status.advance(Instant::now());
            }
        }
    }

    pub async fn sample_tick(&mut self) {
        let light = match self.read_light().await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(source = %self.source, "light reading is not valid: {e}");
                let detail = format!("light reading from {} is not valid: {e}", self.source);
                self.shared.write().await.record_invalid_sample(detail);
                None
            }
        };

        let now = self.clock.now();
        let SampleOutcome::Applied { rollover, trigger } = self.engine.on_sample(light, now) else {
            return;
        };

        if let Some(r) = rollover {
            let what = if r.energy_cleared {
                "accumulation cleared"
            } else {
                "irrigation count reset"
            };
            let detail = format!(
                "day {} -> {}: midnight detected, {what}",
                r.previous_day, r.day
            );
            info!(
                previous_day = r.previous_day,
                day = r.day,
                energy_cleared = r.energy_cleared,
                "midnight detected"
            );
            self.shared.write().await.record_midnight(detail);
        }

        let Some(t) = trigger else {
            return;
        };

        let ts = t.timestamp();
        info!(
            accumulated = format!("{:.4}", t.accumulated),
            count = t.count,
            at = %ts,
            irrigation_target = %self.target,
            "accumulated light level reached, irrigation started"
        );
        self.shared.write().await.record_irrigation(
            t.count,
            format!(
                "accumulated light level of {:.4} MJ/m2 reached, irrigation {} started at {ts}",
                t.accumulated, t.count
            ),
        );

        // The energy is already spent; a failed command is reported, not refunded.
        if let Err(e) = self.irrigate().await {
            error!(irrigation_target = %self.target, "irrigation failed: {e}");
            self.shared
                .write()
                .await
                .record_gateway_error(format!("irrigation on {} failed: {e}", self.target));
        }
    }

    pub async fn status_tick(&mut self) {
        let snap = self.engine.snapshot();
        info!(
            light = format!("{:.2}", snap.light),
            accumulated = format!("{:.4}", snap.accumulated),
            trigger_level = format!("{:.4}", snap.trigger_level),
            irrigations_today = self.engine.state().irrigation_count,
            "status"
        );
        self.shared.write().await.record_snapshot(snap);
    }

    async fn read_light(&self) -> Result<f64, GatewayError> {
        let call = async {
            match &self.source {
                Endpoint::Growroom(g) => self.gateway.read_growroom_light(g).await,
                Endpoint::Device(d) => self.gateway.read_device_light(d).await,
            }
        };
        timeout(self.gateway_timeout, call)
            .await
            .map_err(|_| GatewayError::Timeout(self.gateway_timeout))?
    }

    async fn irrigate(&self) -> Result<(), GatewayError> {
        match &self.target {
            // Bounded per member by the gateway; one overall deadline would
            // drop the members not yet attempted.
            Endpoint::Growroom(g) => self.gateway.irrigate_growroom(g).await,
            Endpoint::Device(d) => timeout(self.gateway_timeout, self.gateway.irrigate_device(d))
                .await
                .map_err(|_| GatewayError::Timeout(self.gateway_timeout))?,
        }
    }

    #[cfg(test)]
    fn engine(&self) -> &Engine {
        &self.engine
    }
}

// ===========================================================================
// Tests
// ===========================================================================
