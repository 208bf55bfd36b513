use std::sync::{Arc, RwLock};

use futures_util::StreamExt;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::transport::{Drone, LandedState, Position};

/// Most recent flight state, written by the subscriber tasks.
#[derive(Debug, Clone)]
struct Snapshot {
    position: Option<Position>,
    altitude_m: Option<f64>,
    in_air: bool,
    is_armed: bool,
    is_landed: bool,
}

impl Default for Snapshot {
    fn default() -> Snapshot {
        Snapshot {
            position: None,
            altitude_m: None,
            in_air: false,
            is_armed: false,
            is_landed: true,
        }
    }
}

/// Cache of the flight-controller telemetry streams. Cheap to clone;
/// readers see the most recent value of each field, with no atomicity
/// across fields.
#[derive(Clone)]
pub struct TelemetryCache {
    drone: Arc<dyn Drone>,
    snapshot: Arc<RwLock<Snapshot>>,
}

impl TelemetryCache {
    pub fn new(drone: Arc<dyn Drone>) -> TelemetryCache {
        TelemetryCache {
            drone,
            snapshot: Arc::new(RwLock::new(Snapshot::default())),
        }
    }

    pub fn position(&self) -> Option<Position> {
        self.snapshot.read().unwrap().position
    }

    pub fn altitude_m(&self) -> Option<f64> {
        self.snapshot.read().unwrap().altitude_m
    }

    pub fn is_armed(&self) -> bool {
        self.snapshot.read().unwrap().is_armed
    }

    pub fn in_air(&self) -> bool {
        self.snapshot.read().unwrap().in_air
    }

    pub fn is_landed(&self) -> bool {
        self.snapshot.read().unwrap().is_landed
    }

    /// Follow the position stream and keep the cache current. Requests a
    /// 10 Hz update rate where the transport supports it.
    pub async fn sub_position_updates(&self) {
        if let Err(e) = self.drone.set_rate_position(10.0).await {
            warn!("{e}");
        }
        let mut positions = self.drone.position();
        while let Some(position) = positions.next().await {
            let mut snapshot = self.snapshot.write().unwrap();
            snapshot.position = Some(position);
            snapshot.altitude_m = Some(position.relative_altitude_m);
        }
        warn!("position stream ended, serving last known values");
    }

    /// Poll armed, in-air and landed state at ~1 Hz and write the cache.
    pub async fn sub_state_updates(&self) {
        loop {
            let armed = self.drone.armed().next().await;
            let in_air = self.drone.in_air().next().await;
            let landed = self.drone.landed_state().next().await;
            {
                let mut snapshot = self.snapshot.write().unwrap();
                if let Some(armed) = armed {
                    snapshot.is_armed = armed;
                }
                if let Some(in_air) = in_air {
                    snapshot.in_air = in_air;
                }
                if let Some(landed) = landed {
                    snapshot.is_landed = landed == LandedState::OnGround;
                }
            }
            sleep(Duration::from_secs(1)).await;
        }
    }

    pub async fn wait_for_armed(&self, rate_hz: f64) {
        while !self.is_armed() {
            sleep(Duration::from_secs_f64(1.0 / rate_hz)).await;
        }
    }

    pub async fn wait_for_disarmed(&self, rate_hz: f64) {
        while self.is_armed() {
            sleep(Duration::from_secs_f64(1.0 / rate_hz)).await;
        }
    }

    pub async fn wait_for_in_air(&self, rate_hz: f64) {
        while !self.in_air() {
            sleep(Duration::from_secs_f64(1.0 / rate_hz)).await;
        }
    }

    pub async fn wait_for_landed(&self, rate_hz: f64) {
        while !self.is_landed() {
            sleep(Duration::from_secs_f64(1.0 / rate_hz)).await;
        }
    }

    /// One-shot dump of the flight state for diagnostics.
    pub async fn print_telem_status(&self) {
        if let Some(is_armed) = self.drone.armed().next().await {
            debug!("Armed state:\n\t{is_armed}");
        }
        if let Some(flight_mode) = self.drone.flight_mode().next().await {
            debug!("Flight mode:\n\t{flight_mode}");
        }
        if let Some(landed_state) = self.drone.landed_state().next().await {
            debug!("Landed state:\n\t{landed_state:?}");
        }
        if let Some(battery) = self.drone.battery().next().await {
            debug!("Battery:\n\t{battery:?}");
        }
        if let Some(gps_info) = self.drone.gps_info().next().await {
            debug!("GPS info:\n\t{gps_info:?}");
        }
        if let Some(health) = self.drone.health().next().await {
            debug!("Health:\n\t{health:?}");
        }
        if let Some(position) = self.drone.position().next().await {
            debug!("Position:\n\t{position:?}");
        }
    }
}
