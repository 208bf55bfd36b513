//! Loopback flight stack: a kinematic simulator behind the [`Drone`]
//! trait, enough to fly the whole command pipeline without hardware.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

use super::{
    ActionError, Battery, ConnectionError, Drone, FlightMode, GpsFix,
    GpsInfo, Health, LandedState, MissionError, Position, SystemAddress,
    TelemetryError,
};
use crate::geo;
use crate::mission::{MissionPlan, MissionProgress};

const TICK: Duration = Duration::from_millis(100);
const VERTICAL_M_S: f64 = 1.0;

pub struct SimDrone {
    inner: Arc<SimInner>,
}

struct SimInner {
    connected: watch::Sender<bool>,
    armed: watch::Sender<bool>,
    in_air: watch::Sender<bool>,
    landed: watch::Sender<LandedState>,
    position: watch::Sender<Position>,
    flight_mode: watch::Sender<FlightMode>,
    battery: watch::Sender<Battery>,
    gps: watch::Sender<GpsInfo>,
    health: watch::Sender<Health>,
    health_ok: watch::Sender<bool>,
    progress: watch::Sender<MissionProgress>,
    plan: Mutex<Option<MissionPlan>>,
    takeoff_altitude_m: Mutex<f64>,
    rtl_altitude_m: Mutex<f64>,
    motion: Mutex<Option<JoinHandle<()>>>,
    home: Position,
}

fn stream_of<T>(tx: &watch::Sender<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + Sync + 'static,
{
    tokio_stream::wrappers::WatchStream::new(tx.subscribe()).boxed()
}

impl Default for SimDrone {
    fn default() -> SimDrone {
        SimDrone::new()
    }
}

impl SimDrone {
    pub fn new() -> SimDrone {
        SimDrone::with_home(Position {
            latitude_deg: 48.688433,
            longitude_deg: 11.525667,
            absolute_altitude_m: 377.0,
            relative_altitude_m: 0.0,
        })
    }

    pub fn with_home(home: Position) -> SimDrone {
        let health = Health::nominal();
        SimDrone {
            inner: Arc::new(SimInner {
                connected: watch::Sender::new(false),
                armed: watch::Sender::new(false),
                in_air: watch::Sender::new(false),
                landed: watch::Sender::new(LandedState::OnGround),
                position: watch::Sender::new(home),
                flight_mode: watch::Sender::new(FlightMode::Ready),
                battery: watch::Sender::new(Battery {
                    voltage_v: 12.6,
                    remaining_percent: 100.0,
                }),
                gps: watch::Sender::new(GpsInfo {
                    num_satellites: 14,
                    fix_type: GpsFix::Fix3D,
                }),
                health: watch::Sender::new(health),
                health_ok: watch::Sender::new(health.all_ok()),
                progress: watch::Sender::new(MissionProgress::default()),
                plan: Mutex::new(None),
                takeoff_altitude_m: Mutex::new(2.5),
                rtl_altitude_m: Mutex::new(15.0),
                motion: Mutex::new(None),
                home,
            }),
        }
    }

    pub fn is_armed(&self) -> bool {
        *self.inner.armed.borrow()
    }

    pub fn is_in_air(&self) -> bool {
        *self.inner.in_air.borrow()
    }

    pub fn current_position(&self) -> Position {
        *self.inner.position.borrow()
    }

    pub fn uploaded_plan(&self) -> Option<MissionPlan> {
        self.inner.plan.lock().unwrap().clone()
    }

    /// Override the reported sensor health, e.g. to fail a preflight check.
    pub fn set_health(&self, health: Health) {
        self.inner.health.send_replace(health);
        self.inner.health_ok.send_replace(health.all_ok());
    }
}

impl SimInner {
    fn set_motion(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.motion.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    /// One 100 ms kinematic tick towards the target; true on arrival.
    fn step_towards(
        &self,
        latitude_deg: f64,
        longitude_deg: f64,
        altitude_m: f64,
        speed_m_s: f64,
    ) -> bool {
        let mut pos = *self.position.borrow();
        let dist = geo::distance_m(
            pos.latitude_deg,
            pos.longitude_deg,
            latitude_deg,
            longitude_deg,
        );
        let step = speed_m_s * TICK.as_secs_f64();
        let arrived_horizontally = dist <= step;
        if arrived_horizontally {
            pos.latitude_deg = latitude_deg;
            pos.longitude_deg = longitude_deg;
        } else {
            let fraction = step / dist;
            pos.latitude_deg += (latitude_deg - pos.latitude_deg) * fraction;
            pos.longitude_deg +=
                (longitude_deg - pos.longitude_deg) * fraction;
        }
        let climb = altitude_m - pos.relative_altitude_m;
        let vertical_step = VERTICAL_M_S * TICK.as_secs_f64();
        let arrived_vertically = climb.abs() <= vertical_step;
        if arrived_vertically {
            pos.relative_altitude_m = altitude_m;
        } else {
            pos.relative_altitude_m += vertical_step * climb.signum();
        }
        pos.absolute_altitude_m =
            self.home.absolute_altitude_m + pos.relative_altitude_m;
        self.position.send_replace(pos);
        arrived_horizontally && arrived_vertically
    }

    async fn fly_to(
        &self,
        latitude_deg: f64,
        longitude_deg: f64,
        altitude_m: f64,
        speed_m_s: f64,
    ) {
        while !self.step_towards(
            latitude_deg,
            longitude_deg,
            altitude_m,
            speed_m_s,
        ) {
            sleep(TICK).await;
        }
    }
}

#[async_trait]
impl Drone for SimDrone {
    async fn connect(
        &self,
        address: &SystemAddress,
    ) -> Result<(), ConnectionError> {
        info!("simulated flight stack standing in for {address}");
        self.inner.connected.send_replace(true);
        Ok(())
    }

    fn connection_state(&self) -> BoxStream<'static, bool> {
        stream_of(&self.inner.connected)
    }

    fn health(&self) -> BoxStream<'static, Health> {
        stream_of(&self.inner.health)
    }

    fn health_all_ok(&self) -> BoxStream<'static, bool> {
        stream_of(&self.inner.health_ok)
    }

    fn armed(&self) -> BoxStream<'static, bool> {
        stream_of(&self.inner.armed)
    }

    fn in_air(&self) -> BoxStream<'static, bool> {
        stream_of(&self.inner.in_air)
    }

    fn landed_state(&self) -> BoxStream<'static, LandedState> {
        stream_of(&self.inner.landed)
    }

    fn position(&self) -> BoxStream<'static, Position> {
        stream_of(&self.inner.position)
    }

    fn flight_mode(&self) -> BoxStream<'static, FlightMode> {
        stream_of(&self.inner.flight_mode)
    }

    fn battery(&self) -> BoxStream<'static, Battery> {
        stream_of(&self.inner.battery)
    }

    fn gps_info(&self) -> BoxStream<'static, GpsInfo> {
        stream_of(&self.inner.gps)
    }

    async fn set_rate_position(
        &self,
        rate_hz: f64,
    ) -> Result<(), TelemetryError> {
        debug!("position stream rate set to {rate_hz} Hz");
        Ok(())
    }

    async fn arm(&self) -> Result<(), ActionError> {
        if *self.inner.armed.borrow() {
            return Err(ActionError::CommandDenied("already armed".into()));
        }
        self.inner.armed.send_replace(true);
        Ok(())
    }

    async fn disarm(&self) -> Result<(), ActionError> {
        if *self.inner.in_air.borrow() {
            return Err(ActionError::CommandDenied(
                "disarm denied while in air".into(),
            ));
        }
        self.inner.armed.send_replace(false);
        self.inner.flight_mode.send_replace(FlightMode::Ready);
        Ok(())
    }

    async fn takeoff(&self) -> Result<(), ActionError> {
        if !*self.inner.armed.borrow() {
            return Err(ActionError::CommandDenied("not armed".into()));
        }
        if *self.inner.in_air.borrow() {
            return Err(ActionError::CommandDenied("already in air".into()));
        }
        let altitude_m = *self.inner.takeoff_altitude_m.lock().unwrap();
        let inner = self.inner.clone();
        inner.in_air.send_replace(true);
        inner.landed.send_replace(LandedState::TakingOff);
        inner.flight_mode.send_replace(FlightMode::Takeoff);
        let handle = tokio::spawn({
            let inner = inner.clone();
            async move {
                let pos = *inner.position.borrow();
                inner
                    .fly_to(
                        pos.latitude_deg,
                        pos.longitude_deg,
                        altitude_m,
                        0.0,
                    )
                    .await;
                inner.landed.send_replace(LandedState::InAir);
                inner.flight_mode.send_replace(FlightMode::Hold);
            }
        });
        self.inner.set_motion(handle);
        Ok(())
    }

    async fn land(&self) -> Result<(), ActionError> {
        if !*self.inner.in_air.borrow() {
            return Err(ActionError::CommandDenied("not in air".into()));
        }
        let inner = self.inner.clone();
        inner.flight_mode.send_replace(FlightMode::Land);
        inner.landed.send_replace(LandedState::Landing);
        let handle = tokio::spawn({
            let inner = inner.clone();
            async move {
                let pos = *inner.position.borrow();
                inner
                    .fly_to(pos.latitude_deg, pos.longitude_deg, 0.0, 0.0)
                    .await;
                inner.in_air.send_replace(false);
                inner.landed.send_replace(LandedState::OnGround);
            }
        });
        self.inner.set_motion(handle);
        Ok(())
    }

    async fn return_to_launch(&self) -> Result<(), ActionError> {
        if !*self.inner.in_air.borrow() {
            return Err(ActionError::CommandDenied("not in air".into()));
        }
        let rtl_altitude_m = *self.inner.rtl_altitude_m.lock().unwrap();
        let inner = self.inner.clone();
        inner.flight_mode.send_replace(FlightMode::ReturnToLaunch);
        let handle = tokio::spawn({
            let inner = inner.clone();
            async move {
                let home = inner.home;
                inner
                    .fly_to(
                        home.latitude_deg,
                        home.longitude_deg,
                        rtl_altitude_m,
                        5.0,
                    )
                    .await;
                inner.landed.send_replace(LandedState::Landing);
                inner
                    .fly_to(home.latitude_deg, home.longitude_deg, 0.0, 0.0)
                    .await;
                inner.in_air.send_replace(false);
                inner.landed.send_replace(LandedState::OnGround);
            }
        });
        self.inner.set_motion(handle);
        Ok(())
    }

    async fn set_takeoff_altitude(
        &self,
        altitude_m: f64,
    ) -> Result<(), ActionError> {
        *self.inner.takeoff_altitude_m.lock().unwrap() = altitude_m;
        Ok(())
    }

    async fn set_return_to_launch_altitude(
        &self,
        altitude_m: f64,
    ) -> Result<(), ActionError> {
        *self.inner.rtl_altitude_m.lock().unwrap() = altitude_m;
        Ok(())
    }

    async fn clear_mission(&self) -> Result<(), MissionError> {
        *self.inner.plan.lock().unwrap() = None;
        self.inner.progress.send_replace(MissionProgress::default());
        Ok(())
    }

    async fn upload_mission(
        &self,
        plan: MissionPlan,
    ) -> Result<(), MissionError> {
        self.inner.progress.send_replace(MissionProgress {
            current: 0,
            total: plan.items.len() as i32,
        });
        *self.inner.plan.lock().unwrap() = Some(plan);
        Ok(())
    }

    async fn start_mission(&self) -> Result<(), MissionError> {
        let plan = self
            .inner
            .plan
            .lock()
            .unwrap()
            .clone()
            .ok_or(MissionError::NoMission)?;
        let total = plan.items.len() as i32;
        let inner = self.inner.clone();
        inner.flight_mode.send_replace(FlightMode::Mission);
        let handle = tokio::spawn(async move {
            for (index, item) in plan.items.iter().enumerate() {
                inner
                    .fly_to(
                        item.latitude_deg,
                        item.longitude_deg,
                        item.relative_altitude_m,
                        item.speed_m_s.max(1.0),
                    )
                    .await;
                inner.progress.send_replace(MissionProgress {
                    current: index as i32 + 1,
                    total,
                });
            }
            inner.flight_mode.send_replace(FlightMode::Hold);
        });
        self.inner.set_motion(handle);
        Ok(())
    }

    async fn is_mission_finished(&self) -> Result<bool, MissionError> {
        Ok(self.inner.progress.borrow().is_finished())
    }

    fn mission_progress(&self) -> BoxStream<'static, MissionProgress> {
        stream_of(&self.inner.progress)
    }
}
