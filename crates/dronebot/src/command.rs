use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, error, info, warn};

use phraseology::record::Fix;

use crate::geo;
use crate::mission::{MissionItem, MissionPlan, SharedMissionContext};
use crate::telemetry::TelemetryCache;
use crate::transport::Drone;

/// Displacement used to chase a commanded heading.
const HEADING_STEP_M: f64 = 5.0;

/// A follow-up awaited once a report condition is met.
pub type FollowUp = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Invoke one transport action, log the error kind it may fail with, and
/// pace the retry. Never re-raises.
pub async fn try_action<F, Fut, E>(action: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    if let Err(e) = action().await {
        error!("{e}");
    }
    sleep(Duration::from_millis(100)).await;
}

/// A typed effectful action against the drone, scheduled by the flight
/// state machine and executed as an independent task.
pub struct Command {
    created: Instant,
    kind: CommandKind,
}

pub enum CommandKind {
    EngineStart,
    EngineShutdown,
    Takeoff { altitude_m: Option<f64> },
    Altitude { altitude_m: f64 },
    Heading { heading_deg: i32 },
    Direct { target: Fix },
    Land { target: Option<Fix> },
    ReportPos { target: Fix, min_dist_m: f64, task: FollowUp },
    ReportAlt { altitude_m: f64, min_diff_m: f64, task: FollowUp },
    ReportTakeoff { task: FollowUp },
    ReportLanded { task: FollowUp },
    ReportStatus,
    Freestyle,
}

impl Command {
    fn new(kind: CommandKind) -> Command {
        Command {
            created: Instant::now(),
            kind,
        }
    }

    pub fn engine_start() -> Command {
        Command::new(CommandKind::EngineStart)
    }

    pub fn engine_shutdown() -> Command {
        Command::new(CommandKind::EngineShutdown)
    }

    pub fn takeoff(altitude_m: Option<f64>) -> Command {
        Command::new(CommandKind::Takeoff { altitude_m })
    }

    pub fn altitude(altitude_m: f64) -> Command {
        Command::new(CommandKind::Altitude { altitude_m })
    }

    pub fn heading(heading_deg: i32) -> Command {
        Command::new(CommandKind::Heading { heading_deg })
    }

    pub fn direct(target: Fix) -> Command {
        Command::new(CommandKind::Direct { target })
    }

    pub fn land(target: Option<Fix>) -> Command {
        Command::new(CommandKind::Land { target })
    }

    pub fn report_pos(target: Fix, task: FollowUp) -> Command {
        Command::new(CommandKind::ReportPos {
            target,
            min_dist_m: 2.0,
            task,
        })
    }

    pub fn report_alt(altitude_m: f64, task: FollowUp) -> Command {
        Command::new(CommandKind::ReportAlt {
            altitude_m,
            min_diff_m: 0.5,
            task,
        })
    }

    pub fn report_takeoff(task: FollowUp) -> Command {
        Command::new(CommandKind::ReportTakeoff { task })
    }

    pub fn report_landed(task: FollowUp) -> Command {
        Command::new(CommandKind::ReportLanded { task })
    }

    pub fn report_status() -> Command {
        Command::new(CommandKind::ReportStatus)
    }

    pub fn freestyle() -> Command {
        Command::new(CommandKind::Freestyle)
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    /// Run the command to completion against the drone handle, the
    /// telemetry cache and the shared mission context.
    pub async fn execute(
        self,
        drone: Arc<dyn Drone>,
        telemetry: TelemetryCache,
        context: SharedMissionContext,
    ) {
        debug!("Executing {self}");
        match self.kind {
            CommandKind::EngineStart => {
                info!("Engine start (arming)");
                try_action(|| drone.arm()).await;
            }
            CommandKind::EngineShutdown => {
                info!("Engine shutdown (disarming)");
                try_action(|| drone.disarm()).await;
            }
            CommandKind::Takeoff { altitude_m } => {
                if let Some(altitude_m) = altitude_m {
                    context.lock().await.target_altitude_m = altitude_m;
                    if let Err(e) =
                        drone.set_takeoff_altitude(altitude_m).await
                    {
                        error!("{e}");
                    }
                }
                while !telemetry.is_armed() {
                    try_action(|| drone.arm()).await;
                }
                telemetry.wait_for_armed(10.0).await;
                while !telemetry.in_air() {
                    try_action(|| drone.takeoff()).await;
                }
            }
            CommandKind::Altitude { altitude_m } => {
                info!("Change target altitude to {altitude_m}m");
                let plan = {
                    let mut context = context.lock().await;
                    context.target_altitude_m = altitude_m;
                    match &context.plan {
                        Some(previous) => MissionPlan::new(
                            previous
                                .items
                                .iter()
                                .map(|item| item.at_altitude(altitude_m))
                                .collect(),
                        ),
                        None => match telemetry.position() {
                            Some(pos) => {
                                MissionPlan::new(vec![MissionItem::waypoint(
                                    pos.latitude_deg,
                                    pos.longitude_deg,
                                    altitude_m,
                                )])
                            }
                            None => {
                                warn!("no position fix yet, holding");
                                return;
                            }
                        },
                    }
                };
                upload_and_start(&drone, &context, plan).await;
            }
            CommandKind::Heading { heading_deg } => {
                info!("Turning to {heading_deg}");
                let Some(pos) = telemetry.position() else {
                    warn!("no position fix yet, holding");
                    return;
                };
                let target_altitude_m =
                    context.lock().await.target_altitude_m;
                match geo::offset(
                    pos.latitude_deg,
                    pos.longitude_deg,
                    f64::from(heading_deg),
                    HEADING_STEP_M,
                ) {
                    Some((latitude_deg, longitude_deg)) => {
                        let plan =
                            MissionPlan::new(vec![MissionItem::waypoint(
                                latitude_deg,
                                longitude_deg,
                                target_altitude_m,
                            )]);
                        upload_and_start(&drone, &context, plan).await;
                    }
                    None => error!("current position does not project"),
                }
            }
            CommandKind::Direct { target } => {
                info!(
                    "Set enroute towards {}, {}",
                    target.latitude_deg, target.longitude_deg
                );
                let target_altitude_m =
                    context.lock().await.target_altitude_m;
                let plan = MissionPlan::new(vec![MissionItem::waypoint(
                    target.latitude_deg,
                    target.longitude_deg,
                    target_altitude_m,
                )]);
                upload_and_start(&drone, &context, plan).await;
            }
            CommandKind::Land { target } => {
                if let Some(target) = target {
                    info!(
                        "Inbound for landing at {}, {}",
                        target.latitude_deg, target.longitude_deg
                    );
                    let plan = MissionPlan::new(vec![
                        MissionItem::waypoint(
                            target.latitude_deg,
                            target.longitude_deg,
                            5.0,
                        ),
                        MissionItem::waypoint(
                            target.latitude_deg,
                            target.longitude_deg,
                            1.0,
                        ),
                    ]);
                    upload_and_start(&drone, &context, plan).await;
                    let _ = drone.mission_progress().next().await;
                    loop {
                        match drone.is_mission_finished().await {
                            Ok(true) => break,
                            Ok(false) => sleep(Duration::from_secs(1)).await,
                            Err(e) => {
                                error!("{e}");
                                break;
                            }
                        }
                    }
                    info!("Starting final descent");
                } else {
                    info!("Landing at current position");
                }
                sleep(Duration::from_secs(5)).await;
                try_action(|| drone.land()).await;
                if timeout(
                    Duration::from_secs(30),
                    telemetry.wait_for_landed(10.0),
                )
                .await
                .is_err()
                {
                    warn!("timed out waiting for the landed state");
                }
                try_action(|| drone.disarm()).await;
                if timeout(
                    Duration::from_secs(10),
                    telemetry.wait_for_disarmed(10.0),
                )
                .await
                .is_err()
                {
                    warn!("timed out waiting for disarm");
                }
            }
            CommandKind::ReportPos {
                target,
                min_dist_m,
                task,
            } => {
                debug!(
                    "waiting to reach {}, {}",
                    target.latitude_deg, target.longitude_deg
                );
                loop {
                    if let Some(pos) = telemetry.position() {
                        let dist = geo::distance_m(
                            pos.latitude_deg,
                            pos.longitude_deg,
                            target.latitude_deg,
                            target.longitude_deg,
                        );
                        debug!("{dist:.1}m to go");
                        if dist < min_dist_m {
                            break;
                        }
                    }
                    sleep(Duration::from_secs(1)).await;
                }
                task.await;
            }
            CommandKind::ReportAlt {
                altitude_m,
                min_diff_m,
                task,
            } => {
                debug!("waiting to reach {altitude_m}m");
                loop {
                    if let Some(current) = telemetry.altitude_m() {
                        if (altitude_m - current).abs() <= min_diff_m {
                            break;
                        }
                    }
                    sleep(Duration::from_secs(1)).await;
                }
                task.await;
            }
            CommandKind::ReportTakeoff { task } => {
                debug!("waiting for the takeoff state");
                telemetry.wait_for_in_air(10.0).await;
                task.await;
            }
            CommandKind::ReportLanded { task } => {
                debug!("waiting for the landed state");
                telemetry.wait_for_landed(1.0).await;
                task.await;
            }
            CommandKind::ReportStatus => {
                telemetry.print_telem_status().await;
            }
            CommandKind::Freestyle => {
                info!("Doing a trick");
            }
        }
    }
}

/// Replace the active mission: clear, upload, await one progress tick,
/// then start. Errors from mission start are swallowed via `try_action`.
async fn upload_and_start(
    drone: &Arc<dyn Drone>,
    context: &SharedMissionContext,
    plan: MissionPlan,
) {
    context.lock().await.plan = Some(plan.clone());
    if let Err(e) = drone.clear_mission().await {
        error!("{e}");
        return;
    }
    debug!("Mission:{plan}");
    if let Err(e) = drone.upload_mission(plan).await {
        error!("{e}");
        return;
    }
    if let Some(progress) = drone.mission_progress().next().await {
        debug!("mission progress {progress}");
    }
    try_action(|| drone.start_mission()).await;
    sleep(Duration::from_millis(100)).await;
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CommandKind::EngineStart => write!(f, "EngineStart command"),
            CommandKind::EngineShutdown => {
                write!(f, "EngineShutdown command")
            }
            CommandKind::Takeoff { altitude_m } => match altitude_m {
                Some(altitude_m) => {
                    write!(f, "Takeoff command ({altitude_m}m)")
                }
                None => write!(f, "Takeoff command"),
            },
            CommandKind::Altitude { altitude_m } => {
                write!(f, "Altitude command ({altitude_m}m)")
            }
            CommandKind::Heading { heading_deg } => {
                write!(f, "Heading command ({heading_deg})")
            }
            CommandKind::Direct { target } => write!(
                f,
                "Direct command ({}, {})",
                target.latitude_deg, target.longitude_deg
            ),
            CommandKind::Land { .. } => write!(f, "Land command"),
            CommandKind::ReportPos { .. } => {
                write!(f, "ReportPos command calling a follow-up")
            }
            CommandKind::ReportAlt { .. } => {
                write!(f, "ReportAlt command calling a follow-up")
            }
            CommandKind::ReportTakeoff { .. } => {
                write!(f, "ReportTakeoff command calling a follow-up")
            }
            CommandKind::ReportLanded { .. } => {
                write!(f, "ReportLanded command calling a follow-up")
            }
            CommandKind::ReportStatus => write!(f, "ReportStatus command"),
            CommandKind::Freestyle => write!(f, "Freestyle command"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mission::shared_context;
    use crate::transport::sim::SimDrone;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn try_action_swallows_the_error_kind() {
        let calls = AtomicUsize::new(0);
        try_action(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(crate::transport::ActionError::NoSystem) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn direct_uploads_the_named_position() {
        let sim = Arc::new(SimDrone::new());
        let drone: Arc<dyn Drone> = sim.clone();
        let telemetry = TelemetryCache::new(drone.clone());
        let context = shared_context();

        let target = Fix::new(48.688383, 11.525417, 377.0, 0.0);
        Command::direct(target)
            .execute(drone, telemetry, context.clone())
            .await;

        let plan = sim.uploaded_plan().unwrap();
        assert_eq!(plan.items.len(), 1);
        assert_relative_eq!(
            plan.items[0].latitude_deg,
            target.latitude_deg,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            plan.items[0].longitude_deg,
            target.longitude_deg,
            epsilon = 1e-9
        );
        let stored = context.lock().await.plan.clone().unwrap();
        assert_eq!(stored.items.len(), 1);
        assert_relative_eq!(
            stored.items[0].latitude_deg,
            target.latitude_deg,
            epsilon = 1e-9
        );
    }

    #[tokio::test(start_paused = true)]
    async fn altitude_rebuilds_the_previous_plan() {
        let sim = Arc::new(SimDrone::new());
        let drone: Arc<dyn Drone> = sim.clone();
        let telemetry = TelemetryCache::new(drone.clone());
        let context = shared_context();

        Command::direct(Fix::new(48.688383, 11.525417, 377.0, 0.0))
            .execute(drone.clone(), telemetry.clone(), context.clone())
            .await;
        Command::altitude(15.24)
            .execute(drone, telemetry, context.clone())
            .await;

        let plan = sim.uploaded_plan().unwrap();
        assert_eq!(plan.items.len(), 1);
        assert_relative_eq!(
            plan.items[0].relative_altitude_m,
            15.24,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            plan.items[0].latitude_deg,
            48.688383,
            epsilon = 1e-9
        );
        assert_eq!(context.lock().await.target_altitude_m, 15.24);
    }

    #[tokio::test(start_paused = true)]
    async fn report_alt_waits_for_the_band_before_the_follow_up() {
        let sim = Arc::new(SimDrone::new());
        let drone: Arc<dyn Drone> = sim.clone();
        let telemetry = TelemetryCache::new(drone.clone());
        let context = shared_context();

        let updater = telemetry.clone();
        tokio::spawn(async move { updater.sub_position_updates().await });
        let updater = telemetry.clone();
        tokio::spawn(async move { updater.sub_state_updates().await });

        let fired = Arc::new(AtomicUsize::new(0));
        let task = {
            let fired = fired.clone();
            Box::pin(async move {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };
        let report = tokio::spawn(Command::report_alt(5.0, task).execute(
            drone.clone(),
            telemetry.clone(),
            context,
        ));

        sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        sim.arm().await.unwrap();
        sim.set_takeoff_altitude(5.0).await.unwrap();
        sim.takeoff().await.unwrap();
        sleep(Duration::from_secs(20)).await;
        report.await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
