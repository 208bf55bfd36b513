use std::sync::Arc;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use phraseology::parser::Parser;
use phraseology::vocabulary::Vocabulary;

use crate::command::Command;
use crate::mission::{shared_context, SharedMissionContext};
use crate::state::{Feedback, FlightState};
use crate::telemetry::TelemetryCache;
use crate::transport::{
    ActionError, ConnectionError, Drone, LandedState, SystemAddress,
};
use crate::voice::{Speaker, Voice};

const PREFLIGHT_TRIES: u32 = 5;
const TAKEOFF_ALTITUDE_M: f64 = 5.0;
const RTL_ALTITUDE_M: f64 = 20.0;

/// Conditions the supervisor answers with an emergency return to launch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Preflight check maximum tries exceeded")]
    PreflightExceeded,
    #[error("Received RTB command input")]
    ReturnToBase,
}

#[derive(Error, Debug)]
enum StartupError {
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Action(#[from] ActionError),
}

/// Top-level supervisor: startup handshake and preflight, then the input
/// reader, health monitor, telemetry subscribers and command executor run
/// concurrently until the input ends, a signal fires, or an emergency
/// return to launch brings the aircraft home.
pub struct Controller {
    drone: Arc<dyn Drone>,
    address: SystemAddress,
    telemetry: TelemetryCache,
    parser: Parser,
    state: FlightState,
    voice: Voice,
    mission: SharedMissionContext,
    cancel: CancellationToken,
    command_rx: Option<mpsc::UnboundedReceiver<Command>>,
    feedback_rx: mpsc::UnboundedReceiver<Feedback>,
    input_tx: mpsc::UnboundedSender<String>,
    input_rx: mpsc::UnboundedReceiver<String>,
}

impl Controller {
    pub fn new(
        drone: Arc<dyn Drone>,
        address: SystemAddress,
        call_sign: &str,
        vocab: Vocabulary,
        speaker: impl Speaker,
        restore: bool,
    ) -> Controller {
        let (queue_tx, command_rx) = mpsc::unbounded_channel();
        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let voice = Voice::new("manching tower", call_sign, speaker);
        let mut state =
            FlightState::new(queue_tx, feedback_tx, voice.clone());
        if restore {
            state.restore();
        }
        Controller {
            telemetry: TelemetryCache::new(drone.clone()),
            drone,
            address,
            parser: Parser::new(call_sign, vocab),
            state,
            voice,
            mission: shared_context(),
            cancel: CancellationToken::new(),
            command_rx: Some(command_rx),
            feedback_rx,
            input_tx,
            input_rx,
        }
    }

    /// Token shared with the signal handlers; cancelling it shuts the
    /// controller down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Where input lines are fed in; used by the stdin reader and by tests.
    pub fn input_handle(&self) -> mpsc::UnboundedSender<String> {
        self.input_tx.clone()
    }

    pub fn set_save_path(&mut self, path: std::path::PathBuf) {
        self.state.set_save_path(path);
    }

    /// Read stdin on a dedicated blocking thread, one command per line.
    pub fn spawn_stdin_reader(&self) {
        let tx = self.input_tx.clone();
        std::thread::spawn(move || {
            use std::io::BufRead;
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = line.unwrap_or_default();
                let stop = line.trim().is_empty();
                if tx.send(line).is_err() || stop {
                    break;
                }
            }
        });
    }

    /// Connect, await the link, pass the preflight checklist and set the
    /// mission parameters.
    async fn startup(&self) -> Result<(), StartupError> {
        self.drone.connect(&self.address).await?;
        info!("{} waiting for connection...", self.address);
        let mut connection = self.drone.connection_state();
        while let Some(connected) = connection.next().await {
            if connected {
                info!("Connected to {}", self.address);
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }
        info!("Running preflight checklist...");
        let mut tries = 0;
        loop {
            if tries == PREFLIGHT_TRIES {
                return Err(ControlError::PreflightExceeded.into());
            }
            if self.drone.health_all_ok().next().await == Some(true) {
                info!("Preflight checklist complete");
                break;
            }
            info!("Preflight check failed {tries}/{PREFLIGHT_TRIES}");
            if let Some(health) = self.drone.health().next().await {
                debug!("Health:\n\t{health:?}");
            }
            tries += 1;
            sleep(Duration::from_secs(5)).await;
        }
        info!("Setting mission params");
        self.drone.set_takeoff_altitude(TAKEOFF_ALTITUDE_M).await?;
        self.drone
            .set_return_to_launch_altitude(RTL_ALTITUDE_M)
            .await?;
        Ok(())
    }

    /// Run to completion. Shuts down cleanly when the input ends or the
    /// cancellation token fires; anything fatal flies the aircraft home
    /// first.
    pub async fn run(mut self) {
        info!("Initializing");
        if let Err(e) = self.startup().await {
            error!("{e}");
            self.fly_rtb().await;
            self.shutdown().await;
            return;
        }
        sleep(Duration::from_secs(1)).await;
        info!("Starting main routine");

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        let telemetry = self.telemetry.clone();
        let cancel = self.cancel.clone();
        tasks.push(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = telemetry.sub_position_updates() => {}
            }
        }));
        let telemetry = self.telemetry.clone();
        let cancel = self.cancel.clone();
        tasks.push(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = telemetry.sub_state_updates() => {}
            }
        }));
        tasks.push(tokio::spawn(monitor_health(
            self.drone.clone(),
            self.telemetry.clone(),
            self.cancel.clone(),
        )));
        if let Some(command_rx) = self.command_rx.take() {
            tasks.push(tokio::spawn(fly_commands(
                command_rx,
                self.drone.clone(),
                self.telemetry.clone(),
                self.mission.clone(),
                self.cancel.clone(),
            )));
        }

        if let Err(e) = self.monitor_atc().await {
            error!("{e}");
            self.cancel.cancel();
            self.fly_rtb().await;
        }
        self.shutdown().await;
        debug!("Cancelling {} outstanding tasks", tasks.len());
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Voice check-in, then feed input lines through the parser and the
    /// state machine, interleaved with the command feedback channel.
    async fn monitor_atc(&mut self) -> Result<(), ControlError> {
        self.voice.speak_full();
        sleep(Duration::from_secs(1)).await;
        self.voice.say("request IFR clearance");
        info!("Monitoring ATC");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                feedback = self.feedback_rx.recv() => {
                    if let Some(feedback) = feedback {
                        self.state.handle_feedback(feedback);
                    }
                }
                line = self.input_rx.recv() => {
                    let Some(line) = line else { return Ok(()) };
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        return Ok(());
                    }
                    if line == "rtb" {
                        return Err(ControlError::ReturnToBase);
                    }
                    let records = self.parser.handle_command(&line);
                    self.state.handle_commands(records);
                }
            }
        }
    }

    /// Emergency path: return to launch, await touchdown, disarm.
    async fn fly_rtb(&self) {
        info!("Attempt to land at nearest location");
        if let Err(e) = self.drone.return_to_launch().await {
            error!("{e}");
        }
        info!("Returning home");
        let mut landed = self.drone.landed_state();
        while let Some(state) = landed.next().await {
            if state == LandedState::OnGround {
                info!("Landed");
                break;
            }
        }
        sleep(Duration::from_secs(1)).await;
        info!("Disarming drone");
        if let Err(e) = self.drone.disarm().await {
            error!("{e}");
        }
    }

    async fn shutdown(&mut self) {
        self.cancel.cancel();
        self.state.save();
    }
}

async fn monitor_health(
    drone: Arc<dyn Drone>,
    telemetry: TelemetryCache,
    cancel: CancellationToken,
) {
    info!("Monitoring Health");
    let mut health_ok = drone.health_all_ok();
    let mut trigger_state = true;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            ok = health_ok.next() => match ok {
                Some(false) if trigger_state => {
                    warn!("Drone health issue encountered");
                    telemetry.print_telem_status().await;
                    trigger_state = false;
                }
                Some(true) => trigger_state = true,
                Some(false) => {}
                None => break,
            },
        }
    }
}

/// Dequeue commands and run each as an independent task; long-running
/// commands overlap unless a report command serializes them.
async fn fly_commands(
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    drone: Arc<dyn Drone>,
    telemetry: TelemetryCache,
    mission: SharedMissionContext,
    cancel: CancellationToken,
) {
    info!("Following ATC command queue");
    let mut running = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            command = command_rx.recv() => match command {
                Some(command) => {
                    debug!("Interpreting {command}");
                    running.spawn(command.execute(
                        drone.clone(),
                        telemetry.clone(),
                        mission.clone(),
                    ));
                }
                None => break,
            },
        }
    }
    running.abort_all();
    while running.join_next().await.is_some() {}
}
