use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, warn};

use phraseology::record::{
    Argument, Clearance, ClearanceKind, CommandRecord, Condition, Fix, Mode,
};

use crate::command::{Command, FollowUp};
use crate::voice::Voice;

/// Where the last flight phase is persisted between runs.
pub const SAVE_PATH: &str = "saves/flight_state.p";

/// Altitude at which a gated climb is reported and released.
pub const CLIMB_REPORT_ALT_M: f64 = 4.6;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Parked,
    Depart,
    Flight,
    Inbound,
    Landing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Parked => "parked",
            Phase::Depart => "depart",
            Phase::Flight => "flight",
            Phase::Inbound => "inbound",
            Phase::Landing => "landing",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parked" => Ok(Phase::Parked),
            "depart" => Ok(Phase::Depart),
            "flight" => Ok(Phase::Flight),
            "inbound" => Ok(Phase::Inbound),
            "landing" => Ok(Phase::Landing),
            other => Err(format!("'{other}' is not a flight phase")),
        }
    }
}

/// An illegal transition: the event has no row for the current phase.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot process '{event}' in phase '{phase}'")]
pub struct MachineError {
    pub event: String,
    pub phase: Phase,
}

#[derive(Debug, Clone)]
pub enum Event {
    ReceiveClearance(Clearance),
    Park,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::ReceiveClearance(clearance) => {
                write!(f, "receive_clearance({})", clearance.kind)
            }
            Event::Park => write!(f, "park"),
        }
    }
}

/// Messages sent back into the machine by spawned follow-up tasks.
#[derive(Debug)]
pub enum Feedback {
    /// A record whose condition has been met; apply it now.
    Deferred(CommandRecord),
    Park,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Clearance,
    Park,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Callback {
    Startup,
    Takeoff,
    Inbound,
    Landing,
    Shutdown,
}

struct Row {
    trigger: Trigger,
    from: Phase,
    to: Phase,
    /// Extra guard: only a `land` clearance received in flight.
    direct_approach: bool,
    callback: Callback,
}

/// The transition table; rows are tried in order, first match wins.
const TRANSITIONS: &[Row] = &[
    Row {
        trigger: Trigger::Clearance,
        from: Phase::Parked,
        to: Phase::Depart,
        direct_approach: false,
        callback: Callback::Startup,
    },
    Row {
        trigger: Trigger::Clearance,
        from: Phase::Depart,
        to: Phase::Flight,
        direct_approach: false,
        callback: Callback::Takeoff,
    },
    Row {
        trigger: Trigger::Clearance,
        from: Phase::Flight,
        to: Phase::Inbound,
        direct_approach: true,
        callback: Callback::Inbound,
    },
    Row {
        trigger: Trigger::Clearance,
        from: Phase::Flight,
        to: Phase::Landing,
        direct_approach: false,
        callback: Callback::Landing,
    },
    Row {
        trigger: Trigger::Clearance,
        from: Phase::Inbound,
        to: Phase::Landing,
        direct_approach: false,
        callback: Callback::Landing,
    },
    Row {
        trigger: Trigger::Park,
        from: Phase::Landing,
        to: Phase::Parked,
        direct_approach: false,
        callback: Callback::Shutdown,
    },
];

/// The condition a pass of `handle_commands` gates scheduled records on.
#[derive(Debug, Clone, Copy, PartialEq)]
enum PendingCondition {
    Route,
    Position(Fix),
    Altitude(f64),
}

/// Consumes parsed command records, validates clearances against the
/// current flight phase and enqueues the command objects. Events are
/// processed one at a time; an event fired from a callback runs after the
/// current one returns.
pub struct FlightState {
    phase: Phase,
    queue: UnboundedSender<Command>,
    feedback: UnboundedSender<Feedback>,
    voice: Voice,
    pending: VecDeque<Event>,
    draining: bool,
    save_path: PathBuf,
}

impl FlightState {
    pub fn new(
        queue: UnboundedSender<Command>,
        feedback: UnboundedSender<Feedback>,
        voice: Voice,
    ) -> FlightState {
        FlightState {
            phase: Phase::Parked,
            queue,
            feedback,
            voice,
            pending: VecDeque::new(),
            draining: false,
            save_path: PathBuf::from(SAVE_PATH),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_save_path(&mut self, path: PathBuf) {
        self.save_path = path;
    }

    /// Restore the persisted phase; stays parked when there is none.
    pub fn restore(&mut self) {
        debug!("Loading flight state");
        self.phase = load_phase(&self.save_path);
    }

    pub fn save(&self) {
        debug!("Saving flight state");
        if let Err(e) = save_phase(&self.save_path, self.phase) {
            warn!("cannot persist the flight phase: {e}");
        }
    }

    fn allowed_clearances(phase: Phase) -> &'static [ClearanceKind] {
        match phase {
            Phase::Parked => &[ClearanceKind::Route],
            Phase::Depart => &[ClearanceKind::Takeoff],
            Phase::Flight => &[ClearanceKind::Ils, ClearanceKind::Land],
            Phase::Inbound => &[ClearanceKind::Land],
            Phase::Landing => &[],
        }
    }

    fn clearance_valid(&self, clearance: &Clearance) -> bool {
        Self::allowed_clearances(self.phase).contains(&clearance.kind)
    }

    fn direct_approach(&self, clearance: &Clearance) -> bool {
        clearance.kind == ClearanceKind::Land && self.phase == Phase::Flight
    }

    pub fn receive_clearance(
        &mut self,
        clearance: Clearance,
    ) -> Result<(), MachineError> {
        self.fire(Event::ReceiveClearance(clearance))
    }

    pub fn park(&mut self) -> Result<(), MachineError> {
        self.fire(Event::Park)
    }

    /// Queued event processing: events fired from callbacks are appended
    /// and handled strictly after the current one.
    fn fire(&mut self, event: Event) -> Result<(), MachineError> {
        self.pending.push_back(event);
        if self.draining {
            return Ok(());
        }
        self.draining = true;
        let mut first = Ok(());
        while let Some(event) = self.pending.pop_front() {
            let result = self.step(event);
            if let Err(e) = result {
                if first.is_ok() {
                    first = Err(e);
                } else {
                    error!("{e}");
                }
            }
        }
        self.draining = false;
        first
    }

    fn step(&mut self, event: Event) -> Result<(), MachineError> {
        let row = TRANSITIONS
            .iter()
            .find(|row| self.row_matches(row, &event))
            .ok_or_else(|| MachineError {
                event: event.to_string(),
                phase: self.phase,
            })?;
        debug!("Transition <{}> -> <{}>", row.from, row.to);
        self.phase = row.to;
        self.run_callback(row.callback, &event);
        Ok(())
    }

    fn row_matches(&self, row: &Row, event: &Event) -> bool {
        if row.from != self.phase {
            return false;
        }
        match event {
            Event::ReceiveClearance(clearance) => {
                row.trigger == Trigger::Clearance
                    && self.clearance_valid(clearance)
                    && (!row.direct_approach
                        || self.direct_approach(clearance))
            }
            Event::Park => row.trigger == Trigger::Park,
        }
    }

    fn run_callback(&mut self, callback: Callback, event: &Event) {
        let clearance = match event {
            Event::ReceiveClearance(clearance) => Some(clearance),
            Event::Park => None,
        };
        match callback {
            Callback::Startup => {
                self.enqueue(Command::engine_start());
            }
            Callback::Takeoff => {
                self.enqueue(Command::takeoff(None));
            }
            Callback::Inbound => {
                let Some(clearance) = clearance else { return };
                let Some(fix) = clearance.position else {
                    warn!("approach clearance without a known fix");
                    return;
                };
                self.enqueue(Command::direct(fix));
                let description =
                    clearance.description.clone().unwrap_or_default();
                let task = speak_task(
                    self.voice.clone(),
                    format!("Inbound {description}"),
                );
                self.enqueue(Command::report_pos(fix, task));
            }
            Callback::Landing => {
                let target = clearance.and_then(|c| c.position);
                self.enqueue(Command::land(target));
                let task = park_task(self.feedback.clone());
                self.enqueue(Command::report_landed(task));
            }
            Callback::Shutdown => {
                self.voice.stage("request engine shutdown");
            }
        }
    }

    /// Main entry from the controller: two passes over the records of one
    /// input line. Pass 1 collects the gating condition and applies the
    /// immediate records; pass 2 wraps the gated records in report
    /// commands. The staged readback is flushed at the end.
    pub fn handle_commands(&mut self, records: Vec<Option<CommandRecord>>) {
        let mut condition: Option<PendingCondition> = None;
        let mut scheduled: Vec<CommandRecord> = Vec::new();

        for record in records {
            let Some(record) = record else {
                if self.phase == Phase::Parked {
                    self.voice.stage("request IFR clearance");
                } else {
                    self.voice.stage("say again");
                }
                continue;
            };
            if record.mode == Mode::Condition {
                if let Some(Argument::Condition(gate)) = &record.arg {
                    condition = Some(match gate {
                        Condition::Position(fix) => {
                            PendingCondition::Position(*fix)
                        }
                        Condition::Altitude(altitude_m) => {
                            PendingCondition::Altitude(*altitude_m)
                        }
                    });
                }
                self.voice.stage(record.phrase);
                continue;
            }
            if record.mode == Mode::Altitude
                && condition == Some(PendingCondition::Route)
            {
                // a route clearance gates the initial climb on itself
                if let Some(Argument::Altitude(altitude_m)) = &record.arg {
                    condition =
                        Some(PendingCondition::Altitude(*altitude_m));
                }
                scheduled.push(record);
                continue;
            }
            let routes = matches!(
                &record.arg,
                Some(Argument::Clearance(clearance))
                    if clearance.kind == ClearanceKind::Route
            );
            if record.mode == Mode::Clearance && routes {
                condition = Some(PendingCondition::Route);
                self.update(record);
                continue;
            }
            match condition {
                Some(PendingCondition::Position(_))
                | Some(PendingCondition::Altitude(_)) => {
                    scheduled.push(record);
                }
                _ => self.update(record),
            }
        }

        match condition {
            Some(PendingCondition::Position(fix)) => {
                for record in scheduled {
                    self.voice.stage(record.phrase.clone());
                    let task =
                        deferred_task(self.feedback.clone(), record);
                    self.enqueue(Command::report_pos(fix, task));
                }
            }
            Some(PendingCondition::Altitude(altitude_m)) => {
                if !scheduled.is_empty() {
                    self.enqueue(Command::altitude(altitude_m));
                }
                for record in scheduled {
                    let respond = speak_task(
                        self.voice.clone(),
                        record.phrase.clone(),
                    );
                    self.enqueue(Command::report_alt(
                        CLIMB_REPORT_ALT_M,
                        respond,
                    ));
                    let climb =
                        deferred_task(self.feedback.clone(), record);
                    self.enqueue(Command::report_alt(
                        CLIMB_REPORT_ALT_M,
                        climb,
                    ));
                }
            }
            _ => {}
        }

        self.voice.speak();
    }

    /// Dispatch one record by mode.
    pub fn update(&mut self, record: CommandRecord) {
        debug!("State: <{}>", self.phase);
        match (record.mode, record.arg) {
            (Mode::Altitude, Some(Argument::Altitude(altitude_m))) => {
                self.enqueue(Command::altitude(altitude_m));
                self.voice.stage(record.phrase);
            }
            (Mode::Heading, Some(Argument::Heading(heading_deg))) => {
                self.enqueue(Command::heading(heading_deg));
                self.voice.stage(record.phrase);
            }
            (Mode::Position, Some(Argument::Position(fix))) => {
                self.enqueue(Command::direct(fix));
                self.voice.stage(record.phrase);
            }
            (Mode::Report, Some(Argument::Report(label))) => {
                if label == "departure" && self.phase == Phase::Depart {
                    self.voice.stage("ready for departure");
                }
            }
            (Mode::Contact, Some(Argument::Contact(station))) => {
                self.voice.set_atc(&station);
                self.voice.stage(record.phrase);
            }
            (Mode::Clearance, Some(Argument::Clearance(clearance))) => {
                if clearance.kind == ClearanceKind::Shutdown {
                    self.enqueue(Command::engine_shutdown());
                } else if self.clearance_valid(&clearance) {
                    match self.receive_clearance(clearance) {
                        Ok(()) => self.voice.stage(record.phrase),
                        Err(e) => {
                            error!("{e}");
                            self.voice.stage("Unable");
                        }
                    }
                } else {
                    self.voice.stage("Unable");
                }
            }
            (Mode::Status, _) => {
                self.enqueue(Command::report_status());
            }
            (Mode::Special, _) => {
                self.enqueue(Command::freestyle());
            }
            (mode, arg) => {
                debug!("nothing to do for a {mode} record ({arg:?})");
            }
        }
    }

    /// Deferred work coming back from spawned report commands.
    pub fn handle_feedback(&mut self, feedback: Feedback) {
        match feedback {
            Feedback::Deferred(record) => {
                self.update(record);
                self.voice.speak();
            }
            Feedback::Park => {
                if let Err(e) = self.park() {
                    error!("{e}");
                }
                self.voice.speak();
            }
        }
    }

    fn enqueue(&self, command: Command) {
        if self.queue.send(command).is_err() {
            warn!("command queue is closed");
        }
    }
}

fn speak_task(voice: Voice, phrase: String) -> FollowUp {
    Box::pin(async move {
        voice.say(&phrase);
    })
}

fn deferred_task(
    feedback: UnboundedSender<Feedback>,
    record: CommandRecord,
) -> FollowUp {
    Box::pin(async move {
        let _ = feedback.send(Feedback::Deferred(record));
    })
}

fn park_task(feedback: UnboundedSender<Feedback>) -> FollowUp {
    Box::pin(async move {
        let _ = feedback.send(Feedback::Park);
    })
}

pub fn save_phase(path: &Path, phase: Phase) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{phase}\n"))
}

/// Read the persisted phase; any failure falls back to parked.
pub fn load_phase(path: &Path) -> Phase {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents.trim().parse().unwrap_or_else(|e| {
            warn!("{e}, starting parked");
            Phase::Parked
        }),
        Err(e) => {
            warn!("no persisted flight phase ({e}), starting parked");
            Phase::Parked
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::voice::{CollectSpeaker, Voice};
    use tokio::sync::mpsc;

    fn clearance(kind: ClearanceKind) -> Clearance {
        Clearance {
            kind,
            position: None,
            description: None,
        }
    }

    fn clearance_record(kind: ClearanceKind, phrase: &str) -> CommandRecord {
        CommandRecord {
            mode: Mode::Clearance,
            phrase: phrase.to_string(),
            matched: phrase.to_string(),
            arg: Some(Argument::Clearance(clearance(kind))),
        }
    }

    struct Fixture {
        state: FlightState,
        commands: mpsc::UnboundedReceiver<Command>,
        feedback: mpsc::UnboundedReceiver<Feedback>,
        voice: Voice,
        utterances: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl Fixture {
        async fn wait_for_utterance(&self, needle: &str) {
            for _ in 0..200 {
                if self
                    .utterances
                    .lock()
                    .unwrap()
                    .iter()
                    .any(|u| u.contains(needle))
                {
                    return;
                }
                tokio::time::sleep(tokio::time::Duration::from_millis(5))
                    .await;
            }
            panic!(
                "never heard '{needle}' in {:?}",
                self.utterances.lock().unwrap()
            );
        }
    }

    fn fixture() -> Fixture {
        let (queue_tx, commands) = mpsc::unbounded_channel();
        let (feedback_tx, feedback) = mpsc::unbounded_channel();
        let speaker = CollectSpeaker::default();
        let utterances = speaker.utterances.clone();
        let voice = Voice::new("manching tower", "cityairbus1234", speaker);
        let state = FlightState::new(queue_tx, feedback_tx, voice.clone());
        Fixture {
            state,
            commands,
            feedback,
            voice,
            utterances,
        }
    }

    fn drained_kinds(
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Vec<String> {
        let mut kinds = Vec::new();
        while let Ok(command) = commands.try_recv() {
            kinds.push(command.to_string());
        }
        kinds
    }

    #[tokio::test]
    async fn route_then_takeoff_reaches_flight() {
        let mut fx = fixture();
        fx.state
            .update(clearance_record(ClearanceKind::Route, "route"));
        assert_eq!(fx.state.phase(), Phase::Depart);
        fx.state
            .update(clearance_record(ClearanceKind::Takeoff, "takeoff"));
        assert_eq!(fx.state.phase(), Phase::Flight);
        let kinds = drained_kinds(&mut fx.commands);
        assert_eq!(kinds, ["EngineStart command", "Takeoff command"]);
    }

    #[tokio::test]
    async fn takeoff_clearance_while_parked_is_rejected() {
        let mut fx = fixture();
        fx.state
            .update(clearance_record(ClearanceKind::Takeoff, "takeoff"));
        assert_eq!(fx.state.phase(), Phase::Parked);
        assert!(drained_kinds(&mut fx.commands).is_empty());
        assert_eq!(
            fx.voice.pending_sentence(false).as_deref(),
            Some("Unable, Cityairbus1234.")
        );
    }

    #[tokio::test]
    async fn no_transition_skips_phases() {
        // parked -> flight and parked/depart -> landing are unreachable
        let mut fx = fixture();
        for kind in [
            ClearanceKind::Ils,
            ClearanceKind::Land,
            ClearanceKind::Takeoff,
        ] {
            fx.state.update(clearance_record(kind, "clearance"));
            assert_eq!(fx.state.phase(), Phase::Parked);
        }
        fx.state
            .update(clearance_record(ClearanceKind::Route, "route"));
        for kind in [ClearanceKind::Ils, ClearanceKind::Land] {
            fx.state.update(clearance_record(kind, "clearance"));
            assert_eq!(fx.state.phase(), Phase::Depart);
        }
    }

    #[tokio::test]
    async fn land_in_flight_goes_inbound_and_ils_lands() {
        let mut fx = fixture();
        fx.state
            .update(clearance_record(ClearanceKind::Route, "route"));
        fx.state
            .update(clearance_record(ClearanceKind::Takeoff, "takeoff"));
        drained_kinds(&mut fx.commands);

        let fix = Fix::new(48.688583, 11.525567, 372.0, 0.0);
        let mut record = clearance_record(ClearanceKind::Land, "land");
        record.arg = Some(Argument::Clearance(Clearance {
            kind: ClearanceKind::Land,
            position: Some(fix),
            description: Some("26 right".to_string()),
        }));
        fx.state.update(record);
        assert_eq!(fx.state.phase(), Phase::Inbound);
        let kinds = drained_kinds(&mut fx.commands);
        assert!(kinds[0].starts_with("Direct command"));
        assert!(kinds[1].starts_with("ReportPos command"));

        fx.state
            .update(clearance_record(ClearanceKind::Land, "land"));
        assert_eq!(fx.state.phase(), Phase::Landing);
        let kinds = drained_kinds(&mut fx.commands);
        assert_eq!(
            kinds,
            [
                "Land command",
                "ReportLanded command calling a follow-up"
            ]
        );
    }

    #[tokio::test]
    async fn ils_in_flight_lands_without_the_inbound_leg() {
        let mut fx = fixture();
        fx.state
            .update(clearance_record(ClearanceKind::Route, "route"));
        fx.state
            .update(clearance_record(ClearanceKind::Takeoff, "takeoff"));
        fx.state
            .update(clearance_record(ClearanceKind::Ils, "ils approach"));
        assert_eq!(fx.state.phase(), Phase::Landing);
    }

    #[tokio::test]
    async fn park_after_landing_requests_engine_shutdown() {
        let mut fx = fixture();
        fx.state
            .update(clearance_record(ClearanceKind::Route, "route"));
        fx.state
            .update(clearance_record(ClearanceKind::Takeoff, "takeoff"));
        fx.state
            .update(clearance_record(ClearanceKind::Ils, "ils approach"));
        assert_eq!(fx.state.phase(), Phase::Landing);
        fx.state.park().unwrap();
        assert_eq!(fx.state.phase(), Phase::Parked);
        assert_eq!(
            fx.voice.pending_sentence(false).as_deref(),
            Some(
                "Route, takeoff, ils approach, request engine shutdown, \
                 Cityairbus1234."
            )
        );
    }

    #[tokio::test]
    async fn shutdown_clearance_stops_the_engine() {
        let mut fx = fixture();
        fx.state
            .update(clearance_record(ClearanceKind::Shutdown, "shutdown"));
        assert_eq!(
            drained_kinds(&mut fx.commands),
            ["EngineShutdown command"]
        );
        assert_eq!(fx.state.phase(), Phase::Parked);
    }

    #[tokio::test]
    async fn altitude_record_enqueues_and_reads_back() {
        let mut fx = fixture();
        let record = CommandRecord {
            mode: Mode::Altitude,
            phrase: "climb flight level 50".to_string(),
            matched: "flight level 50".to_string(),
            arg: Some(Argument::Altitude(15.24)),
        };
        fx.state.handle_commands(vec![Some(record)]);
        assert_eq!(
            drained_kinds(&mut fx.commands),
            ["Altitude command (15.24m)"]
        );
    }

    #[tokio::test]
    async fn sentinel_answers_say_again_or_clearance_request() {
        let mut fx = fixture();
        fx.state.handle_commands(vec![None]);
        fx.wait_for_utterance("Request IFR clearance").await;
        // once airborne the answer becomes a plain say-again
        fx.state
            .update(clearance_record(ClearanceKind::Route, "route"));
        fx.state.handle_commands(vec![None]);
        fx.wait_for_utterance("say again").await;
        assert!(fx.feedback.try_recv().is_err());
        assert!(drained_kinds(&mut fx.commands)
            .iter()
            .all(|kind| kind == "EngineStart command"));
    }

    #[tokio::test]
    async fn position_condition_gates_the_following_records() {
        let mut fx = fixture();
        let fix = Fix::new(48.688383, 11.525417, 377.0, 0.0);
        let condition = CommandRecord {
            mode: Mode::Condition,
            phrase: "after passing MIQ".to_string(),
            matched: "after passing MIQ".to_string(),
            arg: Some(Argument::Condition(Condition::Position(fix))),
        };
        let heading = CommandRecord {
            mode: Mode::Heading,
            phrase: "turn heading 180".to_string(),
            matched: "heading 180".to_string(),
            arg: Some(Argument::Heading(180)),
        };
        fx.state.handle_commands(vec![Some(condition), Some(heading)]);
        let kinds = drained_kinds(&mut fx.commands);
        assert_eq!(kinds, ["ReportPos command calling a follow-up"]);
    }

    #[tokio::test]
    async fn route_condition_gates_the_initial_climb() {
        let mut fx = fixture();
        let route = clearance_record(ClearanceKind::Route, "route");
        let climb = CommandRecord {
            mode: Mode::Altitude,
            phrase: "climb flight level 50".to_string(),
            matched: "flight level 50".to_string(),
            arg: Some(Argument::Altitude(15.24)),
        };
        fx.state.handle_commands(vec![Some(route), Some(climb)]);
        assert_eq!(fx.state.phase(), Phase::Depart);
        let kinds = drained_kinds(&mut fx.commands);
        assert_eq!(
            kinds,
            [
                "EngineStart command",
                "Altitude command (15.24m)",
                "ReportAlt command calling a follow-up",
                "ReportAlt command calling a follow-up",
            ]
        );
    }

    #[tokio::test]
    async fn deferred_records_apply_when_fed_back() {
        let mut fx = fixture();
        let record = CommandRecord {
            mode: Mode::Heading,
            phrase: "turn heading 90".to_string(),
            matched: "heading 90".to_string(),
            arg: Some(Argument::Heading(90)),
        };
        fx.state.handle_feedback(Feedback::Deferred(record));
        assert_eq!(
            drained_kinds(&mut fx.commands),
            ["Heading command (90)"]
        );
    }

    #[tokio::test]
    async fn contact_hands_the_readback_to_the_new_station() {
        let mut fx = fixture();
        let record = CommandRecord {
            mode: Mode::Contact,
            phrase: "contact munich tower".to_string(),
            matched: "contact munich tower".to_string(),
            arg: Some(Argument::Contact("munich tower".to_string())),
        };
        fx.state.update(record);
        assert_eq!(
            fx.voice.pending_sentence(true).as_deref(),
            Some("Munich tower, contact munich tower, Cityairbus1234.")
        );
    }

    #[tokio::test]
    async fn report_departure_only_answers_while_departing() {
        let mut fx = fixture();
        let record = CommandRecord {
            mode: Mode::Report,
            phrase: "report departure".to_string(),
            matched: "report departure".to_string(),
            arg: Some(Argument::Report("departure".to_string())),
        };
        fx.state.update(record.clone());
        assert_eq!(fx.voice.pending_sentence(false), None);

        fx.state
            .update(clearance_record(ClearanceKind::Route, "route"));
        fx.state.update(record);
        assert_eq!(
            fx.voice.pending_sentence(false).as_deref(),
            Some("Route, ready for departure, Cityairbus1234.")
        );
    }

    #[tokio::test]
    async fn restore_reads_the_persisted_phase() {
        let path = std::env::temp_dir().join(format!(
            "dronebot-restore-{}.p",
            std::process::id()
        ));
        save_phase(&path, Phase::Flight).unwrap();
        let mut fx = fixture();
        fx.state.set_save_path(path.clone());
        fx.state.restore();
        assert_eq!(fx.state.phase(), Phase::Flight);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn phase_persistence_round_trips() {
        let path = std::env::temp_dir().join(format!(
            "dronebot-phase-{}.p",
            std::process::id()
        ));
        save_phase(&path, Phase::Inbound).unwrap();
        assert_eq!(load_phase(&path), Phase::Inbound);
        std::fs::write(&path, "not a phase\n").unwrap();
        assert_eq!(load_phase(&path), Phase::Parked);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(load_phase(&path), Phase::Parked);
    }
}
