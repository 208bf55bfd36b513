#![doc = include_str!("../readme.md")]
pub mod command;
pub mod controller;
pub mod geo;
pub mod logging;
pub mod mission;
pub mod state;
pub mod telemetry;
pub mod transport;
pub mod voice;

pub mod prelude {
    pub use crate::command::{Command, CommandKind};
    pub use crate::controller::{ControlError, Controller};
    pub use crate::mission::{MissionItem, MissionPlan, MissionProgress};
    pub use crate::state::{Feedback, FlightState, Phase};
    pub use crate::telemetry::TelemetryCache;
    pub use crate::transport::{sim::SimDrone, Drone, SystemAddress};
    pub use crate::voice::{LogSpeaker, Speaker, Voice};

    pub use phraseology::prelude::*;
}
