use std::fmt;

use serde::{Deserialize, Serialize};

/// Semantic class of a parsed phrase.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Altitude,
    Heading,
    Position,
    Takeoff,
    Land,
    Clearance,
    Contact,
    Condition,
    Report,
    Status,
    Special,
}

impl Mode {
    /// Resolve the upper-case table name used in the grammar configuration.
    pub fn from_table_name(name: &str) -> Option<Mode> {
        match name {
            "ALTITUDE" => Some(Mode::Altitude),
            "HEADING" => Some(Mode::Heading),
            "POSITION" => Some(Mode::Position),
            "TAKEOFF" => Some(Mode::Takeoff),
            "LAND" => Some(Mode::Land),
            "CLEARANCE" => Some(Mode::Clearance),
            "CONTACT" => Some(Mode::Contact),
            "CONDITION" => Some(Mode::Condition),
            "REPORT" => Some(Mode::Report),
            "STATUS" => Some(Mode::Status),
            "SPECIAL" => Some(Mode::Special),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Altitude => "ALTITUDE",
            Mode::Heading => "HEADING",
            Mode::Position => "POSITION",
            Mode::Takeoff => "TAKEOFF",
            Mode::Land => "LAND",
            Mode::Clearance => "CLEARANCE",
            Mode::Contact => "CONTACT",
            Mode::Condition => "CONDITION",
            Mode::Report => "REPORT",
            Mode::Status => "STATUS",
            Mode::Special => "SPECIAL",
        };
        write!(f, "{}", name)
    }
}

/// A named geodetic point from the POSITIONS table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub absolute_altitude_m: f64,
    pub yaw_deg: f64,
}

impl Fix {
    pub fn new(
        latitude_deg: f64,
        longitude_deg: f64,
        absolute_altitude_m: f64,
        yaw_deg: f64,
    ) -> Fix {
        Fix {
            latitude_deg,
            longitude_deg,
            absolute_altitude_m,
            yaw_deg,
        }
    }
}

/// Permission classes ATC can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearanceKind {
    Route,
    Takeoff,
    Ils,
    Land,
    Shutdown,
}

impl ClearanceKind {
    pub fn from_capture(s: &str) -> Option<ClearanceKind> {
        match s {
            "route" => Some(ClearanceKind::Route),
            "takeoff" => Some(ClearanceKind::Takeoff),
            "ils" => Some(ClearanceKind::Ils),
            "land" => Some(ClearanceKind::Land),
            "shutdown" => Some(ClearanceKind::Shutdown),
            _ => None,
        }
    }
}

impl fmt::Display for ClearanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClearanceKind::Route => "route",
            ClearanceKind::Takeoff => "takeoff",
            ClearanceKind::Ils => "ils",
            ClearanceKind::Land => "land",
            ClearanceKind::Shutdown => "shutdown",
        };
        write!(f, "{}", name)
    }
}

/// A decoded clearance: its kind, plus the approach fix and its spoken
/// description for `ils` and `land` clearances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clearance {
    pub kind: ClearanceKind,
    pub position: Option<Fix>,
    pub description: Option<String>,
}

/// A gating trigger: reach a fix, or cross an altitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Position(Fix),
    Altitude(f64),
}

/// The decoded argument of a command record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Argument {
    /// Meters above launch.
    Altitude(f64),
    /// Degrees, 0..359.
    Heading(i32),
    Position(Fix),
    Clearance(Clearance),
    /// Station to hand off the readback to.
    Contact(String),
    Condition(Condition),
    /// Report label, e.g. "departure".
    Report(String),
}

/// One structured command produced by the parser and consumed by the flight
/// state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub mode: Mode,
    /// The phrase echoed back in the voice response.
    pub phrase: String,
    /// The text the noun pattern matched.
    pub matched: String,
    pub arg: Option<Argument>,
}

impl CommandRecord {
    pub fn bare(mode: Mode, phrase: &str) -> CommandRecord {
        CommandRecord {
            mode,
            phrase: phrase.to_string(),
            matched: String::new(),
            arg: None,
        }
    }
}
