//! Contract of the flight-controller transport. The controller core only
//! sees this trait; the concrete MAVLink link is an external collaborator
//! and the in-process [`sim`] backend stands in for it.

pub mod sim;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

use crate::mission::{MissionPlan, MissionProgress};

/// Geodetic position as reported by the flight controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub absolute_altitude_m: f64,
    pub relative_altitude_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LandedState {
    Unknown,
    OnGround,
    TakingOff,
    InAir,
    Landing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightMode {
    Unknown,
    Ready,
    Takeoff,
    Hold,
    Mission,
    ReturnToLaunch,
    Land,
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Battery {
    pub voltage_v: f64,
    pub remaining_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GpsFix {
    NoFix,
    Fix2D,
    Fix3D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GpsInfo {
    pub num_satellites: i32,
    pub fix_type: GpsFix,
}

/// Sensor and estimator health flags, as a preflight checklist sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Health {
    pub is_gyrometer_calibration_ok: bool,
    pub is_accelerometer_calibration_ok: bool,
    pub is_magnetometer_calibration_ok: bool,
    pub is_local_position_ok: bool,
    pub is_global_position_ok: bool,
    pub is_home_position_ok: bool,
    pub is_armable: bool,
}

impl Health {
    pub fn all_ok(&self) -> bool {
        self.is_gyrometer_calibration_ok
            && self.is_accelerometer_calibration_ok
            && self.is_magnetometer_calibration_ok
            && self.is_local_position_ok
            && self.is_global_position_ok
            && self.is_home_position_ok
            && self.is_armable
    }

    pub fn nominal() -> Health {
        Health {
            is_gyrometer_calibration_ok: true,
            is_accelerometer_calibration_ok: true,
            is_magnetometer_calibration_ok: true,
            is_local_position_ok: true,
            is_global_position_ok: true,
            is_home_position_ok: true,
            is_armable: true,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("no system connected")]
    NoSystem,
    #[error("command denied: {0}")]
    CommandDenied(String),
    #[error("command timed out: {0}")]
    Timeout(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("no system connected")]
    NoSystem,
    #[error("telemetry request failed: {0}")]
    Request(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MissionError {
    #[error("no system connected")]
    NoSystem,
    #[error("no mission to start")]
    NoMission,
    #[error("mission transfer failed: {0}")]
    Transfer(String),
    #[error("mission denied: {0}")]
    Denied(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("unsupported system address '{0}'")]
    UnsupportedAddress(String),
    #[error("connection failed: {0}")]
    Failed(String),
}

/// System address of the autopilot link, `udp://host:port`,
/// `tcp://host:port` or `serial://path:baud`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemAddress {
    Udp { host: String, port: u16 },
    Tcp { host: String, port: u16 },
    Serial { path: String, baud_rate: u32 },
}

impl FromStr for SystemAddress {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported =
            || ConnectionError::UnsupportedAddress(s.to_string());
        if let Some(rest) = s.strip_prefix("serial://") {
            // an optional `:baud` suffix follows the device path
            let (path, baud_rate) = match rest.rsplit_once(':') {
                Some((path, baud)) if !path.is_empty() => {
                    (path, baud.parse().map_err(|_| unsupported())?)
                }
                _ => (rest, 57600),
            };
            if path.is_empty() {
                return Err(unsupported());
            }
            return Ok(SystemAddress::Serial {
                path: path.to_string(),
                baud_rate,
            });
        }
        let (scheme, rest) = s.split_once("://").ok_or_else(unsupported)?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(unsupported)?;
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        let port = port.parse().map_err(|_| unsupported())?;
        match scheme {
            "udp" => Ok(SystemAddress::Udp {
                host: host.to_string(),
                port,
            }),
            "tcp" => Ok(SystemAddress::Tcp {
                host: host.to_string(),
                port,
            }),
            _ => Err(unsupported()),
        }
    }
}

impl fmt::Display for SystemAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemAddress::Udp { host, port } => {
                write!(f, "udp://{}:{}", host, port)
            }
            SystemAddress::Tcp { host, port } => {
                write!(f, "tcp://{}:{}", host, port)
            }
            SystemAddress::Serial { path, baud_rate } => {
                write!(f, "serial://{}:{}", path, baud_rate)
            }
        }
    }
}

/// Handle to the flight controller. Telemetry getters return streams that
/// yield the current value on subscription and every update afterwards;
/// actions resolve once the autopilot acknowledged them.
#[async_trait]
pub trait Drone: Send + Sync {
    async fn connect(
        &self,
        address: &SystemAddress,
    ) -> Result<(), ConnectionError>;

    fn connection_state(&self) -> BoxStream<'static, bool>;
    fn health(&self) -> BoxStream<'static, Health>;
    fn health_all_ok(&self) -> BoxStream<'static, bool>;
    fn armed(&self) -> BoxStream<'static, bool>;
    fn in_air(&self) -> BoxStream<'static, bool>;
    fn landed_state(&self) -> BoxStream<'static, LandedState>;
    fn position(&self) -> BoxStream<'static, Position>;
    fn flight_mode(&self) -> BoxStream<'static, FlightMode>;
    fn battery(&self) -> BoxStream<'static, Battery>;
    fn gps_info(&self) -> BoxStream<'static, GpsInfo>;
    async fn set_rate_position(
        &self,
        rate_hz: f64,
    ) -> Result<(), TelemetryError>;

    async fn arm(&self) -> Result<(), ActionError>;
    async fn disarm(&self) -> Result<(), ActionError>;
    async fn takeoff(&self) -> Result<(), ActionError>;
    async fn land(&self) -> Result<(), ActionError>;
    async fn return_to_launch(&self) -> Result<(), ActionError>;
    async fn set_takeoff_altitude(
        &self,
        altitude_m: f64,
    ) -> Result<(), ActionError>;
    async fn set_return_to_launch_altitude(
        &self,
        altitude_m: f64,
    ) -> Result<(), ActionError>;

    async fn clear_mission(&self) -> Result<(), MissionError>;
    async fn upload_mission(
        &self,
        plan: MissionPlan,
    ) -> Result<(), MissionError>;
    async fn start_mission(&self) -> Result<(), MissionError>;
    async fn is_mission_finished(&self) -> Result<bool, MissionError>;
    fn mission_progress(&self) -> BoxStream<'static, MissionProgress>;
}
