use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

/// Camera behavior attached to a mission item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraAction {
    #[default]
    None,
    TakePhoto,
    StartPhotoInterval,
    StopPhotoInterval,
    StartVideo,
    StopVideo,
}

/// One waypoint of a mission plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissionItem {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub relative_altitude_m: f64,
    pub speed_m_s: f64,
    pub is_fly_through: bool,
    pub gimbal_pitch_deg: f64,
    pub gimbal_yaw_deg: f64,
    pub camera_action: CameraAction,
    pub loiter_time_s: f64,
    pub camera_photo_interval_s: f64,
}

impl MissionItem {
    /// A plain waypoint at 1 m/s with a 5 s loiter, no gimbal or camera
    /// tasking.
    pub fn waypoint(
        latitude_deg: f64,
        longitude_deg: f64,
        relative_altitude_m: f64,
    ) -> MissionItem {
        MissionItem {
            latitude_deg,
            longitude_deg,
            relative_altitude_m,
            speed_m_s: 1.0,
            is_fly_through: false,
            gimbal_pitch_deg: f64::NAN,
            gimbal_yaw_deg: f64::NAN,
            camera_action: CameraAction::None,
            loiter_time_s: 5.0,
            camera_photo_interval_s: f64::NAN,
        }
    }

    /// The same waypoint at another altitude.
    pub fn at_altitude(&self, relative_altitude_m: f64) -> MissionItem {
        MissionItem {
            relative_altitude_m,
            ..self.clone()
        }
    }
}

/// An ordered waypoint list. At most one plan is active at a time; a new
/// upload replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MissionPlan {
    pub items: Vec<MissionItem>,
}

impl MissionPlan {
    pub fn new(items: Vec<MissionItem>) -> MissionPlan {
        MissionPlan { items }
    }
}

impl fmt::Display for MissionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            write!(
                f,
                "\n\t{}, {}, {}",
                item.latitude_deg,
                item.longitude_deg,
                item.relative_altitude_m
            )?;
        }
        Ok(())
    }
}

/// Progress of the running mission, as reported by the flight controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MissionProgress {
    pub current: i32,
    pub total: i32,
}

impl MissionProgress {
    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.current >= self.total
    }
}

impl fmt::Display for MissionProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.current, self.total)
    }
}

/// Mission state shared by the move commands: the last uploaded plan and
/// the current target altitude. Owned by the controller and handed to every
/// command execution.
#[derive(Debug)]
pub struct MissionContext {
    pub plan: Option<MissionPlan>,
    pub target_altitude_m: f64,
}

impl Default for MissionContext {
    fn default() -> MissionContext {
        MissionContext {
            plan: None,
            target_altitude_m: 5.0,
        }
    }
}

pub type SharedMissionContext = Arc<Mutex<MissionContext>>;

pub fn shared_context() -> SharedMissionContext {
    Arc::new(Mutex::new(MissionContext::default()))
}
