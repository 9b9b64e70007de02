//! Session configuration

use crate::error::{Result, SensorError};
use crate::types::{FrameSources, StreamRequest};
use bodytrack::{SmoothingParameters, SmoothingPreset, DEFAULT_WAIT_TIME_BEFORE_REMOVE};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which bodies are offered to the slot tracker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserFilter {
    /// Bodies closer than this (meters) are ignored. 0 disables the check.
    pub min_user_distance: f32,
    /// Bodies farther than this (meters) are ignored. 0 disables the check.
    pub max_user_distance: f32,
    /// Bodies farther than this (meters) left or right of the sensor axis are
    /// ignored. 0 disables the check.
    pub max_left_right_distance: f32,
    /// Keep at most this many bodies, closest first. 0 means no limit.
    pub max_tracked_users: usize,
}

impl Default for UserFilter {
    fn default() -> Self {
        Self {
            min_user_distance: 0.5,
            max_user_distance: 0.0,
            max_left_right_distance: 0.0,
            max_tracked_users: 6,
        }
    }
}

impl UserFilter {
    /// Whether a body whose root sits at `x`, `z` (sensor space, meters) passes
    pub fn accepts(&self, x: f32, z: f32) -> bool {
        if self.min_user_distance > 0.0 && z < self.min_user_distance {
            return false;
        }
        if self.max_user_distance > 0.0 && z > self.max_user_distance {
            return false;
        }
        if self.max_left_right_distance > 0.0 && x.abs() > self.max_left_right_distance {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Streams to open
    pub sources: FrameSources,

    /// Sensor tilt in degrees (positive tilts the sensor up)
    pub tilt_angle: f32,

    /// Sensor height above the floor in meters
    pub sensor_height: f32,

    /// Wait for every requested stream before handing out frames
    pub sync_sources: bool,

    /// Named smoothing parameter set
    pub smoothing: SmoothingPreset,

    /// Explicit parameters, overriding `smoothing` when set
    pub smoothing_parameters: Option<SmoothingParameters>,

    /// Also smooth joint velocities
    pub smooth_velocity: bool,

    /// Seconds an unseen tracking id keeps its body slot
    pub wait_time_before_remove: f64,

    /// Non-root joints take the root joint's raw depth
    pub ignore_joint_z: bool,

    /// Seconds without a new frame on a requested stream before the session
    /// is considered stalled
    pub stall_timeout: f64,

    pub user_filter: UserFilter,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sources: FrameSources::TRACKING,
            tilt_angle: 0.0,
            sensor_height: 1.0,
            sync_sources: false,
            smoothing: SmoothingPreset::Default,
            smoothing_parameters: None,
            smooth_velocity: true,
            wait_time_before_remove: DEFAULT_WAIT_TIME_BEFORE_REMOVE,
            ignore_joint_z: false,
            stall_timeout: 5.0,
            user_filter: UserFilter::default(),
        }
    }
}

impl SessionConfig {
    /// Load and validate a JSON config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        log::info!("Loaded session config from {}", path.display());
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(SensorError::config("sources: at least one stream is required"));
        }
        if !self.wait_time_before_remove.is_finite() || self.wait_time_before_remove < 0.0 {
            return Err(SensorError::config(format!(
                "wait_time_before_remove: must be >= 0, got {}",
                self.wait_time_before_remove
            )));
        }
        if !self.stall_timeout.is_finite() || self.stall_timeout <= 0.0 {
            return Err(SensorError::config(format!(
                "stall_timeout: must be > 0, got {}",
                self.stall_timeout
            )));
        }
        if !(-90.0..=90.0).contains(&self.tilt_angle) {
            return Err(SensorError::config(format!(
                "tilt_angle: must be within [-90, 90] degrees, got {}",
                self.tilt_angle
            )));
        }
        let filter = &self.user_filter;
        if filter.max_user_distance > 0.0 && filter.max_user_distance < filter.min_user_distance {
            return Err(SensorError::config(
                "user_filter: max_user_distance is below min_user_distance",
            ));
        }
        Ok(())
    }

    /// Position filter parameters, `None` when smoothing is disabled.
    /// Out-of-range values are clamped rather than rejected.
    pub fn position_smoothing(&self) -> Option<SmoothingParameters> {
        match self.smoothing_parameters {
            Some(params) => Some(params.sanitized()),
            None => self.smoothing.parameters(),
        }
    }

    pub fn stream_request(&self) -> StreamRequest {
        StreamRequest {
            sources: self.sources,
            tilt_angle: self.tilt_angle,
            sync_sources: self.sync_sources,
        }
    }
}
