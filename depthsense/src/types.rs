//! Type definitions shared by backends, the mapper and the orchestrator

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Body-index value for pixels that belong to no body
pub const NO_BODY: u8 = 255;

/// Bitmask of frame streams a session asks for
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameSources(u32);

impl FrameSources {
    pub const NONE: FrameSources = FrameSources(0);
    pub const COLOR: FrameSources = FrameSources(1);
    pub const DEPTH: FrameSources = FrameSources(1 << 1);
    pub const INFRARED: FrameSources = FrameSources(1 << 2);
    pub const BODY_INDEX: FrameSources = FrameSources(1 << 3);
    pub const BODY: FrameSources = FrameSources(1 << 4);
    pub const ALL: FrameSources = FrameSources(0b1_1111);

    /// Sources the tracking core consumes
    pub const TRACKING: FrameSources = FrameSources(1 | 1 << 1 | 1 << 3 | 1 << 4);

    pub fn from_bits(bits: u32) -> Self {
        FrameSources(bits & Self::ALL.0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: FrameSources) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: FrameSources) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for FrameSources {
    type Output = FrameSources;

    fn bitor(self, rhs: FrameSources) -> FrameSources {
        FrameSources(self.0 | rhs.0)
    }
}

impl BitAnd for FrameSources {
    type Output = FrameSources;

    fn bitand(self, rhs: FrameSources) -> FrameSources {
        FrameSources(self.0 & rhs.0)
    }
}

impl BitOrAssign for FrameSources {
    fn bitor_assign(&mut self, rhs: FrameSources) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for FrameSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::COLOR, "COLOR"),
            (Self::DEPTH, "DEPTH"),
            (Self::INFRARED, "INFRARED"),
            (Self::BODY_INDEX, "BODY_INDEX"),
            (Self::BODY, "BODY"),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
        write!(f, "FrameSources({})", names.join(" | "))
    }
}

/// Pixel layout of a device's color stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorFormat {
    Rgba,
    Bgra,
    Rgb,
}

impl ColorFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ColorFormat::Rgba | ColorFormat::Bgra => 4,
            ColorFormat::Rgb => 3,
        }
    }
}

/// Buffer transforms a backend applies so frames come out in the canonical
/// orientation: rows top to bottom, mirror view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageOrientation {
    /// Flip every image horizontally and reflect the skeleton's x axis
    pub mirror: bool,
    /// Flip the color image vertically
    pub flip_color_vertically: bool,
}

/// What a caller asks for when opening a backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub sources: FrameSources,
    /// Sensor tilt in degrees, for devices with a tilt motor
    pub tilt_angle: f32,
    /// Deliver frames only when every requested stream has a new one
    pub sync_sources: bool,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            sources: FrameSources::TRACKING,
            tilt_angle: 0.0,
            sync_sources: false,
        }
    }
}

/// Static description of an open backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorCapabilities {
    pub backend: String,
    pub color_width: u32,
    pub color_height: u32,
    pub depth_width: u32,
    pub depth_height: u32,
    /// Number of body slots the device reports
    pub max_bodies: usize,
    /// Joints per body in the canonical layout
    pub joint_count: usize,
    /// Joints the device tracks natively
    pub native_joint_count: usize,
    /// Horizontal and vertical depth field of view (degrees)
    pub depth_fov: (f32, f32),
    /// Horizontal and vertical color field of view (degrees)
    pub color_fov: (f32, f32),
    pub min_depth_mm: u16,
    pub max_depth_mm: u16,
    /// Depth and color are registered by the device itself
    pub hardware_registration: bool,
    pub orientation: ImageOrientation,
    /// Streams the session actually opened
    pub sources: FrameSources,
}
