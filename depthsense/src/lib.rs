//! Depth Sensor Session Library
//!
//! Uniform access to depth sensors with body tracking. Each supported device
//! sits behind the [`SensorBackend`] trait and presents the same canonical
//! model: 25-joint skeletons in meters, mirror-view images and a coordinate
//! mapper between depth pixels, color pixels and sensor space. The
//! [`FrameOrchestrator`] runs the per-tick loop on top of a backend, keeping
//! every user in a stable slot with smoothed joints.

pub mod backend;
pub mod config;
pub mod error;
pub mod image_ops;
pub mod mapping;
pub mod orchestrator;
pub mod playback;
pub mod recorder;
pub mod types;

pub use backend::{open_first_available, BackendKind, SensorBackend};
pub use config::{SessionConfig, UserFilter};
pub use error::{Result, SensorError};
pub use mapping::{CameraIntrinsics, CoordinateMapper, UNMAPPED};
pub use orchestrator::{FrameOrchestrator, SlotEvent, TickReport};
pub use playback::{PlaybackDriver, PlaybackMode};
pub use recorder::{BodyRecorder, RecordingDriver};
pub use types::{ColorFormat, FrameSources, ImageOrientation, SensorCapabilities, StreamRequest, NO_BODY};

/// Initialize the sensor library
/// This function should be called once before opening a session
pub fn init() -> Result<()> {
    log::info!("Depth sensor library {} initialized", version());
    Ok(())
}

/// Get library version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Backends tried, in order, when no device is named
pub fn supported_backends() -> &'static [BackendKind] {
    &BackendKind::PROBE_ORDER
}
