//! Kinect v1 backend
//!
//! The device tracks 20 joints and has no separate body-index stream: each
//! depth pixel packs the depth in millimeters above a 3-bit player index.

use crate::backend::common::{BackendCore, DeviceProfile};
use crate::backend::driver::{DeviceDriver, NativeBody, NativeImage};
use crate::backend::{BackendKind, SensorBackend};
use crate::mapping::CameraIntrinsics;
use crate::types::{ColorFormat, FrameSources, ImageOrientation, NO_BODY};
use bodytrack::{JointData, JointType, JOINT_COUNT};

/// Joints in the device's skeleton
pub const NATIVE_JOINT_COUNT: usize = 20;

/// Bits below the depth value in a packed depth pixel
pub const PLAYER_INDEX_BITS: u16 = 3;
const PLAYER_INDEX_MASK: u16 = (1 << PLAYER_INDEX_BITS) - 1;

/// Canonical joint for each native joint, in native order. The shoulder
/// center feeds both the spine shoulder and the neck.
const JOINT_MAP: [&[JointType]; NATIVE_JOINT_COUNT] = [
    &[JointType::SpineBase],                       // HipCenter
    &[JointType::SpineMid],                        // Spine
    &[JointType::SpineShoulder, JointType::Neck],  // ShoulderCenter
    &[JointType::Head],
    &[JointType::ShoulderLeft],
    &[JointType::ElbowLeft],
    &[JointType::WristLeft],
    &[JointType::HandLeft],
    &[JointType::ShoulderRight],
    &[JointType::ElbowRight],
    &[JointType::WristRight],
    &[JointType::HandRight],
    &[JointType::HipLeft],
    &[JointType::KneeLeft],
    &[JointType::AnkleLeft],
    &[JointType::FootLeft],
    &[JointType::HipRight],
    &[JointType::KneeRight],
    &[JointType::AnkleRight],
    &[JointType::FootRight],
];

pub const DEPTH_CALIBRATION: CameraIntrinsics = CameraIntrinsics {
    width: 640,
    height: 480,
    fx: 594.21,
    fy: 591.04,
    cx: 339.5,
    cy: 242.7,
    k1: 0.0,
    k2: 0.0,
    k3: 0.0,
};

pub const COLOR_CALIBRATION: CameraIntrinsics = CameraIntrinsics {
    width: 640,
    height: 480,
    fx: 525.0,
    fy: 525.0,
    cx: 319.5,
    cy: 239.5,
    k1: 0.0,
    k2: 0.0,
    k3: 0.0,
};

pub const PROFILE: DeviceProfile = DeviceProfile {
    name: "Kinect v1",
    native_joint_count: NATIVE_JOINT_COUNT,
    color_format: ColorFormat::Bgra,
    orientation: ImageOrientation {
        mirror: false,
        flip_color_vertically: false,
    },
    hardware_registration: false,
    packed_body_index: true,
    min_depth_mm: 400,
    max_depth_mm: 4000,
    depth_fov: (57.0, 43.0),
    color_fov: (62.0, 48.6),
    depth_calibration: Some(DEPTH_CALIBRATION),
    color_calibration: Some(COLOR_CALIBRATION),
    depth_to_color_offset: [0.025, 0.0, 0.0],
};

/// Depth in millimeters of a packed pixel
pub fn unpack_depth(raw: u16) -> u16 {
    raw >> PLAYER_INDEX_BITS
}

/// Body index of a packed pixel. Player 0 means no player.
pub fn unpack_body_index(raw: u16) -> u8 {
    match raw & PLAYER_INDEX_MASK {
        0 => NO_BODY,
        player => (player - 1) as u8,
    }
}

pub struct Kinect1Backend {
    core: BackendCore,
    /// A body-index image was unpacked and not reported yet
    body_index_pending: bool,
}

impl Kinect1Backend {
    pub fn new(driver: Box<dyn DeviceDriver>) -> Self {
        Self {
            core: BackendCore::new(driver, PROFILE),
            body_index_pending: false,
        }
    }

    fn unpack(&mut self, frame: &NativeImage<u16>) -> bool {
        let sources = self.core.request().sources;
        let mut depth_stored = false;
        if sources.contains(FrameSources::DEPTH) {
            depth_stored = self.core.store_depth(frame, unpack_depth);
        }
        if sources.contains(FrameSources::BODY_INDEX)
            && self.core.store_body_index(frame, unpack_body_index)
            && self.core.note_body_index(frame.timestamp)
        {
            self.body_index_pending = true;
        }
        depth_stored
    }
}

impl SensorBackend for Kinect1Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::Kinect1
    }

    fn core(&self) -> &BackendCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BackendCore {
        &mut self.core
    }

    fn close(&mut self) {
        self.core.close();
        self.body_index_pending = false;
    }

    fn poll_depth(&mut self) -> bool {
        match self.core.take_depth_frame() {
            Some(frame) => self.unpack(&frame),
            None => false,
        }
    }

    fn poll_body_index(&mut self) -> bool {
        if !self.core.request().sources.contains(FrameSources::DEPTH) {
            // Nobody polls depth, so unpack the player indices here
            if let Some(frame) = self.core.take_depth_frame() {
                self.unpack(&frame);
            }
        }
        std::mem::take(&mut self.body_index_pending)
    }

    fn convert_body(&self, native: &NativeBody, joints: &mut [JointData; JOINT_COUNT]) {
        for joint in joints.iter_mut() {
            joint.clear();
        }
        for (src, targets) in native.joints.iter().zip(JOINT_MAP) {
            if !src.state.is_tracked() {
                continue;
            }
            for target in targets {
                let joint = &mut joints[target.index()];
                joint.sensor_pos = src.position;
                joint.orientation = src.orientation;
                joint.tracking_state = src.state;
            }
        }
    }

    fn supports_background_removal(&self) -> bool {
        true
    }
}
