//! Reference backend driven by a synthetic scene
//!
//! Frames are already canonical, so the backend is the identity translation
//! over [`BackendCore`]. The [`SyntheticDriver`] renders a few people standing
//! in front of a wall with a slowly waving right arm.

use crate::backend::common::{BackendCore, DeviceProfile};
use crate::backend::driver::{
    DeviceDriver, DriverInfo, FrameSink, NativeBody, NativeBodyFrame, NativeImage, NativeJoint,
};
use crate::backend::{BackendKind, SensorBackend};
use crate::error::{Result, SensorError};
use crate::mapping::CameraIntrinsics;
use crate::types::{ColorFormat, FrameSources, ImageOrientation, StreamRequest, NO_BODY};
use bodytrack::{HandState, JointData, JointType, TrackingState, JOINT_COUNT};
use nalgebra::{UnitQuaternion, Vector2, Vector3};

pub const PROFILE: DeviceProfile = DeviceProfile {
    name: "Dummy",
    native_joint_count: JOINT_COUNT,
    color_format: ColorFormat::Rgba,
    orientation: ImageOrientation {
        mirror: false,
        flip_color_vertically: false,
    },
    hardware_registration: true,
    packed_body_index: false,
    min_depth_mm: 500,
    max_depth_mm: 4500,
    depth_fov: (70.6, 60.0),
    color_fov: (70.6, 60.0),
    depth_calibration: None,
    color_calibration: None,
    depth_to_color_offset: [0.0, 0.0, 0.0],
};

const DEPTH_SIZE: (u32, u32) = (80, 60);
const COLOR_SIZE: (u32, u32) = (160, 120);
const MAX_BODIES: usize = 6;

/// Depth of the back wall (mm)
const WALL_MM: u16 = 3500;
/// Distance of each synthetic person from the sensor (meters)
const PERSON_Z: f32 = 2.0;
/// Spacing between neighbouring people (meters)
const PERSON_SPACING: f32 = 0.8;
/// Half width of a person's silhouette (meters)
const PERSON_HALF_WIDTH: f32 = 0.25;

/// Joint offsets from the spine base of a person standing upright (meters)
const STANDING_POSE: [[f32; 3]; JOINT_COUNT] = [
    [0.0, 0.0, 0.0],     // SpineBase
    [0.0, 0.3, 0.0],     // SpineMid
    [0.0, 0.6, 0.0],     // Neck
    [0.0, 0.75, 0.0],    // Head
    [-0.2, 0.5, 0.0],    // ShoulderLeft
    [-0.3, 0.25, 0.0],   // ElbowLeft
    [-0.33, 0.02, 0.0],  // WristLeft
    [-0.34, -0.05, 0.0], // HandLeft
    [0.2, 0.5, 0.0],     // ShoulderRight
    [0.3, 0.25, 0.0],    // ElbowRight
    [0.33, 0.02, 0.0],   // WristRight
    [0.34, -0.05, 0.0],  // HandRight
    [-0.1, -0.05, 0.0],  // HipLeft
    [-0.1, -0.45, 0.0],  // KneeLeft
    [-0.1, -0.85, 0.0],  // AnkleLeft
    [-0.1, -0.9, -0.1],  // FootLeft
    [0.1, -0.05, 0.0],   // HipRight
    [0.1, -0.45, 0.0],   // KneeRight
    [0.1, -0.85, 0.0],   // AnkleRight
    [0.1, -0.9, -0.1],   // FootRight
    [0.0, 0.5, 0.0],     // SpineShoulder
    [-0.35, -0.12, 0.0], // HandTipLeft
    [-0.31, -0.08, 0.0], // ThumbLeft
    [0.35, -0.12, 0.0],  // HandTipRight
    [0.31, -0.08, 0.0],  // ThumbRight
];

/// Spine base height relative to the sensor (meters)
const HIP_HEIGHT: f32 = -0.1;

pub struct DummyBackend {
    core: BackendCore,
}

impl DummyBackend {
    pub fn new(driver: Box<dyn DeviceDriver>) -> Self {
        Self {
            core: BackendCore::new(driver, PROFILE),
        }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new(Box::new(SyntheticDriver::default()))
    }
}

impl SensorBackend for DummyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Dummy
    }

    fn core(&self) -> &BackendCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BackendCore {
        &mut self.core
    }

    fn convert_body(&self, native: &NativeBody, joints: &mut [JointData; JOINT_COUNT]) {
        for (joint, src) in joints.iter_mut().zip(&native.joints) {
            joint.clear();
            if src.state.is_tracked() {
                joint.sensor_pos = src.position;
                joint.orientation = src.orientation;
                joint.tracking_state = src.state;
            }
        }
    }
}

/// Native joints of a standing person whose spine base is at `root`. `wave`
/// lifts the right forearm, in radians.
pub fn standing_joints(root: Vector3<f32>, wave: f32) -> Vec<NativeJoint> {
    let elbow = Vector3::from(STANDING_POSE[JointType::ElbowRight.index()]);
    let lift = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), wave);
    STANDING_POSE
        .iter()
        .enumerate()
        .map(|(index, offset)| {
            let mut offset = Vector3::from(*offset);
            let forearm = matches!(
                JointType::from_index(index),
                Some(
                    JointType::WristRight
                        | JointType::HandRight
                        | JointType::HandTipRight
                        | JointType::ThumbRight
                )
            );
            if forearm {
                offset = elbow + lift * (offset - elbow);
            }
            NativeJoint {
                position: root + offset,
                orientation: UnitQuaternion::identity(),
                state: TrackingState::Tracked,
            }
        })
        .collect()
}

/// Driver that renders a deterministic scene on every pump.
///
/// A new frame set is produced only once the backend has consumed every
/// requested stream of the previous one, so each poll cycle sees one frame.
pub struct SyntheticDriver {
    people: usize,
    intrinsics: CameraIntrinsics,
    request: Option<StreamRequest>,
    sink: Option<FrameSink>,
    frame_number: u64,
}

impl SyntheticDriver {
    pub fn new(people: usize) -> Self {
        Self {
            people: people.min(MAX_BODIES),
            intrinsics: CameraIntrinsics::from_fov(
                DEPTH_SIZE.0,
                DEPTH_SIZE.1,
                PROFILE.depth_fov.0,
                PROFILE.depth_fov.1,
            ),
            request: None,
            sink: None,
            frame_number: 0,
        }
    }

    fn person_root(&self, person: usize) -> Vector3<f32> {
        let center = (self.people as f32 - 1.0) * 0.5;
        Vector3::new(
            (person as f32 - center) * PERSON_SPACING,
            HIP_HEIGHT,
            PERSON_Z,
        )
    }

    /// Person whose silhouette covers the sensor-space point, if any
    fn person_at(&self, point: &Vector3<f32>) -> Option<usize> {
        (0..self.people).find(|&person| {
            let root = self.person_root(person);
            (point.x - root.x).abs() <= PERSON_HALF_WIDTH
                && point.y >= root.y - 0.9
                && point.y <= root.y + 0.85
        })
    }

    fn render(&self, sources: FrameSources, sink: &FrameSink) {
        let timestamp = self.frame_number;
        let wave = (self.frame_number as f32 * 0.1).sin() * 0.8;
        let (dw, dh) = DEPTH_SIZE;

        if sources.intersects(FrameSources::DEPTH | FrameSources::BODY_INDEX) {
            let mut depth = NativeImage::filled(dw, dh, WALL_MM, timestamp);
            let mut index = NativeImage::filled(dw, dh, NO_BODY, timestamp);
            for row in 0..dh {
                for col in 0..dw {
                    let ray = self.intrinsics.ray(Vector2::new(col as f32, row as f32));
                    let hit = Vector3::new(ray.x * PERSON_Z, ray.y * PERSON_Z, PERSON_Z);
                    if let Some(person) = self.person_at(&hit) {
                        let i = (row * dw + col) as usize;
                        depth.data[i] = (PERSON_Z * 1000.0) as u16;
                        index.data[i] = person as u8;
                    }
                }
            }
            if sources.contains(FrameSources::DEPTH) {
                sink.publish_depth(depth);
            }
            if sources.contains(FrameSources::BODY_INDEX) {
                sink.publish_body_index(index);
            }
        }

        if sources.contains(FrameSources::COLOR) {
            let (cw, ch) = COLOR_SIZE;
            let mut color = NativeImage::filled(cw, ch, 255u8, timestamp);
            for (i, px) in color.data.chunks_exact_mut(4).enumerate() {
                let (x, y) = (i as u32 % cw, i as u32 / cw);
                px[0] = (x * 255 / cw) as u8;
                px[1] = (y * 255 / ch) as u8;
                px[2] = (timestamp % 256) as u8;
            }
            sink.publish_color(color);
        }

        if sources.contains(FrameSources::BODY) {
            let bodies = (0..self.people)
                .map(|person| NativeBody {
                    tracking_id: 1000 + person as u64,
                    tracked: true,
                    joints: standing_joints(self.person_root(person), wave),
                    hand_left: HandState::Open,
                    hand_right: if wave > 0.0 {
                        HandState::Open
                    } else {
                        HandState::Closed
                    },
                })
                .collect();
            sink.publish_body(NativeBodyFrame {
                timestamp,
                bodies,
                floor_plane: Some(nalgebra::Vector4::new(0.0, 1.0, 0.0, 1.0)),
            });
        }
    }
}

impl Default for SyntheticDriver {
    fn default() -> Self {
        Self::new(1)
    }
}

impl DeviceDriver for SyntheticDriver {
    fn name(&self) -> &str {
        "synthetic scene"
    }

    fn connect(&mut self, request: &StreamRequest) -> Result<DriverInfo> {
        self.request = Some(*request);
        self.frame_number = 0;
        Ok(DriverInfo {
            color_size: COLOR_SIZE,
            depth_size: DEPTH_SIZE,
            max_bodies: MAX_BODIES,
            depth_intrinsics: Some(self.intrinsics),
            color_intrinsics: None,
            depth_to_color: None,
        })
    }

    fn start(&mut self, sink: FrameSink) -> Result<()> {
        if self.request.is_none() {
            return Err(SensorError::device_unavailable("synthetic scene not connected"));
        }
        self.sink = Some(sink);
        Ok(())
    }

    fn pump(&mut self) {
        let (Some(request), Some(sink)) = (self.request, self.sink.as_ref()) else {
            return;
        };
        let sources = request.sources & FrameSources::TRACKING;
        if sink.ready().intersects(sources) {
            return;
        }
        self.frame_number += 1;
        self.render(sources, sink);
    }

    fn disconnect(&mut self) {
        self.sink = None;
        self.request = None;
    }
}
