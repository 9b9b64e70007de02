//! OpenNI2 + NiTE backend
//!
//! NiTE tracks 15 joints in millimeters, and the driver delivers frames from
//! its own callback thread. Depth and color are registered in hardware. The
//! user map labels pixels with 1-based user numbers, 0 for background.

use crate::backend::common::{BackendCore, DeviceProfile};
use crate::backend::driver::{DeviceDriver, NativeBody};
use crate::backend::{BackendKind, SensorBackend};
use crate::types::{ColorFormat, ImageOrientation, NO_BODY};
use bodytrack::{JointData, JointType, JOINT_COUNT};

pub const NATIVE_JOINT_COUNT: usize = 15;

const MM_TO_M: f32 = 0.001;

/// Canonical joint for each NiTE joint, in native order
const JOINT_MAP: [JointType; NATIVE_JOINT_COUNT] = [
    JointType::Head,
    JointType::Neck,
    JointType::ShoulderLeft,
    JointType::ShoulderRight,
    JointType::ElbowLeft,
    JointType::ElbowRight,
    JointType::HandLeft,
    JointType::HandRight,
    JointType::SpineMid,   // Torso
    JointType::HipLeft,
    JointType::HipRight,
    JointType::KneeLeft,
    JointType::KneeRight,
    JointType::AnkleLeft,  // NiTE foot sits at the ankle
    JointType::AnkleRight,
];

const SYNTHESIZED: [JointType; 6] = [
    JointType::SpineShoulder,
    JointType::SpineBase,
    JointType::WristLeft,
    JointType::WristRight,
    JointType::FootLeft,
    JointType::FootRight,
];

pub const PROFILE: DeviceProfile = DeviceProfile {
    name: "OpenNI2",
    native_joint_count: NATIVE_JOINT_COUNT,
    color_format: ColorFormat::Rgb,
    orientation: ImageOrientation {
        mirror: true,
        flip_color_vertically: false,
    },
    hardware_registration: true,
    packed_body_index: false,
    min_depth_mm: 500,
    max_depth_mm: 8000,
    depth_fov: (58.5, 45.6),
    color_fov: (58.5, 45.6),
    depth_calibration: None,
    color_calibration: None,
    depth_to_color_offset: [0.0, 0.0, 0.0],
};

/// Body index of a NiTE user-map label
pub fn user_label_to_body_index(label: u8) -> u8 {
    match label {
        0 => NO_BODY,
        user => user - 1,
    }
}

pub struct OpenNi2Backend {
    core: BackendCore,
}

impl OpenNi2Backend {
    pub fn new(driver: Box<dyn DeviceDriver>) -> Self {
        Self {
            core: BackendCore::new(driver, PROFILE),
        }
    }
}

impl SensorBackend for OpenNi2Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenNi2
    }

    fn core(&self) -> &BackendCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BackendCore {
        &mut self.core
    }

    fn poll_body_index(&mut self) -> bool {
        self.core.poll_body_index_with(user_label_to_body_index)
    }

    fn convert_body(&self, native: &NativeBody, joints: &mut [JointData; JOINT_COUNT]) {
        for joint in joints.iter_mut() {
            joint.clear();
        }
        for (src, target) in native.joints.iter().zip(JOINT_MAP) {
            if !src.state.is_tracked() {
                continue;
            }
            let joint = &mut joints[target.index()];
            joint.sensor_pos = src.position * MM_TO_M;
            joint.orientation = src.orientation;
            joint.tracking_state = src.state;
        }
    }

    fn synthesized_joints(&self) -> &'static [JointType] {
        &SYNTHESIZED
    }

    fn supports_background_removal(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::driver::{DriverInfo, NativeBodyFrame, NativeFrameSet, NativeImage, NativeJoint};
    use crate::playback::PlaybackDriver;
    use crate::types::{FrameSources, StreamRequest};
    use approx::assert_abs_diff_eq;
    use bodytrack::{HandState, RawBodyFrame, TrackingState};
    use nalgebra::{Matrix4, UnitQuaternion, Vector2, Vector3};
    use std::time::{Duration, Instant};

    fn info() -> DriverInfo {
        DriverInfo {
            color_size: (4, 2),
            depth_size: (4, 2),
            max_bodies: 6,
            depth_intrinsics: None,
            color_intrinsics: None,
            depth_to_color: None,
        }
    }

    /// NiTE skeleton in millimeters, user facing the sensor 2 m away
    fn nite_joints() -> Vec<NativeJoint> {
        [
            [0.0, 700.0, 2000.0],    // Head
            [0.0, 550.0, 2000.0],    // Neck
            [-200.0, 500.0, 2000.0], // LeftShoulder
            [200.0, 500.0, 2000.0],  // RightShoulder
            [-300.0, 250.0, 2000.0], // LeftElbow
            [300.0, 250.0, 2000.0],  // RightElbow
            [-300.0, 50.0, 2000.0],  // LeftHand
            [300.0, 50.0, 2000.0],   // RightHand
            [0.0, 300.0, 2000.0],    // Torso
            [-100.0, 0.0, 2000.0],   // LeftHip
            [100.0, 0.0, 2000.0],    // RightHip
            [-100.0, -400.0, 2000.0],
            [100.0, -400.0, 2000.0],
            [-100.0, -800.0, 2000.0],
            [100.0, -800.0, 2000.0],
        ]
        .iter()
        .map(|p| NativeJoint {
            position: Vector3::new(p[0], p[1], p[2]),
            orientation: UnitQuaternion::identity(),
            state: TrackingState::Tracked,
        })
        .collect()
    }

    fn frame_set(timestamp: u64) -> NativeFrameSet {
        NativeFrameSet {
            body_index: Some(NativeImage {
                width: 4,
                height: 2,
                data: vec![0, 1, 1, 0, 0, 2, 2, 0],
                timestamp,
            }),
            body: Some(NativeBodyFrame {
                timestamp,
                bodies: vec![NativeBody {
                    tracking_id: 1,
                    tracked: true,
                    joints: nite_joints(),
                    hand_left: HandState::Unknown,
                    hand_right: HandState::Unknown,
                }],
                floor_plane: None,
            }),
            ..Default::default()
        }
    }

    fn opened(driver: PlaybackDriver) -> OpenNi2Backend {
        let mut backend = OpenNi2Backend::new(Box::new(driver));
        backend
            .open(&StreamRequest {
                sources: FrameSources::BODY | FrameSources::BODY_INDEX,
                ..Default::default()
            })
            .unwrap();
        backend
    }

    #[test]
    fn test_skeleton_is_mirrored_and_completed() {
        let mut backend = opened(PlaybackDriver::from_frames(info(), vec![frame_set(1)]));
        let mut frame = RawBodyFrame::new(6);
        assert!(backend.poll_body(&mut frame, &Matrix4::identity(), false));
        let body = &frame.bodies[0];

        // Mirror view: the user's left shoulder appears on the right
        assert_abs_diff_eq!(
            body.joint(JointType::ShoulderLeft).sensor_pos,
            Vector3::new(0.2, 0.5, 2.0),
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            body.joint(JointType::SpineBase).sensor_pos,
            Vector3::new(0.0, 0.0, 2.0),
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            body.joint(JointType::SpineShoulder).sensor_pos,
            Vector3::new(0.0, 0.5, 2.0),
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            body.joint(JointType::WristRight).sensor_pos,
            Vector3::new(-0.3, 0.07, 2.0),
            epsilon = 1e-6
        );
        // Feet step toward the sensor
        let foot = body.joint(JointType::FootLeft).sensor_pos;
        assert_abs_diff_eq!(foot.z, 1.9, epsilon = 1e-5);
        assert!(!body.joint(JointType::HandTipLeft).is_tracked());
        assert_eq!(body.tracked_joint_count(), 21);
    }

    #[test]
    fn test_user_map_is_mirrored_and_zero_based() {
        let mut backend = opened(PlaybackDriver::from_frames(info(), vec![frame_set(1)]));
        assert!(backend.poll_body_index());
        let index = backend.body_index_frame();
        assert_eq!(index.row(0).to_vec(), vec![NO_BODY, 0, 0, NO_BODY]);
        assert_eq!(index.row(1).to_vec(), vec![NO_BODY, 1, 1, NO_BODY]);
    }

    #[test]
    fn test_callback_delivery() {
        let frames = (1..=3).map(frame_set).collect();
        let driver =
            PlaybackDriver::from_frames(info(), frames).threaded(Duration::from_millis(2));
        let mut backend = opened(driver);
        let mut frame = RawBodyFrame::new(6);

        let started = Instant::now();
        let mut newest = 0;
        while newest < 3 && started.elapsed() < Duration::from_secs(5) {
            if backend.poll_body(&mut frame, &Matrix4::identity(), false) {
                assert!(frame.timestamp > newest);
                newest = frame.timestamp;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(newest, 3);
        backend.close();
    }

    #[test]
    fn test_hardware_registered_color_mapping() {
        let backend = opened(PlaybackDriver::from_frames(info(), vec![frame_set(1)]));
        let color = backend.map_depth_point_to_color(Vector2::new(3.0, 1.0), 1500);
        assert_eq!(color, Vector2::new(3.0, 1.0));
    }

    #[test]
    fn test_user_labels() {
        assert_eq!(user_label_to_body_index(0), NO_BODY);
        assert_eq!(user_label_to_body_index(1), 0);
        assert_eq!(user_label_to_body_index(6), 5);
    }
}
