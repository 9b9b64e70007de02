//! Azure Kinect backend
//!
//! The body tracker reports 32 joints in millimeters with y pointing down.
//! Facial joints and clavicles have no canonical counterpart and are dropped.

use crate::backend::common::{BackendCore, DeviceProfile};
use crate::backend::driver::{DeviceDriver, NativeBody};
use crate::backend::{BackendKind, SensorBackend};
use crate::mapping::CameraIntrinsics;
use crate::types::{ColorFormat, ImageOrientation};
use bodytrack::{JointData, JointType, JOINT_COUNT};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};

pub const NATIVE_JOINT_COUNT: usize = 32;

const MM_TO_M: f32 = 0.001;

/// Canonical joint for each native joint, in native order
const JOINT_MAP: [Option<JointType>; NATIVE_JOINT_COUNT] = [
    Some(JointType::SpineBase),     // Pelvis
    Some(JointType::SpineMid),      // SpineNavel
    Some(JointType::SpineShoulder), // SpineChest
    Some(JointType::Neck),
    None, // ClavicleLeft
    Some(JointType::ShoulderLeft),
    Some(JointType::ElbowLeft),
    Some(JointType::WristLeft),
    Some(JointType::HandLeft),
    Some(JointType::HandTipLeft),
    Some(JointType::ThumbLeft),
    None, // ClavicleRight
    Some(JointType::ShoulderRight),
    Some(JointType::ElbowRight),
    Some(JointType::WristRight),
    Some(JointType::HandRight),
    Some(JointType::HandTipRight),
    Some(JointType::ThumbRight),
    Some(JointType::HipLeft),
    Some(JointType::KneeLeft),
    Some(JointType::AnkleLeft),
    Some(JointType::FootLeft),
    Some(JointType::HipRight),
    Some(JointType::KneeRight),
    Some(JointType::AnkleRight),
    Some(JointType::FootRight),
    Some(JointType::Head),
    None, // Nose
    None, // EyeLeft
    None, // EarLeft
    None, // EyeRight
    None, // EarRight
];

/// NFOV unbinned depth mode
pub const DEPTH_CALIBRATION: CameraIntrinsics = CameraIntrinsics {
    width: 640,
    height: 576,
    fx: 504.0,
    fy: 504.0,
    cx: 319.5,
    cy: 287.5,
    k1: 0.0,
    k2: 0.0,
    k3: 0.0,
};

pub const PROFILE: DeviceProfile = DeviceProfile {
    name: "Azure Kinect",
    native_joint_count: NATIVE_JOINT_COUNT,
    color_format: ColorFormat::Bgra,
    orientation: ImageOrientation {
        mirror: true,
        flip_color_vertically: true,
    },
    hardware_registration: false,
    packed_body_index: false,
    min_depth_mm: 500,
    max_depth_mm: 3860,
    depth_fov: (75.0, 65.0),
    color_fov: (90.0, 59.0),
    depth_calibration: Some(DEPTH_CALIBRATION),
    color_calibration: None,
    depth_to_color_offset: [-0.032, -0.002, 0.004],
};

/// Native y-down position (mm) in y-up meters
pub fn native_to_y_up(p: &Vector3<f32>) -> Vector3<f32> {
    Vector3::new(p.x, -p.y, p.z) * MM_TO_M
}

/// Native y-down orientation expressed in y-up axes
fn orientation_to_y_up(q: &UnitQuaternion<f32>) -> UnitQuaternion<f32> {
    let q = q.into_inner();
    UnitQuaternion::from_quaternion(Quaternion::new(q.w, -q.i, q.j, -q.k))
}

pub struct AzureKinectBackend {
    core: BackendCore,
}

impl AzureKinectBackend {
    pub fn new(driver: Box<dyn DeviceDriver>) -> Self {
        Self {
            core: BackendCore::new(driver, PROFILE),
        }
    }
}

impl SensorBackend for AzureKinectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::AzureKinect
    }

    fn core(&self) -> &BackendCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BackendCore {
        &mut self.core
    }

    fn convert_body(&self, native: &NativeBody, joints: &mut [JointData; JOINT_COUNT]) {
        for joint in joints.iter_mut() {
            joint.clear();
        }
        for (src, target) in native.joints.iter().zip(JOINT_MAP) {
            let Some(target) = target.filter(|_| src.state.is_tracked()) else {
                continue;
            };
            let joint = &mut joints[target.index()];
            joint.sensor_pos = native_to_y_up(&src.position);
            joint.orientation = orientation_to_y_up(&src.orientation);
            joint.tracking_state = src.state;
        }
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
    use nalgebra::Vector2;

    fn info() -> DriverInfo {
        DriverInfo {
            color_size: (2, 2),
            depth_size: (640, 576),
            max_bodies: 6,
            depth_intrinsics: None,
            color_intrinsics: None,
            depth_to_color: None,
        }
    }

    fn body() -> NativeBody {
        let mut joints = vec![
            NativeJoint {
                state: TrackingState::Tracked,
                ..Default::default()
            };
            NATIVE_JOINT_COUNT
        ];
        // Pelvis 0.2 m below the sensor, left shoulder up and to the left
        joints[0].position = Vector3::new(0.0, 200.0, 2500.0);
        joints[5].position = Vector3::new(-180.0, -300.0, 2500.0);
        joints[26].position = Vector3::new(0.0, -550.0, 2450.0);
        joints[20].state = TrackingState::NotTracked;
        NativeBody {
            tracking_id: 9,
            tracked: true,
            joints,
            hand_left: HandState::Unknown,
            hand_right: HandState::Unknown,
        }
    }

    #[test]
    fn test_y_down_millimeters_to_canonical() {
        let frames = vec![NativeFrameSet {
            body: Some(NativeBodyFrame {
                timestamp: 5,
                bodies: vec![body()],
                floor_plane: None,
            }),
            ..Default::default()
        }];
        let mut backend = AzureKinectBackend::new(Box::new(PlaybackDriver::from_frames(info(), frames)));
        backend
            .open(&StreamRequest {
                sources: FrameSources::BODY,
                ..Default::default()
            })
            .unwrap();

        let mut frame = RawBodyFrame::new(6);
        let transform = crate::mapping::sensor_to_world(1.0, 0.0);
        assert!(backend.poll_body(&mut frame, &transform, false));
        let body = &frame.bodies[0];

        assert_abs_diff_eq!(body.sensor_pos, Vector3::new(0.0, -0.2, 2.5), epsilon = 1e-6);
        assert_abs_diff_eq!(body.position, Vector3::new(0.0, 0.8, 2.5), epsilon = 1e-6);
        assert_abs_diff_eq!(
            body.joint(JointType::ShoulderLeft).sensor_pos,
            Vector3::new(0.18, 0.3, 2.5),
            epsilon = 1e-6
        );
        assert!(body.joint(JointType::Head).sensor_pos.y > 0.5);
        assert!(!body.joint(JointType::AnkleLeft).is_tracked());
        // Clavicles and facial joints are dropped, one ankle is lost
        assert_eq!(body.tracked_joint_count(), JOINT_COUNT - 1);
    }

    #[test]
    fn test_orientation_round_trips_through_mirror_and_flip() {
        let q = UnitQuaternion::from_euler_angles(0.3, -0.2, 0.7);
        let converted = orientation_to_y_up(&orientation_to_y_up(&q));
        assert_abs_diff_eq!(converted.into_inner(), q.into_inner(), epsilon = 1e-6);
    }

    #[test]
    fn test_color_is_flipped_and_mirrored() {
        // 2x2 BGRA: only the top-left pixel is white
        let mut data = vec![0u8; 16];
        data[..4].copy_from_slice(&[255, 255, 255, 255]);
        let frames = vec![NativeFrameSet {
            color: Some(NativeImage {
                width: 2,
                height: 2,
                data,
                timestamp: 1,
            }),
            ..Default::default()
        }];
        let mut backend = AzureKinectBackend::new(Box::new(PlaybackDriver::from_frames(info(), frames)));
        backend
            .open(&StreamRequest {
                sources: FrameSources::COLOR,
                ..Default::default()
            })
            .unwrap();
        assert!(backend.poll_color());
        assert_eq!(backend.color_image().get_pixel(1, 1).0, [255, 255, 255, 255]);
        assert_eq!(backend.color_image().get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn test_mirrored_depth_round_trip() {
        let frames = vec![NativeFrameSet {
            body: Some(NativeBodyFrame::default()),
            ..Default::default()
        }];
        let mut backend = AzureKinectBackend::new(Box::new(PlaybackDriver::from_frames(info(), frames)));
        backend.open(&StreamRequest::default()).unwrap();
        let pixel = Vector2::new(100.0, 50.0);
        let space = backend.map_depth_point_to_space(pixel, 1800);
        // Left half of the mirror view is negative x
        assert!(space.x < 0.0);
        let back = backend.map_space_point_to_depth(space);
        assert!((back - pixel).norm() < 1.0);
    }
}
