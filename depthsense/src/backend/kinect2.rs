//! Kinect v2 backend
//!
//! The native skeleton already uses the canonical 25-joint layout in meters,
//! and the native images are in mirror view, so the translation is a straight
//! copy. Depth intrinsics carry the factory radial distortion.

use crate::backend::common::{BackendCore, DeviceProfile};
use crate::backend::driver::{DeviceDriver, NativeBody};
use crate::backend::{BackendKind, SensorBackend};
use crate::mapping::CameraIntrinsics;
use crate::types::{ColorFormat, ImageOrientation};
use bodytrack::{JointData, JointType, JOINT_COUNT};

pub const DEPTH_CALIBRATION: CameraIntrinsics = CameraIntrinsics {
    width: 512,
    height: 424,
    fx: 365.5,
    fy: 365.5,
    cx: 257.2,
    cy: 207.0,
    k1: 0.0905,
    k2: -0.269,
    k3: 0.0969,
};

pub const COLOR_CALIBRATION: CameraIntrinsics = CameraIntrinsics {
    width: 1920,
    height: 1080,
    fx: 1081.37,
    fy: 1081.37,
    cx: 959.5,
    cy: 539.5,
    k1: 0.0,
    k2: 0.0,
    k3: 0.0,
};

pub const PROFILE: DeviceProfile = DeviceProfile {
    name: "Kinect v2",
    native_joint_count: JOINT_COUNT,
    color_format: ColorFormat::Rgba,
    orientation: ImageOrientation {
        mirror: false,
        flip_color_vertically: false,
    },
    hardware_registration: false,
    packed_body_index: false,
    min_depth_mm: 500,
    max_depth_mm: 4500,
    depth_fov: (70.6, 60.0),
    color_fov: (84.1, 53.8),
    depth_calibration: Some(DEPTH_CALIBRATION),
    color_calibration: Some(COLOR_CALIBRATION),
    depth_to_color_offset: [0.052, 0.0, 0.0],
};

pub struct Kinect2Backend {
    core: BackendCore,
}

impl Kinect2Backend {
    pub fn new(driver: Box<dyn DeviceDriver>) -> Self {
        Self {
            core: BackendCore::new(driver, PROFILE),
        }
    }
}

impl SensorBackend for Kinect2Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::Kinect2
    }

    fn core(&self) -> &BackendCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BackendCore {
        &mut self.core
    }

    fn convert_body(&self, native: &NativeBody, joints: &mut [JointData; JOINT_COUNT]) {
        if native.joints.len() != JOINT_COUNT {
            log::debug!(
                "Kinect v2 body {} has {} joints, expected {}",
                native.tracking_id,
                native.joints.len(),
                JOINT_COUNT
            );
        }
        for joint in JointType::ALL {
            let target = &mut joints[joint.index()];
            target.clear();
            if let Some(src) = native.joints.get(joint.index()).filter(|j| j.state.is_tracked()) {
                target.sensor_pos = src.position;
                target.orientation = src.orientation;
                target.tracking_state = src.state;
            }
        }
    }

    fn supports_background_removal(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::driver::{DriverInfo, NativeBodyFrame, NativeFrameSet, NativeImage};
    use crate::backend::dummy::standing_joints;
    use crate::playback::PlaybackDriver;
    use crate::types::{FrameSources, StreamRequest};
    use approx::assert_abs_diff_eq;
    use bodytrack::{HandState, RawBodyFrame};
    use nalgebra::{Matrix4, Vector2, Vector3};

    fn info() -> DriverInfo {
        DriverInfo {
            color_size: (1920, 1080),
            depth_size: (512, 424),
            max_bodies: 6,
            depth_intrinsics: None,
            color_intrinsics: None,
            depth_to_color: None,
        }
    }

    fn body_frame(timestamp: u64) -> NativeFrameSet {
        NativeFrameSet {
            body: Some(NativeBodyFrame {
                timestamp,
                bodies: vec![NativeBody {
                    tracking_id: 72057594037928,
                    tracked: true,
                    joints: standing_joints(Vector3::new(0.2, -0.1, 2.5), 0.0),
                    hand_left: HandState::Lasso,
                    hand_right: HandState::Closed,
                }],
                floor_plane: None,
            }),
            ..Default::default()
        }
    }

    fn opened(frames: Vec<NativeFrameSet>, sources: FrameSources) -> Kinect2Backend {
        let mut backend = Kinect2Backend::new(Box::new(PlaybackDriver::from_frames(info(), frames)));
        backend
            .open(&StreamRequest {
                sources,
                ..Default::default()
            })
            .unwrap();
        backend
    }

    #[test]
    fn test_body_copied_without_reorientation() {
        let mut backend = opened(vec![body_frame(10)], FrameSources::BODY);
        let mut frame = RawBodyFrame::new(6);
        assert!(backend.poll_body(&mut frame, &Matrix4::identity(), false));
        let body = &frame.bodies[0];
        assert_eq!(body.tracking_id, 72057594037928);
        assert_eq!(body.hand_left, HandState::Lasso);
        assert_abs_diff_eq!(body.sensor_pos, Vector3::new(0.2, -0.1, 2.5), epsilon = 1e-6);
        assert_eq!(body.tracked_joint_count(), JOINT_COUNT);
        assert_eq!(frame.timestamp, 10);
        // Same frame is not reported twice
        assert!(!backend.poll_body(&mut frame, &Matrix4::identity(), false));
    }

    #[test]
    fn test_stale_timestamp_is_not_fresh() {
        let mut backend = opened(vec![body_frame(10), body_frame(9)], FrameSources::BODY);
        let mut frame = RawBodyFrame::new(6);
        assert!(backend.poll_body(&mut frame, &Matrix4::identity(), false));
        assert!(!backend.poll_body(&mut frame, &Matrix4::identity(), false));
    }

    #[test]
    fn test_distorted_depth_round_trip() {
        let backend = opened(vec![body_frame(1)], FrameSources::BODY);
        let mapper = backend.mapper().unwrap();
        assert_eq!(mapper.depth_intrinsics().k1, 0.0905);
        for pixel in [Vector2::new(10.0, 12.0), Vector2::new(256.0, 212.0), Vector2::new(500.5, 400.25)] {
            let space = backend.map_depth_point_to_space(pixel, 2300);
            let back = backend.map_space_point_to_depth(space);
            assert!((back - pixel).norm() < 1.0, "{pixel} -> {back}");
        }
    }

    #[test]
    fn test_rgba_color_frame() {
        let mut color = NativeImage {
            width: 1920,
            height: 1080,
            data: vec![7u8; 1920 * 1080 * 4],
            timestamp: 1,
        };
        color.data[0] = 200;
        let frames = vec![NativeFrameSet {
            color: Some(color),
            ..Default::default()
        }];
        let mut backend = opened(frames, FrameSources::COLOR);
        assert!(backend.poll_color());
        assert_eq!(backend.color_image().get_pixel(0, 0).0, [200, 7, 7, 7]);
    }
}
