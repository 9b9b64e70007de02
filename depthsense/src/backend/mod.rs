//! Sensor backends behind one uniform interface
//!
//! Every variant presents the same canonical model: 25-joint skeletons in
//! meters, mirror-view images with rows top to bottom, and a coordinate mapper
//! built from the device calibration. Variants differ only in how they read
//! their device's native frames, which they get from a [`DeviceDriver`].

pub mod azure;
pub mod common;
pub mod driver;
pub mod dummy;
pub mod kinect1;
pub mod kinect2;
pub mod openni2;

pub use azure::AzureKinectBackend;
pub use common::{BackendCore, DeviceProfile};
pub use driver::{DeviceDriver, DriverInfo, FrameSink, MissingDriver, NativeBody, NativeBodyFrame};
pub use dummy::{DummyBackend, SyntheticDriver};
pub use kinect1::Kinect1Backend;
pub use kinect2::Kinect2Backend;
pub use openni2::OpenNi2Backend;

use crate::error::{Result, SensorError};
use crate::mapping::{self, synthesis, CoordinateMapper};
use crate::types::{SensorCapabilities, StreamRequest};
use bodytrack::{BodyData, JointData, JointType, RawBodyFrame, JOINT_COUNT};
use image::RgbaImage;
use nalgebra::{Matrix4, Quaternion, UnitQuaternion, Vector2, Vector3};
use ndarray::{Array2, ArrayView2};
use std::fmt;
use std::str::FromStr;

/// Common interface for depth sensors
pub trait SensorBackend: Send {
    fn kind(&self) -> BackendKind;

    fn core(&self) -> &BackendCore;

    fn core_mut(&mut self) -> &mut BackendCore;

    /// Write one native body into `joints` as native camera space in meters
    /// (x right in the native image, y up, z forward). Joints the device does
    /// not track are left cleared.
    fn convert_body(&self, native: &NativeBody, joints: &mut [JointData; JOINT_COUNT]);

    /// Canonical joints this device never reports and that are derived from
    /// their neighbours instead
    fn synthesized_joints(&self) -> &'static [JointType] {
        &[]
    }

    fn name(&self) -> &str {
        self.core().profile().name
    }

    /// Connect to the device and start streaming
    fn open(&mut self, request: &StreamRequest) -> Result<SensorCapabilities> {
        self.core_mut().open(request)
    }

    /// Stop streaming and release everything. Safe to call repeatedly.
    fn close(&mut self) {
        self.core_mut().close();
    }

    fn is_open(&self) -> bool {
        self.core().is_open()
    }

    fn capabilities(&self) -> Option<&SensorCapabilities> {
        self.core().capabilities()
    }

    /// Copy the next color frame into [`color_image`](Self::color_image).
    /// Returns true when a fresher frame was consumed.
    fn poll_color(&mut self) -> bool {
        self.core_mut().poll_color()
    }

    fn poll_depth(&mut self) -> bool {
        self.core_mut().poll_depth()
    }

    fn poll_body_index(&mut self) -> bool {
        self.core_mut().poll_body_index()
    }

    /// Fill `frame` from the next body frame: one entry per device body
    /// index, joints in sensor space (`sensor_pos`) and in mapping space
    /// (`position = transform * sensor_pos`).
    fn poll_body(
        &mut self,
        frame: &mut RawBodyFrame,
        transform: &Matrix4<f32>,
        ignore_joint_z: bool,
    ) -> bool {
        let Some(native) = self.core_mut().take_body_frame() else {
            return false;
        };
        let max_bodies = self
            .capabilities()
            .map_or(native.bodies.len(), |caps| caps.max_bodies);
        if native.bodies.len() > max_bodies {
            log::debug!(
                "{} reported {} bodies, keeping the first {}",
                self.name(),
                native.bodies.len(),
                max_bodies
            );
        }
        if frame.bodies.len() != max_bodies {
            frame.bodies.resize(max_bodies, BodyData::default());
        }

        let mirror = self.core().profile().orientation.mirror;
        frame.timestamp = native.timestamp;
        frame.floor_clip_plane = native.floor_plane.map(|mut plane| {
            if mirror {
                plane.x = -plane.x;
            }
            plane
        });

        for (index, body) in frame.bodies.iter_mut().enumerate() {
            body.clear();
            let Some(src) = native.bodies.get(index).filter(|b| b.tracked) else {
                continue;
            };
            self.convert_body(src, &mut body.joints);
            synthesis::synthesize_missing(&mut body.joints, self.synthesized_joints());
            place_joints(&mut body.joints, mirror, ignore_joint_z, transform);

            body.tracking_id = src.tracking_id;
            body.is_tracked = true;
            (body.hand_left, body.hand_right) = (src.hand_left, src.hand_right);
            body.refresh_derived();
        }
        true
    }

    fn color_image(&self) -> &RgbaImage {
        self.core().color()
    }

    fn depth_frame(&self) -> &Array2<u16> {
        self.core().depth()
    }

    fn body_index_frame(&self) -> &Array2<u8> {
        self.core().body_index()
    }

    fn mapper(&self) -> Option<&CoordinateMapper> {
        self.core().mapper().map(|m| &**m)
    }

    fn map_depth_point_to_space(&self, depth_pos: Vector2<f32>, depth_mm: u16) -> Vector3<f32> {
        self.mapper()
            .map_or(Vector3::zeros(), |m| m.map_depth_point_to_space(depth_pos, depth_mm))
    }

    fn map_space_point_to_depth(&self, space: Vector3<f32>) -> Vector2<f32> {
        self.mapper()
            .map_or(Vector2::zeros(), |m| m.map_space_point_to_depth(space))
    }

    fn map_depth_point_to_color(&self, depth_pos: Vector2<f32>, depth_mm: u16) -> Vector2<f32> {
        self.mapper()
            .map_or(Vector2::zeros(), |m| m.map_depth_point_to_color(depth_pos, depth_mm))
    }

    fn map_depth_frame_to_space(&self, depth: ArrayView2<u16>) -> Array2<Vector3<f32>> {
        match self.mapper() {
            Some(m) => m.map_depth_frame_to_space(depth),
            None => Array2::from_elem(depth.dim(), Vector3::zeros()),
        }
    }

    fn map_depth_frame_to_color(&self, depth: ArrayView2<u16>) -> Array2<Vector2<f32>> {
        match self.mapper() {
            Some(m) => m.map_depth_frame_to_color(depth),
            None => Array2::from_elem(depth.dim(), Vector2::zeros()),
        }
    }

    fn map_color_frame_to_depth(&self, depth: ArrayView2<u16>) -> Array2<Vector2<f32>> {
        match (self.mapper(), self.capabilities()) {
            (Some(m), _) => m.map_color_frame_to_depth(depth),
            (None, Some(caps)) => Array2::from_elem(
                (caps.color_height as usize, caps.color_width as usize),
                Vector2::zeros(),
            ),
            (None, None) => Array2::from_elem((0, 0), Vector2::zeros()),
        }
    }

    fn parent_of(&self, joint: JointType) -> JointType {
        joint.parent()
    }

    fn next_of(&self, joint: JointType) -> JointType {
        joint.next()
    }

    fn supports_face_tracking(&self) -> bool {
        false
    }

    fn supports_background_removal(&self) -> bool {
        false
    }

    fn supports_speech(&self) -> bool {
        false
    }
}

/// Finish converted joints: mirror into the canonical view, optionally pin
/// every joint to the root's depth, and fill the mapping-space positions
fn place_joints(
    joints: &mut [JointData; JOINT_COUNT],
    mirror: bool,
    ignore_joint_z: bool,
    transform: &Matrix4<f32>,
) {
    if mirror {
        for joint in joints.iter_mut().filter(|j| j.is_tracked()) {
            joint.sensor_pos.x = -joint.sensor_pos.x;
            let q = joint.orientation.into_inner();
            joint.orientation =
                UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.i, -q.j, -q.k));
        }
    }

    let root = joints[JointType::ROOT.index()];
    if ignore_joint_z && root.is_tracked() {
        for joint in joints.iter_mut().skip(1).filter(|j| j.is_tracked()) {
            joint.sensor_pos.z = root.sensor_pos.z;
        }
    }

    for joint in joints.iter_mut() {
        joint.position = if joint.is_tracked() {
            mapping::transform_point(transform, &joint.sensor_pos)
        } else {
            Vector3::zeros()
        };
    }
}

/// The closed set of supported devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Dummy,
    Kinect2,
    Kinect1,
    OpenNi2,
    AzureKinect,
}

impl BackendKind {
    /// Probe order when no device is named: newest hardware first, the
    /// synthetic backend last
    pub const PROBE_ORDER: [BackendKind; 5] = [
        BackendKind::AzureKinect,
        BackendKind::Kinect2,
        BackendKind::OpenNi2,
        BackendKind::Kinect1,
        BackendKind::Dummy,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Dummy => dummy::PROFILE.name,
            BackendKind::Kinect2 => kinect2::PROFILE.name,
            BackendKind::Kinect1 => kinect1::PROFILE.name,
            BackendKind::OpenNi2 => openni2::PROFILE.name,
            BackendKind::AzureKinect => azure::PROFILE.name,
        }
    }

    /// Create a backend of this kind on top of `driver`. Without a driver,
    /// hardware kinds get one that reports the device as unavailable and the
    /// dummy kind gets a synthetic scene.
    pub fn create(self, driver: Option<Box<dyn DeviceDriver>>) -> Box<dyn SensorBackend> {
        let driver: Box<dyn DeviceDriver> = match driver {
            Some(driver) => driver,
            None if self == BackendKind::Dummy => Box::new(SyntheticDriver::default()),
            None => Box::new(MissingDriver::new(self.name())),
        };
        match self {
            BackendKind::Dummy => Box::new(DummyBackend::new(driver)),
            BackendKind::Kinect2 => Box::new(Kinect2Backend::new(driver)),
            BackendKind::Kinect1 => Box::new(Kinect1Backend::new(driver)),
            BackendKind::OpenNi2 => Box::new(OpenNi2Backend::new(driver)),
            BackendKind::AzureKinect => Box::new(AzureKinectBackend::new(driver)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = SensorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "dummy" | "synthetic" => Ok(BackendKind::Dummy),
            "kinect2" | "kinectv2" => Ok(BackendKind::Kinect2),
            "kinect1" | "kinectv1" | "kinect" => Ok(BackendKind::Kinect1),
            "openni2" | "openni" => Ok(BackendKind::OpenNi2),
            "azure" | "azurekinect" | "k4a" => Ok(BackendKind::AzureKinect),
            _ => Err(SensorError::config(format!("unknown sensor backend '{s}'"))),
        }
    }
}

/// Open the first candidate whose device is present.
///
/// Recoverable failures move on to the next candidate. When none opens, the
/// last failure is returned.
pub fn open_first_available(
    candidates: Vec<Box<dyn SensorBackend>>,
    request: &StreamRequest,
) -> Result<Box<dyn SensorBackend>> {
    let mut last_error = SensorError::device_unavailable("no sensor backends to try");
    for mut backend in candidates {
        match backend.open(request) {
            Ok(caps) => {
                log::info!(
                    "Selected {} backend ({}x{} depth, {} bodies)",
                    backend.name(),
                    caps.depth_width,
                    caps.depth_height,
                    caps.max_bodies
                );
                return Ok(backend);
            }
            Err(e) if e.is_recoverable() => {
                log::warn!("{} unavailable: {}", backend.name(), e);
                last_error = e;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameSources;
    use approx::assert_abs_diff_eq;
    use bodytrack::TrackingState;

    #[test]
    fn test_kind_names_parse_back() {
        for kind in BackendKind::PROBE_ORDER {
            assert_eq!(kind.name().parse::<BackendKind>().unwrap(), kind);
        }
        assert_eq!("k4a".parse::<BackendKind>().unwrap(), BackendKind::AzureKinect);
        assert!("webcam".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_missing_driver_falls_through_to_dummy() {
        let candidates: Vec<_> = BackendKind::PROBE_ORDER
            .iter()
            .map(|kind| kind.create(None))
            .collect();
        let backend = open_first_available(candidates, &StreamRequest::default()).unwrap();
        assert_eq!(backend.kind(), BackendKind::Dummy);
        assert!(backend.is_open());
    }

    #[test]
    fn test_all_unavailable_reports_last_error() {
        let candidates = vec![BackendKind::Kinect2.create(None), BackendKind::Kinect1.create(None)];
        let err = open_first_available(candidates, &StreamRequest::default())
            .err()
            .unwrap();
        assert!(matches!(err, SensorError::DeviceUnavailable(ref msg) if msg.contains("Kinect")));
    }

    #[test]
    fn test_unopened_backend_maps_to_zero() {
        let backend = BackendKind::Kinect2.create(None);
        assert!(backend.mapper().is_none());
        assert_eq!(
            backend.map_depth_point_to_space(Vector2::new(10.0, 10.0), 1500),
            Vector3::zeros()
        );
        assert_eq!(
            backend.map_space_point_to_depth(Vector3::new(0.0, 0.0, 2.0)),
            Vector2::zeros()
        );
        let depth = Array2::from_elem((2, 3), 1000u16);
        let batch = backend.map_depth_frame_to_color(depth.view());
        assert!(batch.iter().all(|p| *p == Vector2::zeros()));
    }

    #[test]
    fn test_close_is_idempotent_after_failed_open() {
        let mut backend = BackendKind::OpenNi2.create(None);
        assert!(backend.open(&StreamRequest::default()).is_err());
        backend.close();
        backend.close();
        assert!(!backend.is_open());
        assert!(!backend.poll_depth());
    }

    #[test]
    fn test_topology_and_soft_capabilities_are_shared() {
        let backend = BackendKind::Dummy.create(None);
        assert_eq!(backend.parent_of(JointType::HandLeft), JointType::WristLeft);
        assert_eq!(backend.next_of(JointType::SpineBase), JointType::SpineMid);
        assert!(!backend.supports_face_tracking());
        assert!(!backend.supports_background_removal());
        assert!(!backend.supports_speech());
    }

    #[test]
    fn test_place_joints_mirror_and_flat_depth() {
        let mut joints = JointType::ALL.map(JointData::new);
        for (joint, pos) in [
            (JointType::SpineBase, Vector3::new(0.1, 0.0, 2.0)),
            (JointType::HandLeft, Vector3::new(-0.4, 0.3, 1.6)),
        ] {
            let j = &mut joints[joint.index()];
            j.sensor_pos = pos;
            j.tracking_state = TrackingState::Tracked;
        }
        let transform = mapping::sensor_to_world(1.0, 0.0);
        place_joints(&mut joints, true, true, &transform);

        let hand = &joints[JointType::HandLeft.index()];
        assert_abs_diff_eq!(hand.sensor_pos, Vector3::new(0.4, 0.3, 2.0), epsilon = 1e-6);
        assert_abs_diff_eq!(hand.position, Vector3::new(0.4, 1.3, 2.0), epsilon = 1e-6);
        assert_eq!(joints[JointType::Head.index()].position, Vector3::zeros());
    }

    #[test]
    fn test_poll_body_fills_slots_per_device_index() {
        let mut backend = BackendKind::Dummy.create(None);
        backend
            .open(&StreamRequest {
                sources: FrameSources::BODY,
                ..Default::default()
            })
            .unwrap();
        let mut frame = RawBodyFrame::new(0);
        let transform = Matrix4::identity();
        assert!(backend.poll_body(&mut frame, &transform, false));
        assert_eq!(frame.body_count(), backend.capabilities().unwrap().max_bodies);
        assert_eq!(frame.tracked_count(), 1);

        let body = &frame.bodies[0];
        assert!(body.is_tracked);
        assert_eq!(body.position, body.joint(JointType::SpineBase).position);
        assert!(body.joint(JointType::Head).direction != Vector3::zeros());
    }
}
