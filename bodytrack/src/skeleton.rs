//! Skeleton data model shared by sensor backends and the smoothing stages

use crate::joints::{HandState, JointType, TrackingState, JOINT_COUNT};
use nalgebra::{Quaternion, UnitQuaternion, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// One joint sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointData {
    pub joint_type: JointType,
    pub tracking_state: TrackingState,
    /// Position in device-native sensor space (meters)
    pub sensor_pos: Vector3<f32>,
    /// Position in mapping space (meters). Zero when the joint is not tracked.
    pub position: Vector3<f32>,
    pub orientation: UnitQuaternion<f32>,
    /// Offset from the parent joint, recomputed after filtering
    pub direction: Vector3<f32>,
    /// Mapping-space position on the previous body frame
    pub pos_prev: Vector3<f32>,
    /// Velocity in meters per second
    pub pos_vel: Vector3<f32>,
}

impl JointData {
    pub fn new(joint_type: JointType) -> Self {
        Self {
            joint_type,
            tracking_state: TrackingState::NotTracked,
            sensor_pos: Vector3::zeros(),
            position: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            direction: Vector3::zeros(),
            pos_prev: Vector3::zeros(),
            pos_vel: Vector3::zeros(),
        }
    }

    pub fn is_tracked(&self) -> bool {
        self.tracking_state.is_tracked()
    }

    /// Drop the sample while keeping the joint type
    pub fn clear(&mut self) {
        *self = Self::new(self.joint_type);
    }
}

/// One body as reported for a single frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyData {
    /// Device tracking id. Only meaningful while `is_tracked` is set.
    pub tracking_id: u64,
    pub is_tracked: bool,
    /// Root joint position in sensor space
    pub sensor_pos: Vector3<f32>,
    /// Root joint position in mapping space
    pub position: Vector3<f32>,
    pub orientation: UnitQuaternion<f32>,
    pub hand_left: HandState,
    pub hand_right: HandState,
    pub joints: [JointData; JOINT_COUNT],
}

impl Default for BodyData {
    fn default() -> Self {
        Self {
            tracking_id: 0,
            is_tracked: false,
            sensor_pos: Vector3::zeros(),
            position: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            hand_left: HandState::Unknown,
            hand_right: HandState::Unknown,
            joints: JointType::ALL.map(JointData::new),
        }
    }
}

impl BodyData {
    pub fn joint(&self, joint: JointType) -> &JointData {
        &self.joints[joint.index()]
    }

    pub fn joint_mut(&mut self, joint: JointType) -> &mut JointData {
        &mut self.joints[joint.index()]
    }

    /// Reset to an untracked body with empty joints
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Number of joints with any tracking confidence
    pub fn tracked_joint_count(&self) -> usize {
        self.joints.iter().filter(|j| j.is_tracked()).count()
    }

    /// Take over a freshly reported body.
    ///
    /// When the same tracking id held this body before, each joint's previous
    /// position is carried into `pos_prev` so velocities can be derived.
    /// Otherwise the history starts at the new position.
    pub fn assign_from(&mut self, src: &BodyData) {
        let continuing = self.tracking_id == src.tracking_id
            && self.joints.iter().any(|j| j.position != Vector3::zeros());
        let previous = self.joints.map(|j| j.position);

        self.clone_from(src);
        for (joint, prev) in self.joints.iter_mut().zip(previous) {
            joint.pos_prev = if continuing && prev != Vector3::zeros() {
                prev
            } else {
                joint.position
            };
        }
    }

    /// Finite-difference velocity of each tracked joint over `dt` seconds
    pub fn update_velocities(&mut self, dt: f32) {
        for joint in &mut self.joints {
            joint.pos_vel = if joint.is_tracked() && dt > 0.0 {
                (joint.position - joint.pos_prev) / dt
            } else {
                Vector3::zeros()
            };
        }
    }

    /// Left/right mirrored copy of the body, reflected about the x = 0 plane
    pub fn mirrored(&self) -> BodyData {
        let mut out = self.clone();
        for joint in JointType::ALL {
            let src = self.joints[joint.index()];
            let dst = &mut out.joints[joint.mirror().index()];
            *dst = src;
            dst.joint_type = joint.mirror();
            for v in [
                &mut dst.sensor_pos,
                &mut dst.position,
                &mut dst.direction,
                &mut dst.pos_prev,
                &mut dst.pos_vel,
            ] {
                v.x = -v.x;
            }
            // Reflecting about the yz plane negates the y and z rotation axes
            let q = src.orientation.into_inner();
            dst.orientation =
                UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.i, -q.j, -q.k));
        }
        out.sensor_pos.x = -out.sensor_pos.x;
        out.position.x = -out.position.x;
        out.orientation = out.joints[JointType::ROOT.index()].orientation;
        std::mem::swap(&mut out.hand_left, &mut out.hand_right);
        out
    }

    /// Apply the post-filter derivations consumers rely on.
    ///
    /// The root joint's position and orientation become the body's, and each
    /// non-root joint's `direction` is set to the offset from its parent when
    /// both are tracked (zero otherwise).
    pub fn refresh_derived(&mut self) {
        let root = self.joints[JointType::ROOT.index()];
        self.sensor_pos = root.sensor_pos;
        self.position = root.position;
        self.orientation = root.orientation;

        for joint in JointType::ALL.iter().skip(1) {
            let parent = self.joints[joint.parent().index()];
            let current = &mut self.joints[joint.index()];
            current.direction = if current.is_tracked() && parent.is_tracked() {
                current.position - parent.position
            } else {
                Vector3::zeros()
            };
        }
    }
}

/// One frame of body data, one entry per body slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBodyFrame {
    pub bodies: Vec<BodyData>,
    /// Device timestamp of the frame these bodies came from
    pub timestamp: u64,
    /// Floor plane (a, b, c, d) in sensor space, when the device estimates one
    pub floor_clip_plane: Option<Vector4<f32>>,
}

impl RawBodyFrame {
    /// Frame with `body_count` empty slots
    pub fn new(body_count: usize) -> Self {
        Self {
            bodies: vec![BodyData::default(); body_count],
            timestamp: 0,
            floor_clip_plane: None,
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn tracked_count(&self) -> usize {
        self.bodies.iter().filter(|b| b.is_tracked).count()
    }

    /// Mark every body untracked without releasing joint storage
    pub fn clear(&mut self) {
        for body in &mut self.bodies {
            body.clear();
        }
        self.timestamp = 0;
        self.floor_clip_plane = None;
    }
}
