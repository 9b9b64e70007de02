//! Derivation of canonical joints a device does not track natively
//!
//! Runs in sensor space on `sensor_pos`, before the mapping transform. A
//! synthesized joint is only produced when all of its inputs are tracked; its
//! tracking state is the weakest of theirs.

use bodytrack::{JointData, JointType, TrackingState, JOINT_COUNT};
use nalgebra::Vector3;

/// Fraction of the elbow-to-hand segment at which a wrist is placed
pub const WRIST_FRACTION: f32 = 0.9;

/// Distance (meters) from ankle to synthesized foot
pub const FOOT_OFFSET: f32 = 0.1;

fn weakest(states: impl IntoIterator<Item = TrackingState>) -> TrackingState {
    states
        .into_iter()
        .min_by_key(|s| match s {
            TrackingState::NotTracked => 0,
            TrackingState::Inferred => 1,
            TrackingState::Tracked => 2,
        })
        .unwrap_or(TrackingState::NotTracked)
}

fn tracked_pos(joints: &[JointData; JOINT_COUNT], joint: JointType) -> Option<Vector3<f32>> {
    let j = &joints[joint.index()];
    j.is_tracked().then_some(j.sensor_pos)
}

fn set(
    joints: &mut [JointData; JOINT_COUNT],
    joint: JointType,
    pos: Option<Vector3<f32>>,
    inputs: &[JointType],
) {
    let state = weakest(inputs.iter().map(|j| joints[j.index()].tracking_state));
    let target = &mut joints[joint.index()];
    target.clear();
    if let Some(pos) = pos {
        target.sensor_pos = pos;
        target.tracking_state = state;
    }
}

/// Midpoint of two tracked joints
pub fn midpoint(
    joints: &[JointData; JOINT_COUNT],
    a: JointType,
    b: JointType,
) -> Option<Vector3<f32>> {
    Some((tracked_pos(joints, a)? + tracked_pos(joints, b)?) * 0.5)
}

/// Wrist placed between elbow and hand
pub fn wrist(
    joints: &[JointData; JOINT_COUNT],
    elbow: JointType,
    hand: JointType,
) -> Option<Vector3<f32>> {
    let elbow = tracked_pos(joints, elbow)?;
    let hand = tracked_pos(joints, hand)?;
    Some(elbow + (hand - elbow) * WRIST_FRACTION)
}

/// Foot placed in front of the ankle. Forward is `up x (hip_right - hip_left)`
/// with `up` running from the hip center to the shoulder center.
pub fn foot(joints: &[JointData; JOINT_COUNT], ankle: JointType) -> Option<Vector3<f32>> {
    let ankle = tracked_pos(joints, ankle)?;
    let hip_left = tracked_pos(joints, JointType::HipLeft)?;
    let hip_right = tracked_pos(joints, JointType::HipRight)?;
    let hips = hip_right - hip_left;
    let up = match (
        tracked_pos(joints, JointType::SpineShoulder),
        tracked_pos(joints, JointType::SpineBase),
    ) {
        (Some(top), Some(base)) => top - base,
        _ => Vector3::y(),
    };
    let forward = up.cross(&hips).try_normalize(f32::EPSILON)?;
    Some(ankle + forward * FOOT_OFFSET)
}

/// Fill every joint in `missing` that has a synthesis rule.
///
/// Centers go first since feet depend on them.
pub fn synthesize_missing(joints: &mut [JointData; JOINT_COUNT], missing: &[JointType]) {
    use JointType::*;

    let needs = |joint: JointType| missing.contains(&joint);

    if needs(SpineShoulder) {
        let pos = midpoint(joints, ShoulderLeft, ShoulderRight);
        set(joints, SpineShoulder, pos, &[ShoulderLeft, ShoulderRight]);
    }
    if needs(SpineBase) {
        let pos = midpoint(joints, HipLeft, HipRight);
        set(joints, SpineBase, pos, &[HipLeft, HipRight]);
    }
    for (wrist_joint, elbow, hand) in [(WristLeft, ElbowLeft, HandLeft), (WristRight, ElbowRight, HandRight)] {
        if needs(wrist_joint) {
            let pos = wrist(joints, elbow, hand);
            set(joints, wrist_joint, pos, &[elbow, hand]);
        }
    }
    for (foot_joint, ankle) in [(FootLeft, AnkleLeft), (FootRight, AnkleRight)] {
        if needs(foot_joint) {
            let pos = foot(joints, ankle);
            set(joints, foot_joint, pos, &[ankle, HipLeft, HipRight]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn skeleton(points: &[(JointType, [f32; 3])]) -> [JointData; JOINT_COUNT] {
        let mut joints = JointType::ALL.map(JointData::new);
        for (joint, p) in points {
            let j = &mut joints[joint.index()];
            j.tracking_state = TrackingState::Tracked;
            j.sensor_pos = Vector3::new(p[0], p[1], p[2]);
        }
        joints
    }

    #[test]
    fn test_centers_are_midpoints() {
        let mut joints = skeleton(&[
            (JointType::ShoulderLeft, [-0.2, 1.4, 2.0]),
            (JointType::ShoulderRight, [0.2, 1.4, 2.2]),
            (JointType::HipLeft, [-0.1, 0.9, 2.0]),
            (JointType::HipRight, [0.1, 0.9, 2.0]),
        ]);
        joints[JointType::HipRight.index()].tracking_state = TrackingState::Inferred;
        synthesize_missing(&mut joints, &[JointType::SpineShoulder, JointType::SpineBase]);

        let top = &joints[JointType::SpineShoulder.index()];
        assert_abs_diff_eq!(top.sensor_pos, Vector3::new(0.0, 1.4, 2.1), epsilon = 1e-6);
        assert_eq!(top.tracking_state, TrackingState::Tracked);
        let base = &joints[JointType::SpineBase.index()];
        assert_abs_diff_eq!(base.sensor_pos, Vector3::new(0.0, 0.9, 2.0), epsilon = 1e-6);
        assert_eq!(base.tracking_state, TrackingState::Inferred);
    }

    #[test]
    fn test_wrist_is_ninety_percent_to_hand() {
        let mut joints = skeleton(&[
            (JointType::ElbowLeft, [-0.3, 1.0, 2.0]),
            (JointType::HandLeft, [-0.3, 0.8, 1.8]),
        ]);
        synthesize_missing(&mut joints, &[JointType::WristLeft, JointType::WristRight]);
        assert_abs_diff_eq!(
            joints[JointType::WristLeft.index()].sensor_pos,
            Vector3::new(-0.3, 0.82, 1.82),
            epsilon = 1e-6
        );
        // Right arm inputs missing, so no wrist
        assert!(!joints[JointType::WristRight.index()].is_tracked());
    }

    #[test]
    fn test_foot_points_toward_sensor() {
        let mut joints = skeleton(&[
            (JointType::HipLeft, [-0.1, 0.9, 2.0]),
            (JointType::HipRight, [0.1, 0.9, 2.0]),
            (JointType::SpineBase, [0.0, 0.9, 2.0]),
            (JointType::SpineShoulder, [0.0, 1.4, 2.0]),
            (JointType::AnkleLeft, [-0.1, 0.1, 2.0]),
        ]);
        synthesize_missing(&mut joints, &[JointType::FootLeft]);
        let foot = &joints[JointType::FootLeft.index()];
        assert!(foot.is_tracked());
        assert_abs_diff_eq!(foot.sensor_pos, Vector3::new(-0.1, 0.1, 1.9), epsilon = 1e-6);
    }

    #[test]
    fn test_foot_takes_weakest_of_ankle_and_hips() {
        let mut joints = skeleton(&[
            (JointType::HipLeft, [-0.1, 0.9, 2.0]),
            (JointType::HipRight, [0.1, 0.9, 2.0]),
            (JointType::AnkleRight, [0.1, 0.1, 2.0]),
        ]);
        joints[JointType::HipLeft.index()].tracking_state = TrackingState::Inferred;
        synthesize_missing(&mut joints, &[JointType::FootRight]);
        let foot = &joints[JointType::FootRight.index()];
        assert_eq!(foot.tracking_state, TrackingState::Inferred);
        // No spine joints, so up falls back to +y
        assert_abs_diff_eq!(foot.sensor_pos, Vector3::new(0.1, 0.1, 1.9), epsilon = 1e-6);
    }

    #[test]
    fn test_untracked_inputs_leave_joint_empty() {
        let mut joints = skeleton(&[(JointType::ShoulderLeft, [-0.2, 1.4, 2.0])]);
        joints[JointType::SpineShoulder.index()].sensor_pos = Vector3::new(9.0, 9.0, 9.0);
        synthesize_missing(&mut joints, &[JointType::SpineShoulder]);
        let top = &joints[JointType::SpineShoulder.index()];
        assert!(!top.is_tracked());
        assert_eq!(top.sensor_pos, Vector3::zeros());
    }
}
