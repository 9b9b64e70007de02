//! Canonical joint set and skeleton topology
//!
//! Every sensor backend reports its skeleton in this 25-joint layout, no matter
//! how many joints the physical device tracks. The topology is a tree rooted at
//! [`JointType::SpineBase`].

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Number of joints in the canonical skeleton
pub const JOINT_COUNT: usize = 25;

/// Canonical joint types, in storage order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JointType {
    SpineBase = 0,
    SpineMid = 1,
    Neck = 2,
    Head = 3,
    ShoulderLeft = 4,
    ElbowLeft = 5,
    WristLeft = 6,
    HandLeft = 7,
    ShoulderRight = 8,
    ElbowRight = 9,
    WristRight = 10,
    HandRight = 11,
    HipLeft = 12,
    KneeLeft = 13,
    AnkleLeft = 14,
    FootLeft = 15,
    HipRight = 16,
    KneeRight = 17,
    AnkleRight = 18,
    FootRight = 19,
    SpineShoulder = 20,
    HandTipLeft = 21,
    ThumbLeft = 22,
    HandTipRight = 23,
    ThumbRight = 24,
}

impl JointType {
    /// All joints in storage order
    pub const ALL: [JointType; JOINT_COUNT] = [
        JointType::SpineBase,
        JointType::SpineMid,
        JointType::Neck,
        JointType::Head,
        JointType::ShoulderLeft,
        JointType::ElbowLeft,
        JointType::WristLeft,
        JointType::HandLeft,
        JointType::ShoulderRight,
        JointType::ElbowRight,
        JointType::WristRight,
        JointType::HandRight,
        JointType::HipLeft,
        JointType::KneeLeft,
        JointType::AnkleLeft,
        JointType::FootLeft,
        JointType::HipRight,
        JointType::KneeRight,
        JointType::AnkleRight,
        JointType::FootRight,
        JointType::SpineShoulder,
        JointType::HandTipLeft,
        JointType::ThumbLeft,
        JointType::HandTipRight,
        JointType::ThumbRight,
    ];

    /// The root of the joint tree
    pub const ROOT: JointType = JointType::SpineBase;

    /// Storage index of this joint
    pub fn index(self) -> usize {
        self as usize
    }

    /// Joint for a storage index, if in range
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Parent joint in the skeleton tree. The root is its own parent.
    pub fn parent(self) -> JointType {
        use JointType::*;
        match self {
            SpineBase => SpineBase,
            SpineMid => SpineBase,
            Neck => SpineShoulder,
            Head => Neck,
            ShoulderLeft | ShoulderRight => SpineShoulder,
            ElbowLeft => ShoulderLeft,
            WristLeft => ElbowLeft,
            HandLeft => WristLeft,
            ElbowRight => ShoulderRight,
            WristRight => ElbowRight,
            HandRight => WristRight,
            HipLeft | HipRight => SpineBase,
            KneeLeft => HipLeft,
            AnkleLeft => KneeLeft,
            FootLeft => AnkleLeft,
            KneeRight => HipRight,
            AnkleRight => KneeRight,
            FootRight => AnkleRight,
            SpineShoulder => SpineMid,
            HandTipLeft => HandLeft,
            ThumbLeft => WristLeft,
            HandTipRight => HandRight,
            ThumbRight => WristRight,
        }
    }

    /// Next joint outward along the limb or spine chain.
    /// Leaf joints return themselves.
    pub fn next(self) -> JointType {
        use JointType::*;
        match self {
            SpineBase => SpineMid,
            SpineMid => SpineShoulder,
            SpineShoulder => Neck,
            Neck => Head,
            ShoulderLeft => ElbowLeft,
            ElbowLeft => WristLeft,
            WristLeft => HandLeft,
            HandLeft => HandTipLeft,
            ShoulderRight => ElbowRight,
            ElbowRight => WristRight,
            WristRight => HandRight,
            HandRight => HandTipRight,
            HipLeft => KneeLeft,
            KneeLeft => AnkleLeft,
            AnkleLeft => FootLeft,
            HipRight => KneeRight,
            KneeRight => AnkleRight,
            AnkleRight => FootRight,
            other => other,
        }
    }

    /// Left/right counterpart of this joint. Center joints map to themselves.
    pub fn mirror(self) -> JointType {
        use JointType::*;
        match self {
            ShoulderLeft => ShoulderRight,
            ElbowLeft => ElbowRight,
            WristLeft => WristRight,
            HandLeft => HandRight,
            ShoulderRight => ShoulderLeft,
            ElbowRight => ElbowLeft,
            WristRight => WristLeft,
            HandRight => HandLeft,
            HipLeft => HipRight,
            KneeLeft => KneeRight,
            AnkleLeft => AnkleRight,
            FootLeft => FootRight,
            HipRight => HipLeft,
            KneeRight => KneeLeft,
            AnkleRight => AnkleLeft,
            FootRight => FootLeft,
            HandTipLeft => HandTipRight,
            ThumbLeft => ThumbRight,
            HandTipRight => HandTipLeft,
            ThumbRight => ThumbLeft,
            other => other,
        }
    }

    /// Head, hands, fingertips and feet.
    ///
    /// These joints are noisier and move faster than the torso, so the
    /// smoother widens its radii for them.
    pub fn is_extremity(self) -> bool {
        use JointType::*;
        matches!(
            self,
            Head | HandLeft
                | HandRight
                | HandTipLeft
                | HandTipRight
                | ThumbLeft
                | ThumbRight
                | FootLeft
                | FootRight
        )
    }

    pub fn name(self) -> &'static str {
        use JointType::*;
        match self {
            SpineBase => "SpineBase",
            SpineMid => "SpineMid",
            Neck => "Neck",
            Head => "Head",
            ShoulderLeft => "ShoulderLeft",
            ElbowLeft => "ElbowLeft",
            WristLeft => "WristLeft",
            HandLeft => "HandLeft",
            ShoulderRight => "ShoulderRight",
            ElbowRight => "ElbowRight",
            WristRight => "WristRight",
            HandRight => "HandRight",
            HipLeft => "HipLeft",
            KneeLeft => "KneeLeft",
            AnkleLeft => "AnkleLeft",
            FootLeft => "FootLeft",
            HipRight => "HipRight",
            KneeRight => "KneeRight",
            AnkleRight => "AnkleRight",
            FootRight => "FootRight",
            SpineShoulder => "SpineShoulder",
            HandTipLeft => "HandTipLeft",
            ThumbLeft => "ThumbLeft",
            HandTipRight => "HandTipRight",
            ThumbRight => "ThumbRight",
        }
    }
}

impl std::fmt::Display for JointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for JointType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        JointType::ALL
            .iter()
            .copied()
            .find(|joint| joint.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow!("unknown joint name: {s}"))
    }
}

/// Joint to read for `joint` when presenting a mirror view
pub fn mirror_joint(joint: JointType, mirror: bool) -> JointType {
    if mirror {
        joint.mirror()
    } else {
        joint
    }
}

/// Per-joint tracking confidence reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TrackingState {
    #[default]
    NotTracked,
    Inferred,
    Tracked,
}

impl TrackingState {
    /// True for both inferred and fully tracked joints
    pub fn is_tracked(self) -> bool {
        self != TrackingState::NotTracked
    }
}

/// Hand pose reported by devices that classify hands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HandState {
    #[default]
    Unknown,
    NotTracked,
    Open,
    Closed,
    Lasso,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_is_rooted_tree() {
        for joint in JointType::ALL {
            // Walking parents must reach the root without cycling
            let mut current = joint;
            let mut steps = 0;
            while current != JointType::ROOT {
                current = current.parent();
                steps += 1;
                assert!(steps < JOINT_COUNT, "cycle starting at {joint}");
            }
        }
        assert_eq!(JointType::ROOT.parent(), JointType::ROOT);
    }

    #[test]
    fn test_index_round_trip() {
        for (i, joint) in JointType::ALL.iter().enumerate() {
            assert_eq!(joint.index(), i);
            assert_eq!(JointType::from_index(i), Some(*joint));
        }
        assert_eq!(JointType::from_index(JOINT_COUNT), None);
    }

    #[test]
    fn test_next_points_away_from_root() {
        for joint in JointType::ALL {
            let next = joint.next();
            if next != joint {
                assert_eq!(next.parent(), joint, "{next} should hang off {joint}");
            }
        }
    }

    #[test]
    fn test_mirror_is_involution() {
        for joint in JointType::ALL {
            assert_eq!(joint.mirror().mirror(), joint);
        }
        assert_eq!(JointType::HandLeft.mirror(), JointType::HandRight);
        assert_eq!(JointType::Head.mirror(), JointType::Head);
    }

    #[test]
    fn test_parse_names() {
        for joint in JointType::ALL {
            assert_eq!(joint.name().parse::<JointType>().unwrap(), joint);
        }
        assert_eq!("handtipleft".parse::<JointType>().unwrap(), JointType::HandTipLeft);
        assert!("Tail".parse::<JointType>().is_err());
        assert_eq!(mirror_joint(JointType::KneeLeft, true), JointType::KneeRight);
        assert_eq!(mirror_joint(JointType::KneeLeft, false), JointType::KneeLeft);
    }

    #[test]
    fn test_extremities() {
        assert!(JointType::HandLeft.is_extremity());
        assert!(JointType::FootRight.is_extremity());
        assert!(JointType::Head.is_extremity());
        assert!(!JointType::SpineMid.is_extremity());
        assert!(!JointType::ElbowLeft.is_extremity());
    }
}
