//! Per-slot, per-joint smoothing of body frames

use crate::joints::{JointType, JOINT_COUNT};
use crate::skeleton::{BodyData, JointData, RawBodyFrame};
use crate::smoothing::{FilterState, SmoothingParameters};
use nalgebra::Vector3;
use rayon::prelude::*;

/// Which joint field a smoother reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterChannel {
    /// `JointData::position`
    Position,
    /// `JointData::pos_vel`
    Velocity,
}

impl FilterChannel {
    fn read(self, joint: &JointData) -> Vector3<f32> {
        match self {
            Self::Position => joint.position,
            Self::Velocity => joint.pos_vel,
        }
    }

    fn write(self, joint: &mut JointData, value: Vector3<f32>) {
        match self {
            Self::Position => joint.position = value,
            Self::Velocity => joint.pos_vel = value,
        }
    }
}

/// Filter history for every joint of one body slot
#[derive(Debug, Clone)]
struct SlotHistory {
    joints: [FilterState; JOINT_COUNT],
}

impl Default for SlotHistory {
    fn default() -> Self {
        Self {
            joints: [FilterState::default(); JOINT_COUNT],
        }
    }
}

/// Double-exponential smoother over all body slots.
///
/// Slot indices are the stable indices handed out by
/// [`BodySlotTracker`](crate::slots::BodySlotTracker), so a body keeps its
/// filter history for as long as it keeps its slot.
#[derive(Debug, Clone)]
pub struct JointSmoother {
    channel: FilterChannel,
    params: SmoothingParameters,
    extremity_params: SmoothingParameters,
    history: Vec<SlotHistory>,
}

impl JointSmoother {
    pub fn new(channel: FilterChannel, slot_count: usize, params: SmoothingParameters) -> Self {
        let params = params.sanitized();
        Self {
            channel,
            params,
            extremity_params: params.widened(),
            history: vec![SlotHistory::default(); slot_count],
        }
    }

    /// Position smoother with default parameters
    pub fn positions(slot_count: usize) -> Self {
        Self::new(FilterChannel::Position, slot_count, SmoothingParameters::default())
    }

    /// Velocity smoother with default parameters
    pub fn velocities(slot_count: usize) -> Self {
        Self::new(FilterChannel::Velocity, slot_count, SmoothingParameters::default())
    }

    pub fn channel(&self) -> FilterChannel {
        self.channel
    }

    pub fn parameters(&self) -> &SmoothingParameters {
        &self.params
    }

    pub fn slot_count(&self) -> usize {
        self.history.len()
    }

    /// Replace the parameters and restart every filter run
    pub fn set_parameters(&mut self, params: SmoothingParameters) {
        self.params = params.sanitized();
        self.extremity_params = self.params.widened();
        self.reset_all();
    }

    /// Filter every joint of the body in `slot` in place
    pub fn update_body(&mut self, slot: usize, body: &mut BodyData) {
        let Some(history) = self.history.get_mut(slot) else {
            return;
        };
        let (params, extremity) = (self.params, self.extremity_params);
        filter_body(self.channel, &params, &extremity, history, body);
    }

    /// Filter every tracked body of a slot-ordered frame.
    ///
    /// Untracked slots are skipped and keep their history, so a body that
    /// drops out briefly resumes its filter run on return.
    pub fn update_frame(&mut self, frame: &mut RawBodyFrame) {
        let channel = self.channel;
        let (params, extremity) = (self.params, self.extremity_params);
        self.history
            .par_iter_mut()
            .zip(frame.bodies.par_iter_mut())
            .filter(|(_, body)| body.is_tracked)
            .for_each(|(history, body)| {
                filter_body(channel, &params, &extremity, history, body);
            });
    }

    /// Forget the history of one slot
    pub fn reset_slot(&mut self, slot: usize) {
        if let Some(history) = self.history.get_mut(slot) {
            *history = SlotHistory::default();
        }
    }

    pub fn reset_all(&mut self) {
        for history in &mut self.history {
            *history = SlotHistory::default();
        }
    }

    /// Frame counter of one joint's filter run
    pub fn frame_count(&self, slot: usize, joint: JointType) -> Option<u32> {
        self.history
            .get(slot)
            .map(|h| h.joints[joint.index()].frame_count)
    }
}

fn filter_body(
    channel: FilterChannel,
    params: &SmoothingParameters,
    extremity: &SmoothingParameters,
    history: &mut SlotHistory,
    body: &mut BodyData,
) {
    for (state, joint) in history.joints.iter_mut().zip(body.joints.iter_mut()) {
        let joint_params = if joint.joint_type.is_extremity() {
            extremity
        } else {
            params
        };
        let raw = channel.read(joint);
        let filtered = state.filter_sample(raw, joint_params);
        channel.write(joint, filtered);
    }
}
