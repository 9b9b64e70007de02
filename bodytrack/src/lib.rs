//! Body tracking core for depth-sensor skeletons
//!
//! This crate turns per-frame skeleton samples into stable, smooth body poses:
//!
//! * [`joints`]: the canonical 25-joint layout and its tree topology
//! * [`skeleton`]: per-frame body and joint data
//! * [`slots`]: maps transient device tracking ids onto a bounded set of
//!   stable body slots, evicting ids that stay unseen for too long
//! * [`smoothing`] and [`joint_filter`]: double-exponential smoothing of joint
//!   positions and velocities
//!
//! ```rust,ignore
//! use bodytrack::{BodySlotTracker, JointSmoother, RawBodyFrame};
//!
//! let mut slots = BodySlotTracker::new(6, 1.0);
//! let mut smoother = JointSmoother::positions(6);
//! let mut slot_frame = RawBodyFrame::new(6);
//!
//! // device_frame comes from a sensor backend
//! slots.update(&device_frame, &mut slot_frame, now);
//! smoother.update_frame(&mut slot_frame);
//! ```

pub mod joint_filter;
pub mod joints;
pub mod skeleton;
pub mod slots;
pub mod smoothing;

pub use joint_filter::{FilterChannel, JointSmoother};
pub use joints::{mirror_joint, HandState, JointType, TrackingState, JOINT_COUNT};
pub use skeleton::{BodyData, JointData, RawBodyFrame};
pub use slots::{BodySlotTracker, SlotUpdate, DEFAULT_WAIT_TIME_BEFORE_REMOVE};
pub use smoothing::{FilterState, SmoothingParameters, SmoothingPreset, MIN_JITTER_RADIUS};
