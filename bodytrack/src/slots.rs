//! Stable body slots for transient device tracking ids
//!
//! Devices hand out tracking ids that come and go with occlusion and are
//! reshuffled across the device's own body enumeration. The slot tracker maps
//! each id onto one of a fixed number of slots and keeps that mapping while the
//! id keeps reappearing within `wait_time_before_remove` seconds.

use crate::skeleton::RawBodyFrame;
use std::collections::HashMap;

/// Default tolerance (seconds) before an unseen id loses its slot
pub const DEFAULT_WAIT_TIME_BEFORE_REMOVE: f64 = 1.0;

/// Result of one slot update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotUpdate {
    /// (tracking id, slot) for every body placed this tick
    pub assigned: Vec<(u64, usize)>,
    /// Ids that received a slot for the first time this tick
    pub new_ids: Vec<(u64, usize)>,
    /// Ids evicted this tick, with the slot they released
    pub released: Vec<(u64, usize)>,
    /// Tracked ids left without a slot because all slots were taken
    pub ignored: Vec<u64>,
}

impl SlotUpdate {
    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
            && self.new_ids.is_empty()
            && self.released.is_empty()
            && self.ignored.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BodySlotTracker {
    /// Seconds an id may go unseen before its slot is freed
    pub wait_time_before_remove: f64,
    id_to_slot: HashMap<u64, usize>,
    id_last_seen: HashMap<u64, f64>,
    slot_in_use: Vec<bool>,
    n_steps: u64,
}

impl BodySlotTracker {
    pub fn new(slot_count: usize, wait_time_before_remove: f64) -> Self {
        BodySlotTracker {
            wait_time_before_remove: wait_time_before_remove.max(0.0),
            id_to_slot: HashMap::with_capacity(slot_count),
            id_last_seen: HashMap::with_capacity(slot_count),
            slot_in_use: vec![false; slot_count],
            n_steps: 0,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_in_use.len()
    }

    pub fn slot_of(&self, tracking_id: u64) -> Option<usize> {
        self.id_to_slot.get(&tracking_id).copied()
    }

    pub fn is_slot_in_use(&self, slot: usize) -> bool {
        self.slot_in_use.get(slot).copied().unwrap_or(false)
    }

    /// Tracking id currently holding `slot`
    pub fn id_in_slot(&self, slot: usize) -> Option<u64> {
        self.id_to_slot
            .iter()
            .find(|(_, s)| **s == slot)
            .map(|(id, _)| *id)
    }

    /// Number of reserved slots
    pub fn occupied(&self) -> usize {
        self.slot_in_use.iter().filter(|used| **used).count()
    }

    pub fn step_count(&self) -> u64 {
        self.n_steps
    }

    /// Slot for `tracking_id`, assigning the lowest free slot to new ids.
    ///
    /// Returns `None` when the id is new and every slot is taken. The id's
    /// last-seen time is refreshed only when it holds a slot.
    pub fn assign(&mut self, tracking_id: u64, now: f64) -> Option<usize> {
        let slot = match self.id_to_slot.get(&tracking_id) {
            Some(slot) => *slot,
            None => {
                let free = self.slot_in_use.iter().position(|used| !used)?;
                self.slot_in_use[free] = true;
                self.id_to_slot.insert(tracking_id, free);
                free
            }
        };
        self.id_last_seen.insert(tracking_id, now);
        Some(slot)
    }

    /// Free the slots of ids unseen for longer than the tolerance
    pub fn remove_stale(&mut self, now: f64) -> Vec<(u64, usize)> {
        let wait = self.wait_time_before_remove;
        let lost: Vec<u64> = self
            .id_last_seen
            .iter()
            .filter(|(_, last_seen)| now - **last_seen > wait)
            .map(|(id, _)| *id)
            .collect();

        let mut released = Vec::with_capacity(lost.len());
        for id in lost {
            self.id_last_seen.remove(&id);
            if let Some(slot) = self.id_to_slot.remove(&id) {
                self.slot_in_use[slot] = false;
                released.push((id, slot));
            }
        }
        released.sort_by_key(|(_, slot)| *slot);
        released
    }

    /// Run one tick over bare tracking ids
    pub fn update_ids(&mut self, tracked_ids: &[u64], now: f64) -> SlotUpdate {
        let mut update = SlotUpdate::default();
        for &id in tracked_ids {
            self.place(id, now, &mut update);
        }
        update.released = self.remove_stale(now);
        self.n_steps += 1;
        update
    }

    /// Run one tick over a device-ordered frame.
    ///
    /// Every slot of `slot_frame` is first marked untracked. Each tracked body
    /// of `device_frame` is then copied to its slot index, so consumers see the
    /// same slot for the same person no matter how the device orders its
    /// bodies. Slots released this tick are cleared.
    pub fn update(
        &mut self,
        device_frame: &RawBodyFrame,
        slot_frame: &mut RawBodyFrame,
        now: f64,
    ) -> SlotUpdate {
        for body in &mut slot_frame.bodies {
            body.is_tracked = false;
        }
        slot_frame.timestamp = device_frame.timestamp;
        slot_frame.floor_clip_plane = device_frame.floor_clip_plane;

        let mut update = SlotUpdate::default();
        for body in device_frame.bodies.iter().filter(|b| b.is_tracked) {
            if let Some(slot) = self.place(body.tracking_id, now, &mut update) {
                if let Some(target) = slot_frame.bodies.get_mut(slot) {
                    target.assign_from(body);
                }
            }
        }

        update.released = self.remove_stale(now);
        for (_, slot) in &update.released {
            if let Some(body) = slot_frame.bodies.get_mut(*slot) {
                body.clear();
            }
        }

        self.n_steps += 1;
        update
    }

    fn place(&mut self, id: u64, now: f64, update: &mut SlotUpdate) -> Option<usize> {
        let is_new = !self.id_to_slot.contains_key(&id);
        match self.assign(id, now) {
            Some(slot) => {
                if is_new {
                    update.new_ids.push((id, slot));
                }
                update.assigned.push((id, slot));
                Some(slot)
            }
            None => {
                update.ignored.push(id);
                None
            }
        }
    }

    /// Release every slot
    pub fn clear(&mut self) {
        self.id_to_slot.clear();
        self.id_last_seen.clear();
        self.slot_in_use.iter_mut().for_each(|used| *used = false);
        self.n_steps = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joints::{JointType, TrackingState};
    use crate::skeleton::BodyData;
    use nalgebra::Vector3;

    fn slots(update: &SlotUpdate) -> Vec<(u64, usize)> {
        let mut assigned = update.assigned.clone();
        assigned.sort();
        assigned
    }

    #[test]
    fn test_brief_dropout_keeps_slot() {
        let mut tracker = BodySlotTracker::new(6, 1.0);

        let u = tracker.update_ids(&[5], 0.0);
        assert_eq!(slots(&u), vec![(5, 0)]);

        let u = tracker.update_ids(&[5, 9], 0.1);
        assert_eq!(slots(&u), vec![(5, 0), (9, 1)]);

        // Id 5 drops out for 0.3 s; its slot stays reserved
        let u = tracker.update_ids(&[9], 0.2);
        assert_eq!(slots(&u), vec![(9, 1)]);
        assert!(u.released.is_empty());
        assert!(tracker.is_slot_in_use(0));

        let u = tracker.update_ids(&[9], 0.3);
        assert!(u.released.is_empty());

        let u = tracker.update_ids(&[5, 9], 0.4);
        assert_eq!(slots(&u), vec![(5, 0), (9, 1)]);
        assert!(u.new_ids.is_empty());
    }

    #[test]
    fn test_stale_id_is_evicted_and_slot_reused() {
        let mut tracker = BodySlotTracker::new(4, 1.0);
        tracker.update_ids(&[10, 11, 12], 0.0);
        assert_eq!(tracker.slot_of(11), Some(1));

        // 11 vanishes; still within tolerance at 1.0 s
        let u = tracker.update_ids(&[10, 12], 1.0);
        assert!(u.released.is_empty());

        let u = tracker.update_ids(&[10, 12], 1.01);
        assert_eq!(u.released, vec![(11, 1)]);
        assert_eq!(tracker.slot_of(11), None);
        assert!(!tracker.is_slot_in_use(1));

        // A newcomer takes the lowest free slot
        let u = tracker.update_ids(&[10, 12, 77], 1.1);
        assert_eq!(u.new_ids, vec![(77, 1)]);
    }

    #[test]
    fn test_full_table_ignores_newcomers() {
        let mut tracker = BodySlotTracker::new(2, 1.0);
        tracker.update_ids(&[1, 2], 0.0);
        let u = tracker.update_ids(&[1, 2, 3], 0.1);
        assert_eq!(u.ignored, vec![3]);
        assert_eq!(tracker.slot_of(3), None);
        assert_eq!(tracker.occupied(), 2);

        // Once a slot frees, the waiting body gets it
        let u = tracker.update_ids(&[2, 3], 1.2);
        assert_eq!(u.released, vec![(1, 0)]);
        assert!(u.ignored.contains(&3));
        let u = tracker.update_ids(&[2, 3], 1.3);
        assert_eq!(u.new_ids, vec![(3, 0)]);
    }

    #[test]
    fn test_frame_update_places_bodies_by_slot() {
        let mut tracker = BodySlotTracker::new(6, 1.0);
        let mut device = RawBodyFrame::new(6);
        let mut slot_frame = RawBodyFrame::new(6);

        // The device reports the body with id 7 at enumeration index 4
        let mut body = BodyData::default();
        body.is_tracked = true;
        body.tracking_id = 7;
        let joint = body.joint_mut(JointType::SpineBase);
        joint.tracking_state = TrackingState::Tracked;
        joint.position = Vector3::new(0.1, 0.9, 2.0);
        device.bodies[4] = body;
        device.timestamp = 1234;

        let u = tracker.update(&device, &mut slot_frame, 0.0);
        assert_eq!(u.new_ids, vec![(7, 0)]);
        assert!(slot_frame.bodies[0].is_tracked);
        assert_eq!(slot_frame.bodies[0].tracking_id, 7);
        assert_eq!(slot_frame.timestamp, 1234);
        assert_eq!(slot_frame.tracked_count(), 1);

        // Body disappears: slot goes untracked but keeps its last pose
        device.bodies[4].is_tracked = false;
        tracker.update(&device, &mut slot_frame, 0.5);
        assert!(!slot_frame.bodies[0].is_tracked);
        assert_eq!(
            slot_frame.bodies[0].joint(JointType::SpineBase).position,
            Vector3::new(0.1, 0.9, 2.0)
        );

        // After the tolerance the slot is cleared
        let u = tracker.update(&device, &mut slot_frame, 1.6);
        assert_eq!(u.released, vec![(7, 0)]);
        assert_eq!(slot_frame.bodies[0].tracking_id, 0);
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut tracker = BodySlotTracker::new(3, 1.0);
        tracker.update_ids(&[1, 2, 3], 0.0);
        tracker.clear();
        assert_eq!(tracker.occupied(), 0);
        assert_eq!(tracker.step_count(), 0);
        let u = tracker.update_ids(&[3], 0.1);
        assert_eq!(u.new_ids, vec![(3, 0)]);
    }
}
