//! Per-session frame loop
//!
//! The orchestrator owns one open backend together with the slot tracker and
//! the joint smoothers. Every tick polls the requested streams, moves fresh
//! bodies into their stable slots, smooths them and reports which users
//! appeared or left.

use crate::backend::{self, SensorBackend};
use crate::config::SessionConfig;
use crate::error::{Result, SensorError};
use crate::image_ops;
use crate::mapping;
use crate::types::{FrameSources, SensorCapabilities};
use bodytrack::{BodyData, BodySlotTracker, FilterChannel, JointSmoother, RawBodyFrame, SmoothingParameters};
use image::RgbaImage;
use nalgebra::Matrix4;
use ndarray::Array2;
use std::time::Instant;

/// Ticks between periodic session statistics
const LOG_INTERVAL_TICKS: u64 = 300;

/// Streams checked for stalls, with the names used in errors
const WATCHED_STREAMS: [(FrameSources, &str); 4] = [
    (FrameSources::COLOR, "color"),
    (FrameSources::DEPTH, "depth"),
    (FrameSources::BODY_INDEX, "body index"),
    (FrameSources::BODY, "body"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEvent {
    UserDetected { slot: usize, tracking_id: u64 },
    UserLost { slot: usize, tracking_id: u64 },
}

/// What one tick produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub new_color: bool,
    pub new_depth: bool,
    pub new_body_index: bool,
    pub new_body: bool,
    pub events: Vec<SlotEvent>,
}

impl TickReport {
    fn sources(&self) -> FrameSources {
        let mut fresh = FrameSources::NONE;
        for (flag, source) in [
            (self.new_color, FrameSources::COLOR),
            (self.new_depth, FrameSources::DEPTH),
            (self.new_body_index, FrameSources::BODY_INDEX),
            (self.new_body, FrameSources::BODY),
        ] {
            if flag {
                fresh |= source;
            }
        }
        fresh
    }
}

#[derive(Debug, Clone)]
struct Stall {
    stream: &'static str,
    since: f64,
}

pub struct FrameOrchestrator {
    backend: Box<dyn SensorBackend>,
    config: SessionConfig,
    capabilities: SensorCapabilities,
    slots: BodySlotTracker,
    position_filter: Option<JointSmoother>,
    velocity_filter: Option<JointSmoother>,
    /// Bodies in device order, straight from the backend
    device_frame: RawBodyFrame,
    /// Device-ordered bodies that passed the user filter
    offered_frame: RawBodyFrame,
    /// Bodies in slot order, smoothed
    body_frame: RawBodyFrame,
    transform: Matrix4<f32>,
    /// Slot of the body at each device index
    index_to_slot: Vec<Option<usize>>,
    started: Instant,
    last_fresh: [f64; 4],
    last_body_time: Option<f64>,
    /// Time each slot last received a body sample
    slot_sample_time: Vec<Option<f64>>,
    stall: Option<Stall>,
    ticks: u64,
    body_frames: u64,
}

impl FrameOrchestrator {
    /// Start a session on `backend`, opening it first when needed
    pub fn new(mut backend: Box<dyn SensorBackend>, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let capabilities = match backend.capabilities() {
            Some(caps) => caps.clone(),
            None => backend.open(&config.stream_request())?,
        };
        Ok(Self::with_open_backend(backend, config, capabilities))
    }

    /// Start a session on the first candidate backend whose device is present
    pub fn probe(candidates: Vec<Box<dyn SensorBackend>>, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let backend = backend::open_first_available(candidates, &config.stream_request())?;
        let capabilities = backend
            .capabilities()
            .cloned()
            .ok_or_else(|| SensorError::other("backend reported open without capabilities"))?;
        Ok(Self::with_open_backend(backend, config, capabilities))
    }

    fn with_open_backend(
        backend: Box<dyn SensorBackend>,
        config: SessionConfig,
        capabilities: SensorCapabilities,
    ) -> Self {
        let slot_count = capabilities.max_bodies;
        let position_filter = config
            .position_smoothing()
            .map(|params| JointSmoother::new(FilterChannel::Position, slot_count, params));
        let velocity_filter = config
            .smooth_velocity
            .then(|| JointSmoother::velocities(slot_count));
        let transform = mapping::sensor_to_world(config.sensor_height, config.tilt_angle);

        log::info!(
            "Session started on {}: {} slots, smoothing {}, velocity smoothing {}",
            backend.name(),
            slot_count,
            if position_filter.is_some() { "on" } else { "off" },
            if velocity_filter.is_some() { "on" } else { "off" }
        );

        Self {
            backend,
            slots: BodySlotTracker::new(slot_count, config.wait_time_before_remove),
            position_filter,
            velocity_filter,
            device_frame: RawBodyFrame::new(slot_count),
            offered_frame: RawBodyFrame::new(slot_count),
            body_frame: RawBodyFrame::new(slot_count),
            transform,
            index_to_slot: vec![None; slot_count],
            started: Instant::now(),
            last_fresh: [0.0; 4],
            last_body_time: None,
            slot_sample_time: vec![None; slot_count],
            stall: None,
            ticks: 0,
            body_frames: 0,
            config,
            capabilities,
        }
    }

    /// Run one tick at the current session time
    pub fn tick(&mut self) -> Result<TickReport> {
        let now = self.started.elapsed().as_secs_f64();
        self.tick_at(now)
    }

    /// Run one tick at `now`, in seconds since the session started.
    ///
    /// Once a requested stream has gone `stall_timeout` seconds without a new
    /// frame, this and every later tick fail with
    /// [`SensorError::StreamStalled`] and the last poses stay as they were.
    pub fn tick_at(&mut self, now: f64) -> Result<TickReport> {
        if let Some(stall) = &self.stall {
            return Err(SensorError::stalled(stall.stream, now - stall.since));
        }

        let sources = self.capabilities.sources;
        let mut report = TickReport::default();
        if sources.contains(FrameSources::COLOR) {
            report.new_color = self.backend.poll_color();
        }
        if sources.contains(FrameSources::DEPTH) {
            report.new_depth = self.backend.poll_depth();
        }
        if sources.contains(FrameSources::BODY_INDEX) {
            report.new_body_index = self.backend.poll_body_index();
        }
        if sources.contains(FrameSources::BODY)
            && self.backend.poll_body(&mut self.device_frame, &self.transform, self.config.ignore_joint_z)
        {
            report.new_body = true;
            report.events = self.process_bodies(now);
        }

        self.ticks += 1;
        if self.ticks % LOG_INTERVAL_TICKS == 0 {
            log::info!(
                "{}: {} ticks, {} body frames, {} users in {} slots",
                self.backend.name(),
                self.ticks,
                self.body_frames,
                self.body_frame.tracked_count(),
                self.slots.occupied()
            );
        }

        self.check_stall(now, &report)?;
        Ok(report)
    }

    fn check_stall(&mut self, now: f64, report: &TickReport) -> Result<()> {
        let fresh = report.sources();
        for ((source, name), last) in WATCHED_STREAMS.iter().zip(self.last_fresh.iter_mut()) {
            if !self.capabilities.sources.contains(*source) {
                continue;
            }
            if fresh.contains(*source) {
                *last = now;
                continue;
            }
            let idle = now - *last;
            if idle > self.config.stall_timeout {
                log::error!(
                    "{} stalled: no {} frame for {:.1}s, freezing the session",
                    self.backend.name(),
                    name,
                    idle
                );
                self.stall = Some(Stall {
                    stream: *name,
                    since: *last,
                });
                return Err(SensorError::stalled(*name, idle));
            }
        }
        Ok(())
    }

    /// Filter, slot, smooth and derive the bodies of a fresh device frame
    fn process_bodies(&mut self, now: f64) -> Vec<SlotEvent> {
        self.body_frames += 1;
        self.offer_bodies();

        let update = self.slots.update(&self.offered_frame, &mut self.body_frame, now);
        for &(_, slot) in update.new_ids.iter().chain(&update.released) {
            self.slot_sample_time[slot] = None;
            if let Some(filter) = self.position_filter.as_mut() {
                filter.reset_slot(slot);
            }
            if let Some(filter) = self.velocity_filter.as_mut() {
                filter.reset_slot(slot);
            }
        }

        if let Some(filter) = self.position_filter.as_mut() {
            filter.update_frame(&mut self.body_frame);
        }
        // Each slot differences against its own last sample, so a body
        // returning from a dropout averages over the whole gap.
        let previous_frame = self.last_body_time.replace(now);
        for &(_, slot) in &update.assigned {
            let last = self.slot_sample_time[slot].replace(now);
            if last.is_some() && last != previous_frame {
                if let Some(filter) = self.velocity_filter.as_mut() {
                    filter.reset_slot(slot);
                }
            }
            let dt = last.map_or(0.0, |t| (now - t).max(0.0) as f32);
            self.body_frame.bodies[slot].update_velocities(dt);
        }
        if let Some(filter) = self.velocity_filter.as_mut() {
            filter.update_frame(&mut self.body_frame);
        }
        for body in self.body_frame.bodies.iter_mut().filter(|b| b.is_tracked) {
            body.refresh_derived();
        }

        self.index_to_slot.clear();
        self.index_to_slot.extend(self.offered_frame.bodies.iter().map(|body| {
            body.is_tracked
                .then(|| self.slots.slot_of(body.tracking_id))
                .flatten()
        }));

        for id in &update.ignored {
            log::debug!("No free slot for user {}", id);
        }
        let mut events = Vec::with_capacity(update.new_ids.len() + update.released.len());
        for &(tracking_id, slot) in &update.new_ids {
            log::debug!("User {} detected in slot {}", tracking_id, slot);
            events.push(SlotEvent::UserDetected { slot, tracking_id });
        }
        for &(tracking_id, slot) in &update.released {
            log::debug!("User {} lost from slot {}", tracking_id, slot);
            events.push(SlotEvent::UserLost { slot, tracking_id });
        }
        events
    }

    /// Copy the device frame, untracking bodies the user filter rejects
    fn offer_bodies(&mut self) {
        self.offered_frame.clone_from(&self.device_frame);
        let filter = self.config.user_filter;
        for body in self.offered_frame.bodies.iter_mut().filter(|b| b.is_tracked) {
            if !filter.accepts(body.sensor_pos.x, body.sensor_pos.z) {
                body.is_tracked = false;
            }
        }

        if filter.max_tracked_users == 0 {
            return;
        }
        let mut by_distance: Vec<(usize, f32)> = self
            .offered_frame
            .bodies
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_tracked)
            .map(|(i, b)| (i, b.sensor_pos.z))
            .collect();
        by_distance.sort_by(|a, b| a.1.total_cmp(&b.1));
        for &(index, _) in by_distance.iter().skip(filter.max_tracked_users) {
            self.offered_frame.bodies[index].is_tracked = false;
        }
    }

    pub fn backend(&self) -> &dyn SensorBackend {
        self.backend.as_ref()
    }

    pub fn capabilities(&self) -> &SensorCapabilities {
        &self.capabilities
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Sensor-to-mapping-space transform applied to every joint
    pub fn transform(&self) -> &Matrix4<f32> {
        &self.transform
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    pub fn is_stalled(&self) -> bool {
        self.stall.is_some()
    }

    /// All slots, tracked or not
    pub fn body_frame(&self) -> &RawBodyFrame {
        &self.body_frame
    }

    /// Body in `slot`, if a user is tracked there
    pub fn body(&self, slot: usize) -> Option<&BodyData> {
        self.body_frame.bodies.get(slot).filter(|b| b.is_tracked)
    }

    pub fn tracked_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.body_frame
            .bodies
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_tracked)
            .map(|(slot, _)| slot)
    }

    /// Lowest slot holding a tracked user
    pub fn primary_user(&self) -> Option<usize> {
        self.tracked_slots().next()
    }

    /// Slot of the tracked user nearest the sensor
    pub fn closest_user(&self) -> Option<usize> {
        self.tracked_slots().min_by(|&a, &b| {
            let za = self.body_frame.bodies[a].sensor_pos.z;
            let zb = self.body_frame.bodies[b].sensor_pos.z;
            za.total_cmp(&zb)
        })
    }

    /// Replace the position smoothing parameters, or disable smoothing with
    /// `None`. Filter history starts over.
    pub fn set_smoothing(&mut self, params: Option<SmoothingParameters>) {
        let slot_count = self.slots.slot_count();
        self.position_filter = match (self.position_filter.take(), params) {
            (Some(mut filter), Some(params)) => {
                filter.set_parameters(params);
                Some(filter)
            }
            (None, Some(params)) => Some(JointSmoother::new(FilterChannel::Position, slot_count, params)),
            (_, None) => None,
        };
    }

    pub fn color_image(&self) -> &RgbaImage {
        self.backend.color_image()
    }

    pub fn depth_frame(&self) -> &Array2<u16> {
        self.backend.depth_frame()
    }

    pub fn body_index_frame(&self) -> &Array2<u8> {
        self.backend.body_index_frame()
    }

    /// Body-index image colored by slot
    pub fn user_silhouette(&self) -> RgbaImage {
        image_ops::user_silhouette(self.backend.body_index_frame().view(), &self.index_to_slot)
    }

    /// Color image resampled onto the depth grid. `None` when the session
    /// has no color stream.
    pub fn registered_color(&self) -> Option<RgbaImage> {
        if !self.capabilities.sources.contains(FrameSources::COLOR) {
            return None;
        }
        let mapper = self.backend.mapper()?;
        Some(image_ops::registered_color(
            self.backend.color_image(),
            self.backend.depth_frame().view(),
            mapper,
        ))
    }

    /// End the session and release the device
    pub fn close(&mut self) {
        if self.backend.is_open() {
            log::info!(
                "Closing session on {} after {} ticks",
                self.backend.name(),
                self.ticks
            );
        }
        self.backend.close();
        self.slots.clear();
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        self.close();
    }
}
