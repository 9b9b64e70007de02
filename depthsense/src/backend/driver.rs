//! Seam between backends and the vendor driver that produces native frames
//!
//! A [`DeviceDriver`] speaks the device's native formats: its own joint
//! layout, units, axes and pixel formats. Backends translate those into the
//! canonical model. Drivers hand frames over through a [`FrameSink`], either
//! from [`DeviceDriver::pump`] (polled devices) or from their own threads
//! (callback devices).

use crate::error::{Result, SensorError};
use crate::mapping::CameraIntrinsics;
use crate::types::{FrameSources, StreamRequest};
use bodytrack::{HandState, TrackingState};
use nalgebra::{Isometry3, UnitQuaternion, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// One image in the device's native layout, row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeImage<T> {
    pub width: u32,
    pub height: u32,
    pub data: Vec<T>,
    /// Device timestamp, strictly increasing per stream
    pub timestamp: u64,
}

impl<T: Clone> NativeImage<T> {
    pub fn filled(width: u32, height: u32, value: T, timestamp: u64) -> Self {
        Self {
            width,
            height,
            data: vec![value; (width * height) as usize],
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NativeJoint {
    /// Position in the device's own units and axes
    pub position: Vector3<f32>,
    pub orientation: UnitQuaternion<f32>,
    pub state: TrackingState,
}

impl Default for NativeJoint {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            state: TrackingState::NotTracked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeBody {
    pub tracking_id: u64,
    pub tracked: bool,
    /// Joints in the device's native joint order
    pub joints: Vec<NativeJoint>,
    pub hand_left: HandState,
    pub hand_right: HandState,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NativeBodyFrame {
    pub timestamp: u64,
    /// Bodies in the device's enumeration order
    pub bodies: Vec<NativeBody>,
    pub floor_plane: Option<Vector4<f32>>,
}

/// Frames of every stream captured at one instant. Streams the device did
/// not deliver are `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NativeFrameSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<NativeImage<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<NativeImage<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_index: Option<NativeImage<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<NativeBodyFrame>,
}

impl NativeFrameSet {
    pub fn is_empty(&self) -> bool {
        self.color.is_none() && self.depth.is_none() && self.body_index.is_none() && self.body.is_none()
    }

    /// Streams present in this set
    pub fn sources(&self) -> FrameSources {
        let mut sources = FrameSources::NONE;
        if self.color.is_some() {
            sources |= FrameSources::COLOR;
        }
        if self.depth.is_some() {
            sources |= FrameSources::DEPTH;
        }
        if self.body_index.is_some() {
            sources |= FrameSources::BODY_INDEX;
        }
        if self.body.is_some() {
            sources |= FrameSources::BODY;
        }
        sources
    }

    /// Same frames with every timestamp moved forward by `offset`
    pub fn shifted(mut self, offset: u64) -> Self {
        if let Some(f) = self.color.as_mut() {
            f.timestamp += offset;
        }
        if let Some(f) = self.depth.as_mut() {
            f.timestamp += offset;
        }
        if let Some(f) = self.body_index.as_mut() {
            f.timestamp += offset;
        }
        if let Some(f) = self.body.as_mut() {
            f.timestamp += offset;
        }
        self
    }

    /// Latest timestamp of any stream in the set
    pub fn max_timestamp(&self) -> u64 {
        [
            self.color.as_ref().map(|f| f.timestamp),
            self.depth.as_ref().map(|f| f.timestamp),
            self.body_index.as_ref().map(|f| f.timestamp),
            self.body.as_ref().map(|f| f.timestamp),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(0)
    }
}

/// What a driver reports when it connects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub color_size: (u32, u32),
    pub depth_size: (u32, u32),
    pub max_bodies: usize,
    /// Factory calibration, when the driver exposes it
    pub depth_intrinsics: Option<CameraIntrinsics>,
    pub color_intrinsics: Option<CameraIntrinsics>,
    pub depth_to_color: Option<Isometry3<f32>>,
}

/// Vendor driver for one device
pub trait DeviceDriver: Send {
    fn name(&self) -> &str;

    /// Find and configure the device. Fails with
    /// [`SensorError::DeviceUnavailable`] when no device or runtime is present.
    fn connect(&mut self, request: &StreamRequest) -> Result<DriverInfo>;

    /// Begin delivering frames into `sink`
    fn start(&mut self, sink: FrameSink) -> Result<()>;

    /// Deliver pending frames on the caller's thread. Drivers with their own
    /// delivery thread leave this as a no-op.
    fn pump(&mut self) {}

    /// Stop streaming and release the device. Must tolerate being called on a
    /// driver that never connected.
    fn disconnect(&mut self);
}

/// Driver for a device whose runtime is not installed
pub struct MissingDriver {
    device: String,
}

impl MissingDriver {
    pub fn new<S: Into<String>>(device: S) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl DeviceDriver for MissingDriver {
    fn name(&self) -> &str {
        &self.device
    }

    fn connect(&mut self, _request: &StreamRequest) -> Result<DriverInfo> {
        Err(SensorError::device_unavailable(format!(
            "no {} runtime installed",
            self.device
        )))
    }

    fn start(&mut self, _sink: FrameSink) -> Result<()> {
        Err(SensorError::device_unavailable(format!("{} is not connected", self.device)))
    }

    fn disconnect(&mut self) {}
}

/// Latest frame of one stream plus its "ready" flag
struct StreamSlot<T> {
    frame: Mutex<Option<T>>,
    ready: AtomicBool,
}

impl<T> Default for StreamSlot<T> {
    fn default() -> Self {
        Self {
            frame: Mutex::new(None),
            ready: AtomicBool::new(false),
        }
    }
}

impl<T> StreamSlot<T> {
    fn publish(&self, frame: T) {
        let mut slot = self.frame.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(frame);
        self.ready.store(true, Ordering::Release);
    }

    fn take(&self) -> Option<T> {
        if !self.ready.load(Ordering::Acquire) {
            return None;
        }
        let mut slot = self.frame.lock().unwrap_or_else(PoisonError::into_inner);
        self.ready.store(false, Ordering::Release);
        slot.take()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn clear(&self) {
        let mut slot = self.frame.lock().unwrap_or_else(PoisonError::into_inner);
        self.ready.store(false, Ordering::Release);
        *slot = None;
    }
}

#[derive(Default)]
struct SinkStreams {
    color: StreamSlot<NativeImage<u8>>,
    depth: StreamSlot<NativeImage<u16>>,
    body_index: StreamSlot<NativeImage<u8>>,
    body: StreamSlot<NativeBodyFrame>,
}

/// Hand-off point between a driver and its backend.
///
/// Each stream has its own lock and ready flag, so streams never wait on each
/// other. A publish replaces any frame the backend has not consumed yet, and
/// a take only ever sees a completely written frame.
#[derive(Clone, Default)]
pub struct FrameSink {
    streams: Arc<SinkStreams>,
}

impl FrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_color(&self, frame: NativeImage<u8>) {
        self.streams.color.publish(frame);
    }

    pub fn publish_depth(&self, frame: NativeImage<u16>) {
        self.streams.depth.publish(frame);
    }

    pub fn publish_body_index(&self, frame: NativeImage<u8>) {
        self.streams.body_index.publish(frame);
    }

    pub fn publish_body(&self, frame: NativeBodyFrame) {
        self.streams.body.publish(frame);
    }

    pub fn take_color(&self) -> Option<NativeImage<u8>> {
        self.streams.color.take()
    }

    pub fn take_depth(&self) -> Option<NativeImage<u16>> {
        self.streams.depth.take()
    }

    pub fn take_body_index(&self) -> Option<NativeImage<u8>> {
        self.streams.body_index.take()
    }

    pub fn take_body(&self) -> Option<NativeBodyFrame> {
        self.streams.body.take()
    }

    /// Publish the frames of `set` whose stream is in `sources`
    pub fn publish_set(&self, set: NativeFrameSet, sources: FrameSources) {
        if let Some(frame) = set.color.filter(|_| sources.contains(FrameSources::COLOR)) {
            self.publish_color(frame);
        }
        if let Some(frame) = set.depth.filter(|_| sources.contains(FrameSources::DEPTH)) {
            self.publish_depth(frame);
        }
        if let Some(frame) = set
            .body_index
            .filter(|_| sources.contains(FrameSources::BODY_INDEX))
        {
            self.publish_body_index(frame);
        }
        if let Some(frame) = set.body.filter(|_| sources.contains(FrameSources::BODY)) {
            self.publish_body(frame);
        }
    }

    /// Streams with an unconsumed frame
    pub fn ready(&self) -> FrameSources {
        let mut ready = FrameSources::NONE;
        if self.streams.color.is_ready() {
            ready |= FrameSources::COLOR;
        }
        if self.streams.depth.is_ready() {
            ready |= FrameSources::DEPTH;
        }
        if self.streams.body_index.is_ready() {
            ready |= FrameSources::BODY_INDEX;
        }
        if self.streams.body.is_ready() {
            ready |= FrameSources::BODY;
        }
        ready
    }

    /// Whether every stream in `sources` has an unconsumed frame
    pub fn all_ready(&self, sources: FrameSources) -> bool {
        self.ready().contains(sources & FrameSources::TRACKING)
    }

    /// Drop every pending frame
    pub fn clear(&self) {
        self.streams.color.clear();
        self.streams.depth.clear();
        self.streams.body_index.clear();
        self.streams.body.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_take_clears_only_that_stream() {
        let sink = FrameSink::new();
        sink.publish_depth(NativeImage::filled(4, 2, 1000u16, 1));
        sink.publish_body(NativeBodyFrame {
            timestamp: 1,
            ..Default::default()
        });
        assert_eq!(sink.ready(), FrameSources::DEPTH | FrameSources::BODY);

        let depth = sink.take_depth().unwrap();
        assert_eq!(depth.data.len(), 8);
        assert_eq!(sink.ready(), FrameSources::BODY);
        assert!(sink.take_depth().is_none());
    }

    #[test]
    fn test_newer_frame_replaces_unconsumed() {
        let sink = FrameSink::new();
        sink.publish_color(NativeImage::filled(1, 1, 0u8, 1));
        sink.publish_color(NativeImage::filled(1, 1, 0u8, 2));
        assert_eq!(sink.take_color().unwrap().timestamp, 2);
    }

    #[test]
    fn test_all_ready_requires_every_stream() {
        let sink = FrameSink::new();
        let wanted = FrameSources::DEPTH | FrameSources::BODY;
        sink.publish_depth(NativeImage::filled(1, 1, 0u16, 1));
        assert!(!sink.all_ready(wanted));
        sink.publish_body(NativeBodyFrame::default());
        assert!(sink.all_ready(wanted));
        // Infrared has no stream slot and is ignored
        assert!(sink.all_ready(wanted | FrameSources::INFRARED));
    }

    #[test]
    fn test_clones_share_streams() {
        let sink = FrameSink::new();
        let producer = sink.clone();
        let handle = std::thread::spawn(move || {
            producer.publish_body(NativeBodyFrame {
                timestamp: 7,
                ..Default::default()
            });
        });
        handle.join().unwrap();
        assert_eq!(sink.take_body().unwrap().timestamp, 7);
    }

    #[test]
    fn test_publish_set_filters_sources() {
        let sink = FrameSink::new();
        let set = NativeFrameSet {
            depth: Some(NativeImage::filled(2, 2, 900u16, 4)),
            body: Some(NativeBodyFrame {
                timestamp: 4,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(set.sources(), FrameSources::DEPTH | FrameSources::BODY);
        assert_eq!(set.clone().shifted(10).max_timestamp(), 14);
        sink.publish_set(set, FrameSources::BODY | FrameSources::COLOR);
        assert_eq!(sink.ready(), FrameSources::BODY);
    }

    #[test]
    fn test_missing_driver_is_unavailable() {
        let mut driver = MissingDriver::new("Kinect v2");
        let err = driver.connect(&StreamRequest::default()).unwrap_err();
        assert!(err.is_recoverable());
        driver.disconnect();
    }
}
