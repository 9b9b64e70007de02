//! State and stream handling shared by every backend variant

use crate::backend::driver::{DeviceDriver, DriverInfo, FrameSink, NativeBodyFrame, NativeImage};
use crate::error::{Result, SensorError};
use crate::image_ops;
use crate::mapping::{CameraIntrinsics, CoordinateMapper, MapperConfig};
use crate::types::{ColorFormat, FrameSources, ImageOrientation, SensorCapabilities, StreamRequest, NO_BODY};
use bodytrack::JOINT_COUNT;
use image::RgbaImage;
use nalgebra::Isometry3;
use ndarray::Array2;
use std::sync::Arc;

/// Fixed facts about one device family
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceProfile {
    pub name: &'static str,
    pub native_joint_count: usize,
    pub color_format: ColorFormat,
    pub orientation: ImageOrientation,
    pub hardware_registration: bool,
    /// Body indices ride in the low bits of depth pixels instead of having
    /// their own stream
    pub packed_body_index: bool,
    pub min_depth_mm: u16,
    pub max_depth_mm: u16,
    /// Nominal depth field of view (degrees)
    pub depth_fov: (f32, f32),
    /// Nominal color field of view (degrees)
    pub color_fov: (f32, f32),
    /// Factory depth calibration used when the driver reports none
    pub depth_calibration: Option<CameraIntrinsics>,
    pub color_calibration: Option<CameraIntrinsics>,
    /// Depth-to-color offset used when the driver has no calibration
    pub depth_to_color_offset: [f32; 3],
}

impl DeviceProfile {
    /// Intrinsics for the negotiated depth resolution
    pub fn depth_intrinsics(&self, info: &DriverInfo) -> CameraIntrinsics {
        let (w, h) = info.depth_size;
        match info.depth_intrinsics.or(self.depth_calibration) {
            Some(intr) if (intr.width, intr.height) == (w, h) => intr,
            Some(intr) => intr.scaled(w, h),
            None => CameraIntrinsics::from_fov(w, h, self.depth_fov.0, self.depth_fov.1),
        }
    }

    pub fn color_intrinsics(&self, info: &DriverInfo) -> CameraIntrinsics {
        let (w, h) = info.color_size;
        match info.color_intrinsics.or(self.color_calibration) {
            Some(intr) if (intr.width, intr.height) == (w, h) => intr,
            Some(intr) => intr.scaled(w, h),
            None => CameraIntrinsics::from_fov(w, h, self.color_fov.0, self.color_fov.1),
        }
    }

    pub fn depth_to_color(&self, info: &DriverInfo) -> Isometry3<f32> {
        info.depth_to_color.unwrap_or_else(|| {
            let [x, y, z] = self.depth_to_color_offset;
            Isometry3::translation(x, y, z)
        })
    }
}

/// Frames already taken from the sink but not yet consumed by a poll
#[derive(Default)]
struct Latched {
    color: Option<NativeImage<u8>>,
    depth: Option<NativeImage<u16>>,
    body_index: Option<NativeImage<u8>>,
    body: Option<NativeBodyFrame>,
}

#[derive(Debug, Clone, Copy, Default)]
struct LastTimestamps {
    color: Option<u64>,
    depth: Option<u64>,
    body_index: Option<u64>,
    body: Option<u64>,
}

fn is_fresher(last: Option<u64>, timestamp: u64) -> bool {
    last.map_or(true, |last| timestamp > last)
}

/// Driver session, canonical frame buffers and mapper for one backend
pub struct BackendCore {
    driver: Box<dyn DeviceDriver>,
    profile: DeviceProfile,
    sink: FrameSink,
    request: StreamRequest,
    capabilities: Option<SensorCapabilities>,
    mapper: Option<Arc<CoordinateMapper>>,
    color: RgbaImage,
    depth: Array2<u16>,
    body_index: Array2<u8>,
    latched: Latched,
    last: LastTimestamps,
    connected: bool,
}

impl BackendCore {
    pub fn new(driver: Box<dyn DeviceDriver>, profile: DeviceProfile) -> Self {
        Self {
            driver,
            profile,
            sink: FrameSink::new(),
            request: StreamRequest::default(),
            capabilities: None,
            mapper: None,
            color: RgbaImage::new(0, 0),
            depth: Array2::zeros((0, 0)),
            body_index: Array2::zeros((0, 0)),
            latched: Latched::default(),
            last: LastTimestamps::default(),
            connected: false,
        }
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    pub fn is_open(&self) -> bool {
        self.capabilities.is_some()
    }

    pub fn capabilities(&self) -> Option<&SensorCapabilities> {
        self.capabilities.as_ref()
    }

    pub fn mapper(&self) -> Option<&Arc<CoordinateMapper>> {
        self.mapper.as_ref()
    }

    pub fn request(&self) -> &StreamRequest {
        &self.request
    }

    pub fn color(&self) -> &RgbaImage {
        &self.color
    }

    pub fn depth(&self) -> &Array2<u16> {
        &self.depth
    }

    pub fn body_index(&self) -> &Array2<u8> {
        &self.body_index
    }

    /// Connect the driver, size the buffers and build the mapper
    pub fn open(&mut self, request: &StreamRequest) -> Result<SensorCapabilities> {
        if self.is_open() {
            log::warn!("{} already open, reopening", self.profile.name);
            self.close();
        }

        let info = match self.driver.connect(request) {
            Ok(info) => info,
            Err(e) => {
                self.close();
                return Err(match e {
                    SensorError::DeviceUnavailable(_) => e,
                    other => SensorError::device_unavailable(format!(
                        "{}: {}",
                        self.profile.name, other
                    )),
                });
            }
        };
        self.connected = true;

        let (cw, ch) = info.color_size;
        let (dw, dh) = info.depth_size;
        if dw == 0 || dh == 0 || info.max_bodies == 0 {
            self.close();
            return Err(SensorError::device_unavailable(format!(
                "{} reported an unusable stream layout: depth {}x{}, {} bodies",
                self.profile.name, dw, dh, info.max_bodies
            )));
        }

        let profile = self.profile;
        let color_intrinsics = if cw > 0 && ch > 0 {
            profile.color_intrinsics(&info)
        } else {
            // No color stream: map onto the depth grid
            profile.depth_intrinsics(&info)
        };
        let mapper = CoordinateMapper::new(MapperConfig {
            depth: profile.depth_intrinsics(&info),
            color: color_intrinsics,
            depth_to_color: profile.depth_to_color(&info),
            hardware_registration: profile.hardware_registration,
            orientation: profile.orientation,
        });

        self.color = RgbaImage::new(cw, ch);
        self.depth = Array2::zeros((dh as usize, dw as usize));
        self.body_index = Array2::from_elem((dh as usize, dw as usize), NO_BODY);
        self.latched = Latched::default();
        self.last = LastTimestamps::default();
        self.request = *request;

        self.sink = FrameSink::new();
        if let Err(e) = self.driver.start(self.sink.clone()) {
            self.close();
            return Err(SensorError::device_unavailable(format!(
                "{} failed to start streaming: {}",
                self.profile.name, e
            )));
        }

        let capabilities = SensorCapabilities {
            backend: profile.name.to_string(),
            color_width: cw,
            color_height: ch,
            depth_width: dw,
            depth_height: dh,
            max_bodies: info.max_bodies,
            joint_count: JOINT_COUNT,
            native_joint_count: profile.native_joint_count,
            depth_fov: mapper.depth_intrinsics().fov(),
            color_fov: mapper.color_intrinsics().fov(),
            min_depth_mm: profile.min_depth_mm,
            max_depth_mm: profile.max_depth_mm,
            hardware_registration: profile.hardware_registration,
            orientation: profile.orientation,
            sources: request.sources,
        };
        self.mapper = Some(Arc::new(mapper));
        self.capabilities = Some(capabilities.clone());

        log::info!(
            "{} opened via {}: depth {}x{}, color {}x{}, {} bodies, sources {:?}",
            profile.name,
            self.driver.name(),
            dw,
            dh,
            cw,
            ch,
            info.max_bodies,
            request.sources
        );
        Ok(capabilities)
    }

    /// Release the driver and buffers. Safe to call repeatedly and on a
    /// partially opened core.
    pub fn close(&mut self) {
        if self.connected {
            self.driver.disconnect();
            self.connected = false;
            log::info!("{} closed", self.profile.name);
        }
        if self.mapper.take().is_some() {
            log::debug!("{} mapping tables released", self.profile.name);
        }
        self.capabilities = None;
        self.sink.clear();
        self.latched = Latched::default();
        self.last = LastTimestamps::default();
        self.color = RgbaImage::new(0, 0);
        self.depth = Array2::zeros((0, 0));
        self.body_index = Array2::zeros((0, 0));
    }

    /// Streams the driver delivers for the current request
    fn delivered(&self) -> FrameSources {
        let requested = self.request.sources;
        if self.profile.packed_body_index && requested.contains(FrameSources::BODY_INDEX) {
            FrameSources::from_bits(requested.bits() & !FrameSources::BODY_INDEX.bits())
                | FrameSources::DEPTH
        } else {
            requested
        }
    }

    fn wants(&self, source: FrameSources) -> bool {
        self.delivered().contains(source)
    }

    /// Give polled drivers a chance to deliver, then move the frame for
    /// `source` from the sink into the latch. With source sync, nothing moves
    /// until every requested stream has a frame, and then all of them move
    /// together; each stream's flag is still cleared on its own.
    fn collect(&mut self, source: FrameSources) {
        if !self.is_open() || !self.wants(source) {
            return;
        }
        self.driver.pump();

        if !self.request.sync_sources {
            self.latch(source);
            return;
        }

        let pending = self.latched.color.is_some()
            || self.latched.depth.is_some()
            || self.latched.body_index.is_some()
            || self.latched.body.is_some();
        let synced = self.delivered();
        if pending || !self.sink.all_ready(synced) {
            return;
        }
        for stream in [
            FrameSources::COLOR,
            FrameSources::DEPTH,
            FrameSources::BODY_INDEX,
            FrameSources::BODY,
        ] {
            if synced.contains(stream) {
                self.latch(stream);
            }
        }
    }

    fn latch(&mut self, source: FrameSources) {
        if source == FrameSources::COLOR {
            if let Some(frame) = self.sink.take_color() {
                self.latched.color = Some(frame);
            }
        } else if source == FrameSources::DEPTH {
            if let Some(frame) = self.sink.take_depth() {
                self.latched.depth = Some(frame);
            }
        } else if source == FrameSources::BODY_INDEX {
            if let Some(frame) = self.sink.take_body_index() {
                self.latched.body_index = Some(frame);
            }
        } else if source == FrameSources::BODY {
            if let Some(frame) = self.sink.take_body() {
                self.latched.body = Some(frame);
            }
        }
    }

    pub fn poll_color(&mut self) -> bool {
        self.collect(FrameSources::COLOR);
        let Some(frame) = self.latched.color.take() else {
            return false;
        };
        if !is_fresher(self.last.color, frame.timestamp) {
            return false;
        }
        let orientation = self.profile.orientation;
        let copied = image_ops::native_color_to_rgba(
            &frame,
            self.profile.color_format,
            orientation.mirror,
            orientation.flip_color_vertically,
            &mut self.color,
        );
        if copied {
            self.last.color = Some(frame.timestamp);
        }
        copied
    }

    /// Take the next fresher depth frame without decoding it
    pub fn take_depth_frame(&mut self) -> Option<NativeImage<u16>> {
        self.collect(FrameSources::DEPTH);
        let frame = self.latched.depth.take()?;
        if !is_fresher(self.last.depth, frame.timestamp) {
            return None;
        }
        self.last.depth = Some(frame.timestamp);
        Some(frame)
    }

    pub fn poll_depth(&mut self) -> bool {
        match self.take_depth_frame() {
            Some(frame) => self.store_depth(&frame, |d| d),
            None => false,
        }
    }

    /// Decode a native depth frame into the canonical depth buffer
    pub fn store_depth<F>(&mut self, frame: &NativeImage<u16>, decode: F) -> bool
    where
        F: Fn(u16) -> u16 + Sync + Send,
    {
        image_ops::native_plane_into(frame, self.profile.orientation.mirror, &mut self.depth, decode)
    }

    /// Decode a native frame into the canonical body-index buffer
    pub fn store_body_index<T, F>(&mut self, frame: &NativeImage<T>, decode: F) -> bool
    where
        T: Copy + Sync,
        F: Fn(T) -> u8 + Sync + Send,
    {
        image_ops::native_plane_into(
            frame,
            self.profile.orientation.mirror,
            &mut self.body_index,
            decode,
        )
    }

    pub fn poll_body_index(&mut self) -> bool {
        self.poll_body_index_with(|i| i)
    }

    /// Poll the body-index stream, translating native labels with `decode`
    pub fn poll_body_index_with<F>(&mut self, decode: F) -> bool
    where
        F: Fn(u8) -> u8 + Sync + Send,
    {
        self.collect(FrameSources::BODY_INDEX);
        let Some(frame) = self.latched.body_index.take() else {
            return false;
        };
        if !is_fresher(self.last.body_index, frame.timestamp) {
            return false;
        }
        let stored = self.store_body_index(&frame, decode);
        if stored {
            self.last.body_index = Some(frame.timestamp);
        }
        stored
    }

    /// Mark a body-index frame as produced outside the body-index stream
    pub fn note_body_index(&mut self, timestamp: u64) -> bool {
        if !is_fresher(self.last.body_index, timestamp) {
            return false;
        }
        self.last.body_index = Some(timestamp);
        true
    }

    /// Take the next fresher native body frame
    pub fn take_body_frame(&mut self) -> Option<NativeBodyFrame> {
        self.collect(FrameSources::BODY);
        let frame = self.latched.body.take()?;
        if !is_fresher(self.last.body, frame.timestamp) {
            return None;
        }
        self.last.body = Some(frame.timestamp);
        Some(frame)
    }
}

impl Drop for BackendCore {
    fn drop(&mut self) {
        self.close();
    }
}
