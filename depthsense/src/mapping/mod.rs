//! Coordinate mapping between depth pixels, color pixels and sensor space
//!
//! Sensor space is right-handed, in meters: x to the right in the canonical
//! (mirror-view) image, y up, z pointing away from the sensor. Pixel
//! coordinates are (column, row) in the canonical image orientation. Depth
//! values are millimeters, 0 meaning "no reading".
//!
//! Point conversions that cannot be answered (no depth, point behind the
//! camera, no calibration) return the zero vector. Batch conversions mark
//! such pixels with [`UNMAPPED`].

pub mod synthesis;

use crate::types::ImageOrientation;
use nalgebra::{Isometry3, Matrix4, Point3, Translation3, UnitQuaternion, Vector2, Vector3};
use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

/// Batch-mapping marker for pixels without a valid correspondence
pub const UNMAPPED: Vector2<f32> = Vector2::new(f32::NEG_INFINITY, f32::NEG_INFINITY);

/// Fixed-point iterations used to invert radial distortion
const UNDISTORT_ITERATIONS: usize = 20;

const MM_TO_M: f32 = 0.001;

pub fn is_unmapped(p: &Vector2<f32>) -> bool {
    !p.x.is_finite() || !p.y.is_finite()
}

/// Pinhole intrinsics with radial distortion, in native image orientation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub k1: f32,
    pub k2: f32,
    pub k3: f32,
}

impl CameraIntrinsics {
    pub fn new(width: u32, height: u32, fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self {
            width,
            height,
            fx,
            fy,
            cx,
            cy,
            k1: 0.0,
            k2: 0.0,
            k3: 0.0,
        }
    }

    /// Undistorted intrinsics from horizontal and vertical fields of view
    pub fn from_fov(width: u32, height: u32, hfov_deg: f32, vfov_deg: f32) -> Self {
        let fx = width as f32 * 0.5 / (hfov_deg.to_radians() * 0.5).tan();
        let fy = height as f32 * 0.5 / (vfov_deg.to_radians() * 0.5).tan();
        Self::new(
            width,
            height,
            fx,
            fy,
            (width as f32 - 1.0) * 0.5,
            (height as f32 - 1.0) * 0.5,
        )
    }

    pub fn with_distortion(mut self, k1: f32, k2: f32, k3: f32) -> Self {
        self.k1 = k1;
        self.k2 = k2;
        self.k3 = k3;
        self
    }

    /// Same camera at another resolution
    pub fn scaled(&self, width: u32, height: u32) -> Self {
        let sx = width as f32 / self.width as f32;
        let sy = height as f32 / self.height as f32;
        Self {
            width,
            height,
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
            ..*self
        }
    }

    /// Horizontal and vertical field of view in degrees
    pub fn fov(&self) -> (f32, f32) {
        let h = 2.0 * (self.width as f32 * 0.5 / self.fx).atan();
        let v = 2.0 * (self.height as f32 * 0.5 / self.fy).atan();
        (h.to_degrees(), v.to_degrees())
    }

    fn has_distortion(&self) -> bool {
        self.k1 != 0.0 || self.k2 != 0.0 || self.k3 != 0.0
    }

    fn radial(&self, r2: f32) -> f32 {
        1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3))
    }

    pub fn distort(&self, n: Vector2<f32>) -> Vector2<f32> {
        n * self.radial(n.norm_squared())
    }

    pub fn undistort(&self, d: Vector2<f32>) -> Vector2<f32> {
        if !self.has_distortion() {
            return d;
        }
        let mut n = d;
        for _ in 0..UNDISTORT_ITERATIONS {
            let factor = self.radial(n.norm_squared());
            if factor <= f32::EPSILON {
                break;
            }
            n = d / factor;
        }
        n
    }

    /// Distorted normalized coordinates of a pixel, y up
    fn normalize(&self, pixel: Vector2<f32>) -> Vector2<f32> {
        Vector2::new((pixel.x - self.cx) / self.fx, (self.cy - pixel.y) / self.fy)
    }

    fn to_pixel(&self, n: Vector2<f32>) -> Vector2<f32> {
        Vector2::new(self.cx + self.fx * n.x, self.cy - self.fy * n.y)
    }

    /// Ray (x/z, y/z) through a pixel
    pub fn ray(&self, pixel: Vector2<f32>) -> Vector2<f32> {
        self.undistort(self.normalize(pixel))
    }

    /// Pixel of a camera-space point, `None` behind the camera
    pub fn project(&self, p: &Vector3<f32>) -> Option<Vector2<f32>> {
        if p.z <= 0.0 {
            return None;
        }
        let n = Vector2::new(p.x / p.z, p.y / p.z);
        Some(self.to_pixel(self.distort(n)))
    }

    /// Camera-space point at depth `z` meters through `pixel`
    pub fn unproject(&self, pixel: Vector2<f32>, z: f32) -> Vector3<f32> {
        let ray = self.ray(pixel);
        Vector3::new(ray.x * z, ray.y * z, z)
    }
}

/// Calibration a mapper is built from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapperConfig {
    pub depth: CameraIntrinsics,
    pub color: CameraIntrinsics,
    /// Rigid transform from depth camera space to color camera space
    pub depth_to_color: Isometry3<f32>,
    /// Color frames are already registered pixel-for-pixel to depth
    pub hardware_registration: bool,
    pub orientation: ImageOrientation,
}

/// Depth/color/space conversions for one calibrated device.
///
/// The per-pixel ray table is built once and never mutated, so a mapper can
/// be shared freely behind an `Arc`.
#[derive(Debug, Clone)]
pub struct CoordinateMapper {
    config: MapperConfig,
    /// Canonical-space ray (x/z, y/z) of each canonical depth pixel
    rays: Array2<Vector2<f32>>,
}

impl CoordinateMapper {
    pub fn new(config: MapperConfig) -> Self {
        let (w, h) = (config.depth.width as usize, config.depth.height as usize);
        let mut rays = Array2::from_elem((h, w), Vector2::zeros());
        let mirror = config.orientation.mirror;
        let depth = config.depth;
        Zip::indexed(&mut rays).par_for_each(|(row, col), ray| {
            let native_col = if mirror { w - 1 - col } else { col };
            let mut r = depth.ray(Vector2::new(native_col as f32, row as f32));
            if mirror {
                r.x = -r.x;
            }
            *ray = r;
        });
        log::debug!(
            "Built {}x{} depth ray table (mirror={})",
            w,
            h,
            mirror
        );
        Self { config, rays }
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn depth_intrinsics(&self) -> &CameraIntrinsics {
        &self.config.depth
    }

    pub fn color_intrinsics(&self) -> &CameraIntrinsics {
        &self.config.color
    }

    pub fn ray_table(&self) -> ArrayView2<'_, Vector2<f32>> {
        self.rays.view()
    }

    fn reflect(&self, mut v: Vector3<f32>) -> Vector3<f32> {
        if self.config.orientation.mirror {
            v.x = -v.x;
        }
        v
    }

    fn depth_pixel_to_native(&self, p: Vector2<f32>) -> Vector2<f32> {
        if self.config.orientation.mirror {
            Vector2::new((self.config.depth.width - 1) as f32 - p.x, p.y)
        } else {
            p
        }
    }

    fn color_pixel_from_native(&self, p: Vector2<f32>) -> Vector2<f32> {
        let color = &self.config.color;
        let mut out = p;
        if self.config.orientation.mirror {
            out.x = (color.width - 1) as f32 - out.x;
        }
        if self.config.orientation.flip_color_vertically {
            out.y = (color.height - 1) as f32 - out.y;
        }
        out
    }

    fn table_ray(&self, p: &Vector2<f32>) -> Option<Vector2<f32>> {
        if p.x < 0.0 || p.y < 0.0 || p.x.fract() != 0.0 || p.y.fract() != 0.0 {
            return None;
        }
        self.rays.get((p.y as usize, p.x as usize)).copied()
    }

    /// Sensor-space point (meters) of a depth pixel with depth `depth_mm`
    pub fn map_depth_point_to_space(&self, depth_pos: Vector2<f32>, depth_mm: u16) -> Vector3<f32> {
        if depth_mm == 0 {
            return Vector3::zeros();
        }
        let z = depth_mm as f32 * MM_TO_M;
        let ray = match self.table_ray(&depth_pos) {
            Some(ray) => ray,
            None => {
                let native = self.depth_pixel_to_native(depth_pos);
                let mut ray = self.config.depth.ray(native);
                if self.config.orientation.mirror {
                    ray.x = -ray.x;
                }
                ray
            }
        };
        Vector3::new(ray.x * z, ray.y * z, z)
    }

    /// Depth pixel of a sensor-space point
    pub fn map_space_point_to_depth(&self, space: Vector3<f32>) -> Vector2<f32> {
        match self.config.depth.project(&self.reflect(space)) {
            Some(native) => self.depth_pixel_to_native(native),
            None => Vector2::zeros(),
        }
    }

    /// Color pixel seen at a depth pixel with depth `depth_mm`
    pub fn map_depth_point_to_color(&self, depth_pos: Vector2<f32>, depth_mm: u16) -> Vector2<f32> {
        if depth_mm == 0 {
            return Vector2::zeros();
        }
        let (depth, color) = (&self.config.depth, &self.config.color);
        if self.config.hardware_registration {
            return Vector2::new(
                depth_pos.x * color.width as f32 / depth.width as f32,
                depth_pos.y * color.height as f32 / depth.height as f32,
            );
        }

        let native_space = self.reflect(self.map_depth_point_to_space(depth_pos, depth_mm));
        let in_color = self.config.depth_to_color * Point3::from(native_space);
        match color.project(&in_color.coords) {
            Some(native) => self.color_pixel_from_native(native),
            None => Vector2::zeros(),
        }
    }

    /// Sensor-space point of every depth pixel
    pub fn map_depth_frame_to_space(&self, depth: ArrayView2<u16>) -> Array2<Vector3<f32>> {
        let mut out = Array2::from_elem(depth.dim(), Vector3::zeros());
        if depth.dim() != self.rays.dim() {
            log::warn!(
                "Depth frame {:?} does not match calibration {:?}",
                depth.dim(),
                self.rays.dim()
            );
            return out;
        }
        Zip::from(&mut out)
            .and(&depth)
            .and(&self.rays)
            .par_for_each(|point, &d, ray| {
                if d != 0 {
                    let z = d as f32 * MM_TO_M;
                    *point = Vector3::new(ray.x * z, ray.y * z, z);
                }
            });
        out
    }

    /// Color pixel of every depth pixel, [`UNMAPPED`] where depth is missing
    pub fn map_depth_frame_to_color(&self, depth: ArrayView2<u16>) -> Array2<Vector2<f32>> {
        let mut out = Array2::from_elem(depth.dim(), UNMAPPED);
        if depth.dim() != self.rays.dim() {
            log::warn!(
                "Depth frame {:?} does not match calibration {:?}",
                depth.dim(),
                self.rays.dim()
            );
            return out;
        }
        Zip::indexed(&mut out)
            .and(&depth)
            .par_for_each(|(row, col), color_pos, &d| {
                if d != 0 {
                    *color_pos =
                        self.map_depth_point_to_color(Vector2::new(col as f32, row as f32), d);
                }
            });
        out
    }

    /// Depth pixel behind every color pixel, [`UNMAPPED`] where no depth
    /// pixel lands. When several depth pixels cover one color pixel the
    /// nearest wins.
    pub fn map_color_frame_to_depth(&self, depth: ArrayView2<u16>) -> Array2<Vector2<f32>> {
        let color = &self.config.color;
        let (cw, ch) = (color.width as usize, color.height as usize);
        let mut out = Array2::from_elem((ch, cw), UNMAPPED);
        let color_coords = self.map_depth_frame_to_color(depth);

        // Footprint of one depth pixel in color pixels
        let sx = (cw as f32 / self.config.depth.width as f32).ceil().max(1.0) as usize;
        let sy = (ch as f32 / self.config.depth.height as f32).ceil().max(1.0) as usize;
        let mut nearest = Array2::from_elem((ch, cw), u16::MAX);

        for ((row, col), color_pos) in color_coords.indexed_iter() {
            let d = depth[[row, col]];
            if d == 0 || is_unmapped(color_pos) {
                continue;
            }
            let (x0, y0) = (color_pos.x.floor(), color_pos.y.floor());
            if x0 < -(sx as f32) || y0 < -(sy as f32) || x0 >= cw as f32 || y0 >= ch as f32 {
                continue;
            }
            for y in (y0 as i64).max(0)..(y0 as i64 + sy as i64).min(ch as i64) {
                for x in (x0 as i64).max(0)..(x0 as i64 + sx as i64).min(cw as i64) {
                    let idx = (y as usize, x as usize);
                    if d < nearest[idx] {
                        nearest[idx] = d;
                        out[idx] = Vector2::new(col as f32, row as f32);
                    }
                }
            }
        }
        out
    }
}

/// Mapping-space transform for a sensor mounted `height` meters above the
/// floor and tilted `tilt_deg` degrees up. The result maps sensor space into a
/// floor-anchored frame with y up.
pub fn sensor_to_world(height: f32, tilt_deg: f32) -> Matrix4<f32> {
    let rotation = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), -tilt_deg.to_radians());
    Isometry3::from_parts(Translation3::new(0.0, height, 0.0), rotation).to_homogeneous()
}

/// Apply a homogeneous transform to a point
pub fn transform_point(transform: &Matrix4<f32>, p: &Vector3<f32>) -> Vector3<f32> {
    transform.transform_point(&Point3::from(*p)).coords
}
