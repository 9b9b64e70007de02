//! Image buffer helpers: native frame conversion, orientation, and images
//! derived from the depth and body-index streams

use crate::backend::driver::NativeImage;
use crate::mapping::{is_unmapped, CoordinateMapper};
use crate::types::{ColorFormat, NO_BODY};
use image::{imageops, GrayImage, Luma, Rgba, RgbaImage};
use ndarray::{s, Array2, ArrayView2, Zip};

/// Display colors for body slots, cycled when there are more slots
const SLOT_COLORS: [[u8; 3]; 6] = [
    [230, 25, 75],
    [60, 180, 75],
    [0, 130, 200],
    [245, 130, 48],
    [145, 30, 180],
    [70, 240, 240],
];

/// Fixed color for a body slot
pub fn slot_color(slot: usize) -> Rgba<u8> {
    let [r, g, b] = SLOT_COLORS[slot % SLOT_COLORS.len()];
    Rgba([r, g, b, 255])
}

/// Convert a native color frame into `out` (resized if needed), then apply
/// the orientation flips
pub fn native_color_to_rgba(
    frame: &NativeImage<u8>,
    format: ColorFormat,
    mirror: bool,
    flip_vertically: bool,
    out: &mut RgbaImage,
) -> bool {
    let bpp = format.bytes_per_pixel();
    let expected = frame.width as usize * frame.height as usize * bpp;
    if frame.data.len() != expected {
        log::warn!(
            "Color frame {}x{} has {} bytes, expected {}",
            frame.width,
            frame.height,
            frame.data.len(),
            expected
        );
        return false;
    }
    if out.dimensions() != (frame.width, frame.height) {
        *out = RgbaImage::new(frame.width, frame.height);
    }

    for (dst, src) in out.pixels_mut().zip(frame.data.chunks_exact(bpp)) {
        *dst = match format {
            ColorFormat::Rgba => Rgba([src[0], src[1], src[2], src[3]]),
            ColorFormat::Bgra => Rgba([src[2], src[1], src[0], src[3]]),
            ColorFormat::Rgb => Rgba([src[0], src[1], src[2], 255]),
        };
    }

    if mirror {
        imageops::flip_horizontal_in_place(out);
    }
    if flip_vertically {
        imageops::flip_vertical_in_place(out);
    }
    true
}

/// Copy a native single-channel frame into `out`, optionally mirrored, decoding
/// each sample with `decode`
pub fn native_plane_into<T, U, F>(
    frame: &NativeImage<T>,
    mirror: bool,
    out: &mut Array2<U>,
    decode: F,
) -> bool
where
    T: Copy + Sync,
    U: Copy + Send + Default,
    F: Fn(T) -> U + Sync + Send,
{
    let shape = (frame.height as usize, frame.width as usize);
    let src = match ArrayView2::from_shape(shape, &frame.data) {
        Ok(src) => src,
        Err(e) => {
            log::warn!("Malformed {}x{} frame: {}", frame.width, frame.height, e);
            return false;
        }
    };
    if out.dim() != shape {
        *out = Array2::from_elem(shape, U::default());
    }
    let src = if mirror { src.slice_move(s![.., ..;-1]) } else { src };
    Zip::from(out).and(src).par_for_each(|dst, &raw| *dst = decode(raw));
    true
}

/// Color image resampled onto the depth grid: each depth pixel takes the color
/// it maps to. Pixels without depth or outside the color frame are transparent.
pub fn registered_color(
    color: &RgbaImage,
    depth: ArrayView2<u16>,
    mapper: &CoordinateMapper,
) -> RgbaImage {
    let (rows, cols) = depth.dim();
    let coords = mapper.map_depth_frame_to_color(depth);
    let (cw, ch) = color.dimensions();
    RgbaImage::from_fn(cols as u32, rows as u32, |x, y| {
        let p = coords[[y as usize, x as usize]];
        if is_unmapped(&p) {
            return Rgba([0, 0, 0, 0]);
        }
        let (u, v) = (p.x.round(), p.y.round());
        if u < 0.0 || v < 0.0 || u >= cw as f32 || v >= ch as f32 {
            return Rgba([0, 0, 0, 0]);
        }
        *color.get_pixel(u as u32, v as u32)
    })
}

/// Body-index image painted with slot colors.
///
/// `index_to_slot[i]` is the slot of the body the device reports at index
/// `i`. Pixels of bodies without a slot, and background, are transparent.
pub fn user_silhouette(body_index: ArrayView2<u8>, index_to_slot: &[Option<usize>]) -> RgbaImage {
    let (rows, cols) = body_index.dim();
    RgbaImage::from_fn(cols as u32, rows as u32, |x, y| {
        let index = body_index[[y as usize, x as usize]];
        if index == NO_BODY {
            return Rgba([0, 0, 0, 0]);
        }
        match index_to_slot.get(index as usize).copied().flatten() {
            Some(slot) => slot_color(slot),
            None => Rgba([0, 0, 0, 0]),
        }
    })
}

/// Grayscale depth preview, near is bright. Depth outside the range is black.
pub fn depth_preview(depth: ArrayView2<u16>, min_mm: u16, max_mm: u16) -> GrayImage {
    let (rows, cols) = depth.dim();
    let span = max_mm.saturating_sub(min_mm).max(1) as f32;
    GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        let d = depth[[y as usize, x as usize]];
        if d < min_mm || d > max_mm || d == 0 {
            return Luma([0]);
        }
        let t = (d - min_mm) as f32 / span;
        Luma([(255.0 - t * 223.0).round() as u8])
    })
}
