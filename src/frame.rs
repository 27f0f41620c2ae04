//! Frame and plane representations.
//!
//! Pixels travel through the pipeline in one of three tagged formats:
//!
//! - `Frame::Packed`: 8-bit RGB, as produced by the JPEG codec.
//! - `Frame::Gray`: a single float `Plane` (motion masks).
//! - `Frame::Color`: a `PlaneTriple` of gamma-adjusted float planes (background model).
//!
//! Each format has an explicit conversion to packed RGB (`Frame::as_rgb`). Float
//! planes hold samples in [0,1] in square-root gamma space, so the conversion
//! clamps and squares them before quantizing.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use std::borrow::Cow;
use std::sync::Arc;

/// A decoded frame shared between the decoder, the worker and every viewer.
pub type SharedFrame = Arc<Frame>;

/// Per-pixel motion indicator: 1.0 where motion was detected, 0.0 elsewhere.
pub type MotionMask = Plane;

// ----------------------------------------------------------------------------
// Plane: one channel of float samples
// ----------------------------------------------------------------------------

/// A `width x height` grid of floats in one contiguous buffer.
///
/// Rows are slices into the buffer; there is no per-row allocation.
#[derive(Clone, Debug, PartialEq)]
pub struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    /// Zero-filled plane.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != width * height {
            return Err(anyhow!(
                "plane buffer holds {} samples, expected {}x{}",
                data.len(),
                width,
                height
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Plane with every sample set to `value`.
    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        self.data[y * self.width + x] = value;
    }

    /// Number of non-zero samples (the "mass" of a mask).
    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|v| **v != 0.0).count()
    }

    fn same_size(&self, other: &Plane) -> bool {
        self.width == other.width && self.height == other.height
    }
}

// ----------------------------------------------------------------------------
// PlaneTriple: three same-sized color planes
// ----------------------------------------------------------------------------

/// Three color planes of identical dimensions.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaneTriple {
    planes: [Plane; 3],
}

impl PlaneTriple {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            planes: [
                Plane::new(width, height),
                Plane::new(width, height),
                Plane::new(width, height),
            ],
        }
    }

    pub fn from_planes(planes: [Plane; 3]) -> Result<Self> {
        if !planes[0].same_size(&planes[1]) || !planes[0].same_size(&planes[2]) {
            return Err(anyhow!(
                "color planes differ in size: {}x{}, {}x{}, {}x{}",
                planes[0].width,
                planes[0].height,
                planes[1].width,
                planes[1].height,
                planes[2].width,
                planes[2].height
            ));
        }
        Ok(Self { planes })
    }

    /// Gray plane replicated into all three channels.
    pub fn from_gray(plane: &Plane) -> Self {
        Self {
            planes: [plane.clone(), plane.clone(), plane.clone()],
        }
    }

    /// Triple whose three planes are all `value` everywhere.
    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            planes: [
                Plane::filled(width, height, value),
                Plane::filled(width, height, value),
                Plane::filled(width, height, value),
            ],
        }
    }

    pub fn width(&self) -> usize {
        self.planes[0].width
    }

    pub fn height(&self) -> usize {
        self.planes[0].height
    }

    pub fn planes(&self) -> &[Plane; 3] {
        &self.planes
    }

    pub fn planes_mut(&mut self) -> &mut [Plane; 3] {
        &mut self.planes
    }

    pub fn plane(&self, channel: usize) -> &Plane {
        &self.planes[channel]
    }

    /// Sets the three channel samples at (x, y).
    pub fn set_pixel(&mut self, x: usize, y: usize, value: [f32; 3]) {
        for (plane, v) in self.planes.iter_mut().zip(value) {
            plane.set(x, y, v);
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> [f32; 3] {
        [
            self.planes[0].get(x, y),
            self.planes[1].get(x, y),
            self.planes[2].get(x, y),
        ]
    }

    pub fn same_size(&self, other: &PlaneTriple) -> bool {
        self.planes[0].same_size(&other.planes[0])
    }
}

// ----------------------------------------------------------------------------
// Frame: tagged pixel format
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub enum Frame {
    Packed(RgbImage),
    Gray(Plane),
    Color(PlaneTriple),
}

impl Frame {
    pub fn width(&self) -> u32 {
        match self {
            Frame::Packed(image) => image.width(),
            Frame::Gray(plane) => plane.width() as u32,
            Frame::Color(planes) => planes.width() as u32,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Frame::Packed(image) => image.height(),
            Frame::Gray(plane) => plane.height() as u32,
            Frame::Color(planes) => planes.height() as u32,
        }
    }

    /// Packed RGB view of the frame, converting float formats on the fly.
    pub fn as_rgb(&self) -> Cow<'_, RgbImage> {
        match self {
            Frame::Packed(image) => Cow::Borrowed(image),
            Frame::Gray(plane) => Cow::Owned(gray_to_rgb(plane)),
            Frame::Color(planes) => Cow::Owned(color_to_rgb(planes)),
        }
    }

    pub fn into_rgb(self) -> RgbImage {
        match self {
            Frame::Packed(image) => image,
            other => other.as_rgb().into_owned(),
        }
    }
}

/// Undo the square-root gamma and quantize to 8 bits.
fn to_u8(sample: f32) -> u8 {
    let v = sample.clamp(0.0, 1.0);
    (v * v * 255.0).round() as u8
}

fn gray_to_rgb(plane: &Plane) -> RgbImage {
    let mut out = RgbImage::new(plane.width() as u32, plane.height() as u32);
    for (pixel, sample) in out.pixels_mut().zip(plane.as_slice()) {
        let v = to_u8(*sample);
        *pixel = Rgb([v, v, v]);
    }
    out
}

fn color_to_rgb(planes: &PlaneTriple) -> RgbImage {
    let [r, g, b] = planes.planes();
    let mut out = RgbImage::new(planes.width() as u32, planes.height() as u32);
    for (i, pixel) in out.pixels_mut().enumerate() {
        *pixel = Rgb([
            to_u8(r.as_slice()[i]),
            to_u8(g.as_slice()[i]),
            to_u8(b.as_slice()[i]),
        ]);
    }
    out
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_is_row_major() {
        let mut plane = Plane::new(3, 2);
        for (x, value) in [1.0, 2.0, 3.0].into_iter().enumerate() {
            plane.set(x, 1, value);
        }

        assert_eq!(plane.get(0, 0), 0.0);
        assert_eq!(plane.get(2, 1), 3.0);
        assert_eq!(plane.as_slice(), &[0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
        assert_eq!(plane.count_nonzero(), 3);
    }

    #[test]
    fn plane_rejects_wrong_buffer_length() {
        assert!(Plane::from_vec(4, 4, vec![0.0; 15]).is_err());
        assert!(Plane::from_vec(4, 4, vec![0.0; 16]).is_ok());
    }

    #[test]
    fn triple_requires_matching_planes() {
        let mismatched = [Plane::new(2, 2), Plane::new(2, 2), Plane::new(3, 2)];
        assert!(PlaneTriple::from_planes(mismatched).is_err());

        let triple = PlaneTriple::from_planes([Plane::new(2, 2), Plane::new(2, 2), Plane::new(2, 2)])
            .expect("matching planes");
        assert_eq!((triple.width(), triple.height()), (2, 2));
    }

    #[test]
    fn gray_frame_converts_through_inverse_gamma() {
        let plane = Plane::from_vec(2, 1, vec![1.0, 0.5]).unwrap();
        let rgb = Frame::Gray(plane).into_rgb();

        assert_eq!(rgb.get_pixel(0, 0), &Rgb([255, 255, 255]));
        // 0.5^2 * 255 = 63.75
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([64, 64, 64]));
    }

    #[test]
    fn color_frame_clamps_out_of_range_samples() {
        let mut triple = PlaneTriple::new(1, 1);
        triple.set_pixel(0, 0, [2.0, -1.0, 1.0]);
        let rgb = Frame::Color(triple).into_rgb();

        assert_eq!(rgb.get_pixel(0, 0), &Rgb([255, 0, 255]));
    }

    #[test]
    fn packed_frame_is_borrowed_not_copied() {
        let frame = Frame::Packed(RgbImage::new(4, 3));
        assert!(matches!(frame.as_rgb(), Cow::Borrowed(_)));
        assert_eq!((frame.width(), frame.height()), (4, 3));
    }
}
