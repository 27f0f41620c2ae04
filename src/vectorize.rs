//! Frame to float-plane conversion.
//!
//! Every format becomes a `PlaneTriple` of samples in [0,1]. Packed 8-bit
//! channels are normalized and passed through a square-root gamma, a cheap
//! stand-in for a perceptual color space.

use std::sync::OnceLock;

use image::RgbImage;

use crate::frame::{Frame, PlaneTriple};

static GAMMA_LUT: OnceLock<[f32; 256]> = OnceLock::new();

fn gamma_lut() -> &'static [f32; 256] {
    GAMMA_LUT.get_or_init(|| {
        let mut lut = [0.0f32; 256];
        for (i, v) in lut.iter_mut().enumerate() {
            *v = (i as f32 / 255.0).sqrt();
        }
        lut
    })
}

/// Convert one frame into three gamma-adjusted planes.
pub fn to_planes(frame: &Frame) -> PlaneTriple {
    match frame {
        Frame::Packed(image) => packed_to_planes(image),
        Frame::Color(planes) => planes.clone(),
        Frame::Gray(plane) => PlaneTriple::from_gray(plane),
    }
}

fn packed_to_planes(image: &RgbImage) -> PlaneTriple {
    let lut = gamma_lut();
    let mut out = PlaneTriple::new(image.width() as usize, image.height() as usize);
    let [r, g, b] = out.planes_mut();
    let (r, g, b) = (r.as_mut_slice(), g.as_mut_slice(), b.as_mut_slice());
    for (i, px) in image.pixels().enumerate() {
        r[i] = lut[px[0] as usize];
        g[i] = lut[px[1] as usize];
        b[i] = lut[px[2] as usize];
    }
    out
}
