//! Crosshair overlay.

use image::Rgb;

use crate::detect::Target;
use crate::frame::Frame;

pub const CROSSHAIR_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Copy `source` into a fresh packed frame with a crosshair through `target`.
///
/// A target outside the image is an upstream bug; it is logged and the frame is
/// returned undecorated.
pub fn annotate(source: &Frame, target: Target) -> Frame {
    let mut out = source.as_rgb().into_owned();
    let (width, height) = out.dimensions();

    let Some((tx, ty)) = target.pixel(width, height) else {
        log::warn!(
            "invalid target ({:.1}, {:.1}) for {}x{} frame",
            target.x,
            target.y,
            width,
            height
        );
        return Frame::Packed(out);
    };

    for x in 0..width {
        out.put_pixel(x, ty, CROSSHAIR_COLOR);
    }
    for y in 0..height {
        out.put_pixel(tx, y, CROSSHAIR_COLOR);
    }
    Frame::Packed(out)
}
