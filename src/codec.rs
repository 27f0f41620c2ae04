//! JPEG decode/encode primitives.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};

use crate::frame::Frame;

/// Default JPEG quality for re-encoded frames.
pub const DEFAULT_QUALITY: u8 = 50;

/// Decode one complete JPEG image into packed RGB.
pub fn decode(bytes: &[u8]) -> Result<RgbImage> {
    let image =
        image::load_from_memory_with_format(bytes, ImageFormat::Jpeg).context("decode jpeg")?;
    Ok(image.into_rgb8())
}

/// Encode any frame format as a JPEG of the given quality (1-100).
pub fn encode(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    if !(1..=100).contains(&quality) {
        return Err(anyhow!("jpeg quality {} out of range 1-100", quality));
    }
    let rgb = frame.as_rgb();
    let mut out = Vec::with_capacity(rgb.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&*rgb)
        .context("encode jpeg")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn encoded_frame_decodes_to_same_dimensions() {
        let image = RgbImage::from_pixel(16, 8, Rgb([10, 200, 30]));
        let bytes = encode(&Frame::Packed(image), 90).unwrap();

        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
        let px = decoded.get_pixel(8, 4);
        assert!(px[1] > 180, "green channel survived lossy encode: {:?}", px);
    }

    #[test]
    fn rejects_out_of_range_quality() {
        let frame = Frame::Packed(RgbImage::new(2, 2));
        assert!(encode(&frame, 0).is_err());
        assert!(encode(&frame, 101).is_err());
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(decode(&[0xFF, 0xD8, 0x00, 0x01, 0xFF, 0xD9]).is_err());
    }
}
