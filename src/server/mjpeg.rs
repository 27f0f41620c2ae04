//! `multipart/x-mixed-replace` framing.
//!
//! Parts carry no Content-Length; each one ends where the next boundary
//! line starts.

use anyhow::Result;
use std::io::Write;

pub const BOUNDARY: &str = "BOUNDARY";

/// Response head that opens a never-ending multipart stream.
pub fn write_stream_header<W: Write>(out: &mut W) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        BOUNDARY
    );
    out.write_all(header.as_bytes())?;
    out.flush()?;
    Ok(())
}

/// One JPEG part.
pub fn write_part<W: Write>(out: &mut W, jpeg: &[u8]) -> Result<()> {
    write!(out, "--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY)?;
    out.write_all(jpeg)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_are_framed_by_boundary_lines() {
        let mut out = Vec::new();
        write_part(&mut out, b"\xFF\xD8one\xFF\xD9").unwrap();
        write_part(&mut out, b"\xFF\xD8two\xFF\xD9").unwrap();

        let expected = b"--BOUNDARY\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8one\xFF\xD9\
--BOUNDARY\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8two\xFF\xD9";
        assert_eq!(out, expected.to_vec());
    }

    #[test]
    fn header_announces_multipart_stream() {
        let mut out = Vec::new();
        write_stream_header(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: multipart/x-mixed-replace; boundary=BOUNDARY\r\n"));
        assert!(!text.contains("Content-Length"));
    }
}
