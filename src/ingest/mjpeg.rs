//! Motion-JPEG elementary stream scanner.
//!
//! The stream is a plain concatenation of JPEG images. Frames are cut on the
//! SOI (`FF D8`) and EOI (`FF D9`) markers; bytes in front of an SOI are noise
//! and are reported once per run as `DecodeError::MissingStartMarker`.

use std::io::{self, Read};
use std::sync::Arc;

use anyhow::{anyhow, Context};

use super::DecodeError;
use crate::codec;
use crate::frame::Frame;
use crate::stats::Stats;

/// Largest single JPEG the scanner buffers before giving up on the stream.
pub const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

const READ_CHUNK: usize = 64 * 1024;
const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Adds every byte pulled through it to the shared byte counter.
pub struct CountingReader<R> {
    inner: R,
    stats: Arc<Stats>,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R, stats: Arc<Stats>) -> Self {
        Self { inner, stats }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.stats.add_bytes(n as u64);
        Ok(n)
    }
}

pub struct MjpegDecoder<R> {
    reader: CountingReader<R>,
    stats: Arc<Stats>,
    buffer: Vec<u8>,
    // Offset up to which the current frame has been searched for EOI.
    scanned: usize,
    eof: bool,
}

impl<R: Read> MjpegDecoder<R> {
    pub fn new(reader: R, stats: Arc<Stats>) -> Self {
        Self {
            reader: CountingReader::new(reader, stats.clone()),
            stats,
            buffer: Vec::with_capacity(READ_CHUNK),
            scanned: 0,
            eof: false,
        }
    }

    /// Read and decode the next frame.
    pub fn next_frame(&mut self) -> Result<Frame, DecodeError> {
        let jpeg = self.next_jpeg()?;
        let image = self
            .stats
            .decode
            .time(|| codec::decode(&jpeg))
            .with_context(|| format!("decode {} byte jpeg", jpeg.len()))?;
        Ok(Frame::Packed(image))
    }

    /// Cut the next complete JPEG out of the stream.
    pub fn next_jpeg(&mut self) -> Result<Vec<u8>, DecodeError> {
        let mut skipped = 0usize;
        loop {
            skipped += self.discard_noise();
            if skipped > 0 && self.buffer.starts_with(&SOI) {
                log::debug!("resynced after {} bytes of noise", skipped);
                return Err(DecodeError::MissingStartMarker { skipped });
            }

            if self.buffer.starts_with(&SOI) {
                if let Some(end) = self.find_eoi() {
                    let jpeg: Vec<u8> = self.buffer.drain(..end).collect();
                    self.scanned = 0;
                    return Ok(jpeg);
                }
                if self.buffer.len() > MAX_JPEG_BYTES {
                    return Err(DecodeError::Fatal(anyhow!(
                        "jpeg frame exceeds {} bytes without end marker",
                        MAX_JPEG_BYTES
                    )));
                }
            }

            if self.eof || !self.fill()? {
                self.eof = true;
                if self.buffer.starts_with(&SOI) {
                    log::warn!(
                        "discarding truncated frame of {} bytes at end of stream",
                        self.buffer.len()
                    );
                } else if skipped > 0 {
                    log::debug!("{} bytes of trailing noise at end of stream", skipped);
                }
                self.buffer.clear();
                self.scanned = 0;
                return Err(DecodeError::EndOfStream);
            }
        }
    }

    /// Drop bytes in front of the next SOI. Returns how many were dropped.
    fn discard_noise(&mut self) -> usize {
        if self.buffer.starts_with(&SOI) {
            return 0;
        }
        let cut = match find_marker(&self.buffer, SOI, 0) {
            Some(start) => start,
            // Keep a trailing 0xFF: it may be the first half of an SOI.
            None if self.buffer.last() == Some(&0xFF) => self.buffer.len() - 1,
            None => self.buffer.len(),
        };
        self.buffer.drain(..cut);
        self.scanned = 0;
        cut
    }

    fn find_eoi(&mut self) -> Option<usize> {
        let from = self.scanned.max(SOI.len());
        match find_marker(&self.buffer, EOI, from) {
            Some(pos) => Some(pos + EOI.len()),
            None => {
                // Resume next time one byte back, in case 0xFF was the last byte.
                self.scanned = self.buffer.len().saturating_sub(1).max(SOI.len());
                None
            }
        }
    }

    /// Read one chunk into the buffer. `false` on end of stream.
    fn fill(&mut self) -> Result<bool, DecodeError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    return Ok(true);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(DecodeError::Fatal(
                        anyhow::Error::new(err).context("read mjpeg stream"),
                    ))
                }
            }
        }
    }
}

fn find_marker(buffer: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    if buffer.len() < from + 2 {
        return None;
    }
    buffer[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([120, 60, 30]));
        codec::encode(&Frame::Packed(image), 80).unwrap()
    }

    /// Hands out at most `step` bytes per read.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn splits_concatenated_frames_and_counts_bytes() {
        let mut stream = jpeg(8, 8);
        stream.extend(jpeg(16, 4));
        let total = stream.len() as u64;
        let stats = Stats::new();
        let mut decoder = MjpegDecoder::new(Cursor::new(stream), stats.clone());

        let first = decoder.next_frame().unwrap();
        let second = decoder.next_frame().unwrap();
        assert_eq!((first.width(), first.height()), (8, 8));
        assert_eq!((second.width(), second.height()), (16, 4));
        assert!(matches!(decoder.next_frame(), Err(DecodeError::EndOfStream)));
        assert_eq!(stats.counters().bytes_read, total);
    }

    #[test]
    fn leading_noise_is_one_transient_error() {
        let mut stream = vec![0x00, 0x11, 0xFF, 0x22, 0x33];
        stream.extend(jpeg(8, 8));
        let mut decoder = MjpegDecoder::new(Cursor::new(stream), Stats::new());

        match decoder.next_frame() {
            Err(err @ DecodeError::MissingStartMarker { skipped: 5 }) => {
                assert!(err.is_transient())
            }
            other => panic!("expected missing start marker, got {:?}", other.map(|_| ())),
        }
        assert!(decoder.next_frame().is_ok());
        assert!(matches!(decoder.next_frame(), Err(DecodeError::EndOfStream)));
    }

    #[test]
    fn markers_split_across_reads_are_found() {
        let mut stream = jpeg(8, 8);
        stream.extend(jpeg(8, 8));
        let mut decoder = MjpegDecoder::new(
            Trickle {
                data: stream,
                pos: 0,
                step: 1,
            },
            Stats::new(),
        );

        assert!(decoder.next_frame().is_ok());
        assert!(decoder.next_frame().is_ok());
        assert!(matches!(decoder.next_frame(), Err(DecodeError::EndOfStream)));
    }

    #[test]
    fn truncated_trailing_frame_ends_stream() {
        let mut stream = jpeg(8, 8);
        let partial = jpeg(8, 8);
        stream.extend_from_slice(&partial[..partial.len() / 2]);
        let mut decoder = MjpegDecoder::new(Cursor::new(stream), Stats::new());

        assert!(decoder.next_frame().is_ok());
        assert!(matches!(decoder.next_frame(), Err(DecodeError::EndOfStream)));
    }

    #[test]
    fn undecodable_body_is_fatal() {
        let stream = vec![0xFF, 0xD8, 0x01, 0x02, 0x03, 0xFF, 0xD9];
        let mut decoder = MjpegDecoder::new(Cursor::new(stream), Stats::new());

        let err = decoder.next_frame().err().expect("garbage body");
        assert!(matches!(err, DecodeError::Fatal(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn oversized_frame_is_fatal() {
        let mut stream = vec![0xFF, 0xD8];
        stream.resize(MAX_JPEG_BYTES + READ_CHUNK + 2, 0x00);
        let mut decoder = MjpegDecoder::new(Cursor::new(stream), Stats::new());

        assert!(matches!(decoder.next_jpeg(), Err(DecodeError::Fatal(_))));
    }

    #[test]
    fn empty_stream_is_end_of_stream() {
        let mut decoder = MjpegDecoder::new(Cursor::new(Vec::new()), Stats::new());
        assert!(matches!(decoder.next_jpeg(), Err(DecodeError::EndOfStream)));
    }
}
