//! Frame ingestion sources.
//!
//! Frames come from one of:
//! - the camera capture pipeline (a child process writing MJPEG to stdout)
//! - stdin (`-`), carrying an MJPEG stream
//! - an MJPEG file or FIFO
//! - a recording directory of numbered JPEG files (looped playback)
//!
//! Every source yields decoded `Frame::Packed` values through
//! `FrameSource::next_frame`, with failures classified by `DecodeError`.

pub mod capture;
pub mod mjpeg;
pub mod playback;

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use thiserror::Error;

pub use capture::{CaptureConfig, CaptureProcess};
pub use mjpeg::{MjpegDecoder, MAX_JPEG_BYTES};
pub use playback::{frame_path, PlaybackConfig, PlaybackSource};

use crate::frame::Frame;
use crate::stats::Stats;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// The stream ended cleanly.
    #[error("end of stream")]
    EndOfStream,
    /// Bytes before the next start-of-image marker were skipped.
    #[error("frame missing start-of-image marker ({skipped} bytes skipped)")]
    MissingStartMarker { skipped: usize },
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl DecodeError {
    /// Transient errors are counted and the decode loop carries on.
    pub fn is_transient(&self) -> bool {
        matches!(self, DecodeError::MissingStartMarker { .. })
    }
}

/// Where frames come from.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceConfig {
    Capture(CaptureConfig),
    Stdin,
    /// A directory plays back a recording; anything else is read as MJPEG.
    Path(PathBuf),
}

impl SourceConfig {
    /// `None` or an empty string selects the camera, `-` selects stdin.
    pub fn from_arg(src: Option<&str>, capture: CaptureConfig) -> Self {
        match src.map(str::trim) {
            None | Some("") => SourceConfig::Capture(capture),
            Some("-") => SourceConfig::Stdin,
            Some(path) => SourceConfig::Path(PathBuf::from(path)),
        }
    }
}

pub struct FrameSource {
    backend: SourceBackend,
    description: String,
}

enum SourceBackend {
    Stream {
        decoder: MjpegDecoder<Box<dyn Read + Send>>,
        // Held so the capture child lives as long as its stream.
        _child: Option<CaptureProcess>,
    },
    Playback(PlaybackSource),
}

impl FrameSource {
    pub fn open(config: &SourceConfig, stats: Arc<Stats>) -> anyhow::Result<Self> {
        let (backend, description) = match config {
            SourceConfig::Capture(capture) => {
                let (child, stdout) = CaptureProcess::spawn(capture)?;
                let description = format!("capture {} (pid {})", capture.device, child.id());
                (
                    SourceBackend::Stream {
                        decoder: MjpegDecoder::new(Box::new(stdout), stats),
                        _child: Some(child),
                    },
                    description,
                )
            }
            SourceConfig::Stdin => (
                SourceBackend::Stream {
                    decoder: MjpegDecoder::new(Box::new(io::stdin()), stats),
                    _child: None,
                },
                "stdin".to_string(),
            ),
            SourceConfig::Path(path) if path.is_dir() => {
                let source = Self::playback(PlaybackConfig::new(path), stats);
                log::info!("frame source: {}", source.description);
                return Ok(source);
            }
            SourceConfig::Path(path) => {
                let file =
                    File::open(path).with_context(|| format!("open mjpeg {}", path.display()))?;
                (
                    SourceBackend::Stream {
                        decoder: MjpegDecoder::new(Box::new(file), stats),
                        _child: None,
                    },
                    format!("mjpeg {}", path.display()),
                )
            }
        };
        log::info!("frame source: {}", description);
        Ok(Self {
            backend,
            description,
        })
    }

    /// MJPEG source over an arbitrary reader.
    pub fn from_reader(reader: Box<dyn Read + Send>, stats: Arc<Stats>) -> Self {
        Self {
            backend: SourceBackend::Stream {
                decoder: MjpegDecoder::new(reader, stats),
                _child: None,
            },
            description: "reader".to_string(),
        }
    }

    pub fn playback(config: PlaybackConfig, stats: Arc<Stats>) -> Self {
        let description = format!("playback {}", config.dir.display());
        Self {
            backend: SourceBackend::Playback(PlaybackSource::new(config, stats)),
            description,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn next_frame(&mut self) -> Result<Frame, DecodeError> {
        match &mut self.backend {
            SourceBackend::Stream { decoder, .. } => decoder.next_frame(),
            SourceBackend::Playback(source) => Ok(source.next_frame()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn source_argument_selects_backend() {
        let capture = CaptureConfig::default();
        assert_eq!(
            SourceConfig::from_arg(None, capture.clone()),
            SourceConfig::Capture(capture.clone())
        );
        assert_eq!(
            SourceConfig::from_arg(Some(""), capture.clone()),
            SourceConfig::Capture(capture.clone())
        );
        assert_eq!(SourceConfig::from_arg(Some("-"), capture.clone()), SourceConfig::Stdin);
        assert_eq!(
            SourceConfig::from_arg(Some("/tmp/cam.mjpeg"), capture),
            SourceConfig::Path(PathBuf::from("/tmp/cam.mjpeg"))
        );
    }

    #[test]
    fn directory_path_opens_playback() {
        let dir = tempfile::tempdir().unwrap();
        let source =
            FrameSource::open(&SourceConfig::Path(dir.path().to_path_buf()), Stats::new())
                .unwrap();
        assert!(source.description().starts_with("playback"));
    }

    #[test]
    fn missing_file_fails_to_open() {
        let config = SourceConfig::Path(PathBuf::from("/nonexistent/cam.mjpeg"));
        assert!(FrameSource::open(&config, Stats::new()).is_err());
    }

    #[test]
    fn reader_source_reports_end_of_stream() {
        let mut source = FrameSource::from_reader(Box::new(Cursor::new(Vec::new())), Stats::new());
        let err = source.next_frame().err().expect("empty stream");
        assert!(matches!(err, DecodeError::EndOfStream));
        assert!(!err.is_transient());
    }
}
