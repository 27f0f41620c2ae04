//! Replay of a recording directory.
//!
//! Frames are read as `000000.jpg`, `000001.jpg`, ... at a fixed pace. Any
//! read or decode failure (including running off the end of the recording)
//! waits out a backoff and starts over at the first frame, so playback loops
//! forever.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::codec;
use crate::frame::Frame;
use crate::stats::Stats;

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(80);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Path of frame number `index` inside a recording directory.
pub fn frame_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{:06}.jpg", index))
}

#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    pub dir: PathBuf,
    pub interval: Duration,
    pub retry_backoff: Duration,
}

impl PlaybackConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            interval: DEFAULT_FRAME_INTERVAL,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

pub struct PlaybackSource {
    config: PlaybackConfig,
    stats: Arc<Stats>,
    next_index: u64,
    last_frame_at: Option<Instant>,
}

impl PlaybackSource {
    pub fn new(config: PlaybackConfig, stats: Arc<Stats>) -> Self {
        Self {
            config,
            stats,
            next_index: 0,
            last_frame_at: None,
        }
    }

    /// Index of the frame the next call will return.
    pub fn position(&self) -> u64 {
        self.next_index
    }

    /// Next frame of the recording, paced to the configured interval.
    pub fn next_frame(&mut self) -> Frame {
        loop {
            self.pace();
            let index = self.next_index;
            match self.load(index) {
                Ok(frame) => {
                    self.next_index += 1;
                    self.last_frame_at = Some(Instant::now());
                    return frame;
                }
                Err(err) => {
                    if is_not_found(&err) && index > 0 {
                        log::info!("end of recording after {} frames, restarting", index);
                    } else {
                        log::warn!("playback of frame {} failed: {:#}", index, err);
                    }
                    self.next_index = 0;
                    self.last_frame_at = None;
                    thread::sleep(self.config.retry_backoff);
                }
            }
        }
    }

    fn pace(&self) {
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < self.config.interval {
                thread::sleep(self.config.interval - elapsed);
            }
        }
    }

    fn load(&self, index: u64) -> Result<Frame> {
        let path = frame_path(&self.config.dir, index);
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        self.stats.add_bytes(bytes.len() as u64);
        let image = self
            .stats
            .decode
            .time(|| codec::decode(&bytes))
            .map_err(|err| {
                self.stats.decode_error();
                err
            })
            .with_context(|| format!("decode {}", path.display()))?;
        Ok(Frame::Packed(image))
    }
}

fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<io::Error>()
        .map(|e| e.kind() == io::ErrorKind::NotFound)
        .unwrap_or(false)
}
