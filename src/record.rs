//! On-disk recording of raw frames.
//!
//! The decoder offers each frame without waiting; a writer thread drains a
//! small queue and stores frames as `000000.jpg`, `000001.jpg`, ... in the
//! recording directory. The first encode or write failure stops the writer.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::codec;
use crate::frame::SharedFrame;
use crate::ingest::frame_path;
use crate::stats::Stats;

/// Frames the writer may fall behind before new ones are skipped.
pub const RECORD_QUEUE_DEPTH: usize = 10;

pub struct Recorder {
    dir: PathBuf,
    tx: Sender<SharedFrame>,
    stats: Arc<Stats>,
    join: JoinHandle<Result<u64>>,
}

impl Recorder {
    pub fn start(dir: impl Into<PathBuf>, quality: u8, stats: Arc<Stats>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create recording dir {}", dir.display()))?;
        let (tx, rx) = bounded(RECORD_QUEUE_DEPTH);
        let writer_dir = dir.clone();
        let writer_stats = stats.clone();
        let join = thread::Builder::new()
            .name("recorder".to_string())
            .spawn(move || {
                let result = write_frames(&writer_dir, quality, rx, &writer_stats);
                if let Err(err) = &result {
                    log::error!("recorder stopped: {:#}", err);
                }
                result
            })
            .context("spawn recorder thread")?;
        log::info!("recording frames to {}", dir.display());
        Ok(Self {
            dir,
            tx,
            stats,
            join,
        })
    }

    /// Queue a frame for writing. Returns false if it was skipped.
    pub fn offer(&self, frame: SharedFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.stats.frames_dropped(1);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Flush queued frames and stop. Returns the number of frames written.
    pub fn finish(self) -> Result<u64> {
        drop(self.tx);
        let written = self
            .join
            .join()
            .map_err(|_| anyhow!("recorder thread panicked"))?
            .with_context(|| format!("record to {}", self.dir.display()))?;
        log::info!("recorded {} frames to {}", written, self.dir.display());
        Ok(written)
    }
}

fn write_frames(dir: &Path, quality: u8, rx: Receiver<SharedFrame>, stats: &Stats) -> Result<u64> {
    let mut written = 0u64;
    for frame in rx {
        let bytes = match codec::encode(&frame, quality) {
            Ok(bytes) => bytes,
            Err(err) => {
                stats.encode_error();
                return Err(err.context(format!("encode recorded frame {}", written)));
            }
        };
        let path = frame_path(dir, written);
        if let Err(err) = fs::write(&path, bytes) {
            stats.write_error();
            return Err(err).with_context(|| format!("write {}", path.display()));
        }
        written += 1;
    }
    Ok(written)
}
