//! Decoder loop and motion worker.
//!
//! The decoder thread is the only producer of the `raw` topic. It hands frames
//! to the worker through a zero-capacity channel with `try_send`, so a busy
//! worker costs a dropped frame and never a stalled read. The worker owns the
//! detector and publishes the derived topics.

use std::sync::Arc;

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::broadcast::Broadcaster;
use crate::detect::{FrameUpdate, MotionConfig, MotionDetector};
use crate::frame::{Frame, SharedFrame};
use crate::ingest::{DecodeError, FrameSource};
use crate::marker;
use crate::record::Recorder;
use crate::stats::Stats;
use crate::vectorize;

pub const TOPIC_RAW: &str = "raw";
pub const TOPIC_MARKED: &str = "marked";
pub const TOPIC_MASK: &str = "mask";
pub const TOPIC_BACKGROUND: &str = "background";

pub const TOPICS: [&str; 4] = [TOPIC_RAW, TOPIC_MARKED, TOPIC_MASK, TOPIC_BACKGROUND];

// ----------------------------------------------------------------------------
// Decoder
// ----------------------------------------------------------------------------

/// Pull frames from `source` until the stream ends or fails.
///
/// `on_attempt` runs after every attempt that produced a frame or a transient
/// error. The `raw` topic is closed and `handoff` dropped on return.
pub fn run_decoder(
    source: &mut FrameSource,
    handoff: Sender<SharedFrame>,
    broadcaster: &Broadcaster,
    stats: &Stats,
    recorder: Option<&Recorder>,
    mut on_attempt: impl FnMut(),
) -> Result<()> {
    log::info!("decoding from {}", source.description());
    let result = loop {
        match source.next_frame() {
            Ok(frame) => {
                stats.frame_decoded();
                let frame = Arc::new(frame);
                broadcaster.publish(TOPIC_RAW, Arc::clone(&frame));
                if let Some(recorder) = recorder {
                    recorder.offer(Arc::clone(&frame));
                }
                match handoff.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => stats.frames_dropped(1),
                    Err(TrySendError::Disconnected(_)) => {
                        log::warn!("motion worker gone; frame dropped");
                        stats.frames_dropped(1);
                    }
                }
            }
            Err(DecodeError::EndOfStream) => {
                log::info!("end of stream from {}", source.description());
                break Ok(());
            }
            Err(DecodeError::Fatal(err)) => {
                stats.decode_error();
                break Err(err.context(format!("decode from {}", source.description())));
            }
            Err(err) => {
                stats.decode_error();
                log::debug!("transient decode error: {}", err);
            }
        }
        on_attempt();
    };
    broadcaster.close(TOPIC_RAW);
    drop(handoff);
    result
}

// ----------------------------------------------------------------------------
// Motion worker
// ----------------------------------------------------------------------------

pub struct MotionWorker {
    detector: MotionDetector,
    broadcaster: Broadcaster,
    stats: Arc<Stats>,
}

impl MotionWorker {
    pub fn new(config: MotionConfig, broadcaster: Broadcaster, stats: Arc<Stats>) -> Self {
        Self {
            detector: MotionDetector::new(config),
            broadcaster,
            stats,
        }
    }

    pub fn detector(&self) -> &MotionDetector {
        &self.detector
    }

    /// Process frames until the decoder drops its end of the handoff.
    pub fn run(mut self, frames: Receiver<SharedFrame>) {
        for frame in frames {
            self.process_frame(&frame);
        }
        log::info!("motion worker stopping");
        for topic in [TOPIC_MARKED, TOPIC_MASK, TOPIC_BACKGROUND] {
            self.broadcaster.close(topic);
        }
    }

    pub fn process_frame(&mut self, frame: &SharedFrame) -> FrameUpdate {
        let mask = self.stats.process.time(|| {
            let planes = vectorize::to_planes(frame);
            self.detector.process(&planes)
        });
        let update = self.detector.last_update();
        if update.rebaselined {
            self.stats.process_error();
        }
        if let Some(smoothing) = update.smoothing {
            log::trace!(
                "motion mass={} target={:?} ({:?})",
                update.mass,
                self.detector.target(),
                smoothing
            );
        }

        let marked = match self.detector.target() {
            Some(target) => Arc::new(marker::annotate(frame, target)),
            None => Arc::clone(frame),
        };
        self.broadcaster.publish(TOPIC_MARKED, marked);
        self.broadcaster.publish(TOPIC_MASK, Arc::new(Frame::Gray(mask)));

        if self.broadcaster.has_subscribers(TOPIC_BACKGROUND) {
            if let Some(background) = self.detector.background() {
                self.broadcaster.publish(
                    TOPIC_BACKGROUND,
                    Arc::new(Frame::Color(background.clone())),
                );
            }
        }
        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::detect::Smoothing;
    use crate::marker::CROSSHAIR_COLOR;
    use crossbeam_channel::bounded;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;
    use std::thread;

    fn black() -> SharedFrame {
        Arc::new(Frame::Packed(RgbImage::new(4, 4)))
    }

    fn with_block() -> SharedFrame {
        let mut image = RgbImage::new(4, 4);
        for (x, y) in [(1, 1), (2, 1), (1, 2), (2, 2)] {
            image.put_pixel(x, y, Rgb([255, 255, 255]));
        }
        Arc::new(Frame::Packed(image))
    }

    fn jpeg(shade: u8) -> Vec<u8> {
        let image = RgbImage::from_pixel(8, 8, Rgb([shade, shade, shade]));
        codec::encode(&Frame::Packed(image), 80).unwrap()
    }

    fn mjpeg_stream(frames: usize) -> Vec<u8> {
        let mut stream = vec![0x42, 0x42];
        for _ in 0..frames {
            stream.extend(jpeg(50));
        }
        stream
    }

    #[test]
    fn decoder_never_waits_for_busy_worker() {
        let stats = Stats::new();
        let broadcaster = Broadcaster::new(stats.clone());
        let raw = broadcaster.subscribe(TOPIC_RAW);
        let mut source =
            FrameSource::from_reader(Box::new(Cursor::new(mjpeg_stream(3))), stats.clone());
        // Nobody is receiving, so every handoff fails.
        let (tx, _rx) = bounded(0);

        let mut attempts = 0;
        run_decoder(&mut source, tx, &broadcaster, &stats, None, || attempts += 1).unwrap();

        let counters = stats.counters();
        assert_eq!(attempts, 4);
        assert_eq!(counters.frames_decoded, 3);
        assert_eq!(counters.decode_errors, 1);
        // Three failed handoffs plus three frames the raw viewer was not waiting for.
        assert_eq!(counters.frames_dropped, 6);
        assert!(raw.recv().is_none());
        assert!(broadcaster.latest(TOPIC_RAW).is_some());
    }

    #[test]
    fn decoder_resumes_after_noise_between_frames() {
        let stats = Stats::new();
        let broadcaster = Broadcaster::new(stats.clone());
        let mut stream = jpeg(20);
        stream.extend_from_slice(&[0x00, 0x13, 0x37]);
        stream.extend(jpeg(200));
        let mut source = FrameSource::from_reader(Box::new(Cursor::new(stream)), stats.clone());
        let (tx, rx) = bounded(4);

        let mut attempts = 0;
        run_decoder(&mut source, tx, &broadcaster, &stats, None, || attempts += 1).unwrap();

        let counters = stats.counters();
        assert_eq!(attempts, 3);
        assert_eq!(counters.frames_decoded, 2);
        assert_eq!(counters.decode_errors, 1);
        let shades: Vec<u8> = rx.iter().map(|f| f.as_rgb().get_pixel(4, 4)[0]).collect();
        assert_eq!(shades.len(), 2);
        assert!(shades[0] < 60 && shades[1] > 160, "shades {:?}", shades);
    }

    #[test]
    fn fatal_decode_closes_raw_topic() {
        let stats = Stats::new();
        let broadcaster = Broadcaster::new(stats.clone());
        let garbage = vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9];
        let mut source = FrameSource::from_reader(Box::new(Cursor::new(garbage)), stats.clone());
        let (tx, rx) = bounded(0);

        let result = run_decoder(&mut source, tx, &broadcaster, &stats, None, || {});

        assert!(result.is_err());
        assert!(broadcaster.is_closed(TOPIC_RAW));
        assert!(rx.recv().is_err());
    }

    #[test]
    fn worker_publishes_mask_and_marked_frames() {
        let stats = Stats::new();
        let broadcaster = Broadcaster::new(stats.clone());
        let mut worker =
            MotionWorker::new(MotionConfig::default(), broadcaster.clone(), stats.clone());
        let latest = |topic| broadcaster.latest(topic).unwrap();

        let first = worker.process_frame(&black());
        assert_eq!(first.mass, 0);
        assert_eq!(latest(TOPIC_MASK).as_rgb().get_pixel(1, 1), &Rgb([0, 0, 0]));
        // No target yet: the frame is passed through.
        assert_eq!(latest(TOPIC_MARKED).as_rgb().get_pixel(0, 0), &Rgb([0, 0, 0]));

        // Centroid (1.5, 1.5) blended from the origin lands on pixel (1, 0).
        let second = worker.process_frame(&with_block());
        assert_eq!(second.mass, 4);
        assert_eq!(second.smoothing, Some(Smoothing::Fast));
        assert_eq!(latest(TOPIC_MASK).as_rgb().get_pixel(1, 1), &Rgb([255, 255, 255]));
        let annotated = latest(TOPIC_MARKED);
        assert_eq!(annotated.as_rgb().get_pixel(3, 0), &CROSSHAIR_COLOR);
        assert_eq!(annotated.as_rgb().get_pixel(1, 3), &CROSSHAIR_COLOR);
        assert_eq!(annotated.as_rgb().get_pixel(3, 3), &Rgb([0, 0, 0]));
        assert_eq!(stats.counters().frames_dropped, 0);
    }

    #[test]
    fn background_is_built_only_when_watched() {
        let stats = Stats::new();
        let broadcaster = Broadcaster::new(stats.clone());
        let mut worker = MotionWorker::new(MotionConfig::default(), broadcaster.clone(), stats);

        worker.process_frame(&black());
        assert!(broadcaster.latest(TOPIC_BACKGROUND).is_none());

        let _viewer = broadcaster.subscribe(TOPIC_BACKGROUND);
        worker.process_frame(&with_block());
        let frame = broadcaster.latest(TOPIC_BACKGROUND).unwrap();
        assert!(matches!(frame.as_ref(), Frame::Color(_)));
    }

    #[test]
    fn size_change_counts_process_error() {
        let stats = Stats::new();
        let broadcaster = Broadcaster::new(stats.clone());
        let mut worker = MotionWorker::new(MotionConfig::default(), broadcaster, stats.clone());

        worker.process_frame(&black());
        let update = worker.process_frame(&Arc::new(Frame::Packed(RgbImage::new(8, 2))));

        assert!(update.rebaselined);
        assert_eq!(stats.counters().process_errors, 1);
    }

    #[test]
    fn worker_closes_topics_when_decoder_stops() {
        let stats = Stats::new();
        let broadcaster = Broadcaster::new(stats.clone());
        let mask = broadcaster.subscribe(TOPIC_MASK);
        let worker = MotionWorker::new(MotionConfig::default(), broadcaster.clone(), stats);
        let (tx, rx) = bounded(0);

        let handle = thread::spawn(move || worker.run(rx));
        tx.send(black()).unwrap();
        drop(tx);
        handle.join().unwrap();

        assert!(broadcaster.latest(TOPIC_MASK).is_some());
        assert!(mask.recv().is_none());
        assert!(broadcaster.is_closed(TOPIC_MARKED));
    }
}
