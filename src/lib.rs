//! motioncast
//!
//! A motion-tracking MJPEG camera server. Frames are decoded from a camera
//! pipeline (or a file, stdin, or a recording), run through a
//! background-subtraction motion detector, annotated with a crosshair on the
//! tracked centroid and fanned out to any number of HTTP viewers.
//!
//! # Architecture
//!
//! Capture is never allowed to wait on anything downstream:
//!
//! 1. **Decoder** (`ingest`, `pipeline::run_decoder`): one thread; publishes
//!    raw frames and hands each one to the worker with a non-blocking send.
//! 2. **Worker** (`pipeline::MotionWorker`): one thread; owns the background
//!    model and target, publishes the marked, mask and background topics.
//! 3. **Viewers** (`server`): one thread per HTTP connection, each fed by a
//!    `broadcast::Subscription` that only takes a frame while it is idle.
//!
//! # Module Structure
//!
//! - `frame`: pixel formats (`Frame`, `Plane`, `PlaneTriple`)
//! - `codec`: JPEG decode/encode
//! - `vectorize`: frame to gamma-adjusted float planes
//! - `detect`: background model, motion mask and target tracking
//! - `marker`: crosshair overlay
//! - `broadcast`: lossy multi-consumer fan-out
//! - `stats`: throughput, latency and error counters
//! - `record`: on-disk recording of raw frames
//! - `config`: layered daemon configuration

pub mod broadcast;
pub mod codec;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod marker;
pub mod pipeline;
pub mod record;
pub mod server;
pub mod stats;
pub mod vectorize;

pub use broadcast::{Broadcaster, Delivery, Subscription};
pub use detect::{MotionConfig, MotionDetector, Smoothing, Target};
pub use frame::{Frame, MotionMask, Plane, PlaneTriple, SharedFrame};
pub use ingest::{DecodeError, FrameSource};
pub use record::Recorder;
pub use stats::{Stats, StatsCollector, StatsReport};
