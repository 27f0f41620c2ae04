mod motion;
mod target;

pub use motion::{channel_distance, FrameUpdate, MotionConfig, MotionDetector};
pub use target::{Smoothing, Target};
