//! Background-subtraction motion detector.
//!
//! The detector owns an exponentially-weighted background model and a smoothed
//! target centroid. `process` is called once per frame by the worker thread:
//!
//! 1. The first frame (or a frame of a new size) becomes the background; the
//!    mask is all-zero.
//! 2. Each pixel is marked when its normalized color distance from the
//!    background exceeds `threshold`.
//! 3. The background is blended toward the frame by `filter`.
//! 4. The mask centroid updates the target, slowly for tiny regions and
//!    fast/asymmetrically otherwise. An empty mask leaves the target alone.
//!    Tracking starts from the origin, so the first motion is blended too.

use crate::frame::{MotionMask, PlaneTriple};

use super::target::{Smoothing, Target};

const INV_SQRT_3: f32 = 0.577_350_26;

/// Tunable detector constants.
///
/// The smoothing rates and the small-region cutoff are empirical; they are kept
/// as named settings so deployments can retune them.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionConfig {
    /// Normalized distance above which a pixel counts as moving.
    pub threshold: f32,
    /// Weight of the incoming frame in the background update.
    pub filter: f32,
    /// Mask mass fraction below which the slow smoothing rate applies.
    pub small_region_fraction: f32,
    pub slow_rate: f32,
    pub fast_rate_x: f32,
    pub fast_rate_y: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.15,
            filter: 0.75,
            small_region_fraction: 0.003,
            slow_rate: 0.1,
            fast_rate_x: 1.0,
            fast_rate_y: 0.3,
        }
    }
}

/// Euclidean distance between two colors, scaled into [0,1] by 1/sqrt(3).
#[inline]
pub fn channel_distance(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    (dr * dr + dg * dg + db * db).sqrt() * INV_SQRT_3
}

/// Summary of the most recent `process` call.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameUpdate {
    /// Number of masked pixels.
    pub mass: usize,
    /// Raw (unsmoothed) centroid of the mask, if any pixel was masked.
    pub centroid: Option<(f32, f32)>,
    /// Smoothing branch taken, if the target moved.
    pub smoothing: Option<Smoothing>,
    /// The frame replaced the background because none matched its size.
    pub rebaselined: bool,
}

pub struct MotionDetector {
    config: MotionConfig,
    background: Option<PlaneTriple>,
    target: Option<Target>,
    last: FrameUpdate,
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            background: None,
            target: None,
            last: FrameUpdate::default(),
        }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    pub fn background(&self) -> Option<&PlaneTriple> {
        self.background.as_ref()
    }

    /// Current smoothed target; `None` until motion has been seen once.
    pub fn target(&self) -> Option<Target> {
        self.target
    }

    pub fn last_update(&self) -> FrameUpdate {
        self.last
    }

    /// Compute the motion mask for `input` and advance the background and target.
    pub fn process(&mut self, input: &PlaneTriple) -> MotionMask {
        let (width, height) = (input.width(), input.height());
        let mut mask = MotionMask::new(width, height);

        let same_size = self.background.as_ref().map(|bg| bg.same_size(input));
        if same_size != Some(true) {
            let rebaselined = same_size.is_some();
            if rebaselined {
                log::warn!(
                    "frame size changed to {}x{}; resetting background model",
                    width,
                    height
                );
            }
            self.background = Some(input.clone());
            self.last = FrameUpdate {
                rebaselined,
                ..FrameUpdate::default()
            };
            return mask;
        }
        let Some(background) = self.background.as_mut() else {
            return mask;
        };

        let threshold = self.config.threshold;
        let filter = self.config.filter;
        let keep = 1.0 - filter;

        let [ir, ig, ib] = input.planes();
        let (ir, ig, ib) = (ir.as_slice(), ig.as_slice(), ib.as_slice());
        let [br, bg, bb] = background.planes_mut();
        let (br, bg, bb) = (br.as_mut_slice(), bg.as_mut_slice(), bb.as_mut_slice());
        let out = mask.as_mut_slice();

        let mut mass = 0usize;
        let (mut sum_x, mut sum_y) = (0f64, 0f64);
        for y in 0..height {
            let row = y * width;
            for x in 0..width {
                let i = row + x;
                let d = channel_distance([ir[i], ig[i], ib[i]], [br[i], bg[i], bb[i]]);
                if d > threshold {
                    out[i] = 1.0;
                    mass += 1;
                    sum_x += x as f64;
                    sum_y += y as f64;
                }
                br[i] = keep * br[i] + filter * ir[i];
                bg[i] = keep * bg[i] + filter * ig[i];
                bb[i] = keep * bb[i] + filter * ib[i];
            }
        }

        self.last = FrameUpdate {
            mass,
            ..FrameUpdate::default()
        };
        if mass > 0 {
            let cx = (sum_x / mass as f64) as f32;
            let cy = (sum_y / mass as f64) as f32;
            let fraction = mass as f64 / (width * height) as f64;
            self.last.centroid = Some((cx, cy));
            self.last.smoothing = Some(self.update_target(cx, cy, fraction as f32));
        }
        mask
    }

    fn update_target(&mut self, cx: f32, cy: f32, fraction: f32) -> Smoothing {
        let cfg = &self.config;
        let current = self.target.unwrap_or(Target::new(0.0, 0.0));
        let (smoothing, rate_x, rate_y) = if fraction < cfg.small_region_fraction {
            (Smoothing::Slow, cfg.slow_rate, cfg.slow_rate)
        } else {
            (Smoothing::Fast, cfg.fast_rate_x, cfg.fast_rate_y)
        };
        self.target = Some(current.blend(cx, cy, rate_x, rate_y));
        smoothing
    }
}
