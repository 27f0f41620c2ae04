/// Smoothed centroid of the moving region, in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Target {
    pub x: f32,
    pub y: f32,
}

impl Target {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Move toward `(x, y)` by `rate_x`/`rate_y` of the remaining distance.
    ///
    /// A rate of 1.0 snaps to the new value, 0.0 ignores it.
    pub fn blend(self, x: f32, y: f32, rate_x: f32, rate_y: f32) -> Self {
        Self {
            x: self.x + rate_x * (x - self.x),
            y: self.y + rate_y * (y - self.y),
        }
    }

    /// Integer pixel the target falls in, if it lies inside a `width x height` image.
    pub fn pixel(self, width: u32, height: u32) -> Option<(u32, u32)> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return None;
        }
        let (x, y) = (self.x.floor(), self.y.floor());
        if x < 0.0 || y < 0.0 || x >= width as f32 || y >= height as f32 {
            return None;
        }
        Some((x as u32, y as u32))
    }
}

/// Which smoothing branch the last update took.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Smoothing {
    /// Small moving region, likely noise: slow on both axes.
    Slow,
    /// Large moving region: fast, asymmetric per axis.
    Fast,
}
