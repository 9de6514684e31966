use api::Eye;
use glam::Vec2;
use log::warn;
use serde::{Deserialize, Serialize};

/// Below this span between fully-open and fully-closed references the
/// openness normalization is meaningless; default to fully open.
pub const OPENNESS_SPAN_EPSILON: f32 = 1e-4;

/// Empirically tuned openness compensation. Eyelid aperture visually
/// shrinks at extreme gaze angles; these terms nudge openness back up
/// before it is trusted. Product-tuned values, not derived.
#[derive(Debug, Clone, Copy)]
pub struct GazeCompensation {
    pub looking_down_coeff: f32,
    pub looking_down_cap: f32,
    pub temple_side_coeff: f32,
    pub temple_side_cap: f32,
}

impl Default for GazeCompensation {
    fn default() -> Self {
        Self {
            looking_down_coeff: 0.8,
            looking_down_cap: 0.65,
            temple_side_coeff: 0.4,
            temple_side_cap: 0.55,
        }
    }
}

fn unset_min() -> f32 {
    f32::INFINITY
}

fn unset_max() -> f32 {
    f32::NEG_INFINITY
}

fn is_not_finite(v: &f32) -> bool {
    !v.is_finite()
}

/// Per-eye calibration: observed pupil-coordinate extremes, the center
/// reference point, and the eyelid-distance references.
///
/// Bounds sit at the infinite sentinels while unset; a missing or
/// unknown persisted field deserializes back to the same sentinels, so
/// malformed stores degrade to "uncalibrated" rather than corrupt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EyeCalibration {
    #[serde(default = "unset_min", skip_serializing_if = "is_not_finite")]
    pub x_min: f32,
    #[serde(default = "unset_max", skip_serializing_if = "is_not_finite")]
    pub x_max: f32,
    #[serde(default = "unset_min", skip_serializing_if = "is_not_finite")]
    pub y_min: f32,
    #[serde(default = "unset_max", skip_serializing_if = "is_not_finite")]
    pub y_max: f32,
    pub x_off: f32,
    pub y_off: f32,
    #[serde(default = "unset_max", skip_serializing_if = "is_not_finite")]
    pub fully_open: f32,
    #[serde(default = "unset_min", skip_serializing_if = "is_not_finite")]
    pub fully_closed: f32,
    pub has_calibration: bool,

    #[serde(skip)]
    episode_samples: u32,
    #[serde(skip)]
    episode_active: bool,
    /// State saved at episode start; restored if the episode fails so
    /// the previous calibration stays authoritative.
    #[serde(skip)]
    prior: Option<Box<EyeCalibration>>,
}

impl Default for EyeCalibration {
    fn default() -> Self {
        Self {
            x_min: unset_min(),
            x_max: unset_max(),
            y_min: unset_min(),
            y_max: unset_max(),
            x_off: 0.0,
            y_off: 0.0,
            fully_open: unset_max(),
            fully_closed: unset_min(),
            has_calibration: false,
            episode_samples: 0,
            episode_active: false,
            prior: None,
        }
    }
}

impl EyeCalibration {
    /// Start a calibration episode: bounds back to the unset sentinels,
    /// sample count cleared. Previous calibration stays authoritative
    /// until the episode ends with at least one valid sample.
    pub fn begin_episode(&mut self) {
        self.prior = Some(Box::new(Self {
            prior: None,
            ..self.clone()
        }));
        self.x_min = unset_min();
        self.x_max = unset_max();
        self.y_min = unset_min();
        self.y_max = unset_max();
        self.fully_open = unset_max();
        self.fully_closed = unset_min();
        self.has_calibration = false;
        self.episode_samples = 0;
        self.episode_active = true;
    }

    /// Widen the pupil bounds to include `point`. The first valid
    /// sample of the episode also seeds the center offset. A (0, 0)
    /// point is the inference failure sentinel and is not absorbed.
    pub fn absorb(&mut self, point: Vec2) {
        if !self.episode_active || (point.x == 0.0 && point.y == 0.0) {
            return;
        }

        if self.episode_samples == 0 {
            self.x_off = point.x;
            self.y_off = point.y;
        }
        self.episode_samples += 1;

        self.x_min = self.x_min.min(point.x);
        self.x_max = self.x_max.max(point.x);
        self.y_min = self.y_min.min(point.y);
        self.y_max = self.y_max.max(point.y);
    }

    /// Widen the eyelid-distance references to include `distance`.
    pub fn absorb_lid(&mut self, distance: f32) {
        if !self.episode_active || distance <= 0.0 {
            return;
        }
        self.fully_open = self.fully_open.max(distance);
        self.fully_closed = self.fully_closed.min(distance);
    }

    /// Freeze the episode. Returns whether this episode produced a
    /// valid calibration; a zero-sample episode restores the previous
    /// calibration and warns, it never fails the call.
    pub fn end_episode(&mut self, eye: Eye) -> bool {
        self.episode_active = false;
        let prior = self.prior.take();
        if self.episode_samples > 0 {
            self.has_calibration = true;
            return true;
        }

        warn!(
            "Calibration episode for {} eye ended with no valid samples; keeping previous calibration",
            eye.label()
        );
        if let Some(prior) = prior {
            *self = *prior;
        }
        false
    }

    pub fn is_collecting(&self) -> bool {
        self.episode_active
    }

    /// Map a raw pupil point into [-1, 1] per axis.
    ///
    /// Four directional ratios are computed against the calibrated
    /// extremes; the side of center the point falls on picks the ratio
    /// and the sign. Zero denominators are substituted with ±1.
    pub fn normalize_gaze(&self, point: Vec2, flip_x: bool, flip_y: bool) -> Vec2 {
        let dx = point.x - self.x_off;
        let dy = point.y - self.y_off;

        let toward_x_max = guard_denominator(self.x_max - self.x_off, 1.0);
        let toward_x_min = guard_denominator(self.x_min - self.x_off, -1.0);
        let toward_y_min = guard_denominator(self.y_min - self.y_off, -1.0);
        let toward_y_max = guard_denominator(self.y_max - self.y_off, 1.0);

        let xl = (dx / toward_x_max).abs().clamp(0.0, 1.0);
        let xr = (dx / toward_x_min).abs().clamp(0.0, 1.0);
        let yu = (dy / toward_y_min).abs().clamp(0.0, 1.0);
        let yd = (dy / toward_y_max).abs().clamp(0.0, 1.0);

        let mut gaze_x = if dx >= 0.0 { xr } else { -xl };
        // Image y grows downward; looking down is negative gaze y.
        let mut gaze_y = if dy >= 0.0 { -yd } else { yu };

        if flip_x {
            gaze_x = -gaze_x;
        }
        if flip_y {
            gaze_y = -gaze_y;
        }

        Vec2::new(gaze_x, gaze_y)
    }

    /// Map a raw eyelid distance into [0, 1].
    pub fn normalize_openness(&self, raw_distance: f32) -> f32 {
        let span = self.fully_open - self.fully_closed;
        if !span.is_finite() || span.abs() < OPENNESS_SPAN_EPSILON {
            return 1.0;
        }
        ((raw_distance - self.fully_closed) / span).clamp(0.0, 1.0)
    }

    /// Apply the gaze-angle openness compensation for this eye.
    pub fn compensate_openness(
        &self,
        openness: f32,
        gaze: Vec2,
        eye: Eye,
        comp: &GazeCompensation,
    ) -> f32 {
        let mut out = openness;

        let down = (-gaze.y).max(0.0);
        if down > 0.0 {
            let nudged = (out + down * comp.looking_down_coeff).min(comp.looking_down_cap);
            out = out.max(nudged);
        }

        let temple = match eye {
            Eye::Left => (-gaze.x).max(0.0),
            Eye::Right => gaze.x.max(0.0),
        };
        if temple > 0.0 {
            let nudged = (out + temple * comp.temple_side_coeff).min(comp.temple_side_cap);
            out = out.max(nudged);
        }

        out.clamp(0.0, 1.0)
    }
}

fn guard_denominator(den: f32, substitute: f32) -> f32 {
    if den == 0.0 || !den.is_finite() {
        substitute
    } else {
        den
    }
}
