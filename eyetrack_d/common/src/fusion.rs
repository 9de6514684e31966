use api::{Eye, EyePair, EyeState, PerEye};
use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Forces one eye's openness to drive both channels. Accessibility /
/// asymmetric-device mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SyncMode {
    #[default]
    Independent,
    #[serde(alias = "Left", alias = "left")]
    LeftControlsBoth,
    #[serde(alias = "Right", alias = "right")]
    RightControlsBoth,
}

/// Tuned fusion constants. The values are a product decision carried
/// over from field testing, not derived.
#[derive(Debug, Clone, Copy)]
pub struct FusionParams {
    /// Openness difference at or above which a wink is intentional.
    pub wink_threshold: f32,
    /// Amount the winking pair's openness values are pushed apart.
    pub wink_enhancement: f32,
    /// Slope of the gaze-direction blend weight per unit of gaze X.
    pub gaze_weight_slope: f32,
    /// Blend weights never leave this band, so neither eye's
    /// contribution is ever fully suppressed.
    pub weight_floor: f32,
    pub weight_ceil: f32,
    /// Dilation range when derived from openness.
    pub dilation_floor: f32,
    /// Dilation reported for an uncalibrated eye.
    pub neutral_dilation: f32,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            wink_threshold: 0.3,
            wink_enhancement: 0.2,
            gaze_weight_slope: 0.25,
            weight_floor: 0.25,
            weight_ceil: 0.75,
            dilation_floor: 0.3,
            neutral_dilation: 0.5,
        }
    }
}

/// Combines the two channels' normalized samples into a coherent pair:
/// single-channel mirroring, sync-mode override, wink detection, and
/// gaze-direction-weighted blending, in that order.
#[derive(Debug, Clone)]
pub struct FusionEngine {
    pub sync_mode: SyncMode,
    pub params: FusionParams,
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::new(SyncMode::Independent)
    }
}

impl FusionEngine {
    pub fn new(sync_mode: SyncMode) -> Self {
        Self {
            sync_mode,
            params: FusionParams::default(),
        }
    }

    pub fn fuse(
        &self,
        left: Option<EyeState>,
        right: Option<EyeState>,
        calibrated: PerEye<bool>,
    ) -> EyePair {
        let p = &self.params;

        let (mut l, mut r) = match (left, right) {
            (Some(l), Some(r)) => (l, r),
            // Single-channel dropout: mirror the live channel exactly.
            // Wink and blend logic would distort the mirror, so they
            // are skipped.
            (Some(l), None) => {
                let r = mirror(&l);
                return self.finish(l, r, calibrated);
            }
            (None, Some(r)) => {
                let l = mirror(&r);
                return self.finish(l, r, calibrated);
            }
            (None, None) => return EyePair::neutral(),
        };

        match self.sync_mode {
            SyncMode::LeftControlsBoth => r.openness = l.openness,
            SyncMode::RightControlsBoth => l.openness = r.openness,
            SyncMode::Independent => {}
        }

        let diff = l.openness - r.openness;
        let winking = diff.abs() >= p.wink_threshold;

        if winking {
            // One-eyed blink: the open eye's gaze drives both, and the
            // openness values are pushed further apart to read clearly
            // on the avatar.
            if diff > 0.0 {
                r.gaze = Vec2::new(-l.gaze.x, l.gaze.y);
                l.openness = (l.openness + p.wink_enhancement).min(1.0);
                r.openness = (r.openness - p.wink_enhancement).max(0.0);
            } else {
                l.gaze = Vec2::new(-r.gaze.x, r.gaze.y);
                r.openness = (r.openness + p.wink_enhancement).min(1.0);
                l.openness = (l.openness - p.wink_enhancement).max(0.0);
            }
        } else {
            let avg_openness = (l.openness + r.openness) * 0.5;
            l.openness = avg_openness;
            r.openness = avg_openness;

            let avg_gaze_x = (l.gaze.x + r.gaze.x) * 0.5;
            let left_weight = (0.5 - avg_gaze_x * p.gaze_weight_slope)
                .clamp(p.weight_floor, p.weight_ceil);
            let right_weight = 1.0 - left_weight;
            let blended_x = left_weight * l.gaze.x + right_weight * r.gaze.x;
            l.gaze.x = blended_x;
            r.gaze.x = blended_x;
        }

        self.finish(l, r, calibrated)
    }

    fn finish(&self, mut l: EyeState, mut r: EyeState, calibrated: PerEye<bool>) -> EyePair {
        l.dilation = self.derive_dilation(l.openness, calibrated[Eye::Left]);
        r.dilation = self.derive_dilation(r.openness, calibrated[Eye::Right]);
        EyePair { left: l, right: r }
    }

    fn derive_dilation(&self, openness: f32, calibrated: bool) -> f32 {
        if calibrated {
            openness.clamp(self.params.dilation_floor, 1.0)
        } else {
            self.params.neutral_dilation
        }
    }
}

/// Mirror a sample onto the missing channel: openness and vertical gaze
/// carry over, horizontal gaze is negated for the screen-mirrored eye.
fn mirror(state: &EyeState) -> EyeState {
    EyeState {
        gaze: Vec2::new(-state.gaze.x, state.gaze.y),
        openness: state.openness,
        dilation: state.dilation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(gx: f32, gy: f32, openness: f32) -> EyeState {
        EyeState {
            gaze: Vec2::new(gx, gy),
            openness,
            dilation: 0.5,
        }
    }

    fn both_calibrated() -> PerEye<bool> {
        PerEye::splat(true)
    }

    #[test]
    fn missing_right_channel_mirrors_left() {
        let engine = FusionEngine::default();
        let left = state(0.5, 0.2, 0.7);

        let fused = engine.fuse(Some(left), None, both_calibrated());

        assert_eq!(fused.right.gaze.x, -0.5);
        assert_eq!(fused.right.gaze.y, 0.2);
        assert_eq!(fused.right.openness, fused.left.openness);
    }

    #[test]
    fn both_channels_missing_yields_neutral() {
        let engine = FusionEngine::default();
        let fused = engine.fuse(None, None, both_calibrated());
        assert_eq!(fused, EyePair::neutral());
    }

    #[test]
    fn wink_fires_at_and_above_threshold() {
        let engine = FusionEngine::default();

        // diff = 0.31: fires.
        let fused = engine.fuse(
            Some(state(0.1, 0.0, 0.8)),
            Some(state(-0.1, 0.0, 0.49)),
            both_calibrated(),
        );
        assert_eq!(fused.left.openness, 1.0);
        assert!((fused.right.openness - 0.29).abs() < 1e-6);

        // diff = 0.30 exactly: the boundary is inclusive.
        let fused = engine.fuse(
            Some(state(0.1, 0.0, 0.8)),
            Some(state(-0.1, 0.0, 0.5)),
            both_calibrated(),
        );
        assert_eq!(fused.left.openness, 1.0);
        assert!((fused.right.openness - 0.3).abs() < 1e-6);
    }

    #[test]
    fn below_threshold_averages_openness() {
        let engine = FusionEngine::default();
        // diff = 0.29: no wink; 0.8 and 0.51 average to 0.655.
        let fused = engine.fuse(
            Some(state(0.0, 0.0, 0.8)),
            Some(state(0.0, 0.0, 0.51)),
            both_calibrated(),
        );
        assert!((fused.left.openness - 0.655).abs() < 1e-6);
        assert_eq!(fused.left.openness, fused.right.openness);
    }

    #[test]
    fn wink_overwrites_closed_eye_gaze_from_open_eye() {
        let engine = FusionEngine::default();
        let fused = engine.fuse(
            Some(state(0.4, -0.3, 0.9)),
            Some(state(-0.8, 0.6, 0.1)),
            both_calibrated(),
        );
        assert_eq!(fused.right.gaze.x, -0.4);
        assert_eq!(fused.right.gaze.y, -0.3);
        // The open eye's own gaze is untouched.
        assert_eq!(fused.left.gaze.x, 0.4);
    }

    #[test]
    fn gaze_weighting_blends_x_and_leaves_y_alone() {
        let engine = FusionEngine::default();
        let fused = engine.fuse(
            Some(state(0.6, 0.1, 0.7)),
            Some(state(0.2, -0.4, 0.7)),
            both_calibrated(),
        );

        // avg_gaze_x = 0.4, left_weight = 0.5 - 0.1 = 0.4.
        let expected = 0.4 * 0.6 + 0.6 * 0.2;
        assert!((fused.left.gaze.x - expected).abs() < 1e-6);
        assert_eq!(fused.left.gaze.x, fused.right.gaze.x);
        assert_eq!(fused.left.gaze.y, 0.1);
        assert_eq!(fused.right.gaze.y, -0.4);
    }

    #[test]
    fn blend_weights_stay_inside_band() {
        let mut engine = FusionEngine::default();
        // Steeper slope than stock so an extreme gaze would push the
        // weight past the band without the clamp.
        engine.params.gaze_weight_slope = 0.5;
        let fused = engine.fuse(
            Some(state(1.0, 0.0, 0.7)),
            Some(state(0.8, 0.0, 0.7)),
            both_calibrated(),
        );
        // avg_gaze_x = 0.9 gives a raw left weight of 0.05; it clamps
        // to 0.25.
        let expected = 0.25 * 1.0 + 0.75 * 0.8;
        assert!((fused.left.gaze.x - expected).abs() < 1e-6);
    }

    #[test]
    fn sync_mode_copies_controlling_openness_before_wink_logic() {
        let engine = FusionEngine::new(SyncMode::LeftControlsBoth);
        // Raw diff (0.8 vs 0.1) would wink, but sync forces them equal
        // first, so no wink fires and both average to 0.8.
        let fused = engine.fuse(
            Some(state(0.0, 0.0, 0.8)),
            Some(state(0.0, 0.0, 0.1)),
            both_calibrated(),
        );
        assert_eq!(fused.left.openness, 0.8);
        assert_eq!(fused.right.openness, 0.8);
    }

    #[test]
    fn dilation_tracks_openness_only_when_calibrated() {
        let engine = FusionEngine::default();
        let fused = engine.fuse(
            Some(state(0.0, 0.0, 0.9)),
            Some(state(0.0, 0.0, 0.9)),
            PerEye::new(true, false),
        );
        assert_eq!(fused.left.dilation, 0.9);
        assert_eq!(fused.right.dilation, 0.5);

        // Dilation from openness is floored at 0.3.
        let fused = engine.fuse(
            Some(state(0.0, 0.0, 0.1)),
            Some(state(0.0, 0.0, 0.1)),
            PerEye::splat(true),
        );
        assert_eq!(fused.left.dilation, 0.3);
    }
}
