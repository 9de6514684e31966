//! Named output channels emitted once per scheduler tick.

use api::EyePair;

pub const EYELID_LEFT: &str = "/avatar/parameters/EyeLidLeft";
pub const EYELID_RIGHT: &str = "/avatar/parameters/EyeLidRight";
pub const GAZE_LEFT_X: &str = "/avatar/parameters/EyeLeftX";
pub const GAZE_LEFT_Y: &str = "/avatar/parameters/EyeLeftY";
pub const GAZE_RIGHT_X: &str = "/avatar/parameters/EyeRightX";
pub const GAZE_RIGHT_Y: &str = "/avatar/parameters/EyeRightY";
pub const PUPIL_DILATION: &str = "/avatar/parameters/EyesDilation";

/// Flatten a fused pair into the per-tick value/address lists. Every
/// value is clamped to its documented range and `values.len()` always
/// equals `addresses.len()`.
pub fn frame_channels(frame: &EyePair) -> (Vec<f32>, Vec<&'static str>) {
    let dilation = (frame.left.dilation + frame.right.dilation) * 0.5;
    let values = vec![
        frame.left.openness.clamp(0.0, 1.0),
        frame.right.openness.clamp(0.0, 1.0),
        frame.left.gaze.x.clamp(-1.0, 1.0),
        frame.left.gaze.y.clamp(-1.0, 1.0),
        frame.right.gaze.x.clamp(-1.0, 1.0),
        frame.right.gaze.y.clamp(-1.0, 1.0),
        dilation.clamp(0.0, 1.0),
    ];
    let addresses = vec![
        EYELID_LEFT,
        EYELID_RIGHT,
        GAZE_LEFT_X,
        GAZE_LEFT_Y,
        GAZE_RIGHT_X,
        GAZE_RIGHT_Y,
        PUPIL_DILATION,
    ];
    (values, addresses)
}
