use anyhow::Result;
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// One tracked channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub fn other(self) -> Self {
        match self {
            Eye::Left => Eye::Right,
            Eye::Right => Eye::Left,
        }
    }

    pub fn iter() -> impl Iterator<Item = Eye> {
        [Eye::Left, Eye::Right].into_iter()
    }

    pub fn label(self) -> &'static str {
        match self {
            Eye::Left => "left",
            Eye::Right => "right",
        }
    }
}

/// Two-element container indexed by [`Eye`]. Every access is total;
/// there is no integer indexing to go out of bounds on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerEye<T> {
    pub left: T,
    pub right: T,
}

impl<T> PerEye<T> {
    pub fn new(left: T, right: T) -> Self {
        Self { left, right }
    }

    pub fn splat(value: T) -> Self
    where
        T: Clone,
    {
        Self {
            left: value.clone(),
            right: value,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> PerEye<U> {
        PerEye {
            left: f(self.left),
            right: f(self.right),
        }
    }
}

impl<T> Index<Eye> for PerEye<T> {
    type Output = T;

    fn index(&self, eye: Eye) -> &T {
        match eye {
            Eye::Left => &self.left,
            Eye::Right => &self.right,
        }
    }
}

impl<T> IndexMut<Eye> for PerEye<T> {
    fn index_mut(&mut self, eye: Eye) -> &mut T {
        match eye {
            Eye::Left => &mut self.left,
            Eye::Right => &mut self.right,
        }
    }
}

/// Raw camera frame handed from a frame source to inference.
#[derive(Debug, Clone, Default)]
pub struct EyeFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// One decoded inference result for one eye. Transient; consumed by the
/// estimation stage and not retained.
#[derive(Debug, Clone, Copy)]
pub struct EyeSample {
    pub eye: Eye,
    pub pupil: Vec2,
    pub lid_distance: f32,
}

/// Normalized per-eye output state.
///
/// `gaze` axes are in [-1, 1] (0 = centered), `openness` in [0, 1]
/// (0 = fully closed), `dilation` in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeState {
    pub gaze: Vec2,
    pub openness: f32,
    pub dilation: f32,
}

impl Default for EyeState {
    fn default() -> Self {
        Self::neutral()
    }
}

impl EyeState {
    /// Centered, relaxed state emitted while no tracking data is
    /// trustworthy (mid-calibration, no backend, startup).
    pub fn neutral() -> Self {
        Self {
            gaze: Vec2::ZERO,
            openness: 0.75,
            dilation: 0.5,
        }
    }
}

/// Fused left/right pair as handed to the output stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EyePair {
    pub left: EyeState,
    pub right: EyeState,
}

impl EyePair {
    pub fn neutral() -> Self {
        Self {
            left: EyeState::neutral(),
            right: EyeState::neutral(),
        }
    }
}

/// Number of floats an eye-channel inference result carries:
/// six eyelid keypoints (x, y each) plus the pupil center (x, y).
pub const EYE_VECTOR_LEN: usize = 14;

/// Model inference over a preprocessed frame. An empty vector means
/// "no sample this tick" and must not be treated as an error.
pub trait InferenceSource: Send {
    fn infer(&mut self, frame: &EyeFrame) -> Result<Vec<f32>>;
}

/// Polled video source for one eye camera.
pub trait FrameSource: Send {
    fn is_streaming(&self) -> bool;
    fn latest_frame(&mut self) -> Option<EyeFrame>;
}

/// A loadable tracking backend: camera access plus inference for both
/// eye channels.
pub trait EyeTrackingBackend: Send {
    fn initialize(&mut self) -> Result<()>;
    fn frame_source(&mut self, eye: Eye) -> Box<dyn FrameSource>;
    fn inference_source(&mut self, eye: Eye) -> Box<dyn InferenceSource>;
    fn unload(&mut self);
}

/// Outgoing wire sink. Fire-and-forget; the caller guarantees
/// `values.len() == addresses.len()` and pre-clamped values.
pub trait OutputSink: Send + Sync {
    fn emit(&self, values: &[f32], addresses: &[&str]) -> Result<()>;
}
