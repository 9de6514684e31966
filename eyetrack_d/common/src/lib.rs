pub use api::{Eye, EyePair, EyeSample, EyeState, PerEye};

mod calibration;
mod config;
mod estimator;
mod fusion;
mod motion;

pub use calibration::{EyeCalibration, GazeCompensation, OPENNESS_SPAN_EPSILON};
pub use config::{
    load_calibration, save_calibration, BackendConfig, CalibrationConfig, ControlConfig,
    EyesConfig, FilterConfig, OscConfig, OutputConfig, TrackingConfig,
};
pub use estimator::StateEstimator;
pub use fusion::{FusionEngine, FusionParams, SyncMode};
pub use motion::{ConstantVelocity, MotionModel};
