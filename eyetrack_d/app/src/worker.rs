//! Per-eye inference worker.
//!
//! One thread per eye owns that eye's frame source, inference source,
//! Kalman estimator, and calibration exclusively. The left and right
//! workers share nothing mutable; the only handoff is an immutable
//! snapshot pushed through a bounded channel the scheduler drains.

use api::{Eye, EyeSample, EyeState, FrameSource, InferenceSource, EYE_VECTOR_LEN};
use common::{EyeCalibration, GazeCompensation, StateEstimator};
use glam::Vec2;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Immutable per-eye result published to the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct EyeSnapshot {
    pub eye: Eye,
    pub state: EyeState,
    pub calibrated: bool,
    pub taken_at: Instant,
}

/// Control messages into a worker, drained non-blockingly each loop.
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    BeginCalibration,
    EndCalibration,
    SetFilterParams { dt: f32, q: f32, r: f32 },
    ReplaceCalibration(EyeCalibration),
}

/// Events a worker reports back to the wiring layer.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    CalibrationFinished {
        eye: Eye,
        ok: bool,
        calibration: EyeCalibration,
    },
}

/// Components the estimator smooths per eye: pupil x, pupil y, and the
/// eyelid distance.
pub const MEASUREMENT_LEN: usize = 3;

/// Eyelid keypoint pairs used for the lid-aperture distance: the mean
/// vertical span of the two upper/lower landmark pairs.
const LID_PAIRS: [(usize, usize); 2] = [(1, 5), (2, 4)];

/// Pupil center location inside the inference vector.
const PUPIL_OFFSET: usize = 12;

/// Fixed sleep ending every worker tick; frame sources are polled.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Decode a raw inference vector into an [`EyeSample`]. Returns `None`
/// for a wrong-length vector or an all-zero (failed) detection.
pub fn decode_vector(eye: Eye, vector: &[f32]) -> Option<EyeSample> {
    if vector.len() != EYE_VECTOR_LEN {
        return None;
    }

    let point = |i: usize| Vec2::new(vector[2 * i], vector[2 * i + 1]);
    let lid_distance = LID_PAIRS
        .iter()
        .map(|&(a, b)| point(a).distance(point(b)))
        .sum::<f32>()
        / LID_PAIRS.len() as f32;

    let pupil = Vec2::new(vector[PUPIL_OFFSET], vector[PUPIL_OFFSET + 1]);
    if pupil == Vec2::ZERO && lid_distance == 0.0 {
        return None;
    }

    Some(EyeSample {
        eye,
        pupil,
        lid_distance,
    })
}

pub struct EyeWorker {
    eye: Eye,
    frames: Box<dyn FrameSource>,
    inference: Box<dyn InferenceSource>,
    estimator: StateEstimator,
    calibration: EyeCalibration,
    compensation: GazeCompensation,
    flip_x: bool,
    flip_y: bool,
    seeded: bool,
    snapshot_tx: SyncSender<EyeSnapshot>,
    command_rx: Receiver<WorkerCommand>,
    event_tx: Sender<WorkerEvent>,
}

impl EyeWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        eye: Eye,
        frames: Box<dyn FrameSource>,
        inference: Box<dyn InferenceSource>,
        estimator: StateEstimator,
        calibration: EyeCalibration,
        flip_x: bool,
        flip_y: bool,
        snapshot_tx: SyncSender<EyeSnapshot>,
        command_rx: Receiver<WorkerCommand>,
        event_tx: Sender<WorkerEvent>,
    ) -> Self {
        Self {
            eye,
            frames,
            inference,
            estimator,
            calibration,
            compensation: GazeCompensation::default(),
            flip_x,
            flip_y,
            seeded: false,
            snapshot_tx,
            command_rx,
            event_tx,
        }
    }

    pub fn spawn(mut self, running: Arc<AtomicBool>) -> JoinHandle<()> {
        let name = format!("eye-worker-{}", self.eye.label());
        thread::Builder::new()
            .name(name)
            .spawn(move || self.run(running))
            .expect("failed to spawn eye worker thread")
    }

    fn run(&mut self, running: Arc<AtomicBool>) {
        debug!("{} eye worker started", self.eye.label());
        while running.load(Ordering::SeqCst) {
            self.drain_commands();

            if !self.frames.is_streaming() {
                thread::sleep(Duration::from_millis(50));
                continue;
            }

            let Some(frame) = self.frames.latest_frame() else {
                thread::sleep(POLL_INTERVAL);
                continue;
            };

            let vector = match self.inference.infer(&frame) {
                Ok(v) => v,
                Err(e) => {
                    warn!("{} eye inference failed: {}", self.eye.label(), e);
                    thread::sleep(Duration::from_millis(10));
                    continue;
                }
            };
            // Empty vector: no sample this tick, by contract not an error.
            if vector.is_empty() {
                thread::sleep(POLL_INTERVAL);
                continue;
            }

            let Some(sample) = decode_vector(self.eye, &vector) else {
                thread::sleep(POLL_INTERVAL);
                continue;
            };

            let snapshot = self.process_sample(sample);
            match self.snapshot_tx.try_send(snapshot) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => break,
            }

            thread::sleep(POLL_INTERVAL);
        }
        debug!("{} eye worker exiting", self.eye.label());
    }

    /// Estimate, calibrate, and normalize one decoded sample.
    fn process_sample(&mut self, sample: EyeSample) -> EyeSnapshot {
        if self.calibration.is_collecting() {
            self.calibration.absorb(sample.pupil);
            self.calibration.absorb_lid(sample.lid_distance);
        }

        let measurement = [sample.pupil.x, sample.pupil.y, sample.lid_distance];
        self.estimator.predict();
        if !self.seeded {
            // First sample after (re-)enable: skip the convergence
            // transient instead of swinging through it.
            self.estimator.set_state(&measurement);
            self.seeded = true;
        }
        let filtered = self.estimator.correct(&measurement);
        let pupil = Vec2::new(filtered[0], filtered[1]);
        let lid = filtered[2];

        let gaze = self.calibration.normalize_gaze(pupil, self.flip_x, self.flip_y);
        let openness = self.calibration.normalize_openness(lid);
        let openness =
            self.calibration
                .compensate_openness(openness, gaze, self.eye, &self.compensation);

        EyeSnapshot {
            eye: self.eye,
            state: EyeState {
                gaze,
                openness,
                dilation: 0.5,
            },
            calibrated: self.calibration.has_calibration,
            taken_at: Instant::now(),
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                WorkerCommand::BeginCalibration => {
                    debug!("{} eye calibration episode started", self.eye.label());
                    self.calibration.begin_episode();
                }
                WorkerCommand::EndCalibration => {
                    let ok = self.calibration.end_episode(self.eye);
                    let _ = self.event_tx.send(WorkerEvent::CalibrationFinished {
                        eye: self.eye,
                        ok,
                        calibration: self.calibration.clone(),
                    });
                }
                WorkerCommand::SetFilterParams { dt, q, r } => {
                    self.estimator.set_dt(dt);
                    self.estimator.set_q(q);
                    self.estimator.set_r(r);
                }
                WorkerCommand::ReplaceCalibration(calibration) => {
                    self.calibration = calibration;
                }
            }
        }
    }
}
