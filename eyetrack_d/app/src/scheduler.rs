//! Fixed-rate output scheduler.
//!
//! Decouples the irregular inference cadence from the fixed emit
//! cadence: real ticks swap in a freshly fused target, interpolated
//! ticks lerp from the previous target toward it. While a calibration
//! episode runs, every tick emits a fixed neutral frame so the remote
//! avatar holds a relaxed forward look instead of chasing half-built
//! calibration data.

use crate::channels::frame_channels;
use crate::worker::EyeSnapshot;
use api::{Eye, EyePair, EyeState, OutputSink, PerEye};
use common::FusionEngine;
use log::{debug, error};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A snapshot older than this no longer represents the channel; the
/// fusion stage treats the eye as absent (single-channel fallback).
const SNAPSHOT_STALE_AFTER: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    Calibrating,
    Streaming,
}

#[derive(Debug, Clone, Copy)]
pub enum SchedulerCommand {
    SetMode(SchedulerMode),
}

/// Tick state machine, separated from the thread loop so the timing
/// behavior is unit-testable.
pub struct SchedulerCore {
    mode: SchedulerMode,
    fusion: FusionEngine,
    /// Previous target; interpolation runs from here.
    start: EyePair,
    target: EyePair,
    /// Sub-frame counter in `[0, steps]`.
    k: u32,
    steps: u32,
    seeded: bool,
    latest: PerEye<Option<EyeSnapshot>>,
}

impl SchedulerCore {
    pub fn new(interp_steps: u32, fusion: FusionEngine) -> Self {
        Self {
            mode: SchedulerMode::Streaming,
            fusion,
            start: EyePair::neutral(),
            target: EyePair::neutral(),
            k: 0,
            steps: interp_steps,
            seeded: false,
            latest: PerEye::default(),
        }
    }

    pub fn mode(&self) -> SchedulerMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SchedulerMode) {
        if self.mode != mode {
            debug!("Scheduler mode -> {:?}", mode);
            self.mode = mode;
        }
    }

    /// Record the latest snapshot for its eye.
    pub fn ingest(&mut self, snapshot: EyeSnapshot) {
        self.latest[snapshot.eye] = Some(snapshot);
    }

    /// Produce the frame for one tick and advance the sub-frame
    /// counter. `now` decides snapshot staleness.
    pub fn tick(&mut self, now: Instant) -> EyePair {
        if self.mode == SchedulerMode::Calibrating {
            // Hold the counter so streaming resumes on a real tick.
            self.k = 0;
            return EyePair::neutral();
        }

        if self.k == 0 {
            let fused = self.fuse_latest(now);
            self.start = if self.seeded { self.target } else { fused };
            self.target = fused;
            self.seeded = true;
        }

        let t = self.k as f32 / (self.steps + 1) as f32;
        let frame = lerp_pair(&self.start, &self.target, t);
        self.k = (self.k + 1) % (self.steps + 1);
        frame
    }

    fn fuse_latest(&self, now: Instant) -> EyePair {
        let fresh = |snap: &Option<EyeSnapshot>| {
            snap.as_ref()
                .filter(|s| now.duration_since(s.taken_at) < SNAPSHOT_STALE_AFTER)
                .map(|s| s.state)
        };
        let calibrated = PerEye::new(
            self.latest[Eye::Left].map_or(false, |s| s.calibrated),
            self.latest[Eye::Right].map_or(false, |s| s.calibrated),
        );
        self.fusion.fuse(
            fresh(&self.latest[Eye::Left]),
            fresh(&self.latest[Eye::Right]),
            calibrated,
        )
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn lerp_state(a: &EyeState, b: &EyeState, t: f32) -> EyeState {
    EyeState {
        gaze: glam::Vec2::new(lerp(a.gaze.x, b.gaze.x, t), lerp(a.gaze.y, b.gaze.y, t)),
        openness: lerp(a.openness, b.openness, t),
        dilation: lerp(a.dilation, b.dilation, t),
    }
}

fn lerp_pair(a: &EyePair, b: &EyePair, t: f32) -> EyePair {
    EyePair {
        left: lerp_state(&a.left, &b.left, t),
        right: lerp_state(&a.right, &b.right, t),
    }
}

/// Thread wrapper: drains commands and snapshots, ticks the core at a
/// fixed cadence, and emits each frame through the sink. Processing
/// time is subtracted from the sleep so drift does not accumulate.
pub struct OutputScheduler {
    core: SchedulerCore,
    period: Duration,
    snapshots: PerEye<Receiver<EyeSnapshot>>,
    commands: Receiver<SchedulerCommand>,
    sink: Box<dyn OutputSink>,
}

impl OutputScheduler {
    pub fn new(
        core: SchedulerCore,
        rate_hz: f32,
        snapshots: PerEye<Receiver<EyeSnapshot>>,
        commands: Receiver<SchedulerCommand>,
        sink: Box<dyn OutputSink>,
    ) -> Self {
        let rate = if rate_hz > 0.0 { rate_hz } else { 60.0 };
        Self {
            core,
            period: Duration::from_secs_f32(1.0 / rate),
            snapshots,
            commands,
            sink,
        }
    }

    pub fn spawn(mut self, running: Arc<AtomicBool>) -> JoinHandle<()> {
        thread::Builder::new()
            .name("output-scheduler".to_string())
            .spawn(move || self.run(running))
            .expect("failed to spawn scheduler thread")
    }

    fn run(&mut self, running: Arc<AtomicBool>) {
        debug!("Output scheduler started ({:?} period)", self.period);
        while running.load(Ordering::SeqCst) {
            let tick_start = Instant::now();

            while let Ok(command) = self.commands.try_recv() {
                match command {
                    SchedulerCommand::SetMode(mode) => self.core.set_mode(mode),
                }
            }
            for eye in Eye::iter() {
                while let Ok(snapshot) = self.snapshots[eye].try_recv() {
                    self.core.ingest(snapshot);
                }
            }

            let frame = self.core.tick(Instant::now());
            let (values, addresses) = frame_channels(&frame);
            if let Err(e) = self.sink.emit(&values, &addresses) {
                error!("Failed to emit output frame: {}", e);
            }

            let elapsed = tick_start.elapsed();
            if elapsed < self.period {
                thread::sleep(self.period - elapsed);
            }
        }
        debug!("Output scheduler exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    fn snapshot(eye: Eye, gx: f32, openness: f32, at: Instant) -> EyeSnapshot {
        EyeSnapshot {
            eye,
            state: EyeState {
                gaze: Vec2::new(gx, 0.0),
                openness,
                dilation: 0.5,
            },
            calibrated: true,
            taken_at: at,
        }
    }

    #[test]
    fn first_real_tick_emits_the_target_exactly() {
        let mut core = SchedulerCore::new(3, FusionEngine::default());
        let now = Instant::now();
        core.ingest(snapshot(Eye::Left, 0.5, 0.8, now));
        core.ingest(snapshot(Eye::Right, 0.5, 0.8, now));

        let frame = core.tick(now);
        // start was seeded equal to target: no startup jump.
        assert_eq!(frame, core.target);
        assert_eq!(frame.left.openness, 0.8);
    }

    #[test]
    fn interpolation_parameter_sequence_is_quarters() {
        let mut core = SchedulerCore::new(3, FusionEngine::default());
        let now = Instant::now();
        core.ingest(snapshot(Eye::Left, 0.0, 0.0, now));
        core.ingest(snapshot(Eye::Right, 0.0, 0.0, now));
        // Seed cycle: start = target = openness 0.
        for _ in 0..4 {
            core.tick(now);
        }

        core.ingest(snapshot(Eye::Left, 0.0, 1.0, now));
        core.ingest(snapshot(Eye::Right, 0.0, 1.0, now));

        // Next cycle interpolates start (0) -> target (1) at
        // t = 0, 1/4, 2/4, 3/4.
        let emitted: Vec<f32> = (0..4).map(|_| core.tick(now).left.openness).collect();
        assert_eq!(emitted, vec![0.0, 0.25, 0.5, 0.75]);
    }

    #[test]
    fn real_tick_frame_has_no_interpolation_residue() {
        let mut core = SchedulerCore::new(3, FusionEngine::default());
        let now = Instant::now();
        core.ingest(snapshot(Eye::Left, 0.25, 0.6, now));
        core.ingest(snapshot(Eye::Right, 0.25, 0.6, now));

        let frame = core.tick(now);
        // t = 0: exact equality, not approximate.
        assert_eq!(frame.left.gaze.x, core.target.left.gaze.x);
        assert_eq!(frame.left.openness, core.target.left.openness);
    }

    #[test]
    fn calibrating_mode_emits_neutral_every_tick() {
        let mut core = SchedulerCore::new(3, FusionEngine::default());
        let now = Instant::now();
        core.ingest(snapshot(Eye::Left, 0.9, 0.1, now));
        core.ingest(snapshot(Eye::Right, -0.9, 0.1, now));
        core.set_mode(SchedulerMode::Calibrating);

        for _ in 0..8 {
            assert_eq!(core.tick(now), EyePair::neutral());
        }
    }

    #[test]
    fn stale_snapshot_falls_back_to_mirroring() {
        let mut core = SchedulerCore::new(0, FusionEngine::default());
        let now = Instant::now();
        core.ingest(snapshot(Eye::Left, 0.5, 0.7, now));
        core.ingest(snapshot(Eye::Right, -0.2, 0.7, now - Duration::from_secs(2)));

        let frame = core.tick(now);
        // The stale right channel mirrors the left one.
        assert_eq!(frame.right.gaze.x, -frame.left.gaze.x);
    }

    #[test]
    fn no_snapshots_yet_emits_neutral_in_streaming_mode() {
        let mut core = SchedulerCore::new(3, FusionEngine::default());
        let frame = core.tick(Instant::now());
        assert_eq!(frame, EyePair::neutral());
    }
}
