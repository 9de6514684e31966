//! Pipeline tests
//!
//! End-to-end checks across calibration, fusion, and the output
//! scheduler, without threads where possible.

use api::{Eye, EyePair, EyeState, OutputSink, PerEye};
use common::{EyeCalibration, FusionEngine, SyncMode};
use eyetrack_d::channels;
use eyetrack_d::scheduler::{OutputScheduler, SchedulerCore};
use glam::Vec2;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, sync_channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod calibrated_to_fused {
    use super::*;

    /// Left eye calibrated 50..150 around offset 100, right eye
    /// uncalibrated: a pupil at (125, 100) looks right at +0.5 and the
    /// mirrored right channel reports -0.5.
    #[test]
    fn single_calibrated_eye_drives_both_channels() {
        let mut cal = EyeCalibration::default();
        cal.begin_episode();
        cal.absorb(Vec2::new(100.0, 100.0));
        cal.absorb(Vec2::new(50.0, 50.0));
        cal.absorb(Vec2::new(150.0, 150.0));
        cal.absorb_lid(2.0);
        cal.absorb_lid(10.0);
        assert!(cal.end_episode(Eye::Left));

        let gaze = cal.normalize_gaze(Vec2::new(125.0, 100.0), false, false);
        assert!((gaze.x - 0.5).abs() < 1e-6);

        let left = EyeState {
            gaze,
            openness: cal.normalize_openness(10.0),
            dilation: 0.5,
        };

        let engine = FusionEngine::default();
        let fused = engine.fuse(Some(left), None, PerEye::new(true, false));

        assert!((fused.left.gaze.x - 0.5).abs() < 1e-6);
        assert!((fused.right.gaze.x + 0.5).abs() < 1e-6);
        assert_eq!(fused.right.gaze.y, fused.left.gaze.y);
        assert_eq!(fused.right.openness, fused.left.openness);
        // The uncalibrated right eye reports neutral dilation.
        assert_eq!(fused.right.dilation, 0.5);
    }

    #[test]
    fn sync_mode_flows_from_config_value() {
        let engine = FusionEngine::new(SyncMode::RightControlsBoth);
        let left = EyeState {
            gaze: Vec2::ZERO,
            openness: 0.1,
            dilation: 0.5,
        };
        let right = EyeState {
            gaze: Vec2::ZERO,
            openness: 0.9,
            dilation: 0.5,
        };

        let fused = engine.fuse(Some(left), Some(right), PerEye::splat(true));
        assert_eq!(fused.left.openness, 0.9);
        assert_eq!(fused.right.openness, 0.9);
    }
}

mod emitted_channels {
    use super::*;

    #[test]
    fn neutral_frame_emits_documented_neutral_values() {
        let (values, addresses) = channels::frame_channels(&EyePair::neutral());
        assert_eq!(values.len(), 7);
        assert_eq!(addresses.len(), 7);

        let value_of = |addr: &str| {
            values[addresses.iter().position(|a| *a == addr).unwrap()]
        };
        assert_eq!(value_of(channels::EYELID_LEFT), 0.75);
        assert_eq!(value_of(channels::EYELID_RIGHT), 0.75);
        assert_eq!(value_of(channels::GAZE_LEFT_X), 0.0);
        assert_eq!(value_of(channels::PUPIL_DILATION), 0.5);
    }
}

mod scheduler_thread {
    use super::*;

    struct CapturingSink {
        frames: Arc<Mutex<Vec<(Vec<f32>, Vec<String>)>>>,
    }

    impl OutputSink for CapturingSink {
        fn emit(&self, values: &[f32], addresses: &[&str]) -> anyhow::Result<()> {
            self.frames.lock().unwrap().push((
                values.to_vec(),
                addresses.iter().map(|a| a.to_string()).collect(),
            ));
            Ok(())
        }
    }

    #[test]
    fn scheduler_emits_at_cadence_and_stops_on_flag() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = CapturingSink {
            frames: frames.clone(),
        };

        let (_snapshot_tx_l, snapshot_rx_l) = sync_channel(1);
        let (_snapshot_tx_r, snapshot_rx_r) = sync_channel(1);
        let (_command_tx, command_rx) = channel();

        let scheduler = OutputScheduler::new(
            SchedulerCore::new(3, FusionEngine::default()),
            120.0,
            PerEye::new(snapshot_rx_l, snapshot_rx_r),
            command_rx,
            Box::new(sink),
        );

        let running = Arc::new(AtomicBool::new(true));
        let handle = scheduler.spawn(running.clone());

        std::thread::sleep(Duration::from_millis(200));
        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();

        let frames = frames.lock().unwrap();
        // 200ms at 120Hz: plenty of ticks even on a loaded machine.
        assert!(frames.len() >= 5, "only {} frames emitted", frames.len());
        for (values, addresses) in frames.iter() {
            assert_eq!(values.len(), addresses.len());
            // No snapshots ever arrived: every frame is neutral.
            assert_eq!(values[0], 0.75);
        }
    }
}
