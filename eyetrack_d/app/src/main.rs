use anyhow::Result;
use api::{Eye, PerEye};
use common::{
    load_calibration, save_calibration, EyeCalibration, FusionEngine, StateEstimator,
    TrackingConfig,
};
use eyetrack_d::control::{self, CalibrationStatus, ControlState};
use eyetrack_d::osc::OscSink;
use eyetrack_d::scheduler::{OutputScheduler, SchedulerCommand, SchedulerCore};
use eyetrack_d::worker::{EyeSnapshot, EyeWorker, WorkerCommand, WorkerEvent};
use eyetrack_d::{backend, worker};
use log::{error, info, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, sync_channel, Receiver};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

const CONFIG_PATH: &str = "config.json";
const CALIBRATION_PATH: &str = "calibration.json";

fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    env_logger::init();

    info!("Starting...");

    let config = TrackingConfig::load_or_create(Path::new(CONFIG_PATH)).unwrap_or_else(|e| {
        error!("Failed to load config: {}. Using defaults.", e);
        TrackingConfig::default()
    });
    info!("Loaded Config: {:?}", config);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received Ctrl-C, shutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    let calibration = restore_calibration(Path::new(CALIBRATION_PATH));

    // Per-eye snapshot and command channels; the workers and the
    // scheduler share nothing else.
    let (snapshot_tx_l, snapshot_rx_l) = sync_channel::<EyeSnapshot>(1);
    let (snapshot_tx_r, snapshot_rx_r) = sync_channel::<EyeSnapshot>(1);
    let (command_tx_l, command_rx_l) = channel::<WorkerCommand>();
    let (command_tx_r, command_rx_r) = channel::<WorkerCommand>();
    let (event_tx, event_rx) = channel::<WorkerEvent>();
    let (scheduler_tx, scheduler_rx) = channel::<SchedulerCommand>();

    let mut worker_handles = Vec::new();
    match backend::load_backend(
        Path::new(&config.backend.plugins_dir),
        &config.backend.active,
    ) {
        Some(mut tracking_backend) => {
            if let Err(e) = tracking_backend.initialize() {
                error!("Failed to initialize tracking backend: {}", e);
            } else {
                let mut command_rx = PerEye::new(Some(command_rx_l), Some(command_rx_r));
                let snapshot_tx = PerEye::new(snapshot_tx_l, snapshot_tx_r);
                for eye in Eye::iter() {
                    let flip_x = match eye {
                        Eye::Left => config.eyes.flip_x_left,
                        Eye::Right => config.eyes.flip_x_right,
                    };
                    let estimator = StateEstimator::new(
                        worker::MEASUREMENT_LEN,
                        config.filter.dt,
                        config.filter.q,
                        config.filter.r,
                    );
                    let eye_worker = EyeWorker::new(
                        eye,
                        tracking_backend.frame_source(eye),
                        tracking_backend.inference_source(eye),
                        estimator,
                        calibration[eye].clone(),
                        flip_x,
                        config.eyes.flip_y,
                        snapshot_tx[eye].clone(),
                        command_rx[eye].take().expect("command receiver consumed"),
                        event_tx.clone(),
                    );
                    worker_handles.push(eye_worker.spawn(running.clone()));
                }
            }
        }
        None => {
            // No backend: scheduler still runs and emits neutral
            // frames so the consumer never freezes.
        }
    }

    let sink = OscSink::new(&config.osc.send_address, config.osc.send_port)?;
    let core = SchedulerCore::new(
        config.output.interp_steps,
        FusionEngine::new(config.eyes.sync_mode),
    );
    let scheduler = OutputScheduler::new(
        core,
        config.output.rate_hz,
        PerEye::new(snapshot_rx_l, snapshot_rx_r),
        scheduler_rx,
        Box::new(sink),
    );
    let scheduler_handle = scheduler.spawn(running.clone());

    let control_state = ControlState {
        status: Arc::new(RwLock::new(CalibrationStatus::default())),
        calibration_data: Arc::new(RwLock::new(calibration.clone())),
        worker_tx: PerEye::new(
            Arc::new(Mutex::new(command_tx_l)),
            Arc::new(Mutex::new(command_tx_r)),
        ),
        scheduler_tx: Arc::new(Mutex::new(scheduler_tx)),
        default_duration_secs: config.calibration.default_duration_secs,
    };
    spawn_control_thread(config.control.http_port, control_state.clone());

    run_event_loop(&running, &event_rx, &control_state);

    info!("Shutting down...");
    for handle in worker_handles {
        let _ = handle.join();
    }
    let _ = scheduler_handle.join();
    Ok(())
}

fn restore_calibration(path: &Path) -> PerEye<EyeCalibration> {
    if !path.exists() {
        info!("No calibration found; using defaults.");
        return PerEye::splat(EyeCalibration::default());
    }
    info!("Loading calibration from {:?}", path);
    match load_calibration(path) {
        Ok(calibration) => calibration,
        Err(e) => {
            error!("Failed to load calibration: {}. Using defaults.", e);
            PerEye::splat(EyeCalibration::default())
        }
    }
}

fn spawn_control_thread(port: u16, state: ControlState) {
    thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
        rt.block_on(async {
            if let Err(e) = control::serve(port, state).await {
                error!("Control endpoint failed: {}", e);
            }
        });
    });
}

/// Main-thread loop: collect worker events, persist calibration when
/// an episode completes.
fn run_event_loop(
    running: &Arc<AtomicBool>,
    event_rx: &Receiver<WorkerEvent>,
    control_state: &ControlState,
) {
    while running.load(Ordering::SeqCst) {
        let event = match event_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => event,
            Err(_) => continue,
        };

        match event {
            WorkerEvent::CalibrationFinished {
                eye,
                ok,
                calibration,
            } => {
                if ok {
                    info!("{} eye calibration complete", eye.label());
                } else {
                    warn!("{} eye calibration produced no samples", eye.label());
                }

                let snapshot = {
                    let mut data = control_state.calibration_data.write().unwrap();
                    data[eye] = calibration;
                    data.clone()
                };
                if let Err(e) = save_calibration(Path::new(CALIBRATION_PATH), &snapshot) {
                    error!("Failed to save calibration: {}", e);
                }
            }
        }
    }
}
