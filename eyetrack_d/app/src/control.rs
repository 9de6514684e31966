//! HTTP control surface.
//!
//! The UI shell (out of scope here) drives calibration and reads
//! status over plain HTTP. This layer owns the calibration episode
//! timer: a start request flips the scheduler to Calibrating, tells
//! both eye workers to begin an episode, and a timer task ends the
//! episode and returns the scheduler to Streaming.

use crate::scheduler::{SchedulerCommand, SchedulerMode};
use crate::worker::WorkerCommand;
use api::{Eye, PerEye};
use axum::{extract::State, routing::get, routing::post, Json, Router};
use common::EyeCalibration;
use log::{info, warn};
use serde_json::{json, Value};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct CalibrationStatus {
    pub is_calibrating: bool,
    pub progress: f32,
    pub elapsed: f32,
    pub duration: f32,
}

#[derive(Clone)]
pub struct ControlState {
    pub status: Arc<RwLock<CalibrationStatus>>,
    pub calibration_data: Arc<RwLock<PerEye<EyeCalibration>>>,
    pub worker_tx: PerEye<Arc<Mutex<Sender<WorkerCommand>>>>,
    pub scheduler_tx: Arc<Mutex<Sender<SchedulerCommand>>>,
    pub default_duration_secs: f32,
}

impl ControlState {
    fn send_to_workers(&self, command: WorkerCommand) {
        for eye in Eye::iter() {
            if let Ok(tx) = self.worker_tx[eye].lock() {
                if tx.send(command.clone()).is_err() {
                    warn!("{} eye worker is gone; command dropped", eye.label());
                }
            }
        }
    }

    fn set_scheduler_mode(&self, mode: SchedulerMode) {
        if let Ok(tx) = self.scheduler_tx.lock() {
            if tx.send(SchedulerCommand::SetMode(mode)).is_err() {
                warn!("Scheduler is gone; mode change dropped");
            }
        }
    }
}

pub fn get_router(state: ControlState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/calibration/status", get(status_handler))
        .route("/calibration/data", get(calibration_data_handler))
        .route("/calibration/start", post(start_calibration_handler))
        .route("/calibration/reset", post(reset_calibration_handler))
        .route("/filter", post(filter_params_handler))
        .with_state(state)
}

/// Serve the control router. Blocks on the runtime until shutdown.
pub async fn serve(port: u16, state: ControlState) -> anyhow::Result<()> {
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Control endpoint listening on http://{}", addr);
    axum::serve(listener, get_router(state)).await?;
    Ok(())
}

async fn status_handler(State(state): State<ControlState>) -> Json<Value> {
    let status = state.status.read().unwrap().clone();
    Json(json!({
        "status": "ok",
        "calibration": status
    }))
}

async fn calibration_data_handler(State(state): State<ControlState>) -> Json<Value> {
    let data = state.calibration_data.read().unwrap().clone();
    Json(json!({
        "status": "ok",
        "data": data
    }))
}

async fn reset_calibration_handler(State(state): State<ControlState>) -> Json<Value> {
    info!("Resetting calibration to defaults");
    state.send_to_workers(WorkerCommand::ReplaceCalibration(EyeCalibration::default()));
    {
        let mut data = state.calibration_data.write().unwrap();
        *data = PerEye::splat(EyeCalibration::default());
    }
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, serde::Deserialize)]
struct FilterParamsPayload {
    dt: f32,
    q: f32,
    r: f32,
}

/// Push new filter parameters to both workers. Non-positive values are
/// rejected worker-side and the previous values kept.
async fn filter_params_handler(
    State(state): State<ControlState>,
    Json(payload): Json<FilterParamsPayload>,
) -> Json<Value> {
    info!(
        "Applying filter params dt={} q={} r={}",
        payload.dt, payload.q, payload.r
    );
    state.send_to_workers(WorkerCommand::SetFilterParams {
        dt: payload.dt,
        q: payload.q,
        r: payload.r,
    });
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, serde::Deserialize)]
struct StartCalibrationPayload {
    duration: Option<f32>,
}

async fn start_calibration_handler(
    State(state): State<ControlState>,
    payload: Option<Json<StartCalibrationPayload>>,
) -> Json<Value> {
    {
        let status = state.status.read().unwrap();
        if status.is_calibrating {
            return Json(json!({
                "status": "already_calibrating",
                "calibration": status.clone()
            }));
        }
    }

    let duration = payload
        .as_ref()
        .and_then(|p| p.duration)
        .unwrap_or(state.default_duration_secs)
        .max(1.0);

    info!("Starting calibration episode: {}s", duration);
    state.set_scheduler_mode(SchedulerMode::Calibrating);
    state.send_to_workers(WorkerCommand::BeginCalibration);
    {
        let mut status = state.status.write().unwrap();
        *status = CalibrationStatus {
            is_calibrating: true,
            progress: 0.0,
            elapsed: 0.0,
            duration,
        };
    }

    // One-shot episode timer; the core only sees begin/end.
    let timer_state = state.clone();
    tokio::spawn(async move {
        let step = Duration::from_millis(250);
        let mut elapsed = 0.0f32;
        while elapsed < duration {
            tokio::time::sleep(step).await;
            elapsed += step.as_secs_f32();
            let mut status = timer_state.status.write().unwrap();
            status.elapsed = elapsed.min(duration);
            status.progress = (elapsed / duration).clamp(0.0, 1.0);
        }

        info!("Calibration episode finished");
        timer_state.send_to_workers(WorkerCommand::EndCalibration);
        timer_state.set_scheduler_mode(SchedulerMode::Streaming);
        let mut status = timer_state.status.write().unwrap();
        status.is_calibrating = false;
        status.progress = 1.0;
    });

    Json(json!({
        "status": "starting",
        "requested_duration": duration
    }))
}
