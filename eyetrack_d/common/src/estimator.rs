use crate::motion::{ConstantVelocity, MotionModel};
use log::warn;
use nalgebra::{DMatrix, DVector};

const INITIAL_COVARIANCE: f32 = 100.0;

/// Constant-velocity Kalman smoother over a fixed-length measurement
/// vector. State is `[positions.., velocities..]` (length 2n); only the
/// position half is observed.
///
/// Numerical degeneracy never surfaces as an error: a singular
/// innovation covariance makes `correct` return the prediction
/// unchanged.
pub struct StateEstimator<M: MotionModel = ConstantVelocity> {
    model: M,
    state: DVector<f32>,
    covariance: DMatrix<f32>,
    n: usize,
    dt: f32,
    q: f32,
    r: f32,
}

impl StateEstimator<ConstantVelocity> {
    pub fn new(measurement_len: usize, dt: f32, q: f32, r: f32) -> Self {
        Self::with_model(ConstantVelocity, measurement_len, dt, q, r)
    }
}

impl<M: MotionModel> StateEstimator<M> {
    pub fn with_model(model: M, measurement_len: usize, dt: f32, q: f32, r: f32) -> Self {
        let n = measurement_len;
        Self {
            model,
            state: DVector::zeros(2 * n),
            covariance: DMatrix::identity(2 * n, 2 * n) * INITIAL_COVARIANCE,
            n,
            dt: if dt > 0.0 { dt } else { 1.0 / 60.0 },
            q: if q > 0.0 { q } else { 1.0 },
            r: if r > 0.0 { r } else { 1.0 },
        }
    }

    /// Test/bootstrap constructor with explicit initial covariance.
    pub fn with_initial_covariance(
        model: M,
        measurement_len: usize,
        dt: f32,
        q: f32,
        r: f32,
        covariance: f32,
    ) -> Self {
        let mut est = Self::with_model(model, measurement_len, dt, q, r);
        est.covariance = DMatrix::identity(2 * est.n, 2 * est.n) * covariance;
        est
    }

    pub fn measurement_len(&self) -> usize {
        self.n
    }

    pub fn state(&self) -> &[f32] {
        self.state.as_slice()
    }

    /// Position half of the state.
    pub fn position(&self) -> &[f32] {
        &self.state.as_slice()[..self.n]
    }

    /// Force-reset the state vector without touching covariance. Used
    /// once when filtering is (re-)enabled, to skip the convergence
    /// transient. Velocity components are zeroed.
    pub fn set_state(&mut self, position: &[f32]) {
        for i in 0..self.n {
            self.state[i] = position.get(i).copied().unwrap_or(0.0);
            self.state[self.n + i] = 0.0;
        }
    }

    pub fn set_dt(&mut self, dt: f32) {
        if dt > 0.0 {
            self.dt = dt;
        } else {
            warn!("Ignoring non-positive filter dt: {}", dt);
        }
    }

    pub fn set_q(&mut self, q: f32) {
        if q > 0.0 {
            self.q = q;
        } else {
            warn!("Ignoring non-positive process noise factor: {}", q);
        }
    }

    pub fn set_r(&mut self, r: f32) {
        if r > 0.0 {
            self.r = r;
        } else {
            warn!("Ignoring non-positive measurement noise factor: {}", r);
        }
    }

    /// Advance one step: apply the transition and inflate covariance by
    /// the process noise.
    pub fn predict(&mut self) -> &[f32] {
        let f = self.model.transition(self.n, self.dt);
        let q = self.model.process_noise(self.n, self.dt, self.q);

        self.state = &f * &self.state;
        self.covariance = &f * &self.covariance * f.transpose() + q;

        self.state.as_slice()
    }

    /// Fold a measurement in via the linear Kalman update. The
    /// measurement model observes the position half of the state with
    /// covariance `r * I`.
    pub fn correct(&mut self, measurement: &[f32]) -> &[f32] {
        debug_assert_eq!(measurement.len(), self.n);

        let n = self.n;
        let h = {
            let mut h = DMatrix::zeros(n, 2 * n);
            for i in 0..n {
                h[(i, i)] = 1.0;
            }
            h
        };

        let z = DVector::from_row_slice(measurement);
        let innovation = &z - &h * &self.state;
        let s = &h * &self.covariance * h.transpose() + DMatrix::identity(n, n) * self.r;

        let Some(s_inv) = s.try_inverse() else {
            // Degenerate innovation covariance: keep the prediction.
            return self.state.as_slice();
        };

        let gain = &self.covariance * h.transpose() * s_inv;
        self.state += &gain * innovation;

        let identity = DMatrix::identity(2 * n, 2 * n);
        self.covariance = (identity - &gain * &h) * &self.covariance;
        // Keep covariance symmetric against round-off.
        self.covariance = (&self.covariance + self.covariance.transpose()) * 0.5;

        self.state.as_slice()
    }
}
