use nalgebra::DMatrix;

/// Motion model used by [`crate::StateEstimator`]. The transition and
/// process-noise matrices are built per call so `dt`/`q` changes take
/// effect on the next step.
pub trait MotionModel: Send {
    /// State transition for `n` measured components (state length 2n).
    fn transition(&self, n: usize, dt: f32) -> DMatrix<f32>;

    /// Process noise for `n` measured components.
    fn process_noise(&self, n: usize, dt: f32, q: f32) -> DMatrix<f32>;
}

/// Constant-velocity model: position += velocity * dt, velocity held.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantVelocity;

impl MotionModel for ConstantVelocity {
    fn transition(&self, n: usize, dt: f32) -> DMatrix<f32> {
        let mut f = DMatrix::identity(2 * n, 2 * n);
        for i in 0..n {
            f[(i, n + i)] = dt;
        }
        f
    }

    fn process_noise(&self, n: usize, dt: f32, q: f32) -> DMatrix<f32> {
        let q2 = q * q;
        let pos = q2 * dt.powi(4) / 4.0;
        let cross = q2 * dt.powi(3) / 2.0;
        let vel = q2 * dt.powi(2);

        let mut m = DMatrix::zeros(2 * n, 2 * n);
        for i in 0..n {
            m[(i, i)] = pos;
            m[(i, n + i)] = cross;
            m[(n + i, i)] = cross;
            m[(n + i, n + i)] = vel;
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_moves_position_by_velocity() {
        let f = ConstantVelocity.transition(2, 0.5);
        let x = nalgebra::DVector::from_vec(vec![1.0, 2.0, 4.0, -2.0]);
        let next = &f * &x;

        assert_eq!(next[0], 3.0);
        assert_eq!(next[1], 1.0);
        assert_eq!(next[2], 4.0);
        assert_eq!(next[3], -2.0);
    }

    #[test]
    fn zero_q_means_zero_noise() {
        let m = ConstantVelocity.process_noise(3, 1.0 / 60.0, 0.0);
        assert!(m.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn noise_is_symmetric() {
        let m = ConstantVelocity.process_noise(2, 0.02, 1.5);
        assert_eq!(m, m.transpose());
    }
}
