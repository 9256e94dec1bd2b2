//! Constant-velocity Kalman filter for corner smoothing
//!
//! State `[x, y, vx, vy]` with unit-timestep transition and a 2-D position
//! measurement. One filter per tracked corner.

use artrack_core::Point2f;
use nalgebra::{Matrix2, Matrix4, SMatrix, Vector2, Vector4};

type Matrix2x4 = SMatrix<f32, 2, 4>;
type Matrix4x2 = SMatrix<f32, 4, 2>;

/// Recursive position/velocity estimator for a single 2-D point
#[derive(Debug, Clone)]
pub struct PointKalman {
    /// State estimate `[x, y, vx, vy]`
    state: Vector4<f32>,
    /// Error covariance
    p: Matrix4<f32>,
    /// Transition model (constant velocity, dt = 1)
    f: Matrix4<f32>,
    /// Measurement model (observe position)
    h: Matrix2x4,
    /// Process noise
    q: Matrix4<f32>,
    /// Measurement noise
    r: Matrix2<f32>,
}

impl PointKalman {
    pub const PROCESS_NOISE: f32 = 0.03;
    pub const MEASUREMENT_NOISE: f32 = 0.1;

    /// Initialise from a first measurement (warm start: velocity zero,
    /// position pinned to the measurement, unit covariance)
    pub fn new(initial: Point2f) -> Self {
        #[rustfmt::skip]
        let f = Matrix4::new(
            1.0, 0.0, 1.0, 0.0,
            0.0, 1.0, 0.0, 1.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );
        #[rustfmt::skip]
        let h = Matrix2x4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
        );
        Self {
            state: Vector4::new(initial.x, initial.y, 0.0, 0.0),
            p: Matrix4::identity(),
            f,
            h,
            q: Matrix4::identity() * Self::PROCESS_NOISE,
            r: Matrix2::identity() * Self::MEASUREMENT_NOISE,
        }
    }

    /// Advance the model one step and return the predicted position
    pub fn predict(&mut self) -> Point2f {
        self.state = self.f * self.state;
        self.p = self.f * self.p * self.f.transpose() + self.q;
        Point2f::new(self.state[0], self.state[1])
    }

    /// Fold in a position measurement and return the corrected position
    pub fn correct(&mut self, measurement: Point2f) -> Point2f {
        let z = Vector2::new(measurement.x, measurement.y);
        let innovation = z - self.h * self.state;
        let s = self.h * self.p * self.h.transpose() + self.r;
        let k: Matrix4x2 = match s.try_inverse() {
            Some(s_inv) => self.p * self.h.transpose() * s_inv,
            // Covariance collapsed; trust the measurement outright
            None => {
                self.state[0] = measurement.x;
                self.state[1] = measurement.y;
                return measurement;
            }
        };
        self.state += k * innovation;
        self.p = (Matrix4::identity() - k * self.h) * self.p;
        Point2f::new(self.state[0], self.state[1])
    }

    /// Current position estimate without advancing the model
    pub fn position(&self) -> Point2f {
        Point2f::new(self.state[0], self.state[1])
    }
}
