//! Softened pairwise gravity.
//!
//! Outside the softening radius the field is the usual inverse-square law. At or
//! inside it the denominator becomes `-d^3`, which turns the pull into an
//! inverse-cube push. The jump at `d == r0` is kept as is.

use crate::structures::{Body, SimulationConfig, Vector3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceModel {
    pub gravitation_constant: f64,
    pub softening_radius: f64,
}

impl ForceModel {
    pub fn new(gravitation_constant: f64, softening_radius: f64) -> Self {
        Self {
            gravitation_constant,
            softening_radius,
        }
    }

    /// Field per unit source mass for a displacement `delta = source - target`.
    ///
    /// Coincident bodies (`|delta| == 0`) contribute the zero vector.
    pub fn density(&self, delta: Vector3) -> Vector3 {
        let distance = delta.magnitude();
        if distance == 0.0 {
            return Vector3::zero();
        }
        let denominator = if distance > self.softening_radius {
            distance * distance
        } else {
            -(distance * distance * distance)
        };
        let magnitude = self.gravitation_constant / denominator;
        delta * (1.0 / distance) * magnitude
    }

    /// Acceleration induced by `source` on `target`.
    pub fn induced_acceleration(&self, target: &Body, source: &Body) -> Vector3 {
        self.density(source.position - target.position) * source.mass
    }
}

impl From<&SimulationConfig> for ForceModel {
    fn from(config: &SimulationConfig) -> Self {
        Self::new(config.gravitation_constant, config.softening_radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(mass: f64, x: f64, y: f64, z: f64) -> Body {
        Body::new(mass, Vector3::new(x, y, z), Vector3::zero())
    }

    #[test]
    fn inverse_square_outside_softening() {
        let model = ForceModel::new(2.0, 0.5);
        let target = body(1.0, 0.0, 0.0, 0.0);
        let accel = model.induced_acceleration(&target, &body(3.0, 2.0, 0.0, 0.0));
        // 2 / 2^2 * 3
        assert!((accel.x - 1.5).abs() < 1e-12);
        assert_eq!(accel.y, 0.0);
        assert_eq!(accel.z, 0.0);
    }

    #[test]
    fn core_regime_is_repulsive_inverse_cube() {
        let model = ForceModel::new(1.0, 1.0);
        let target = body(1.0, 0.0, 0.0, 0.0);
        let accel = model.induced_acceleration(&target, &body(1.0, 0.5, 0.0, 0.0));
        // -1 / 0.5^3
        assert!((accel.x + 8.0).abs() < 1e-12);
    }

    #[test]
    fn boundary_belongs_to_core_regime() {
        let model = ForceModel::new(1.0, 2.0);
        let outside = model.density(Vector3::new(2.0 + 1e-9, 0.0, 0.0));
        let boundary = model.density(Vector3::new(2.0, 0.0, 0.0));
        assert!(outside.x > 0.0);
        assert!((boundary.x + 1.0 / 8.0).abs() < 1e-12);
    }

    #[test]
    fn coincident_bodies_exert_no_force() {
        let model = ForceModel::new(1.0, 0.0);
        let a = body(1.0, 1.0, 1.0, 1.0);
        assert_eq!(model.induced_acceleration(&a, &a), Vector3::zero());
    }

    #[test]
    fn antisymmetric_outside_softening() {
        let model = ForceModel::new(6.674e-3, 0.1);
        let a = body(2.0, 0.3, -1.0, 4.0);
        let b = body(5.0, -2.0, 0.5, 1.0);
        let on_a = model.induced_acceleration(&a, &b) * a.mass;
        let on_b = model.induced_acceleration(&b, &a) * b.mass;
        let sum = on_a + on_b;
        assert!(sum.magnitude() < 1e-12 * on_a.magnitude().max(1.0));
    }
}
