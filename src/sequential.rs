//! Single-lane reference solver.

use log::debug;

use crate::error::Result;
use crate::force::ForceModel;
use crate::integrator::{kick, move_bodies};
use crate::solver::Solver;
use crate::structures::{Body, SimulationConfig, Vector3};

/// Recomputes the full pairwise acceleration matrix every step.
///
/// Entry `(i, j)` of the matrix is the acceleration induced on body `i` by
/// body `j`; the diagonal is zero.
#[derive(Debug, Default)]
pub struct SequentialSolver {
    accelerations: Vec<Vector3>,
}

impl SequentialSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row-major matrix from the last computed step, empty before the first one.
    pub fn acceleration_matrix(&self) -> &[Vector3] {
        &self.accelerations
    }

    fn calculate_accelerations(&mut self, model: &ForceModel, bodies: &[Body]) {
        let n = bodies.len();
        self.accelerations.clear();
        self.accelerations.reserve(n * n);
        for (i, target) in bodies.iter().enumerate() {
            for (j, source) in bodies.iter().enumerate() {
                let accel = if i == j {
                    Vector3::zero()
                } else {
                    model.induced_acceleration(target, source)
                };
                self.accelerations.push(accel);
            }
        }
    }

    fn accelerate(&self, bodies: &mut [Body], time_step: f64) {
        let n = bodies.len();
        for (row, body) in self.accelerations.chunks_exact(n).zip(bodies.iter_mut()) {
            let sum = row.iter().fold(Vector3::zero(), |sum, &accel| sum + accel);
            kick(body, sum, time_step);
        }
    }
}

impl Solver for SequentialSolver {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn simulate(&mut self, config: &SimulationConfig, mut bodies: Vec<Body>) -> Result<Vec<Body>> {
        config.validate_bodies(&bodies)?;
        let model = ForceModel::from(config);
        for step in 0..config.step_count {
            self.calculate_accelerations(&model, &bodies);
            self.accelerate(&mut bodies, config.time_step);
            move_bodies(&mut bodies, config.time_step);
            debug!("sequential step {} of {} done", step + 1, config.step_count);
        }
        Ok(bodies)
    }
}
