use crate::error::Result;
use crate::structures::{Body, SimulationConfig};

/// A backend that advances a body sequence by `config.step_count` steps.
///
/// Implementations validate `config` against `bodies` before touching any state,
/// and return a sequence of the same length in the same order.
pub trait Solver {
    fn name(&self) -> &'static str;

    fn simulate(&mut self, config: &SimulationConfig, bodies: Vec<Body>) -> Result<Vec<Body>>;
}
