//! Two-phase explicit update shared by the host backends.
//!
//! Within a step the accelerate phase must finish for every body before any
//! body moves. Callers enforce that ordering; these functions only touch the
//! slice they are given.

use crate::force::ForceModel;
use crate::structures::{Body, Vector3};

/// Accelerate phase for `slice`, which holds bodies `offset..offset + slice.len()`.
///
/// Force sources are read from `snapshot` only, so the update is independent of
/// the order in which slices are processed. Accelerations are summed in source
/// index order and applied as one kick of `time_step * sum`.
pub fn accelerate_range(
    snapshot: &[Body],
    slice: &mut [Body],
    offset: usize,
    model: &ForceModel,
    time_step: f64,
) {
    for (local, body) in slice.iter_mut().enumerate() {
        let i = offset + local;
        let target = snapshot[i];
        let mut sum = Vector3::zero();
        for (j, source) in snapshot.iter().enumerate() {
            if i != j {
                sum += model.induced_acceleration(&target, source);
            }
        }
        kick(body, sum, time_step);
    }
}

/// Applies a summed acceleration to one body's velocity.
pub fn kick(body: &mut Body, acceleration: Vector3, time_step: f64) {
    body.velocity += acceleration * time_step;
}

/// Move phase: `position += time_step * velocity`.
pub fn move_bodies(slice: &mut [Body], time_step: f64) {
    for body in slice {
        body.position += body.velocity * time_step;
    }
}

/// One whole step over the full sequence.
pub fn step(bodies: &mut [Body], model: &ForceModel, time_step: f64) {
    let snapshot = bodies.to_vec();
    accelerate_range(&snapshot, bodies, 0, model, time_step);
    move_bodies(bodies, time_step);
}
