//! Direct-summation n-body simulation with three interchangeable backends:
//! a sequential reference, a partitioned solver driven by blocking collectives,
//! and a wgpu kernel that keeps the whole run inside one workgroup.

pub mod collective;
pub mod distributed;
pub mod error;
pub mod force;
pub mod integrator;
pub mod partition;
pub mod pipeline;
pub mod sequential;
pub mod solver;
pub mod structures;
pub mod task;

pub use crate::{
    distributed::DistributedSolver,
    error::{Error, Result},
    force::ForceModel,
    partition::{PartitionPlan, WorkerPartition},
    pipeline::{DeviceSolver, Residency},
    sequential::SequentialSolver,
    solver::Solver,
    structures::{Body, SimulationConfig, Vector3},
    task::Task,
};
