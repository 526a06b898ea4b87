use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use nbody_collective::{
    task::save_solution, DeviceSolver, DistributedSolver, Residency, SequentialSolver, Solver,
    Task,
};

#[derive(Parser, Debug)]
#[command(name = "nbody", version, about = "Direct-summation n-body simulator")]
struct Cli {
    #[command(subcommand)]
    backend: Backend,
}

#[derive(Subcommand, Debug)]
enum Backend {
    /// Single-thread reference solver.
    Sequential {
        task: PathBuf,
        solution: PathBuf,
    },
    /// Partitioned solver with one worker thread per rank.
    Distributed {
        /// Number of workers; bodies beyond a multiple of this never move.
        #[arg(short, long, default_value_t = 2)]
        workers: usize,
        task: PathBuf,
        solution: PathBuf,
    },
    /// Single-workgroup GPU kernel.
    Device {
        /// Kernel template to use instead of the built-in one.
        #[arg(short, long)]
        kernel: Option<PathBuf>,
        /// Dispatch once per step instead of looping inside the kernel.
        #[arg(long)]
        per_step: bool,
        task: PathBuf,
        solution: PathBuf,
    },
}

/// Picks the solver and the task/solution paths for the chosen backend.
fn build(backend: Backend) -> Result<(Box<dyn Solver>, PathBuf, PathBuf)> {
    match backend {
        Backend::Sequential { task, solution } => {
            let solver: Box<dyn Solver> = Box::new(SequentialSolver::new());
            Ok((solver, task, solution))
        }
        Backend::Distributed {
            workers,
            task,
            solution,
        } => {
            let solver: Box<dyn Solver> = Box::new(DistributedSolver::new(workers)?);
            Ok((solver, task, solution))
        }
        Backend::Device {
            kernel,
            per_step,
            task,
            solution,
        } => {
            let residency = if per_step {
                Residency::PerStep
            } else {
                Residency::Resident
            };
            let solver: Box<dyn Solver> = match kernel {
                Some(path) => Box::new(DeviceSolver::with_kernel_file(path, residency)?),
                None => Box::new(DeviceSolver::new(residency)),
            };
            Ok((solver, task, solution))
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let (mut solver, task_path, solution_path) = build(cli.backend)?;

    let task = Task::load(&task_path)
        .with_context(|| format!("failed to load task {}", task_path.display()))?;
    info!(
        "{} bodies, {} steps on the {} backend",
        task.config.body_count,
        task.config.step_count,
        solver.name()
    );

    let begin = Instant::now();
    let bodies = solver
        .simulate(&task.config, task.bodies)
        .with_context(|| format!("{} simulation failed", solver.name()))?;
    println!("Time taken: {:.6} sec", begin.elapsed().as_secs_f64());

    save_solution(&solution_path, &bodies)
        .with_context(|| format!("failed to write solution {}", solution_path.display()))?;
    Ok(())
}
