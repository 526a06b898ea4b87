//! Partitioned solver driven by blocking collectives.
//!
//! Every worker runs the same [`Worker::run`] loop and differs only by rank.
//! Rank 0 owns the canonical body sequence and all I/O. One step is:
//!
//! 1. broadcast the pre-step snapshot to every rank,
//! 2. compute velocity deltas for the rank's own partition against the snapshot,
//! 3. gather the updated slices into the canonical sequence,
//! 4. scatter the canonical slices back out,
//! 5. move the rank's own slice,
//! 6. gather positions into the canonical sequence.
//!
//! The two gathers keep the move phase from starting before every velocity of
//! the step is final. The collective sequence depends only on `step_count`, so
//! all ranks stay in lockstep.

use std::fmt;
use std::thread;

use log::{debug, info, trace, warn};

use crate::collective::Communicator;
use crate::error::{Error, Result};
use crate::force::ForceModel;
use crate::integrator::{accelerate_range, move_bodies};
use crate::partition::PartitionPlan;
use crate::solver::Solver;
use crate::structures::{Body, SimulationConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolPhase {
    BroadcastState,
    ComputeVelocity,
    CollectVelocity,
    Redistribute,
    Move,
    CollectPosition,
}

impl fmt::Display for ProtocolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolPhase::BroadcastState => "BROADCAST_STATE",
            ProtocolPhase::ComputeVelocity => "COMPUTE_VELOCITY",
            ProtocolPhase::CollectVelocity => "COLLECT_VELOCITY",
            ProtocolPhase::Redistribute => "REDISTRIBUTE",
            ProtocolPhase::Move => "MOVE",
            ProtocolPhase::CollectPosition => "COLLECT_POSITION",
        };
        f.write_str(name)
    }
}

pub struct Worker {
    comm: Communicator,
}

impl Worker {
    pub fn new(comm: Communicator) -> Self {
        Self { comm }
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    /// Runs the whole simulation on this rank.
    ///
    /// The root passes the config and the bodies and gets the final sequence
    /// back; every other rank passes `None` and gets `None`.
    pub fn run(
        mut self,
        input: Option<(SimulationConfig, Vec<Body>)>,
    ) -> Result<Option<Vec<Body>>> {
        let (config, mut canonical) = match input {
            Some((config, bodies)) => (Some(config), Some(bodies)),
            None => (None, None),
        };
        if self.comm.is_root() != canonical.is_some() {
            return Err(Error::Protocol {
                rank: self.rank(),
                message: "only the root rank holds the body sequence".into(),
            });
        }

        let config = self.comm.broadcast_config(config)?;
        let plan = PartitionPlan::new(config.body_count, self.comm.size())?;
        let partition = plan
            .partition(self.rank())
            .ok_or_else(|| Error::Protocol {
                rank: self.rank(),
                message: "rank outside the partition plan".into(),
            })?;
        let model = ForceModel::from(&config);
        debug!(
            "rank {} owns bodies {:?} of {}",
            self.rank(),
            partition.range(),
            config.body_count
        );

        for step in 0..config.step_count {
            self.enter(ProtocolPhase::BroadcastState, step);
            let snapshot = self.comm.broadcast_bodies(canonical.as_deref())?;

            self.enter(ProtocolPhase::ComputeVelocity, step);
            let mut slice = snapshot[partition.range()].to_vec();
            accelerate_range(&snapshot, &mut slice, partition.offset, &model, config.time_step);

            self.enter(ProtocolPhase::CollectVelocity, step);
            let gathered = self.comm.gather(slice)?;
            let outgoing = match (canonical.as_mut(), gathered) {
                (Some(bodies), Some(slices)) => {
                    merge(bodies, slices);
                    Some(split(bodies, &plan))
                }
                _ => None,
            };

            self.enter(ProtocolPhase::Redistribute, step);
            let mut slice = self.comm.scatter(outgoing)?;

            self.enter(ProtocolPhase::Move, step);
            move_bodies(&mut slice, config.time_step);

            self.enter(ProtocolPhase::CollectPosition, step);
            if let (Some(bodies), Some(slices)) = (canonical.as_mut(), self.comm.gather(slice)?) {
                merge(bodies, slices);
            }
        }
        Ok(canonical)
    }

    fn enter(&self, phase: ProtocolPhase, step: usize) {
        trace!("rank {} step {}: {}", self.rank(), step, phase);
    }
}

/// Writes rank-ordered slices over the leading bodies of the canonical sequence.
fn merge(bodies: &mut [Body], slices: Vec<Vec<Body>>) {
    let mut offset = 0;
    for slice in slices {
        bodies[offset..offset + slice.len()].copy_from_slice(&slice);
        offset += slice.len();
    }
}

fn split(bodies: &[Body], plan: &PartitionPlan) -> Vec<Vec<Body>> {
    plan.partitions()
        .iter()
        .map(|partition| bodies[partition.range()].to_vec())
        .collect()
}

/// Runs one [`Worker`] per thread with a fixed worker count.
#[derive(Debug, Clone, Copy)]
pub struct DistributedSolver {
    worker_count: usize,
}

impl DistributedSolver {
    pub fn new(worker_count: usize) -> Result<Self> {
        if worker_count == 0 {
            return Err(Error::Config("worker count must be at least 1".into()));
        }
        Ok(Self { worker_count })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}

impl Solver for DistributedSolver {
    fn name(&self) -> &'static str {
        "distributed"
    }

    fn simulate(&mut self, config: &SimulationConfig, bodies: Vec<Body>) -> Result<Vec<Body>> {
        config.validate_bodies(&bodies)?;
        let plan = PartitionPlan::new(config.body_count, self.worker_count)?;
        let unassigned = plan.unassigned();
        if !unassigned.is_empty() {
            warn!(
                "{} bodies over {} workers leaves bodies {:?} unassigned; they will not move",
                config.body_count, self.worker_count, unassigned
            );
        }
        info!(
            "starting {} workers, {} bodies each",
            self.worker_count,
            plan.length()
        );

        let mut workers = Communicator::group(self.worker_count)?
            .into_iter()
            .map(Worker::new);
        let root = workers.next().ok_or_else(|| Error::Config("empty worker group".into()))?;
        let members: Vec<Worker> = workers.collect();
        let input = (*config, bodies);

        let results: Vec<Result<Option<Vec<Body>>>> = thread::scope(|scope| {
            let handles: Vec<_> = members
                .into_iter()
                .map(|worker| scope.spawn(move || worker.run(None)))
                .collect();
            let root_result = root.run(Some(input));
            std::iter::once(root_result)
                .chain(handles.into_iter().enumerate().map(|(index, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(Error::Protocol {
                            rank: index + 1,
                            message: "worker panicked".into(),
                        })
                    })
                }))
                .collect()
        });

        let mut output = None;
        for result in results {
            if let Some(bodies) = result? {
                output = Some(bodies);
            }
        }
        output.ok_or_else(|| Error::Protocol {
            rank: 0,
            message: "root returned no bodies".into(),
        })
    }
}
