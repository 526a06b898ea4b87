//! Contiguous body ranges per worker.
//!
//! Every worker gets `body_count / worker_count` bodies starting at
//! `rank * length`. The trailing `body_count % worker_count` bodies belong to no
//! worker and are never integrated; they still act as force sources.

use std::ops::Range;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPartition {
    pub worker_id: usize,
    pub offset: usize,
    pub length: usize,
}

impl WorkerPartition {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.length
    }

    pub fn contains(&self, index: usize) -> bool {
        self.range().contains(&index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    body_count: usize,
    partitions: Vec<WorkerPartition>,
}

impl PartitionPlan {
    pub fn new(body_count: usize, worker_count: usize) -> Result<Self> {
        if worker_count == 0 {
            return Err(Error::Config("worker count must be at least 1".into()));
        }
        let length = body_count / worker_count;
        let partitions = (0..worker_count)
            .map(|worker_id| WorkerPartition {
                worker_id,
                offset: worker_id * length,
                length,
            })
            .collect();
        Ok(Self {
            body_count,
            partitions,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn body_count(&self) -> usize {
        self.body_count
    }

    /// Length shared by every partition.
    pub fn length(&self) -> usize {
        self.body_count / self.partitions.len()
    }

    pub fn partitions(&self) -> &[WorkerPartition] {
        &self.partitions
    }

    pub fn partition(&self, worker_id: usize) -> Option<WorkerPartition> {
        self.partitions.get(worker_id).copied()
    }

    /// Number of leading bodies covered by some partition.
    pub fn assigned_len(&self) -> usize {
        self.length() * self.partitions.len()
    }

    /// Bodies no worker owns.
    pub fn unassigned(&self) -> Range<usize> {
        self.assigned_len()..self.body_count
    }
}
