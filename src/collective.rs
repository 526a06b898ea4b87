//! Blocking collectives over a fixed-size group of workers.
//!
//! Each worker owns one [`Communicator`] endpoint. The root (rank 0) holds a
//! channel pair to every other rank; members only talk to the root. No memory
//! is shared between workers: every broadcast, gather and scatter moves owned
//! copies of the bodies.
//!
//! All ranks must issue the same collectives in the same order. Every packet
//! carries its operation and a per-endpoint sequence number, so a rank that
//! falls out of step gets a [`Error::Protocol`] instead of silently reading the
//! wrong data. A peer that disappears is reported the same way, and there is no
//! recovery from it.

use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender};

use log::trace;

use crate::error::{Error, Result};
use crate::structures::{Body, SimulationConfig};

pub const ROOT_RANK: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectiveOp {
    Broadcast,
    Gather,
    Scatter,
}

impl fmt::Display for CollectiveOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollectiveOp::Broadcast => "broadcast",
            CollectiveOp::Gather => "gather",
            CollectiveOp::Scatter => "scatter",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
enum Payload {
    Config(SimulationConfig),
    Bodies(Vec<Body>),
}

#[derive(Debug)]
struct Packet {
    op: CollectiveOp,
    sequence: u64,
    payload: Payload,
}

enum Link {
    Root {
        to_members: Vec<Sender<Packet>>,
        from_members: Vec<Receiver<Packet>>,
    },
    Member {
        to_root: Sender<Packet>,
        from_root: Receiver<Packet>,
    },
}

pub struct Communicator {
    rank: usize,
    size: usize,
    sequence: u64,
    link: Link,
}

impl Communicator {
    /// Builds connected endpoints for ranks `0..size`, in rank order.
    pub fn group(size: usize) -> Result<Vec<Communicator>> {
        if size == 0 {
            return Err(Error::Config("a worker group needs at least one rank".into()));
        }
        let mut to_members = Vec::with_capacity(size - 1);
        let mut from_members = Vec::with_capacity(size - 1);
        let mut members = Vec::with_capacity(size - 1);
        for rank in 1..size {
            let (down_tx, down_rx) = channel();
            let (up_tx, up_rx) = channel();
            to_members.push(down_tx);
            from_members.push(up_rx);
            members.push(Communicator {
                rank,
                size,
                sequence: 0,
                link: Link::Member {
                    to_root: up_tx,
                    from_root: down_rx,
                },
            });
        }
        let root = Communicator {
            rank: ROOT_RANK,
            size,
            sequence: 0,
            link: Link::Root {
                to_members,
                from_members,
            },
        };
        Ok(std::iter::once(root).chain(members).collect())
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_root(&self) -> bool {
        self.rank == ROOT_RANK
    }

    /// Distributes the run parameters from the root; members pass `None`.
    pub fn broadcast_config(
        &mut self,
        config: Option<SimulationConfig>,
    ) -> Result<SimulationConfig> {
        match self.broadcast(config.map(Payload::Config))? {
            Payload::Config(config) => Ok(config),
            Payload::Bodies(_) => Err(self.protocol("expected a config, got bodies")),
        }
    }

    /// Gives every rank its own copy of the root's body sequence; members pass `None`.
    pub fn broadcast_bodies(&mut self, bodies: Option<&[Body]>) -> Result<Vec<Body>> {
        let payload = bodies.map(|bodies| Payload::Bodies(bodies.to_vec()));
        let payload = self.broadcast(payload)?;
        self.expect_bodies(payload)
    }

    /// Collects one slice per rank at the root, in rank order.
    ///
    /// Returns `Some(slices)` on the root and `None` everywhere else. All slices
    /// must have the same length.
    pub fn gather(&mut self, slice: Vec<Body>) -> Result<Option<Vec<Vec<Body>>>> {
        let sequence = self.next_sequence(CollectiveOp::Gather);
        match &self.link {
            Link::Root { from_members, .. } => {
                let length = slice.len();
                let mut slices = Vec::with_capacity(self.size);
                slices.push(slice);
                for (index, receiver) in from_members.iter().enumerate() {
                    let packet = receiver
                        .recv()
                        .map_err(|_| self.protocol(format!("rank {} hung up", index + 1)))?;
                    let payload = self.check(packet, CollectiveOp::Gather, sequence)?;
                    let received = self.expect_bodies(payload)?;
                    if received.len() != length {
                        return Err(self.protocol(format!(
                            "rank {} sent {} bodies, expected {}",
                            index + 1,
                            received.len(),
                            length
                        )));
                    }
                    slices.push(received);
                }
                Ok(Some(slices))
            }
            Link::Member { to_root, .. } => {
                self.send(to_root, CollectiveOp::Gather, sequence, Payload::Bodies(slice))?;
                Ok(None)
            }
        }
    }

    /// Hands slice `r` of the root's `slices` to rank `r`; members pass `None`.
    pub fn scatter(&mut self, slices: Option<Vec<Vec<Body>>>) -> Result<Vec<Body>> {
        let sequence = self.next_sequence(CollectiveOp::Scatter);
        match &self.link {
            Link::Root { to_members, .. } => {
                let slices = slices.ok_or_else(|| self.protocol("root must supply the slices"))?;
                if slices.len() != self.size {
                    return Err(self.protocol(format!(
                        "scatter needs {} slices, got {}",
                        self.size,
                        slices.len()
                    )));
                }
                let mut slices = slices.into_iter();
                let own = slices.next().unwrap_or_default();
                for (sender, slice) in to_members.iter().zip(slices) {
                    self.send(sender, CollectiveOp::Scatter, sequence, Payload::Bodies(slice))?;
                }
                Ok(own)
            }
            Link::Member { from_root, .. } => {
                let packet = from_root
                    .recv()
                    .map_err(|_| self.protocol("root hung up"))?;
                let payload = self.check(packet, CollectiveOp::Scatter, sequence)?;
                self.expect_bodies(payload)
            }
        }
    }

    fn broadcast(&mut self, payload: Option<Payload>) -> Result<Payload> {
        let sequence = self.next_sequence(CollectiveOp::Broadcast);
        match &self.link {
            Link::Root { to_members, .. } => {
                let payload = payload
                    .ok_or_else(|| self.protocol("root must supply the broadcast value"))?;
                for sender in to_members {
                    let copy = match &payload {
                        Payload::Config(config) => Payload::Config(*config),
                        Payload::Bodies(bodies) => Payload::Bodies(bodies.clone()),
                    };
                    self.send(sender, CollectiveOp::Broadcast, sequence, copy)?;
                }
                Ok(payload)
            }
            Link::Member { from_root, .. } => {
                let packet = from_root
                    .recv()
                    .map_err(|_| self.protocol("root hung up"))?;
                self.check(packet, CollectiveOp::Broadcast, sequence)
            }
        }
    }

    fn next_sequence(&mut self, op: CollectiveOp) -> u64 {
        self.sequence += 1;
        trace!("rank {} enters {} #{}", self.rank, op, self.sequence);
        self.sequence
    }

    fn send(
        &self,
        sender: &Sender<Packet>,
        op: CollectiveOp,
        sequence: u64,
        payload: Payload,
    ) -> Result<()> {
        sender
            .send(Packet {
                op,
                sequence,
                payload,
            })
            .map_err(|_| self.protocol(format!("peer hung up during {op}")))
    }

    fn check(&self, packet: Packet, op: CollectiveOp, sequence: u64) -> Result<Payload> {
        if packet.op != op || packet.sequence != sequence {
            return Err(self.protocol(format!(
                "expected {} #{}, received {} #{}",
                op, sequence, packet.op, packet.sequence
            )));
        }
        Ok(packet.payload)
    }

    fn expect_bodies(&self, payload: Payload) -> Result<Vec<Body>> {
        match payload {
            Payload::Bodies(bodies) => Ok(bodies),
            Payload::Config(_) => Err(self.protocol("expected bodies, got a config")),
        }
    }

    fn protocol(&self, message: impl Into<String>) -> Error {
        Error::Protocol {
            rank: self.rank,
            message: message.into(),
        }
    }
}
