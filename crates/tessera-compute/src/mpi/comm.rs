//! Point-to-point and collective messaging between ranks.
//!
//! [`LocalWorld`] connects N ranks inside one process with `flume`
//! channels. Each ordered pair of ranks has a data channel, used for
//! argument transfer, and a control channel, used by collectives. Rank 0
//! coordinates every collective; the other ranks are workers.

use flume::{Receiver, Sender};
use tessera_core::Value;

use crate::error::{ComputeError, Result};

/// Payload of a message: a value, or the failure that replaced it.
pub type Message = Result<Value>;

/// Rank of the collective coordinator.
pub const COORDINATOR: usize = 0;

/// Messaging interface of one rank.
///
/// Every rank runs the same sequence of calls. Point-to-point messages
/// between a pair of ranks arrive in the order they were sent.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Name of the node this rank runs on. Ranks sharing a name share a node.
    fn processor_name(&self) -> &str;

    fn send(&self, message: Message, dest: usize) -> Result<()>;

    fn recv(&self, source: usize) -> Result<Message>;

    /// Distribute `root`'s message to every rank. Only `root` supplies one.
    fn broadcast(&self, message: Option<Message>, root: usize) -> Result<Message>;

    /// Every rank's value, indexed by rank.
    fn all_gather(&self, value: Value) -> Result<Vec<Value>>;

    fn barrier(&self) -> Result<()>;
}

/// Channels from this rank to every peer and from every peer to this rank.
struct Links {
    tx: Vec<Sender<Message>>,
    rx: Vec<Receiver<Message>>,
}

impl Links {
    fn mesh(size: usize) -> Vec<Links> {
        let mut tx: Vec<Vec<Sender<Message>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut rx: Vec<Vec<Receiver<Message>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        for src in 0..size {
            for dst in 0..size {
                let (s, r) = flume::unbounded();
                tx[src].push(s);
                rx[dst].push(r);
            }
        }
        tx.into_iter().zip(rx).map(|(tx, rx)| Links { tx, rx }).collect()
    }

    fn send(&self, rank: usize, message: Message, dest: usize) -> Result<()> {
        let tx = self.tx.get(dest).ok_or_else(|| bad_rank(dest, self.tx.len()))?;
        tx.send(message)
            .map_err(|_| ComputeError::Communication(format!("rank {} cannot reach rank {}", rank, dest)))
    }

    fn recv(&self, rank: usize, source: usize) -> Result<Message> {
        let rx = self.rx.get(source).ok_or_else(|| bad_rank(source, self.rx.len()))?;
        rx.recv()
            .map_err(|_| ComputeError::Communication(format!("rank {} hung up on rank {}", source, rank)))
    }
}

fn bad_rank(rank: usize, size: usize) -> ComputeError {
    ComputeError::InvalidArgument(format!("rank {} outside a world of {}", rank, size))
}

/// One rank of a [`LocalWorld`].
pub struct LocalComm {
    rank: usize,
    processor_name: String,
    data: Links,
    control: Links,
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.data.tx.len()
    }

    fn processor_name(&self) -> &str {
        &self.processor_name
    }

    fn send(&self, message: Message, dest: usize) -> Result<()> {
        self.data.send(self.rank, message, dest)
    }

    fn recv(&self, source: usize) -> Result<Message> {
        self.data.recv(self.rank, source)
    }

    fn broadcast(&self, message: Option<Message>, root: usize) -> Result<Message> {
        if self.rank != root {
            return self.control.recv(self.rank, root);
        }
        let message = message
            .ok_or_else(|| ComputeError::InvalidArgument(format!("broadcast root {} has nothing to send", root)))?;
        for peer in (0..self.size()).filter(|&p| p != root) {
            self.control.send(self.rank, message.clone(), peer)?;
        }
        Ok(message)
    }

    fn all_gather(&self, value: Value) -> Result<Vec<Value>> {
        let gathered = if self.rank == COORDINATOR {
            let mut values = Vec::with_capacity(self.size());
            values.push(value);
            for peer in 1..self.size() {
                values.push(self.control.recv(self.rank, peer)??);
            }
            let all = Value::List(values);
            for peer in 1..self.size() {
                self.control.send(self.rank, Ok(all.clone()), peer)?;
            }
            all
        } else {
            self.control.send(self.rank, Ok(value), COORDINATOR)?;
            self.control.recv(self.rank, COORDINATOR)??
        };
        match gathered {
            Value::List(values) => Ok(values),
            other => Err(ComputeError::Communication(format!(
                "all-gather produced a {} instead of a list",
                other.kind()
            ))),
        }
    }

    fn barrier(&self) -> Result<()> {
        self.all_gather(Value::None).map(|_| ())
    }
}

/// A group of ranks living in one process.
#[derive(Debug, Clone)]
pub struct LocalWorld {
    names: Vec<String>,
}

impl LocalWorld {
    /// One rank per entry of `processor_names`.
    pub fn new(processor_names: Vec<String>) -> Self {
        Self {
            names: processor_names,
        }
    }

    /// `nodes` nodes of `ranks_per_node` ranks each, numbered node by node.
    pub fn uniform(nodes: usize, ranks_per_node: usize) -> Self {
        let names = (0..nodes)
            .flat_map(|node| std::iter::repeat(format!("node-{}", node)).take(ranks_per_node))
            .collect();
        Self::new(names)
    }

    pub fn size(&self) -> usize {
        self.names.len()
    }

    /// Fresh, fully connected communicators, indexed by rank.
    pub fn communicators(&self) -> Vec<LocalComm> {
        let size = self.size();
        Links::mesh(size)
            .into_iter()
            .zip(Links::mesh(size))
            .zip(&self.names)
            .enumerate()
            .map(|(rank, ((data, control), name))| LocalComm {
                rank,
                processor_name: name.clone(),
                data,
                control,
            })
            .collect()
    }

    /// Run `f` on every rank, each on its own thread, and collect the
    /// results by rank.
    pub fn run<T, F>(&self, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(LocalComm) -> T + Sync,
    {
        let f = &f;
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .communicators()
                .into_iter()
                .map(|comm| {
                    std::thread::Builder::new()
                        .name(format!("rank-{}", comm.rank))
                        .spawn_scoped(scope, move || f(comm))
                })
                .collect::<std::io::Result<_>>()
                .map_err(|e| ComputeError::Communication(format!("failed to start rank: {}", e)))?;
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, h)| {
                    h.join()
                        .map_err(|_| ComputeError::Communication(format!("rank {} panicked", rank)))
                })
                .collect()
        })
    }
}
