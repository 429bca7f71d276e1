//! Rank-based SPMD backend.
//!
//! Every rank runs the same program and makes the same backend calls. A
//! call targets the rank owning its device: arguments held by other ranks
//! are sent there, the whole group meets at a barrier, and only the target
//! executes. Other ranks get a [`MpiHandle::Remote`] marker naming the
//! owner.
//!
//! The barrier after every argument-resolution round serialises the group
//! once per call, so throughput depends on call granularity.

pub mod comm;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;
use tessera_core::{DeviceId, Kwargs, Value};

use crate::backend::{Actor, BackendType, CallOptions, ComputeBackend, PlacedActor, RoundRobin};
use crate::error::{ComputeError, Result};
use crate::registry::Registry;

pub use comm::{Communicator, LocalComm, LocalWorld, Message};

/// A value as seen from one rank.
#[derive(Debug, Clone)]
pub enum MpiHandle {
    /// Held by this rank.
    Local(Value),
    /// A failed result held by this rank.
    Failed(ComputeError),
    /// Held by the given rank.
    Remote(usize),
    /// Known to every rank, e.g. a literal argument.
    Shared(Value),
}

impl From<Value> for MpiHandle {
    fn from(value: Value) -> Self {
        MpiHandle::Shared(value)
    }
}

impl MpiHandle {
    fn owner(&self, me: usize) -> Option<usize> {
        match self {
            MpiHandle::Local(_) | MpiHandle::Failed(_) => Some(me),
            MpiHandle::Remote(rank) => Some(*rank),
            MpiHandle::Shared(_) => None,
        }
    }

    fn into_message(self) -> Message {
        match self {
            MpiHandle::Local(v) | MpiHandle::Shared(v) => Ok(v),
            MpiHandle::Failed(e) => Err(e),
            MpiHandle::Remote(rank) => Err(ComputeError::Communication(format!(
                "value is held by rank {}",
                rank
            ))),
        }
    }
}

/// An actor handle: the actor itself on its owning rank, a marker elsewhere.
#[derive(Clone)]
pub struct MpiActor {
    device: DeviceId,
    owner: usize,
    local: Option<Arc<Mutex<Box<dyn Actor>>>>,
}

impl MpiActor {
    pub fn owner(&self) -> usize {
        self.owner
    }

    pub fn is_local(&self) -> bool {
        self.local.is_some()
    }
}

impl PlacedActor for MpiActor {
    fn device(&self) -> Option<&DeviceId> {
        Some(&self.device)
    }
}

/// Message-passing backend over a [`Communicator`].
pub struct MpiBackend<C: Communicator> {
    comm: C,
    registry: Registry,
    devices: Vec<DeviceId>,
    device_to_rank: HashMap<DeviceId, usize>,
    next_actor: RoundRobin,
    calls: AtomicU64,
}

impl<C: Communicator> MpiBackend<C> {
    pub fn new(comm: C) -> Self {
        Self {
            comm,
            registry: Registry::new(),
            devices: Vec::new(),
            device_to_rank: HashMap::new(),
            next_actor: RoundRobin::default(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn communicator(&self) -> &C {
        &self.comm
    }

    /// Calls dispatched so far, each of which cost one barrier.
    pub fn calls_dispatched(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn target_rank(&self, device: Option<&DeviceId>) -> Result<usize> {
        let device = match device {
            Some(device) => device,
            None => self.devices.first().ok_or(ComputeError::NotInitialized)?,
        };
        self.device_to_rank
            .get(device)
            .copied()
            .ok_or_else(|| ComputeError::UnknownDevice(device.to_string()))
    }

    /// Move every argument to `target`, then synchronise the group.
    ///
    /// On the target the result holds every argument's value; elsewhere it
    /// is empty.
    fn resolve_args(&self, args: Vec<MpiHandle>, target: usize) -> Result<Vec<Message>> {
        let me = self.comm.rank();
        let mut resolved = Vec::with_capacity(args.len());
        for arg in args {
            match arg.owner(me) {
                Some(owner) if owner != target => {
                    if me == owner {
                        self.comm.send(arg.into_message(), target)?;
                    } else if me == target {
                        resolved.push(self.comm.recv(owner)?);
                    }
                }
                _ => {
                    if me == target {
                        resolved.push(arg.into_message());
                    }
                }
            }
        }
        self.comm.barrier()?;
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(resolved)
    }
}

fn run_on_target(
    task: &str,
    resolved: Vec<Message>,
    f: impl FnOnce(Vec<Value>) -> Result<Value>,
) -> MpiHandle {
    let outcome = resolved
        .into_iter()
        .collect::<Result<Vec<Value>>>()
        .and_then(|values| f(values).map_err(|e| ComputeError::remote(task, e)));
    match outcome {
        Ok(value) => MpiHandle::Local(value),
        Err(e) => MpiHandle::Failed(e),
    }
}

impl<C: Communicator> ComputeBackend for MpiBackend<C> {
    type Handle = MpiHandle;
    type ActorHandle = MpiActor;

    fn init(&mut self) -> Result<()> {
        let gathered = self
            .comm
            .all_gather(Value::Str(self.comm.processor_name().to_string()))?;
        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        for (rank, name) in gathered.iter().enumerate() {
            let name = name.as_str()?;
            match groups.iter_mut().find(|(n, _)| n == name) {
                Some((_, ranks)) => ranks.push(rank),
                None => groups.push((name.to_string(), vec![rank])),
            }
        }
        self.devices.clear();
        self.device_to_rank.clear();
        for (node, (name, ranks)) in groups.iter().enumerate() {
            let lead = ranks[0];
            let device = DeviceId::new(node, name.clone(), "cpu", lead);
            self.device_to_rank.insert(device.clone(), lead);
            self.devices.push(device);
        }
        if self.comm.rank() == comm::COORDINATOR {
            info!(
                "Message-passing backend: {} ranks on {} nodes",
                self.comm.size(),
                self.devices.len()
            );
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.devices.clear();
        self.device_to_rank.clear();
        Ok(())
    }

    fn put(&self, value: Value, device: &DeviceId) -> Result<MpiHandle> {
        let owner = self.target_rank(Some(device))?;
        Ok(if owner == self.comm.rank() {
            MpiHandle::Local(value)
        } else {
            MpiHandle::Remote(owner)
        })
    }

    fn get(&self, handles: &[MpiHandle]) -> Result<Vec<Value>> {
        let me = self.comm.rank();
        let mut messages = Vec::with_capacity(handles.len());
        for handle in handles {
            let message = match handle.owner(me) {
                None => handle.clone().into_message(),
                Some(owner) => {
                    let mine = (owner == me).then(|| handle.clone().into_message());
                    self.comm.broadcast(mine, owner)?
                }
            };
            messages.push(message);
        }
        messages.into_iter().collect()
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn call(
        &self,
        name: &str,
        args: Vec<MpiHandle>,
        kwargs: Kwargs,
        device: Option<&DeviceId>,
        _options: CallOptions,
    ) -> Result<MpiHandle> {
        let target = self.target_rank(device)?;
        let func = self.registry.function(name)?;
        let resolved = self.resolve_args(args, target)?;
        if target != self.comm.rank() {
            return Ok(MpiHandle::Remote(target));
        }
        debug!("rank {} runs '{}'", target, name);
        Ok(run_on_target(name, resolved, |values| func.invoke(values, kwargs)))
    }

    fn make_actor(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
        device: Option<&DeviceId>,
    ) -> Result<MpiActor> {
        let device = match device {
            Some(device) => device.clone(),
            None => self.next_actor.pick(&self.devices)?.clone(),
        };
        let owner = self.target_rank(Some(&device))?;
        let factory = self.registry.actor_factory(name)?;
        let local = if owner == self.comm.rank() {
            let actor = factory(args, kwargs).map_err(|e| ComputeError::remote(name, e))?;
            Some(Arc::new(Mutex::new(actor)))
        } else {
            None
        };
        Ok(MpiActor { device, owner, local })
    }

    fn call_actor_method(
        &self,
        actor: &MpiActor,
        method: &str,
        args: Vec<MpiHandle>,
        kwargs: Kwargs,
    ) -> Result<MpiHandle> {
        let resolved = self.resolve_args(args, actor.owner)?;
        match &actor.local {
            Some(local) => Ok(run_on_target(method, resolved, |values| {
                local.lock().call(method, values, kwargs)
            })),
            None => Ok(MpiHandle::Remote(actor.owner)),
        }
    }

    fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    fn num_cores_total(&self) -> usize {
        self.comm.size()
    }

    fn backend_type(&self) -> BackendType {
        BackendType::MessagePassing
    }
}
