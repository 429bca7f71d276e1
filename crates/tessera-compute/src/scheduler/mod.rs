//! Cluster-scheduler backend.
//!
//! Scheduling is delegated to a [`ClusterScheduler`] that places tasks by
//! resource requirements. Every node advertises a unique `node:<address>`
//! resource; a call is pinned to a device by requesting a tiny fraction of
//! that device's tag, which only its node can satisfy. Data placement uses
//! the same path: `put` is an `identity` task pinned to the target device.

pub mod cluster;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use rand::Rng;
use tessera_core::{DeviceId, Kwargs, Value};

use crate::backend::{
    remote_fn, ActorFactory, BackendType, CallOptions, ComputeBackend, DeviceInfo, PlacedActor, RemoteFn,
    RemoteFunction, RemoteParams, RoundRobin,
};
use crate::error::{ComputeError, Result};
use crate::registry::Registry;

pub use cluster::{current_node, LocalCluster, LocalClusterConfig};

/// Amount of a node's unique resource requested to pin work to it.
pub const PLACEMENT_FRACTION: f64 = 1e-4;

/// Warmup sizes at or above this are rejected.
pub const WARMUP_LIMIT: usize = 1_000_000;

const NODE_RESOURCE_PREFIX: &str = "node:";

// ─────────────────────────────────────────────────────────────
// Object references
// ─────────────────────────────────────────────────────────────

type Continuation = Box<dyn FnOnce() + Send>;

enum SlotState {
    Pending(Vec<Continuation>),
    Done(Result<Value>),
}

struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

/// A future value produced by a scheduled task.
#[derive(Clone)]
pub struct ObjectRef {
    id: u64,
    slot: Arc<Slot>,
}

impl ObjectRef {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            slot: Arc::new(Slot {
                state: Mutex::new(SlotState::Pending(Vec::new())),
                ready: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Store the task's outcome and wake everything waiting on it. Only the
    /// first resolution counts.
    pub fn resolve(&self, outcome: Result<Value>) {
        let continuations = {
            let mut state = self.slot.state.lock();
            match &mut *state {
                SlotState::Done(_) => return,
                SlotState::Pending(waiting) => {
                    let waiting = std::mem::take(waiting);
                    *state = SlotState::Done(outcome);
                    waiting
                }
            }
        };
        self.slot.ready.notify_all();
        for run in continuations {
            run();
        }
    }

    /// Block until resolved.
    pub fn wait(&self) -> Result<Value> {
        let mut state = self.slot.state.lock();
        loop {
            if let SlotState::Done(outcome) = &*state {
                return outcome.clone();
            }
            self.slot.ready.wait(&mut state);
        }
    }

    /// The outcome, if already resolved.
    pub fn try_get(&self) -> Option<Result<Value>> {
        match &*self.slot.state.lock() {
            SlotState::Done(outcome) => Some(outcome.clone()),
            SlotState::Pending(_) => None,
        }
    }

    /// Run `f` once resolved; immediately if it already is.
    pub fn on_resolved(&self, f: impl FnOnce() + Send + 'static) {
        {
            let mut state = self.slot.state.lock();
            if let SlotState::Pending(waiting) = &mut *state {
                waiting.push(Box::new(f));
                return;
            }
        }
        f();
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({})", self.id)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

/// A task argument or result: a value in hand, or one still being computed.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerHandle {
    Ready(Value),
    Pending(ObjectRef),
}

impl From<Value> for SchedulerHandle {
    fn from(value: Value) -> Self {
        SchedulerHandle::Ready(value)
    }
}

impl SchedulerHandle {
    pub fn object_ref(&self) -> Option<&ObjectRef> {
        match self {
            SchedulerHandle::Pending(r) => Some(r),
            SchedulerHandle::Ready(_) => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────
// Scheduler interface
// ─────────────────────────────────────────────────────────────

/// A node of the cluster and the resources it advertises.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub address: String,
    pub alive: bool,
    pub resources: BTreeMap<String, f64>,
}

impl NodeInfo {
    pub fn cpus(&self) -> f64 {
        self.resources.get("CPU").copied().unwrap_or(0.0)
    }

    /// The node's unique `node:<address>` resource.
    pub fn node_key(&self) -> Result<&str> {
        let mut keys = self
            .resources
            .keys()
            .filter(|k| k.starts_with(NODE_RESOURCE_PREFIX));
        match (keys.next(), keys.next()) {
            (Some(key), None) => Ok(key),
            _ => Err(ComputeError::Unschedulable(format!(
                "node {} does not advertise exactly one node resource",
                self.address
            ))),
        }
    }

    /// Whether the node can ever satisfy `options`.
    pub fn satisfies(&self, options: &CallOptions) -> bool {
        let cpus_ok = self.cpus() >= options.num_cpus.unwrap_or(1.0);
        cpus_ok
            && options
                .resources
                .iter()
                .all(|(key, amount)| self.resources.get(key).is_some_and(|have| have >= amount))
    }
}

/// Resource key advertised by the node at `address`.
pub fn node_resource(address: &str) -> String {
    format!("{}{}", NODE_RESOURCE_PREFIX, address)
}

/// A function invocation submitted to the scheduler.
pub struct TaskSpec {
    pub name: String,
    pub func: RemoteFunction,
    pub args: Vec<SchedulerHandle>,
    pub kwargs: Kwargs,
    pub options: CallOptions,
}

/// An actor construction submitted to the scheduler.
pub struct ActorSpec {
    pub name: String,
    pub factory: ActorFactory,
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
    pub options: CallOptions,
}

/// Identifies an actor within one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorId(pub u64);

/// Resource-constrained task placement, as provided by a cluster runtime.
pub trait ClusterScheduler: Send + Sync {
    fn is_initialized(&self) -> bool;

    /// Start the cluster. `num_cpus` overrides each node's CPU count.
    fn start(&self, num_cpus: Option<usize>) -> Result<()>;

    fn stop(&self) -> Result<()>;

    /// Address of the node the driver runs on.
    fn driver_address(&self) -> Result<String>;

    fn nodes(&self) -> Result<Vec<NodeInfo>>;

    /// Queue a task. It starts once every pending argument has resolved.
    fn submit(&self, task: TaskSpec) -> Result<ObjectRef>;

    fn spawn_actor(&self, spec: ActorSpec) -> Result<ActorId>;

    /// Queue a method call. Calls on one actor run in submission order.
    fn submit_actor_method(
        &self,
        actor: ActorId,
        method: &str,
        args: Vec<SchedulerHandle>,
        kwargs: Kwargs,
    ) -> Result<ObjectRef>;

    /// Block until every reference resolves.
    fn get(&self, refs: &[ObjectRef]) -> Result<Vec<Value>> {
        refs.iter().map(ObjectRef::wait).collect()
    }
}

// ─────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────

/// Options of [`SchedulerBackend`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerConfig {
    /// Place work on the head node too, if it has CPUs.
    pub use_head: bool,
    /// Use only the first `num_nodes` eligible nodes.
    pub num_nodes: Option<usize>,
    /// CPUs per node when this backend starts the cluster.
    pub num_cpus: Option<usize>,
    /// Address of the head node. Defaults to the driver's address.
    pub head_address: Option<String>,
}

/// An actor created through the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerActor {
    id: ActorId,
    device: Option<DeviceId>,
}

impl SchedulerActor {
    pub fn id(&self) -> ActorId {
        self.id
    }
}

impl PlacedActor for SchedulerActor {
    fn device(&self) -> Option<&DeviceId> {
        self.device.as_ref()
    }
}

/// Backend dispatching through a [`ClusterScheduler`].
pub struct SchedulerBackend<S: ClusterScheduler> {
    cluster: Arc<S>,
    config: SchedulerConfig,
    pin: bool,
    registry: Registry,
    devices: Vec<DeviceId>,
    device_to_node: HashMap<DeviceId, NodeInfo>,
    owns_cluster: bool,
    next_actor: RoundRobin,
}

impl<S: ClusterScheduler> SchedulerBackend<S> {
    pub fn new(cluster: Arc<S>, config: SchedulerConfig) -> Self {
        Self {
            cluster,
            config,
            pin: true,
            registry: Registry::new(),
            devices: Vec::new(),
            device_to_node: HashMap::new(),
            owns_cluster: false,
            next_actor: RoundRobin::default(),
        }
    }

    /// A variant that never pins work to devices and leaves every placement
    /// decision to the scheduler. Conflicting options are still rejected.
    pub fn stock(cluster: Arc<S>, config: SchedulerConfig) -> Self {
        Self {
            pin: false,
            ..Self::new(cluster, config)
        }
    }

    pub fn cluster(&self) -> &Arc<S> {
        &self.cluster
    }

    fn node_key(&self, device: &DeviceId) -> Result<String> {
        let node = self
            .device_to_node
            .get(device)
            .ok_or_else(|| ComputeError::UnknownDevice(device.to_string()))?;
        Ok(node.node_key()?.to_string())
    }

    /// Pinning options for `device`, merged into `options`.
    fn placement(&self, device: &DeviceId, mut options: CallOptions) -> Result<CallOptions> {
        let key = self.node_key(device)?;
        if options.resources.contains_key(&key) {
            return Err(ComputeError::PlacementConflict { key });
        }
        if self.pin {
            options.resources.insert(key, PLACEMENT_FRACTION);
        }
        Ok(options)
    }

    fn dispatch(
        &self,
        name: &str,
        func: RemoteFunction,
        args: Vec<SchedulerHandle>,
        kwargs: Kwargs,
        device: Option<&DeviceId>,
        options: CallOptions,
    ) -> Result<SchedulerHandle> {
        if !self.cluster.is_initialized() {
            return Err(ComputeError::NotInitialized);
        }
        let mut options = options.merged_over(func.params());
        if let Some(device) = device {
            options = self.placement(device, options)?;
        }
        debug!("submit '{}' with {:?}", name, options.resources);
        let task = TaskSpec {
            name: name.to_string(),
            func,
            args,
            kwargs,
            options,
        };
        Ok(SchedulerHandle::Pending(self.cluster.submit(task)?))
    }

    /// Issue `n` trivial calls across consecutive device pairs so that
    /// workers are running before anything is measured.
    pub fn warmup(&self, n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        if n >= WARMUP_LIMIT {
            return Err(ComputeError::InvalidArgument(format!(
                "warmup of {} calls exceeds the limit of {}",
                n, WARMUP_LIMIT
            )));
        }
        if self.devices.is_empty() {
            return Err(ComputeError::NotInitialized);
        }
        let add = self.remote(
            remote_fn(|args, _| {
                let total = args.iter().map(Value::as_i64).sum::<tessera_core::Result<i64>>()?;
                Ok(Value::Int(total))
            }),
            RemoteParams::default(),
        );
        let mut rng = rand::rng();
        let count = self.devices.len();
        for i in 0..n {
            let a = self.put(Value::Int(rng.random_range(0..1000)), &self.devices[i % count])?;
            let b = self.put(Value::Int(rng.random_range(0..1000)), &self.devices[(i + 1) % count])?;
            let sum = self.dispatch("warmup", add.clone(), vec![a, b], Kwargs::new(), None, CallOptions::default())?;
            self.get(&[sum])?;
        }
        debug!("warmup of {} calls done", n);
        Ok(())
    }
}

fn identity() -> RemoteFn {
    remote_fn(|mut args, _| {
        args.pop()
            .ok_or_else(|| ComputeError::InvalidArgument("identity takes one value".to_string()))
    })
}

impl<S: ClusterScheduler> ComputeBackend for SchedulerBackend<S> {
    type Handle = SchedulerHandle;
    type ActorHandle = SchedulerActor;

    fn init(&mut self) -> Result<()> {
        if !self.cluster.is_initialized() {
            self.cluster.start(self.config.num_cpus)?;
            self.owns_cluster = true;
        }
        let head_address = match &self.config.head_address {
            Some(address) => address.clone(),
            None => {
                info!("Using driver node address as head node");
                self.cluster.driver_address()?
            }
        };

        let mut head = None;
        let mut available = Vec::new();
        let mut total_cpus = 0.0;
        for node in self.cluster.nodes()?.into_iter().filter(|n| n.alive) {
            if node.address == head_address {
                info!("head node {}", node.address);
                head = Some(node);
            } else if node.cpus() > 0.0 {
                info!("worker node {}", node.address);
                total_cpus += node.cpus();
                available.push(node);
            }
        }
        match head {
            None if self.config.use_head => {
                warn!("Could not identify the head node {}; placing on workers only", head_address);
            }
            Some(node) if self.config.use_head && node.cpus() > 0.0 => {
                total_cpus += node.cpus();
                available.push(node);
            }
            _ => {}
        }
        info!("total cpus {}", total_cpus);

        let num_nodes = self.config.num_nodes.unwrap_or(available.len());
        if num_nodes > available.len() {
            return Err(ComputeError::Unschedulable(format!(
                "{} nodes requested but only {} are eligible",
                num_nodes,
                available.len()
            )));
        }

        self.devices.clear();
        self.device_to_node.clear();
        for (i, node) in available.into_iter().take(num_nodes).enumerate() {
            let device = DeviceId::new(i, node.node_key()?, "cpu", 1);
            self.devices.push(device.clone());
            self.device_to_node.insert(device, node);
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.owns_cluster {
            self.cluster.stop()?;
            self.owns_cluster = false;
        }
        self.devices.clear();
        self.device_to_node.clear();
        Ok(())
    }

    fn put(&self, value: Value, device: &DeviceId) -> Result<SchedulerHandle> {
        let func = self.remote(identity(), RemoteParams::default());
        self.dispatch(
            "identity",
            func,
            vec![SchedulerHandle::Ready(value)],
            Kwargs::new(),
            Some(device),
            CallOptions::default(),
        )
    }

    fn get(&self, handles: &[SchedulerHandle]) -> Result<Vec<Value>> {
        let refs: Vec<ObjectRef> = handles.iter().filter_map(SchedulerHandle::object_ref).cloned().collect();
        let mut resolved = self.cluster.get(&refs)?.into_iter();
        handles
            .iter()
            .map(|handle| match handle {
                SchedulerHandle::Ready(value) => Ok(value.clone()),
                SchedulerHandle::Pending(_) => resolved
                    .next()
                    .ok_or_else(|| ComputeError::Communication("scheduler returned too few values".to_string())),
            })
            .collect()
    }

    /// Functions default to one CPU each.
    fn remote(&self, func: RemoteFn, mut params: RemoteParams) -> RemoteFunction {
        params.num_cpus.get_or_insert(1.0);
        RemoteFunction::new(func, params)
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn call(
        &self,
        name: &str,
        args: Vec<SchedulerHandle>,
        kwargs: Kwargs,
        device: Option<&DeviceId>,
        options: CallOptions,
    ) -> Result<SchedulerHandle> {
        let func = self.registry.function(name)?;
        self.dispatch(name, func, args, kwargs, device, options)
    }

    fn make_actor(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
        device: Option<&DeviceId>,
    ) -> Result<SchedulerActor> {
        if !self.cluster.is_initialized() {
            return Err(ComputeError::NotInitialized);
        }
        let factory = self.registry.actor_factory(name)?;
        let (device, options) = if self.pin {
            let device = match device {
                Some(device) => device.clone(),
                None => self.next_actor.pick(&self.devices)?.clone(),
            };
            let options = self.placement(&device, CallOptions::default())?;
            (Some(device), options)
        } else {
            (None, CallOptions::default())
        };
        let id = self.cluster.spawn_actor(ActorSpec {
            name: name.to_string(),
            factory,
            args,
            kwargs,
            options,
        })?;
        Ok(SchedulerActor { id, device })
    }

    fn call_actor_method(
        &self,
        actor: &SchedulerActor,
        method: &str,
        args: Vec<SchedulerHandle>,
        kwargs: Kwargs,
    ) -> Result<SchedulerHandle> {
        let output = self.cluster.submit_actor_method(actor.id, method, args, kwargs)?;
        Ok(SchedulerHandle::Pending(output))
    }

    fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    fn num_cores_total(&self) -> usize {
        self.device_to_node.values().map(NodeInfo::cpus).sum::<f64>() as usize
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Scheduler
    }

    fn describe(&self) -> Vec<DeviceInfo> {
        self.devices
            .iter()
            .map(|device| DeviceInfo {
                device: device.clone(),
                backend_type: BackendType::Scheduler,
                compute_units: self.device_to_node.get(device).map(|n| n.cpus() as usize),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_resolves_once_and_runs_continuations() {
        let r = ObjectRef::new(7);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        r.on_resolved(move || log.lock().push("early"));
        assert!(r.try_get().is_none());
        r.resolve(Ok(Value::Int(1)));
        r.resolve(Ok(Value::Int(2)));
        let log = seen.clone();
        r.on_resolved(move || log.lock().push("late"));
        assert_eq!(r.wait().unwrap(), Value::Int(1));
        assert_eq!(*seen.lock(), vec!["early", "late"]);
    }

    #[test]
    fn test_wait_blocks_until_resolved() {
        let r = ObjectRef::new(0);
        let writer = r.clone();
        let t = std::thread::spawn(move || writer.resolve(Err(ComputeError::NotInitialized)));
        assert!(matches!(r.wait(), Err(ComputeError::NotInitialized)));
        t.join().unwrap();
    }

    #[test]
    fn test_node_requirements() {
        let node = NodeInfo {
            address: "10.0.0.2".to_string(),
            alive: true,
            resources: BTreeMap::from([("CPU".to_string(), 4.0), (node_resource("10.0.0.2"), 1.0)]),
        };
        assert_eq!(node.node_key().unwrap(), "node:10.0.0.2");
        assert!(node.satisfies(&CallOptions::default().with_resource("node:10.0.0.2", PLACEMENT_FRACTION)));
        assert!(!node.satisfies(&CallOptions::default().with_resource("node:10.0.0.3", PLACEMENT_FRACTION)));
        assert!(!node.satisfies(&CallOptions {
            num_cpus: Some(8.0),
            ..CallOptions::default()
        }));
    }
}
