//! Execution backend trait and the types shared by every backend.
//!
//! The [`ComputeBackend`] trait is the only entry point the array layer uses
//! to move blocks and run block operations. Implementations differ in where
//! and when work runs: immediately in the caller ([`SerialBackend`]), on one
//! rank of an SPMD process group ([`MpiBackend`]), or on a node chosen by a
//! cluster scheduler ([`SchedulerBackend`]).
//!
//! [`SerialBackend`]: crate::serial::SerialBackend
//! [`MpiBackend`]: crate::mpi::MpiBackend
//! [`SchedulerBackend`]: crate::scheduler::SchedulerBackend

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tessera_core::{DeviceId, Kwargs, Value};

use crate::error::{ComputeError, Result};
use crate::registry::Registry;

/// A plain function a backend can run remotely.
pub type RemoteFn = Arc<dyn Fn(Vec<Value>, Kwargs) -> Result<Value> + Send + Sync>;

/// Wrap a closure as a [`RemoteFn`].
pub fn remote_fn<F>(f: F) -> RemoteFn
where
    F: Fn(Vec<Value>, Kwargs) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Builds an actor from its constructor arguments.
pub type ActorFactory = Arc<dyn Fn(Vec<Value>, Kwargs) -> Result<Box<dyn Actor>> + Send + Sync>;

/// Wrap a closure as an [`ActorFactory`].
pub fn actor_factory<F>(f: F) -> ActorFactory
where
    F: Fn(Vec<Value>, Kwargs) -> Result<Box<dyn Actor>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A stateful object whose methods run on the device it was placed on.
pub trait Actor: Send {
    fn call(&mut self, method: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value>;
}

/// Scheduling hints fixed when a function is registered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteParams {
    /// CPUs the function needs on its node.
    pub num_cpus: Option<f64>,
    /// Custom resource requirements by name.
    pub resources: BTreeMap<String, f64>,
}

/// Scheduling options for a single call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    pub num_cpus: Option<f64>,
    pub resources: BTreeMap<String, f64>,
}

impl CallOptions {
    pub fn with_resource(mut self, key: impl Into<String>, amount: f64) -> Self {
        self.resources.insert(key.into(), amount);
        self
    }

    /// These options layered over a function's registration defaults.
    pub fn merged_over(self, params: &RemoteParams) -> CallOptions {
        let mut resources = params.resources.clone();
        resources.extend(self.resources);
        CallOptions {
            num_cpus: self.num_cpus.or(params.num_cpus),
            resources,
        }
    }
}

/// A function wrapped for dispatch, together with its registration defaults.
#[derive(Clone)]
pub struct RemoteFunction {
    func: RemoteFn,
    params: RemoteParams,
}

impl RemoteFunction {
    pub fn new(func: RemoteFn, params: RemoteParams) -> Self {
        Self { func, params }
    }

    pub fn params(&self) -> &RemoteParams {
        &self.params
    }

    pub fn invoke(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
        (self.func)(args, kwargs)
    }
}

impl fmt::Debug for RemoteFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFunction")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// The type of execution backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Serial,
    MessagePassing,
    Scheduler,
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendType::Serial => "serial",
            BackendType::MessagePassing => "message-passing",
            BackendType::Scheduler => "cluster-scheduler",
        };
        f.write_str(name)
    }
}

/// Describes one device of a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub device: DeviceId,
    pub backend_type: BackendType,
    pub compute_units: Option<usize>,
}

/// Placement of an actor handle. `None` when the backend left placement
/// to its scheduler.
pub trait PlacedActor {
    fn device(&self) -> Option<&DeviceId>;
}

/// Rotating device choice for actors created without a target device.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn pick<'a>(&self, devices: &'a [DeviceId]) -> Result<&'a DeviceId> {
        if devices.is_empty() {
            return Err(ComputeError::NotInitialized);
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % devices.len();
        Ok(&devices[i])
    }
}

/// Abstraction over execution backends.
///
/// Calls take a target device and return a [`Handle`](Self::Handle);
/// [`get`](Self::get) is where callers wait for results. Registration is
/// idempotent: a second registration under the same name logs a warning and
/// keeps the first.
pub trait ComputeBackend: Send + Sync {
    /// Reference to a value produced by or placed on this backend.
    type Handle: Clone + Send + Sync + From<Value>;
    /// Reference to an actor created by this backend.
    type ActorHandle: Clone + Send + Sync + PlacedActor;

    /// Discover devices. Calls before `init` fail with
    /// [`ComputeError::NotInitialized`] or [`ComputeError::UnknownDevice`].
    fn init(&mut self) -> Result<()>;

    /// Release owned resources. Safe to call without a prior `init`.
    fn shutdown(&mut self) -> Result<()>;

    /// Place `value` on `device`.
    fn put(&self, value: Value, device: &DeviceId) -> Result<Self::Handle>;

    /// Resolve handles to values, blocking until every one is available.
    fn get(&self, handles: &[Self::Handle]) -> Result<Vec<Value>>;

    /// Wrap `func` for dispatch on this backend.
    fn remote(&self, func: RemoteFn, params: RemoteParams) -> RemoteFunction {
        RemoteFunction::new(func, params)
    }

    /// Function and actor tables of this backend.
    fn registry(&self) -> &Registry;

    fn register(&self, name: &str, func: RemoteFn, params: RemoteParams) {
        let wrapped = self.remote(func, params);
        self.registry().register_function(name, wrapped);
    }

    fn register_actor(&self, name: &str, factory: ActorFactory) {
        self.registry().register_actor(name, factory);
    }

    /// Invoke the function registered as `name` on `device`.
    fn call(
        &self,
        name: &str,
        args: Vec<Self::Handle>,
        kwargs: Kwargs,
        device: Option<&DeviceId>,
        options: CallOptions,
    ) -> Result<Self::Handle>;

    /// Create an actor. Without a device, actors are spread round-robin over
    /// [`devices`](Self::devices) in creation order.
    fn make_actor(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
        device: Option<&DeviceId>,
    ) -> Result<Self::ActorHandle>;

    fn call_actor_method(
        &self,
        actor: &Self::ActorHandle,
        method: &str,
        args: Vec<Self::Handle>,
        kwargs: Kwargs,
    ) -> Result<Self::Handle>;

    fn devices(&self) -> &[DeviceId];

    fn num_cores_total(&self) -> usize;

    fn backend_type(&self) -> BackendType;

    /// One entry per device, for display.
    fn describe(&self) -> Vec<DeviceInfo> {
        self.devices()
            .iter()
            .map(|device| DeviceInfo {
                device: device.clone(),
                backend_type: self.backend_type(),
                compute_units: None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_cycles_in_order() {
        let devices: Vec<DeviceId> = (0..3).map(|i| DeviceId::new(i, format!("n{}", i), "cpu", 0)).collect();
        let rr = RoundRobin::default();
        let picked: Vec<usize> = (0..7).map(|_| rr.pick(&devices).unwrap().node_index).collect();
        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2, 0]);
        assert!(matches!(rr.pick(&[]), Err(ComputeError::NotInitialized)));
    }

    #[test]
    fn test_call_options_override_registration_defaults() {
        let params = RemoteParams {
            num_cpus: Some(1.0),
            resources: BTreeMap::from([("gpu".to_string(), 1.0), ("memory".to_string(), 2.0)]),
        };
        let merged = CallOptions::default().with_resource("memory", 4.0).merged_over(&params);
        assert_eq!(merged.num_cpus, Some(1.0));
        assert_eq!(merged.resources["memory"], 4.0);
        assert_eq!(merged.resources["gpu"], 1.0);
    }
}
