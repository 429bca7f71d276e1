//! Single-process synchronous backend.
//!
//! Handles are the values themselves: `put` and `get` are identities and
//! `call` runs the function before returning. Every other backend is
//! checked against this one.

use std::sync::Arc;

use log::info;
use parking_lot::Mutex;
use tessera_core::{DeviceId, Kwargs, Value};

use crate::backend::{Actor, BackendType, CallOptions, ComputeBackend, PlacedActor, RoundRobin};
use crate::error::{ComputeError, Result};
use crate::registry::Registry;

/// An actor living in the caller's process.
#[derive(Clone)]
pub struct SerialActor {
    device: DeviceId,
    inner: Arc<Mutex<Box<dyn Actor>>>,
}

impl PlacedActor for SerialActor {
    fn device(&self) -> Option<&DeviceId> {
        Some(&self.device)
    }
}

/// Synchronous backend running everything in the calling thread.
pub struct SerialBackend {
    num_cpus: usize,
    registry: Registry,
    devices: Vec<DeviceId>,
    next_actor: RoundRobin,
}

impl SerialBackend {
    /// Create a serial backend reporting every available thread as a core.
    pub fn new() -> Self {
        Self::with_cpus(rayon::current_num_threads())
    }

    /// Create a serial backend reporting `num_cpus` cores.
    pub fn with_cpus(num_cpus: usize) -> Self {
        Self {
            num_cpus,
            registry: Registry::new(),
            devices: Vec::new(),
            next_actor: RoundRobin::default(),
        }
    }

    fn check_device(&self, device: &DeviceId) -> Result<()> {
        if self.devices.is_empty() {
            return Err(ComputeError::NotInitialized);
        }
        if !self.devices.contains(device) {
            return Err(ComputeError::UnknownDevice(device.to_string()));
        }
        Ok(())
    }
}

impl Default for SerialBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for SerialBackend {
    type Handle = Value;
    type ActorHandle = SerialActor;

    fn init(&mut self) -> Result<()> {
        self.devices = vec![DeviceId::new(0, "localhost", "cpu", 0)];
        info!("Serial backend ready ({} cores)", self.num_cpus);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.devices.clear();
        Ok(())
    }

    fn put(&self, value: Value, device: &DeviceId) -> Result<Value> {
        self.check_device(device)?;
        Ok(value)
    }

    fn get(&self, handles: &[Value]) -> Result<Vec<Value>> {
        Ok(handles.to_vec())
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn call(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
        device: Option<&DeviceId>,
        _options: CallOptions,
    ) -> Result<Value> {
        if let Some(device) = device {
            self.check_device(device)?;
        }
        let func = self.registry.function(name)?;
        func.invoke(args, kwargs).map_err(|e| ComputeError::remote(name, e))
    }

    fn make_actor(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
        device: Option<&DeviceId>,
    ) -> Result<SerialActor> {
        let device = match device {
            Some(device) => {
                self.check_device(device)?;
                device.clone()
            }
            None => self.next_actor.pick(&self.devices)?.clone(),
        };
        let factory = self.registry.actor_factory(name)?;
        let actor = factory(args, kwargs).map_err(|e| ComputeError::remote(name, e))?;
        Ok(SerialActor {
            device,
            inner: Arc::new(Mutex::new(actor)),
        })
    }

    fn call_actor_method(
        &self,
        actor: &SerialActor,
        method: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Value> {
        actor
            .inner
            .lock()
            .call(method, args, kwargs)
            .map_err(|e| ComputeError::remote(method, e))
    }

    fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    fn num_cores_total(&self) -> usize {
        self.num_cpus
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Serial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{remote_fn, RemoteParams};

    #[test]
    fn test_call_runs_immediately() {
        let mut backend = SerialBackend::with_cpus(4);
        backend.init().unwrap();
        backend.register(
            "double",
            remote_fn(|args, _| Ok(Value::Int(args[0].as_i64()? * 2))),
            RemoteParams::default(),
        );
        let device = backend.devices()[0].clone();
        let out = backend
            .call("double", vec![Value::Int(21)], Kwargs::new(), Some(&device), CallOptions::default())
            .unwrap();
        assert_eq!(out, Value::Int(42));
        assert_eq!(backend.num_cores_total(), 4);
    }

    #[test]
    fn test_device_checks() {
        let mut backend = SerialBackend::new();
        let device = DeviceId::new(0, "localhost", "cpu", 0);
        assert!(matches!(backend.put(Value::None, &device), Err(ComputeError::NotInitialized)));
        backend.init().unwrap();
        assert!(backend.put(Value::None, &device).is_ok());
        let elsewhere = DeviceId::new(1, "10.0.0.9", "cpu", 0);
        assert!(matches!(backend.put(Value::None, &elsewhere), Err(ComputeError::UnknownDevice(_))));
        backend.shutdown().unwrap();
        backend.shutdown().unwrap();
    }
}
