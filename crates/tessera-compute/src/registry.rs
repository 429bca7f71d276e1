//! Name tables for remote functions and actor factories.

use std::collections::HashMap;

use log::warn;
use parking_lot::Mutex;
use tessera_kernel::KernelOp;

use crate::backend::{remote_fn, ActorFactory, ComputeBackend, RemoteFn, RemoteFunction, RemoteParams};
use crate::error::{ComputeError, Result};

/// Registered functions and actor factories of one backend.
///
/// The first registration under a name wins; later ones are logged and
/// dropped so that work already dispatched under that name keeps its
/// meaning.
#[derive(Default)]
pub struct Registry {
    functions: Mutex<HashMap<String, RemoteFunction>>,
    actors: Mutex<HashMap<String, ActorFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if `name` was already registered.
    pub fn register_function(&self, name: &str, func: RemoteFunction) -> bool {
        let mut functions = self.functions.lock();
        if functions.contains_key(name) {
            warn!("Function '{}' is already registered; keeping the existing one", name);
            return false;
        }
        functions.insert(name.to_string(), func);
        true
    }

    /// Returns `false` if `name` was already registered.
    pub fn register_actor(&self, name: &str, factory: ActorFactory) -> bool {
        let mut actors = self.actors.lock();
        if actors.contains_key(name) {
            warn!("Actor '{}' is already registered; keeping the existing one", name);
            return false;
        }
        actors.insert(name.to_string(), factory);
        true
    }

    pub fn function(&self, name: &str) -> Result<RemoteFunction> {
        self.functions
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| ComputeError::Unregistered(name.to_string()))
    }

    pub fn actor_factory(&self, name: &str) -> Result<ActorFactory> {
        self.actors
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| ComputeError::Unregistered(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.lock().contains_key(name)
    }

    /// Registered function names, sorted.
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

/// `op` as a remote function.
pub fn kernel_function(op: KernelOp) -> RemoteFn {
    remote_fn(move |args, kwargs| Ok(tessera_kernel::dispatch(op, args, kwargs)?))
}

/// Register every block operation with `backend` under its contract name.
pub fn register_kernel<B: ComputeBackend>(backend: &B) {
    for &op in KernelOp::ALL {
        backend.register(op.name(), kernel_function(op), RemoteParams::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{Kwargs, Value};

    fn constant(v: i64) -> RemoteFunction {
        RemoteFunction::new(remote_fn(move |_, _| Ok(Value::Int(v))), RemoteParams::default())
    }

    #[test]
    fn test_first_registration_wins() {
        let registry = Registry::new();
        assert!(registry.register_function("answer", constant(42)));
        assert!(!registry.register_function("answer", constant(7)));
        let f = registry.function("answer").unwrap();
        assert_eq!(f.invoke(vec![], Kwargs::new()).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_missing_names() {
        let registry = Registry::new();
        assert!(matches!(registry.function("nope"), Err(ComputeError::Unregistered(_))));
        assert!(matches!(registry.actor_factory("nope"), Err(ComputeError::Unregistered(_))));
    }

    #[test]
    fn test_kernel_function_surfaces_kernel_errors() {
        let f = kernel_function(KernelOp::Identity);
        assert_eq!(f(vec![Value::Int(3)], Kwargs::new()).unwrap(), Value::Int(3));
        let touch = kernel_function(KernelOp::Touch);
        assert!(matches!(touch(vec![], Kwargs::new()), Err(ComputeError::Kernel(_))));
    }
}
