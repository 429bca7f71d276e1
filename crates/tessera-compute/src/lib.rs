//! # Tessera Compute
//!
//! Execution backends for the Tessera block-array substrate. This crate
//! provides a [`ComputeBackend`](backend::ComputeBackend) trait that isolates
//! the array layer from where and how block operations run.
//!
//! ## Available backends
//!
//! | Backend | Execution | Suspends in |
//! |---------|-----------|-------------|
//! | [`SerialBackend`] | caller's thread, immediately | nowhere |
//! | [`MpiBackend`] | owning rank of an SPMD group | collectives, send/recv |
//! | [`SchedulerBackend`] | node chosen by resource tags | `get` |
//!
//! [`register_kernel`] makes every block operation callable by name on a
//! backend.

pub mod backend;
pub mod error;
pub mod mpi;
pub mod registry;
pub mod scheduler;
pub mod serial;

pub use backend::{
    actor_factory, remote_fn, Actor, ActorFactory, BackendType, CallOptions, ComputeBackend, DeviceInfo,
    PlacedActor, RemoteFn, RemoteFunction, RemoteParams,
};
pub use error::{ComputeError, Result};
pub use mpi::{Communicator, LocalWorld, MpiBackend, MpiHandle};
pub use registry::{register_kernel, Registry};
pub use scheduler::{LocalCluster, LocalClusterConfig, SchedulerBackend, SchedulerConfig, SchedulerHandle};
pub use serial::SerialBackend;
