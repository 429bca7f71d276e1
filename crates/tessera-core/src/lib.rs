//! # tessera-core
//!
//! Shared data model for the Tessera block-array execution substrate.
//!
//! This crate provides:
//! - [`DeviceId`]: placement targets enumerated by a backend
//! - [`Block`] and [`GridMeta`]: block metadata and grid geometry
//! - [`NdArray`] and [`DType`]: the dynamically typed block payload
//! - [`Value`]: the argument/result type of every remote call
//! - [`Selection`]: numpy-style subscripts over a single block
//! - [`rng`]: the parallel random stream scheme used for block sampling
//! - [`TDigest`]: mergeable streaming quantile summaries

pub mod block;
pub mod device;
pub mod dtype;
pub mod error;
pub mod rng;
pub mod selection;
pub mod tdigest;
pub mod value;

pub use block::{Block, GridMeta};
pub use device::DeviceId;
pub use dtype::{DType, Element, NdArray};
pub use error::{Error, Result};
pub use rng::{BlockRngState, RngParams};
pub use selection::{AxisSelector, Selection};
pub use tdigest::TDigest;
pub use value::{Kwargs, Value};
