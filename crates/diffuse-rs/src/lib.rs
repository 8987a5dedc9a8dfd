//! Inference-time acceleration layer for diffusion denoisers.
//!
//! A trained noise-prediction module is wrapped once via [`deploy`]; every
//! later invocation is transparently routed through an ahead-of-time compiled
//! execution graph. Compiled graphs are specialized per spatial resolution and
//! kept in a bounded LRU cache, and their runtime state can be saved to disk
//! so a later process warms up without paying compilation again.

pub mod backend;
pub mod bridge;
pub mod cache;
pub mod config;
pub mod deploy;
pub mod error;
pub mod graph;
mod hashing;
pub mod profiling;
pub mod state;
pub mod tensor;

pub use backend::{BackendError, BackendResult, Device, GraphBackend, NetworkModule, ParameterSpec};
pub use bridge::ArgTree;
pub use cache::{GraphCache, ShapeKey};
pub use config::{DeployOptions, FusionFlags, GraphOptions};
pub use deploy::{deploy, DeployableModule};
pub use error::{DeployError, DeployResult};
pub use graph::{CompiledGraph, GraphState};
pub use state::RuntimeState;
pub use tensor::{DType, Shape, Tensor};
