//! The seam between this layer and the compiled execution framework.
//!
//! Everything framework-specific (operator translation, kernel selection,
//! device memory) lives behind [`GraphBackend`]; the deployment layer only
//! moves tensors across the seam and manages executable lifecycles.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::bridge::ArgTree;
use crate::config::GraphOptions;
use crate::state::RuntimeState;
use crate::tensor::{DType, Tensor};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("module conversion failed: {0}")]
    Conversion(String),
    #[error("graph execution failed: {0}")]
    Execution(String),
    #[error("runtime state rejected: {0}")]
    State(String),
    #[error("unknown device '{0}'")]
    UnknownDevice(String),
    #[error("unsupported on this backend: {0}")]
    Unsupported(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Placement of device buffers, parsed from strings such as `"cuda:1"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda(usize),
}

impl FromStr for Device {
    type Err = BackendError;

    fn from_str(value: &str) -> BackendResult<Self> {
        match value {
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda(0)),
            other => {
                if let Some(ordinal) = other.strip_prefix("cuda:") {
                    ordinal
                        .parse::<usize>()
                        .map(Device::Cuda)
                        .map_err(|_| BackendError::UnknownDevice(other.to_string()))
                } else {
                    Err(BackendError::UnknownDevice(other.to_string()))
                }
            }
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

/// Shape and dtype of one named module parameter.
///
/// This is the metadata the backend needs to translate the module and to
/// check a restored runtime state for layout compatibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub dims: Vec<usize>,
    pub dtype: DType,
}

/// The original, dynamically-executed network being accelerated.
///
/// The layer never mutates the module; it only invokes it (eager path) or
/// hands it to a backend for conversion (graph path).
pub trait NetworkModule {
    /// Runs the module eagerly on a nested structure of host tensors.
    fn invoke(&self, args: &ArgTree<Tensor>) -> anyhow::Result<ArgTree<Tensor>>;

    /// Parameter layout metadata consumed during conversion and state checks.
    fn parameter_specs(&self) -> Vec<ParameterSpec>;
}

/// Ahead-of-time compiling execution engine.
///
/// One [`GraphBackend::Executable`] is bound to exactly one module; executing
/// it the first time against concrete inputs performs compilation, later
/// calls reuse the compiled artifact.
pub trait GraphBackend: 'static {
    /// Tensor representation native to the compiled framework.
    type TensorHandle: Clone;
    /// Compiled (or compilable) graph bound to one converted module.
    type Executable;

    fn backend_name(&self) -> &str;

    /// Translates `module` into the backend's representation and binds a
    /// fresh, uncompiled executable to it, applying `options` at graph
    /// construction time.
    fn bind(
        &self,
        module: Arc<dyn NetworkModule>,
        options: &GraphOptions,
    ) -> BackendResult<Self::Executable>;

    /// Executes the graph, compiling on the first concrete call.
    fn execute(
        &self,
        executable: &mut Self::Executable,
        args: &ArgTree<Self::TensorHandle>,
    ) -> BackendResult<ArgTree<Self::TensorHandle>>;

    /// Snapshots the executable's buffers, weights, and kernel decisions.
    fn runtime_state(&self, executable: &Self::Executable) -> BackendResult<RuntimeState>;

    /// Installs a previously captured snapshot, skipping compilation.
    fn install_state(
        &self,
        executable: &mut Self::Executable,
        state: RuntimeState,
    ) -> BackendResult<()>;

    /// Moves a snapshot's buffers to another device before installation.
    fn retarget_state(&self, state: RuntimeState, device: &Device) -> BackendResult<RuntimeState>;

    /// Moves a host tensor into backend memory, sharing storage when possible.
    fn import(&self, tensor: &Tensor) -> BackendResult<Self::TensorHandle>;

    /// Moves a backend tensor back to the host, sharing storage when possible.
    fn export(&self, handle: &Self::TensorHandle) -> BackendResult<Tensor>;
}
