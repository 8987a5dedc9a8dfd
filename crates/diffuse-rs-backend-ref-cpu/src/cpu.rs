//! CPU-resident executables that delegate execution to the bound module.

use std::sync::Arc;

use tracing::warn;

use diffuse_rs::{
    ArgTree, BackendError, BackendResult, Device, GraphBackend, GraphOptions, NetworkModule,
    ParameterSpec, RuntimeState, Shape, Tensor,
};

/// Backend-side tensor. Storage is shared with the host tensor it came from,
/// so import and export never copy payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuTensor {
    inner: Tensor,
}

impl CpuTensor {
    pub fn inner(&self) -> &Tensor {
        &self.inner
    }
}

/// One "compiled" graph bound to a module.
///
/// Compilation is modeled as materializing the module's parameter buffers;
/// the first execution flips `compiled` and thereafter the executable has
/// runtime state worth snapshotting.
pub struct CpuExecutable {
    module: Arc<dyn NetworkModule>,
    options: GraphOptions,
    buffers: Vec<(String, Tensor)>,
    compiled: bool,
}

impl CpuExecutable {
    pub fn is_compiled(&self) -> bool {
        self.compiled
    }
}

/// Reference backend executing on the host.
#[derive(Debug)]
pub struct CpuGraphBackend {
    device: Device,
}

impl Default for CpuGraphBackend {
    fn default() -> Self {
        CpuGraphBackend::new()
    }
}

impl CpuGraphBackend {
    pub fn new() -> Self {
        CpuGraphBackend {
            device: Device::Cpu,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

fn spec_mismatch(entry_name: &str, detail: String) -> BackendError {
    BackendError::State(format!(
        "state entry '{entry_name}' does not match the bound module: {detail}"
    ))
}

impl GraphBackend for CpuGraphBackend {
    type TensorHandle = CpuTensor;
    type Executable = CpuExecutable;

    fn backend_name(&self) -> &str {
        "ref-cpu"
    }

    fn bind(
        &self,
        module: Arc<dyn NetworkModule>,
        options: &GraphOptions,
    ) -> BackendResult<Self::Executable> {
        let buffers = module
            .parameter_specs()
            .into_iter()
            .map(|spec| {
                let ParameterSpec { name, dims, dtype } = spec;
                if dims.is_empty() {
                    return Err(BackendError::Conversion(format!(
                        "parameter '{name}' has an empty shape"
                    )));
                }
                let tensor = Tensor::zeros_with(Shape::new(dims), dtype);
                Ok((name, tensor))
            })
            .collect::<BackendResult<Vec<_>>>()?;
        Ok(CpuExecutable {
            module,
            options: options.clone(),
            buffers,
            compiled: false,
        })
    }

    fn execute(
        &self,
        executable: &mut Self::Executable,
        args: &ArgTree<Self::TensorHandle>,
    ) -> BackendResult<ArgTree<Self::TensorHandle>> {
        let host_args = args.try_map_tensors(&mut |handle: &CpuTensor| {
            Ok::<_, BackendError>(handle.inner.clone())
        })?;
        let output = executable
            .module
            .invoke(&host_args)
            .map_err(|err| BackendError::Execution(err.to_string()))?;
        executable.compiled = true;
        output.try_map_tensors(&mut |tensor: &Tensor| {
            Ok(CpuTensor {
                inner: tensor.clone(),
            })
        })
    }

    fn runtime_state(&self, executable: &Self::Executable) -> BackendResult<RuntimeState> {
        if !executable.compiled {
            return Err(BackendError::State(
                "executable was never compiled; nothing to snapshot".to_string(),
            ));
        }
        let mut state = RuntimeState::new(self.device.clone());
        state.set_options(executable.options.clone());
        for (name, tensor) in &executable.buffers {
            state.push_entry(name.clone(), tensor.clone());
        }
        Ok(state)
    }

    fn install_state(
        &self,
        executable: &mut Self::Executable,
        state: RuntimeState,
    ) -> BackendResult<()> {
        if state.device() != &self.device {
            return Err(BackendError::State(format!(
                "state targets device '{}' but this backend runs on '{}'",
                state.device(),
                self.device
            )));
        }
        let specs = executable.module.parameter_specs();
        if state.entries().len() != specs.len() {
            return Err(BackendError::State(format!(
                "state carries {} entries but the module declares {} parameters",
                state.entries().len(),
                specs.len()
            )));
        }
        let mut buffers = Vec::with_capacity(specs.len());
        for (entry, spec) in state.entries().iter().zip(&specs) {
            if entry.name != spec.name {
                return Err(spec_mismatch(
                    &entry.name,
                    format!("expected parameter '{}'", spec.name),
                ));
            }
            if entry.tensor.shape().dims() != spec.dims.as_slice() {
                return Err(spec_mismatch(
                    &entry.name,
                    format!(
                        "shape {:?} does not match declared {:?}",
                        entry.tensor.shape().dims(),
                        spec.dims
                    ),
                ));
            }
            if entry.tensor.dtype() != spec.dtype {
                return Err(spec_mismatch(
                    &entry.name,
                    format!(
                        "dtype {:?} does not match declared {:?}",
                        entry.tensor.dtype(),
                        spec.dtype
                    ),
                ));
            }
            buffers.push((entry.name.clone(), entry.tensor.clone()));
        }
        if let Some(options) = state.options() {
            if options != &executable.options {
                warn!(
                    "restored state was captured under different graph options; \
                     keeping the options this executable was bound with"
                );
            }
        }
        executable.buffers = buffers;
        executable.compiled = true;
        Ok(())
    }

    fn retarget_state(&self, mut state: RuntimeState, device: &Device) -> BackendResult<RuntimeState> {
        match device {
            Device::Cpu => {
                state.set_device(Device::Cpu);
                Ok(state)
            }
            Device::Cuda(_) => Err(BackendError::Unsupported(format!(
                "cannot retarget state to '{device}' on the reference CPU backend"
            ))),
        }
    }

    fn import(&self, tensor: &Tensor) -> BackendResult<Self::TensorHandle> {
        Ok(CpuTensor {
            inner: tensor.clone(),
        })
    }

    fn export(&self, handle: &Self::TensorHandle) -> BackendResult<Tensor> {
        Ok(handle.inner.clone())
    }
}
