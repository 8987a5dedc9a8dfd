//! Wrapper around one backend executable bound to one network module.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::backend::{Device, GraphBackend, NetworkModule};
use crate::bridge::ArgTree;
use crate::cache::ShapeKey;
use crate::config::GraphOptions;
use crate::error::{DeployError, DeployResult};
use crate::profiling;
use crate::state::RuntimeState;

/// Lifecycle of a compiled graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    /// Never executed; no runtime state exists yet.
    Uncompiled,
    /// Built against at least one concrete shape.
    Compiled,
    /// Runtime state restored from a file, not yet independently built.
    Loaded,
}

/// Owns one compiled execution graph and its lifecycle.
///
/// The wrapper tracks the distinct shapes the graph has absorbed against its
/// dynamism budget and mediates save/load of the backend's runtime state.
pub struct CompiledGraph<B: GraphBackend> {
    backend: Arc<B>,
    executable: B::Executable,
    budget: usize,
    allow_respecialization: bool,
    state: GraphState,
    shapes_seen: Vec<ShapeKey>,
}

impl<B: GraphBackend> CompiledGraph<B> {
    /// Converts `module` through the backend and binds a fresh executable.
    pub fn bind(
        backend: Arc<B>,
        module: Arc<dyn NetworkModule>,
        options: &GraphOptions,
        allow_respecialization: bool,
    ) -> DeployResult<Self> {
        let executable = backend.bind(module, options)?;
        Ok(CompiledGraph {
            backend,
            executable,
            budget: options.dynamic_shape_budget,
            allow_respecialization,
            state: GraphState::Uncompiled,
            shapes_seen: Vec::new(),
        })
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    /// Distinct shape keys this graph has absorbed so far.
    pub fn shapes_seen(&self) -> &[ShapeKey] {
        &self.shapes_seen
    }

    /// Executes the graph; the first concrete call compiles it.
    pub fn execute(
        &mut self,
        key: &ShapeKey,
        args: &ArgTree<B::TensorHandle>,
    ) -> DeployResult<ArgTree<B::TensorHandle>> {
        self.note_shape(key)?;
        let output = self.backend.execute(&mut self.executable, args)?;
        self.state = GraphState::Compiled;
        Ok(output)
    }

    fn note_shape(&mut self, key: &ShapeKey) -> DeployResult<()> {
        if self.shapes_seen.iter().any(|seen| seen == key) {
            return Ok(());
        }
        if self.shapes_seen.len() >= self.budget {
            if !self.allow_respecialization {
                return Err(DeployError::ShapeMismatch(format!(
                    "graph already specialized for {} distinct shapes (budget {}) and \
                     re-specialization is disabled",
                    self.shapes_seen.len(),
                    self.budget
                )));
            }
            warn!(
                budget = self.budget,
                fingerprint = key.fingerprint(),
                "input shape exceeds the graph's dynamism budget; taking the slow \
                 re-specialization path"
            );
            profiling::cache_event("graph_respecialize");
        }
        self.shapes_seen.push(key.clone());
        Ok(())
    }

    /// Forces one execution with sample arguments so compilation cost is paid
    /// up front and later latency measurements stay accurate.
    pub fn compile_ahead_of_time(
        &mut self,
        key: &ShapeKey,
        sample: &ArgTree<B::TensorHandle>,
    ) -> DeployResult<()> {
        info!(
            backend = self.backend.backend_name(),
            fingerprint = key.fingerprint(),
            "compiling graph ahead of time"
        );
        let start = Instant::now();
        let _ = self.execute(key, sample)?;
        info!(
            elapsed_s = start.elapsed().as_secs_f64(),
            "graph compilation finished"
        );
        Ok(())
    }

    /// Snapshots the runtime state to `path`.
    ///
    /// Only a compiled or loaded graph has runtime state; saving an
    /// uncompiled one is an ordering error.
    pub fn save_state(&self, path: impl AsRef<Path>) -> DeployResult<()> {
        if self.state == GraphState::Uncompiled {
            return Err(DeployError::InvalidState(
                "cannot save the runtime state of a graph that was never compiled or loaded"
                    .to_string(),
            ));
        }
        let mut state = self.backend.runtime_state(&self.executable)?;
        if state.shape_key().is_none() {
            if let Some(key) = self.shapes_seen.first() {
                state.set_shape_key(key.clone());
            }
        }
        state.save(path)
    }

    /// Loads a saved runtime state from `path` and installs it, optionally
    /// retargeting buffers to `device` first.
    pub fn warmup_from_state(
        &mut self,
        path: impl AsRef<Path>,
        device: Option<&Device>,
    ) -> DeployResult<()> {
        let state = RuntimeState::load(path)?;
        self.install_runtime_state(state, device)
    }

    /// Installs an already-loaded runtime state into the executable.
    pub fn install_runtime_state(
        &mut self,
        mut state: RuntimeState,
        device: Option<&Device>,
    ) -> DeployResult<()> {
        if self.state == GraphState::Compiled {
            warn!(
                "installing a saved runtime state over an already-compiled graph; \
                 the organically compiled state is discarded"
            );
        }
        if let Some(device) = device {
            state = self.backend.retarget_state(state, device)?;
        }
        if let Some(key) = state.shape_key().cloned() {
            if !self.shapes_seen.contains(&key) {
                self.shapes_seen.push(key);
            }
        }
        self.backend
            .install_state(&mut self.executable, state)
            .map_err(|err| DeployError::Load(err.to_string()))?;
        self.state = GraphState::Loaded;
        profiling::cache_event("graph_warmup_load");
        Ok(())
    }
}
