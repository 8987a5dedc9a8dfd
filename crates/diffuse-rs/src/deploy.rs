//! Drop-in substitute for a network module, routing calls through compiled
//! graphs.
//!
//! The shim exposes the same invocation surface as the wrapped module, so a
//! sampling loop that calls the denoiser once per timestep never learns that
//! compilation happened. The eager/graph decision is fixed at construction;
//! there is no runtime toggling that could leave a graph half-initialized.

use std::path::Path;
use std::sync::Arc;

use crate::backend::{Device, GraphBackend, NetworkModule};
use crate::bridge::{self, ArgTree};
use crate::cache::{GraphCache, ShapeKey};
use crate::config::DeployOptions;
use crate::error::{DeployError, DeployResult};
use crate::graph::CompiledGraph;
use crate::state::RuntimeState;
use crate::tensor::Tensor;

/// Wraps `module` for deployment.
///
/// With `use_graph` set, invocations are bridged into the backend, executed
/// by a shape-selected compiled graph, and bridged back; otherwise the module
/// runs eagerly and the bridge is bypassed entirely.
pub fn deploy<B: GraphBackend>(
    backend: Arc<B>,
    module: Arc<dyn NetworkModule>,
    options: DeployOptions,
) -> DeployResult<DeployableModule<B>> {
    options.validate()?;
    if options.use_graph {
        Ok(DeployableModule::GraphBound(GraphBoundModule::new(
            backend, module, options,
        )?))
    } else {
        Ok(DeployableModule::Eager(EagerModule { module }))
    }
}

/// Polymorphic substitute for the original network module.
pub enum DeployableModule<B: GraphBackend> {
    Eager(EagerModule),
    GraphBound(GraphBoundModule<B>),
}

impl<B: GraphBackend> DeployableModule<B> {
    /// Invokes the module, transparently using the compiled path when bound.
    pub fn invoke(&mut self, args: &ArgTree<Tensor>) -> DeployResult<ArgTree<Tensor>> {
        match self {
            DeployableModule::Eager(module) => Ok(module.module.invoke(args)?),
            DeployableModule::GraphBound(module) => module.invoke(args),
        }
    }

    /// Alias kept for pipelines that drive denoisers through `apply_model`.
    pub fn apply_model(&mut self, args: &ArgTree<Tensor>) -> DeployResult<ArgTree<Tensor>> {
        self.invoke(args)
    }

    /// Whether invocations route through compiled graphs.
    pub fn graph_mode(&self) -> bool {
        matches!(self, DeployableModule::GraphBound(_))
    }

    /// Number of compiled graphs currently resident (zero in eager mode).
    pub fn resident_graphs(&self) -> usize {
        match self {
            DeployableModule::Eager(_) => 0,
            DeployableModule::GraphBound(module) => module.cache.len(),
        }
    }

    /// Pays compilation cost up front for the shape of `sample`.
    pub fn compile_ahead_of_time(&mut self, sample: &ArgTree<Tensor>) -> DeployResult<()> {
        self.graph_bound_mut("compile_ahead_of_time")?
            .compile_ahead_of_time(sample)
    }

    /// Saves the most recently used compiled graph's runtime state.
    pub fn save_graph(&self, path: impl AsRef<Path>) -> DeployResult<()> {
        self.graph_bound("save_graph")?.save_graph(path)
    }

    /// Installs a saved runtime state, creating the graph for the shape the
    /// state was specialized for. `device` retargets buffers before install.
    pub fn load_graph(
        &mut self,
        path: impl AsRef<Path>,
        device: Option<&Device>,
    ) -> DeployResult<()> {
        self.graph_bound_mut("load_graph")?.load_graph(path, device)
    }

    /// Alias of [`DeployableModule::load_graph`] matching the warmup wording
    /// used by deployment scripts.
    pub fn warmup_with_load(
        &mut self,
        path: impl AsRef<Path>,
        device: Option<&Device>,
    ) -> DeployResult<()> {
        self.load_graph(path, device)
    }

    /// Bounds the number of resident compiled graphs.
    pub fn set_cache_capacity(&mut self, capacity: usize) -> DeployResult<()> {
        self.graph_bound_mut("set_cache_capacity")?
            .cache
            .set_capacity(capacity)
    }

    fn graph_bound(&self, operation: &str) -> DeployResult<&GraphBoundModule<B>> {
        match self {
            DeployableModule::GraphBound(module) => Ok(module),
            DeployableModule::Eager(_) => Err(DeployError::InvalidState(format!(
                "{operation} requires graph mode, but this module was deployed eager"
            ))),
        }
    }

    fn graph_bound_mut(&mut self, operation: &str) -> DeployResult<&mut GraphBoundModule<B>> {
        match self {
            DeployableModule::GraphBound(module) => Ok(module),
            DeployableModule::Eager(_) => Err(DeployError::InvalidState(format!(
                "{operation} requires graph mode, but this module was deployed eager"
            ))),
        }
    }
}

/// Delegates every invocation straight to the wrapped module.
pub struct EagerModule {
    module: Arc<dyn NetworkModule>,
}

/// Routes invocations through shape-keyed compiled graphs.
pub struct GraphBoundModule<B: GraphBackend> {
    backend: Arc<B>,
    module: Arc<dyn NetworkModule>,
    cache: GraphCache<B>,
    options: DeployOptions,
}

impl<B: GraphBackend> GraphBoundModule<B> {
    fn new(
        backend: Arc<B>,
        module: Arc<dyn NetworkModule>,
        options: DeployOptions,
    ) -> DeployResult<Self> {
        let cache = GraphCache::new(options.cache_capacity)?;
        Ok(GraphBoundModule {
            backend,
            module,
            cache,
            options,
        })
    }

    fn graph_for(&mut self, key: &ShapeKey) -> DeployResult<&mut CompiledGraph<B>> {
        let backend = Arc::clone(&self.backend);
        let module = Arc::clone(&self.module);
        let graph_options = self.options.graph.clone();
        let allow_respecialization = self.options.allow_respecialization;
        self.cache.get_or_create(key, move || {
            CompiledGraph::bind(backend, module, &graph_options, allow_respecialization)
        })
    }

    fn invoke(&mut self, args: &ArgTree<Tensor>) -> DeployResult<ArgTree<Tensor>> {
        let key = ShapeKey::of(args);
        let bridged = bridge::to_compiled(self.backend.as_ref(), args)?;
        let graph = self.graph_for(&key)?;
        let output = graph.execute(&key, &bridged)?;
        Ok(bridge::to_dynamic(self.backend.as_ref(), &output)?)
    }

    fn compile_ahead_of_time(&mut self, sample: &ArgTree<Tensor>) -> DeployResult<()> {
        let key = ShapeKey::of(sample);
        let bridged = bridge::to_compiled(self.backend.as_ref(), sample)?;
        let graph = self.graph_for(&key)?;
        graph.compile_ahead_of_time(&key, &bridged)
    }

    fn save_graph(&self, path: impl AsRef<Path>) -> DeployResult<()> {
        match self.cache.peek_most_recent() {
            Some(graph) => graph.save_state(path),
            None => Err(DeployError::InvalidState(
                "no compiled graph is resident; invoke or compile before saving".to_string(),
            )),
        }
    }

    fn load_graph(
        &mut self,
        path: impl AsRef<Path>,
        device: Option<&Device>,
    ) -> DeployResult<()> {
        let state = RuntimeState::load(path)?;
        let key = state.shape_key().cloned().ok_or_else(|| {
            DeployError::Load("runtime state does not record a shape key".to_string())
        })?;
        let graph = self.graph_for(&key)?;
        graph.install_runtime_state(state, device)
    }
}
