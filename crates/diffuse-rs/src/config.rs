//! Explicit configuration for graph compilation and deployment.
//!
//! Compiler tuning used to live in process-wide environment toggles; here it
//! is an ordinary value passed at construction, so shims with different
//! tuning can coexist in one process.

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployResult};

/// Default number of distinct input shapes one compiled graph tolerates
/// before re-specializing from scratch.
pub const DEFAULT_DYNAMIC_SHAPE_BUDGET: usize = 9;

/// Default number of simultaneously resident compiled graphs.
///
/// A single-resolution workload never evicts at this size; multi-resolution
/// workloads should raise it via [`crate::DeployableModule::set_cache_capacity`]
/// to avoid recompiling on every shape change.
pub const DEFAULT_GRAPH_CACHE_CAPACITY: usize = 1;

/// Named fusion and layout toggles handed opaquely to the graph compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionFlags {
    /// Common-subexpression elimination over the captured graph.
    pub cse: bool,
    /// Whole-graph inference optimization pass.
    pub inference_optimization: bool,
    /// Fuses chains of forward ops into single kernels.
    pub fuse_forward_ops: bool,
    /// Groups parallel matmuls that share an input.
    pub group_matmul: bool,
    /// Fused convolution + bias epilogue.
    pub fused_conv_bias: bool,
    /// Fused linear + bias epilogue.
    pub fused_linear: bool,
    /// Runs convolution autotuning during warmup instead of first real call.
    pub conv_tuning_warmup: bool,
    /// Allows half-precision accumulation in conv and matmul kernels.
    pub half_precision_accumulation: bool,
    /// Heuristic conv algorithm search; interacts badly with multi-resolution
    /// warmup, so it defaults to off.
    pub conv_heuristic_search: bool,
}

impl Default for FusionFlags {
    fn default() -> Self {
        FusionFlags {
            cse: true,
            inference_optimization: true,
            fuse_forward_ops: true,
            group_matmul: true,
            fused_conv_bias: true,
            fused_linear: true,
            conv_tuning_warmup: true,
            half_precision_accumulation: true,
            conv_heuristic_search: false,
        }
    }
}

/// Compilation-time options for one compiled graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphOptions {
    /// Number of distinct input shapes the graph absorbs before the slower
    /// re-specialization path kicks in.
    pub dynamic_shape_budget: usize,
    /// Prefer channels-last (NHWC) memory layout when lowering.
    pub prefer_channels_last: bool,
    pub fusion: FusionFlags,
}

impl Default for GraphOptions {
    fn default() -> Self {
        GraphOptions {
            dynamic_shape_budget: DEFAULT_DYNAMIC_SHAPE_BUDGET,
            prefer_channels_last: true,
            fusion: FusionFlags::default(),
        }
    }
}

/// Construction-time options for [`crate::deploy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOptions {
    /// Route invocations through a compiled graph; `false` keeps the module
    /// fully eager for the lifetime of the shim.
    pub use_graph: bool,
    /// Maximum number of resident compiled graphs before LRU eviction.
    pub cache_capacity: usize,
    /// When a graph runs out of dynamism budget, `true` re-specializes (slow
    /// but correct) while `false` surfaces a shape-mismatch error.
    pub allow_respecialization: bool,
    pub graph: GraphOptions,
}

impl Default for DeployOptions {
    fn default() -> Self {
        DeployOptions {
            use_graph: true,
            cache_capacity: DEFAULT_GRAPH_CACHE_CAPACITY,
            allow_respecialization: true,
            graph: GraphOptions::default(),
        }
    }
}

impl DeployOptions {
    /// Rejects capacity/budget values the cache and graph cannot honor.
    pub fn validate(&self) -> DeployResult<()> {
        if self.cache_capacity < 1 {
            return Err(DeployError::Config(format!(
                "graph cache capacity must be at least 1, got {}",
                self.cache_capacity
            )));
        }
        if self.graph.dynamic_shape_budget < 1 {
            return Err(DeployError::Config(format!(
                "dynamic shape budget must be at least 1, got {}",
                self.graph.dynamic_shape_budget
            )));
        }
        Ok(())
    }
}
