//! Bounded, shape-keyed cache of compiled graphs with LRU eviction.
//!
//! Compiled graphs are specialized to spatial dimensions; a new resolution
//! needs a new artifact, and each resident artifact holds nontrivial device
//! memory, so the cache bounds how many stay alive at once.

use std::collections::{BTreeMap, HashMap};

use tracing::info;

use crate::backend::GraphBackend;
use crate::bridge::ArgTree;
use crate::error::{DeployError, DeployResult};
use crate::graph::CompiledGraph;
use crate::hashing;
use crate::profiling;
use crate::tensor::Tensor;

/// Cache lookup key derived from the tensor leaf shapes of one call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeKey {
    dims: Vec<Vec<usize>>,
}

impl ShapeKey {
    /// Collects the shape of every tensor leaf in traversal order.
    pub fn of(args: &ArgTree<Tensor>) -> Self {
        let mut dims = Vec::new();
        args.for_each_tensor(&mut |tensor: &Tensor| dims.push(tensor.shape().dims().to_vec()));
        ShapeKey { dims }
    }

    pub fn from_dims(dims: Vec<Vec<usize>>) -> Self {
        ShapeKey { dims }
    }

    pub fn dims(&self) -> &[Vec<usize>] {
        &self.dims
    }

    /// Compact digest for log lines.
    pub fn fingerprint(&self) -> u64 {
        let mut hash = hashing::fnv1a_init();
        for dims in &self.dims {
            hash = hashing::fnv1a_bytes(hash, &(dims.len() as u64).to_le_bytes());
            for &dim in dims {
                hash = hashing::fnv1a_bytes(hash, &(dim as u64).to_le_bytes());
            }
        }
        hash
    }
}

struct CacheSlot<B: GraphBackend> {
    last_access: u64,
    graph: CompiledGraph<B>,
}

/// In-memory LRU cache keyed by [`ShapeKey`].
///
/// Recency is a monotonic logical clock bumped on every access, so eviction
/// order is deterministic regardless of wall time. The recency index maps
/// access stamp to key for O(log n) eviction.
pub struct GraphCache<B: GraphBackend> {
    capacity: usize,
    clock: u64,
    entries: HashMap<ShapeKey, CacheSlot<B>>,
    recency: BTreeMap<u64, ShapeKey>,
}

impl<B: GraphBackend> GraphCache<B> {
    pub fn new(capacity: usize) -> DeployResult<Self> {
        if capacity < 1 {
            return Err(DeployError::Config(format!(
                "graph cache capacity must be at least 1, got {capacity}"
            )));
        }
        Ok(GraphCache {
            capacity,
            clock: 0,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
        })
    }

    /// Changes the bound for future insertions. Shrinking below the current
    /// occupancy does not evict immediately; eviction stays lazy and happens
    /// on the next miss that would overflow the new bound.
    pub fn set_capacity(&mut self, capacity: usize) -> DeployResult<()> {
        if capacity < 1 {
            return Err(DeployError::Config(format!(
                "graph cache capacity must be at least 1, got {capacity}"
            )));
        }
        self.capacity = capacity;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &ShapeKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the graph for `key`, creating it through `factory` on a miss.
    ///
    /// A hit only refreshes recency; the factory is not invoked. A miss at
    /// capacity first evicts least-recently-used entries, dropping their
    /// device resources, then inserts the freshly built graph.
    pub fn get_or_create(
        &mut self,
        key: &ShapeKey,
        factory: impl FnOnce() -> DeployResult<CompiledGraph<B>>,
    ) -> DeployResult<&mut CompiledGraph<B>> {
        self.clock += 1;
        let now = self.clock;

        if self.entries.contains_key(key) {
            let slot = self
                .entries
                .get_mut(key)
                .expect("cache entry vanished between lookup and touch");
            self.recency.remove(&slot.last_access);
            slot.last_access = now;
            self.recency.insert(now, key.clone());
            profiling::cache_event("graph_cache_hit");
        } else {
            while self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
            let graph = factory()?;
            self.entries.insert(
                key.clone(),
                CacheSlot {
                    last_access: now,
                    graph,
                },
            );
            self.recency.insert(now, key.clone());
            profiling::cache_event("graph_cache_insert");
        }

        Ok(&mut self
            .entries
            .get_mut(key)
            .expect("cache entry vanished after insert")
            .graph)
    }

    /// Most recently accessed graph, if any resident.
    pub fn peek_most_recent(&self) -> Option<&CompiledGraph<B>> {
        let (_, key) = self.recency.iter().next_back()?;
        self.entries.get(key).map(|slot| &slot.graph)
    }

    fn evict_oldest(&mut self) {
        let Some((&stamp, _)) = self.recency.iter().next() else {
            return;
        };
        let Some(key) = self.recency.remove(&stamp) else {
            return;
        };
        if let Some(slot) = self.entries.remove(&key) {
            info!(
                shapes = ?key.dims(),
                fingerprint = key.fingerprint(),
                "evicting least recently used compiled graph; raise the cache \
                 capacity to keep more resolutions resident"
            );
            profiling::cache_event("graph_cache_evict");
            drop(slot);
        }
    }
}
