//! Conversion of nested argument structures across the eager/compiled seam.
//!
//! Callers hand the shim arbitrary trees of sequences, mappings, and leaves.
//! Only tensor leaves are converted; every other leaf passes through
//! unchanged, and nesting, key sets, and ordering are preserved exactly.

use crate::backend::{BackendResult, GraphBackend};
use crate::tensor::Tensor;

/// Nested argument structure with tensor leaves of type `L`.
///
/// `Map` keeps insertion order so the bridged structure is identical to the
/// input, not merely equivalent.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgTree<L> {
    Tensor(L),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
    Seq(Vec<ArgTree<L>>),
    Map(Vec<(String, ArgTree<L>)>),
}

impl<L> ArgTree<L> {
    /// Rebuilds the tree with every tensor leaf mapped through `f`,
    /// preserving structure and never mutating `self`.
    pub fn try_map_tensors<M, E>(
        &self,
        f: &mut impl FnMut(&L) -> Result<M, E>,
    ) -> Result<ArgTree<M>, E> {
        Ok(match self {
            ArgTree::Tensor(tensor) => ArgTree::Tensor(f(tensor)?),
            ArgTree::Int(value) => ArgTree::Int(*value),
            ArgTree::Float(value) => ArgTree::Float(*value),
            ArgTree::Bool(value) => ArgTree::Bool(*value),
            ArgTree::None => ArgTree::None,
            ArgTree::Seq(items) => ArgTree::Seq(
                items
                    .iter()
                    .map(|item| item.try_map_tensors(f))
                    .collect::<Result<Vec<_>, E>>()?,
            ),
            ArgTree::Map(entries) => ArgTree::Map(
                entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), value.try_map_tensors(f)?)))
                    .collect::<Result<Vec<_>, E>>()?,
            ),
        })
    }

    /// Visits tensor leaves in traversal order.
    pub fn for_each_tensor(&self, f: &mut impl FnMut(&L)) {
        match self {
            ArgTree::Tensor(tensor) => f(tensor),
            ArgTree::Seq(items) => {
                for item in items {
                    item.for_each_tensor(f);
                }
            }
            ArgTree::Map(entries) => {
                for (_, value) in entries {
                    value.for_each_tensor(f);
                }
            }
            ArgTree::Int(_) | ArgTree::Float(_) | ArgTree::Bool(_) | ArgTree::None => {}
        }
    }

    /// Counts tensor leaves.
    pub fn tensor_count(&self) -> usize {
        let mut count = 0;
        self.for_each_tensor(&mut |_| count += 1);
        count
    }
}

impl ArgTree<Tensor> {
    /// The canonical denoiser call: (noised latents, timestep, conditioning).
    pub fn denoiser_call(latents: Tensor, timestep: Tensor, conditioning: Tensor) -> Self {
        ArgTree::Seq(vec![
            ArgTree::Tensor(latents),
            ArgTree::Tensor(timestep),
            ArgTree::Tensor(conditioning),
        ])
    }
}

/// Converts every tensor leaf into the backend's representation.
pub fn to_compiled<B: GraphBackend>(
    backend: &B,
    args: &ArgTree<Tensor>,
) -> BackendResult<ArgTree<B::TensorHandle>> {
    args.try_map_tensors(&mut |tensor| backend.import(tensor))
}

/// Converts every backend tensor leaf back into the host representation.
pub fn to_dynamic<B: GraphBackend>(
    backend: &B,
    args: &ArgTree<B::TensorHandle>,
) -> BackendResult<ArgTree<Tensor>> {
    args.try_map_tensors(&mut |handle| backend.export(handle))
}
