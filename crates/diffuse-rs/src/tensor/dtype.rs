/// Scalar element types carried across the eager/compiled boundary.
///
/// Denoiser calls only move float activations and integer timesteps, so the
/// bridge supports exactly those two payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    I64,
}

impl DType {
    /// Stable tag used by the runtime-state file format.
    pub fn tag(self) -> u32 {
        match self {
            DType::F32 => 0,
            DType::I64 => 1,
        }
    }

    /// Inverse of [`DType::tag`], returning `None` for unknown tags.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(DType::F32),
            1 => Some(DType::I64),
            _ => None,
        }
    }

    /// Returns the storage size of one element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::I64 => 8,
        }
    }
}
