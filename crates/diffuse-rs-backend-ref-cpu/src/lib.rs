//! Reference CPU implementation of the [`diffuse_rs::GraphBackend`] seam.
//!
//! The "compiled" executable here simply replays the wrapped module, so the
//! graph path and the eager path produce identical numbers. That makes this
//! backend the oracle for deployment-layer tests: transparency, cache
//! behavior, and state save/load can all be checked bit for bit.

pub mod cpu;

pub use cpu::{CpuExecutable, CpuGraphBackend, CpuTensor};
