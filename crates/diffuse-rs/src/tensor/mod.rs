//! Host tensor abstractions shared between the eager and compiled paths.
//!
//! The bridge treats [`Tensor`] as the "dynamic framework" representation;
//! execution backends define their own handle type and convert through
//! [`crate::bridge`].

pub mod dtype;
mod host_tensor;
pub mod shape;

pub use dtype::DType;
pub use host_tensor::Tensor;
pub use shape::Shape;
