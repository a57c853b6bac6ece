//! Validation helpers shared by the worker

pub mod tensor;

pub use tensor::TensorValidator;
