//! Tensor-side plumbing shared by the accumulator and the simulator

pub mod core;
pub mod devices;
pub(crate) mod chunks;

pub use self::core::TensorElement;
pub use devices::{Device, MemoryAccess};
