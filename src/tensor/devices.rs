//! Device selection for the numeric kernels

use serde::{Deserialize, Serialize};

/// Where a tensor buffer lives. Only selects a memory-access strategy;
/// every device produces the same numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Device {
    #[default]
    Host,
    Accelerated,
}

/// How a kernel reaches the tensor data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAccess {
    /// Kernel reads and writes the caller's buffers in place
    Direct,
    /// Kernel works on staging copies, results are copied back
    Staged,
}

impl Device {
    pub const fn from_flag(on_accelerated_memory: bool) -> Self {
        if on_accelerated_memory {
            Device::Accelerated
        } else {
            Device::Host
        }
    }

    pub const fn is_accelerated(&self) -> bool {
        matches!(self, Device::Accelerated)
    }

    pub const fn memory_access(&self) -> MemoryAccess {
        match self {
            Device::Host => MemoryAccess::Direct,
            Device::Accelerated => MemoryAccess::Staged,
        }
    }

    /// Whether chunks are processed on the rayon pool
    pub const fn runs_parallel(&self) -> bool {
        cfg!(feature = "parallel") && self.is_accelerated()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Device::Host => "host",
            Device::Accelerated => "accelerated",
        }
    }
}
