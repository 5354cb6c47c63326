pub mod codegen;
pub mod device;
pub mod dispatch;
pub mod kernels;
pub mod layout;
pub mod namer;
pub mod signature;
pub mod utils;

pub use device::{CommandEncoder, ComputePipeline, Device, GridDims, OutputAllocator};
pub use dispatch::eval_fused;
pub use kernels::LibrarySpec;

/// Argument slots one kernel invocation may bind on the target hardware.
/// Backend-specific; revisit per target.
pub const MAX_KERNEL_ARG_SLOTS: usize = 31;

/// Threadgroup capacity the strided dispatch path requires the pipeline to
/// report. Backend-specific; revisit per target.
pub const STRIDED_THREADGROUP_SIZE: usize = 1024;

/// Largest rank with a statically unrolled kernel variant; effective ranks
/// above this run the dynamic-rank variant.
pub const MAX_STATIC_RANK: usize = 7;
