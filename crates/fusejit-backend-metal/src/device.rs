//! Trait surface for the external GPU collaborators.
//!
//! The device, its command stream, the kernel-library compile/cache service
//! and the output allocator are owned by the surrounding runtime; this crate
//! only drives them through these traits.

use fusejit::{Array, FuseResult};

use crate::kernels::LibrarySpec;

/// 3-D extent for grids and threadgroups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDims {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl GridDims {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    pub fn linear(n: usize) -> Self {
        Self { x: n, y: 1, z: 1 }
    }
}

/// Compiled kernel object as reported by the device.
pub trait ComputePipeline {
    /// Upper bound the device reports for threads in one threadgroup of
    /// this kernel.
    fn max_total_threads_per_threadgroup(&self) -> usize;
}

/// Device-side library cache and kernel lookup.
pub trait Device {
    type Library;
    type Pipeline: ComputePipeline;

    /// Returns the compiled library for `name`, invoking `build` to produce
    /// the source on first use.
    ///
    /// Precondition on implementations: `build` runs at most once per name,
    /// even when multiple threads request the same library concurrently.
    /// Callers rely on that guarantee; this crate does not add its own
    /// synchronization.
    fn get_library(
        &self,
        name: &str,
        build: &mut dyn FnMut() -> FuseResult<LibrarySpec>,
    ) -> FuseResult<Self::Library>;

    /// Looks up one kernel variant inside a compiled library.
    fn get_kernel(&self, name: &str, library: &Self::Library) -> FuseResult<Self::Pipeline>;
}

/// One in-flight kernel invocation on the device command stream.
///
/// Submission is asynchronous: dispatched work executes after prior
/// operations on the same stream (FIFO) and completion surfaces through the
/// stream layer, never here.
pub trait CommandEncoder {
    fn set_input_array(&mut self, array: &Array, slot: usize);
    fn set_output_array(&mut self, array: &Array, slot: usize);
    /// Binds a flat stride buffer (element strides, input-major rows for the
    /// shared input-stride buffer).
    fn set_strides(&mut self, strides: &[usize], slot: usize);
    /// Binds a shape buffer of device-side `int`s.
    fn set_shape(&mut self, shape: &[i32], slot: usize);
    /// Binds the runtime rank scalar for dynamic-rank kernels.
    fn set_rank(&mut self, ndim: i32, slot: usize);
    fn dispatch_threads(&mut self, grid: GridDims, group: GridDims);
}

/// Acquires storage for kernel outputs.
///
/// Implementations may alias an input buffer when safe (donation); that
/// decision is entirely theirs. This crate only consumes the result.
pub trait OutputAllocator {
    fn allocate_outputs(
        &self,
        inputs: &[Array],
        outputs: &[Array],
        contiguous: bool,
    ) -> FuseResult<()>;
}
