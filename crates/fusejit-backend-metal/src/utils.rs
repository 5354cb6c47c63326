//! Launch-geometry helpers.

use fusejit::{FuseError, FuseResult};

use crate::device::GridDims;

/// Distributes at most 2^10 threads over three axes by doubling whichever
/// axis still has room, round-robin from the innermost.
pub fn get_block_dims(dim0: usize, dim1: usize, dim2: usize) -> GridDims {
    let dims = [dim0, dim1, dim2];
    let mut pows = [0u32; 3];
    let mut sum = 0u32;
    loop {
        let presum = sum;
        for axis in 0..3 {
            if dims[axis] >= (1usize << (pows[axis] + 1)) {
                pows[axis] += 1;
                sum += 1;
            }
            if sum == 10 {
                break;
            }
        }
        if sum == 10 || sum == presum {
            break;
        }
    }
    GridDims::new(1 << pows[0], 1 << pows[1], 1 << pows[2])
}

/// Factors a contiguous element count into a 2-D grid with both components
/// in 32-bit range. Axes with stride 0 are broadcast and carry no elements.
pub fn get_2d_grid_dims(shape: &[usize], strides: &[usize]) -> FuseResult<GridDims> {
    let mut grid_x = 1usize;
    let mut grid_y = 1usize;
    for (dim, stride) in shape.iter().zip(strides) {
        if *stride == 0 {
            continue;
        }
        if grid_x.saturating_mul(*dim) < u32::MAX as usize {
            grid_x *= dim;
        } else {
            grid_y = grid_y.saturating_mul(*dim);
        }
    }
    if grid_y > u32::MAX as usize || grid_x > u32::MAX as usize {
        return Err(FuseError::execution(format!(
            "unable to factor shape {shape:?} into a 2-D grid"
        )));
    }
    Ok(GridDims::new(grid_x, grid_y, 1))
}
