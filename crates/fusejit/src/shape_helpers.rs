//! Shared shape/stride helpers.

use crate::error::{FuseError, FuseResult};

/// Product of `dims`; the empty shape is a scalar with one element.
pub fn element_count(dims: &[usize]) -> usize {
    dims.iter().product()
}

/// Product of `dims` with overflow checking.
pub fn checked_element_count(dims: &[usize]) -> FuseResult<usize> {
    let mut count = 1usize;
    for dim in dims {
        count = count
            .checked_mul(*dim)
            .ok_or_else(|| FuseError::invalid("element count overflows usize"))?;
    }
    Ok(count)
}

/// Row-major contiguous strides for `dims`.
pub fn contiguous_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0usize; dims.len()];
    let mut stride = 1usize;
    for axis in (0..dims.len()).rev() {
        strides[axis] = stride;
        stride = stride.saturating_mul(dims[axis]);
    }
    strides
}
