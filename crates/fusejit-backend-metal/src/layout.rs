//! Runtime contiguity and broadcast analysis.
//!
//! Inspects the concrete shapes and strides of one call to pick a dispatch
//! path and compute the effective stride buffers. Nothing here changes the
//! element-to-memory mapping; collapsing only re-expresses it with fewer
//! dimensions.

use fusejit::{Array, FusedComputation};

/// Upper bound on the merged extent of one collapsed dimension group, so
/// per-axis indices stay addressable with 32-bit arithmetic.
pub const COLLAPSE_SIZE_CAP: usize = i32::MAX as usize;

/// Outcome of analyzing one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutPlan {
    pub contiguous: bool,
    /// Contiguous path only: some input's storage exceeds 32-bit addressing.
    pub use_big_index: bool,
    /// Collapsed output shape (strided path; empty on the contiguous path).
    pub shape: Vec<usize>,
    /// Collapsed output strides (strided path).
    pub output_strides: Vec<usize>,
    /// Collapsed broadcast stride rows, one per non-constant non-scalar
    /// input, in parameter-list order.
    pub input_strides: Vec<Vec<usize>>,
}

impl LayoutPlan {
    pub fn effective_rank(&self) -> usize {
        self.shape.len()
    }
}

/// Analyzes one call's concrete layouts against the declared computation.
///
/// `inputs` aligns positionally with the declared inputs; constants are
/// identified by the declared identity at the same position.
pub fn analyze(computation: &FusedComputation, inputs: &[Array], outputs: &[Array]) -> LayoutPlan {
    let output_shape = outputs[0].shape();

    if check_contiguity(computation, inputs, outputs) {
        // Storage sizes decide the index width, not logical sizes, so
        // donated oversized buffers stay addressable.
        let max_size = inputs.iter().map(Array::data_size).max().unwrap_or(0);
        return LayoutPlan {
            contiguous: true,
            use_big_index: max_size > u32::MAX as usize,
            shape: Vec::new(),
            output_strides: Vec::new(),
            input_strides: Vec::new(),
        };
    }

    let mut initial_strides: Vec<Vec<usize>> = vec![outputs[0].strides().to_vec()];
    for (declared, input) in computation.inputs().iter().zip(inputs) {
        if computation.is_constant(declared.id()) || input.is_scalar() {
            continue;
        }
        initial_strides.push(broadcast_strides(
            input,
            output_shape,
            outputs[0].strides(),
        ));
    }

    let (shape, mut strides) =
        collapse_contiguous_dims(output_shape, &initial_strides, COLLAPSE_SIZE_CAP);
    let output_strides = strides.remove(0);

    LayoutPlan {
        contiguous: false,
        use_big_index: false,
        shape,
        output_strides,
        input_strides: strides,
    }
}

/// The call is contiguous iff every non-constant, non-scalar input and every
/// output is row contiguous with exactly the output's shape. Scalars never
/// force the strided path.
pub fn check_contiguity(
    computation: &FusedComputation,
    inputs: &[Array],
    outputs: &[Array],
) -> bool {
    let output_shape = outputs[0].shape();
    for (declared, input) in computation.inputs().iter().zip(inputs) {
        if computation.is_constant(declared.id()) || input.is_scalar() {
            continue;
        }
        if input.shape() != output_shape || !input.is_row_contiguous() {
            return false;
        }
    }
    outputs
        .iter()
        .all(|output| output.is_row_contiguous() && output.shape() == output_shape)
}

/// Computes an input's stride vector against the shared output shape with
/// trailing-alignment broadcasting.
///
/// Output axes with no corresponding input axis get stride 0, unless the
/// output axis itself has size 1, in which case the output's own stride on
/// that axis is reused; the same rule applies on aligned axes where the
/// input's size is 1.
pub fn broadcast_strides(
    input: &Array,
    output_shape: &[usize],
    output_strides: &[usize],
) -> Vec<usize> {
    debug_assert!(input.ndim() <= output_shape.len());
    let mut strides = Vec::with_capacity(output_shape.len());
    let lead = output_shape.len().saturating_sub(input.ndim());
    for axis in 0..lead {
        if output_shape[axis] == 1 {
            strides.push(output_strides[axis]);
        } else {
            strides.push(0);
        }
    }
    for (input_axis, output_axis) in (lead..output_shape.len()).enumerate() {
        if input.shape()[input_axis] == 1 {
            if output_shape[output_axis] == 1 {
                strides.push(output_strides[output_axis]);
            } else {
                strides.push(0);
            }
        } else {
            strides.push(input.strides()[input_axis]);
        }
    }
    strides
}

/// Merges trailing-contiguous dimension runs across the full stride set.
///
/// Axis `i` joins the group of axis `i - 1` iff `st[i] * shape[i] == st[i-1]`
/// for every stride vector; size-1 axes drop out and split groups; a group's
/// merged extent never exceeds `size_cap`. Each surviving group keeps its
/// innermost axis' stride.
pub fn collapse_contiguous_dims(
    shape: &[usize],
    strides: &[Vec<usize>],
    size_cap: usize,
) -> (Vec<usize>, Vec<Vec<usize>>) {
    // Axis groups encoded as axis indices separated by `None`.
    let mut to_collapse: Vec<Option<usize>> = Vec::new();
    if !shape.is_empty() {
        if shape[0] != 1 {
            to_collapse.push(Some(0));
        }
        let mut size = shape[0];
        for axis in 1..shape.len() {
            size = size.saturating_mul(shape[axis]);
            let mergeable = shape[axis] != 1
                && strides
                    .iter()
                    .all(|st| st[axis] * shape[axis] == st[axis - 1]);
            if !mergeable || size > size_cap {
                to_collapse.push(None);
                size = shape[axis];
            }
            if shape[axis] != 1 {
                to_collapse.push(Some(axis));
            }
        }
        to_collapse.push(None);
    }

    let mut out_shape = Vec::new();
    let mut out_strides = vec![Vec::new(); strides.len()];
    let mut cursor = 0;
    while cursor < to_collapse.len() {
        while cursor < to_collapse.len() && to_collapse[cursor].is_none() {
            cursor += 1;
        }
        if cursor == to_collapse.len() {
            break;
        }
        let mut merged = 1usize;
        let mut last_axis = 0usize;
        while let Some(Some(axis)) = to_collapse.get(cursor).copied() {
            merged *= shape[axis];
            last_axis = axis;
            cursor += 1;
        }
        out_shape.push(merged);
        for (row, st) in strides.iter().enumerate() {
            out_strides[row].push(st[last_axis]);
        }
        cursor += 1;
    }

    (out_shape, out_strides)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use fusejit::shape_helpers::contiguous_strides;
    use fusejit::{Array, ArrayId, BinaryOp, DType, TapeNode, TapeOp, TapeRef};

    use super::*;

    fn array(id: u64, shape: &[usize]) -> Array {
        Array::new(
            ArrayId(id),
            DType::F32,
            shape.to_vec(),
            contiguous_strides(shape),
        )
    }

    fn strided(id: u64, shape: &[usize], strides: &[usize]) -> Array {
        Array::new(ArrayId(id), DType::F32, shape.to_vec(), strides.to_vec())
    }

    fn binary_computation(x: Array, y: Array, out: Array) -> FusedComputation {
        let tape = vec![TapeNode {
            id: out.id(),
            dtype: DType::F32,
            op: TapeOp::Binary(BinaryOp::Add),
            args: vec![TapeRef::Input(0), TapeRef::Input(1)],
        }];
        FusedComputation::new(vec![x, y], vec![out], tape, HashMap::new())
            .expect("valid computation")
    }

    /// Storage offsets visited in row-major logical order.
    fn offsets(shape: &[usize], strides: &[usize]) -> Vec<usize> {
        let total: usize = shape.iter().product();
        let mut visited = Vec::with_capacity(total);
        for linear in 0..total {
            let mut remainder = linear;
            let mut offset = 0;
            for axis in (0..shape.len()).rev() {
                offset += (remainder % shape[axis]) * strides[axis];
                remainder /= shape[axis];
            }
            visited.push(offset);
        }
        visited
    }

    #[test]
    fn size_one_input_axes_get_zero_strides() {
        let x = array(0, &[4, 1, 8]);
        let y = array(1, &[1, 6, 8]);
        let out = array(2, &[4, 6, 8]);
        let xs = broadcast_strides(&x, out.shape(), out.strides());
        let ys = broadcast_strides(&y, out.shape(), out.strides());
        assert_eq!(xs, vec![8, 0, 1]);
        assert_eq!(ys, vec![0, 8, 1]);
    }

    #[test]
    fn missing_leading_axes_get_zero_strides() {
        let y = array(1, &[8]);
        let out = array(2, &[4, 6, 8]);
        assert_eq!(broadcast_strides(&y, out.shape(), out.strides()), vec![0, 0, 1]);
    }

    #[test]
    fn size_one_output_axes_reuse_the_output_stride() {
        // Extra leading output axis of size 1: the output's own stride on
        // that axis is reused instead of 0, also when the aligned input axis
        // is itself size 1.
        let out = strided(2, &[1, 6], &[6, 1]);
        let missing = array(1, &[6]);
        assert_eq!(broadcast_strides(&missing, out.shape(), out.strides()), vec![6, 1]);
        let aligned = strided(0, &[1, 6], &[9, 1]);
        assert_eq!(broadcast_strides(&aligned, out.shape(), out.strides()), vec![6, 1]);
    }

    #[test]
    fn fully_contiguous_calls_take_the_contiguous_path() {
        let computation = binary_computation(array(0, &[10]), array(1, &[10]), array(2, &[10]));
        let inputs = [array(0, &[10]), array(1, &[10])];
        let outputs = [array(2, &[10])];
        let plan = analyze(&computation, &inputs, &outputs);
        assert!(plan.contiguous);
        assert!(!plan.use_big_index);
        assert!(plan.input_strides.is_empty());
    }

    #[test]
    fn scalars_do_not_force_the_strided_path() {
        let computation = binary_computation(array(0, &[10]), array(1, &[]), array(2, &[10]));
        let inputs = [array(0, &[10]), array(1, &[])];
        let outputs = [array(2, &[10])];
        assert!(check_contiguity(&computation, &inputs, &outputs));
    }

    #[test]
    fn oversized_storage_selects_the_wide_index() {
        let computation = binary_computation(array(0, &[10]), array(1, &[10]), array(2, &[10]));
        let big = array(0, &[10]).with_data_size(u32::MAX as usize + 1);
        let inputs = [big, array(1, &[10])];
        let outputs = [array(2, &[10])];
        let plan = analyze(&computation, &inputs, &outputs);
        assert!(plan.contiguous);
        assert!(plan.use_big_index);
    }

    #[test]
    fn broadcast_calls_collapse_to_effective_rank() {
        let computation =
            binary_computation(array(0, &[4, 1, 8]), array(1, &[1, 6, 8]), array(2, &[4, 6, 8]));
        let inputs = [array(0, &[4, 1, 8]), array(1, &[1, 6, 8])];
        let outputs = [array(2, &[4, 6, 8])];
        let plan = analyze(&computation, &inputs, &outputs);
        assert!(!plan.contiguous);
        assert_eq!(plan.shape, vec![4, 6, 8]);
        assert_eq!(plan.output_strides, vec![48, 8, 1]);
        assert_eq!(plan.input_strides, vec![vec![8, 0, 1], vec![0, 8, 1]]);
    }

    #[test]
    fn collapsing_merges_jointly_contiguous_runs() {
        // The trailing [3, 4] is contiguous for every row; the broadcast
        // leading axis blocks further merging.
        let shape = [2, 3, 4];
        let rows = vec![vec![12, 4, 1], vec![0, 4, 1]];
        let (collapsed, collapsed_rows) = collapse_contiguous_dims(&shape, &rows, COLLAPSE_SIZE_CAP);
        assert_eq!(collapsed, vec![2, 12]);
        assert_eq!(collapsed_rows, vec![vec![12, 1], vec![0, 1]]);
    }

    #[test]
    fn collapsing_is_total_when_all_rows_are_contiguous() {
        let shape = [2, 3, 4];
        let rows = vec![vec![12, 4, 1]];
        let (collapsed, collapsed_rows) = collapse_contiguous_dims(&shape, &rows, COLLAPSE_SIZE_CAP);
        assert_eq!(collapsed, vec![24]);
        assert_eq!(collapsed_rows, vec![vec![1]]);
    }

    #[test]
    fn collapsing_respects_the_size_cap() {
        let shape = [2, 3, 4];
        let rows = vec![vec![12, 4, 1]];
        let (collapsed, _) = collapse_contiguous_dims(&shape, &rows, 10);
        assert_eq!(collapsed, vec![6, 4]);
    }

    #[test]
    fn collapsing_preserves_the_element_to_memory_mapping() {
        let shape = [2, 1, 3, 4];
        let rows = vec![
            contiguous_strides(&shape),
            vec![0, 0, 4, 1],
            vec![12, 12, 4, 0],
        ];
        let (collapsed, collapsed_rows) = collapse_contiguous_dims(&shape, &rows, COLLAPSE_SIZE_CAP);
        let total: usize = shape.iter().product();
        let collapsed_total: usize = collapsed.iter().product();
        assert_eq!(total, collapsed_total);
        for (row, collapsed_row) in rows.iter().zip(&collapsed_rows) {
            assert_eq!(offsets(&shape, row), offsets(&collapsed, collapsed_row));
        }
    }
}
