//! Variant selection, argument binding and kernel launch.

use fusejit::{profiling, Array, FuseError, FuseResult, FusedComputation};

use crate::device::{CommandEncoder, ComputePipeline, Device, GridDims, OutputAllocator};
use crate::layout::{self, LayoutPlan};
use crate::{codegen, signature};
use crate::{MAX_STATIC_RANK, STRIDED_THREADGROUP_SIZE};

/// Evaluates one fused computation on the device.
///
/// `inputs` aligns positionally with the computation's declared inputs;
/// `outputs` carries the call's output descriptors, whose storage the
/// external allocator acquires (and may alias with an input) before binding.
/// The kernel library is built through the device's cache on first use and
/// reused for every later call with the same signature. Submission is
/// asynchronous: this returns once the dispatch is enqueued on the stream.
pub fn eval_fused<D, E, A>(
    device: &D,
    encoder: &mut E,
    allocator: &A,
    computation: &FusedComputation,
    inputs: &[Array],
    outputs: &[Array],
) -> FuseResult<()>
where
    D: Device,
    E: CommandEncoder,
    A: OutputAllocator + ?Sized,
{
    if inputs.len() != computation.inputs().len() {
        return Err(FuseError::invalid(format!(
            "fused call passes {} inputs, computation declares {}",
            inputs.len(),
            computation.inputs().len()
        )));
    }
    if outputs.len() != computation.outputs().len() {
        return Err(FuseError::invalid(format!(
            "fused call passes {} outputs, computation declares {}",
            outputs.len(),
            computation.outputs().len()
        )));
    }

    let lib_name = signature::build_lib_name(computation);
    profiling::cache_event("fusejit.library_request");
    let library = device.get_library(&lib_name, &mut || {
        profiling::cache_event("fusejit.library_build");
        let _scope = profiling::compile_scope("fusejit.codegen");
        codegen::build_library(computation, &lib_name)
    })?;

    // Nothing to compute; succeed without binding or dispatching.
    if outputs[0].size() == 0 {
        return Ok(());
    }

    let plan = layout::analyze(computation, inputs, outputs);
    let kernel_name = variant_name(&lib_name, &plan);
    let pipeline = device.get_kernel(&kernel_name, &library)?;

    // Bind in the fixed slot order: non-constant inputs, the shared
    // input-stride buffer, outputs, output strides/shape, the rank scalar.
    let mut slot = 0usize;
    for (declared, input) in computation.inputs().iter().zip(inputs) {
        if computation.is_constant(declared.id()) {
            continue;
        }
        encoder.set_input_array(input, slot);
        slot += 1;
    }
    let in_strides: Vec<usize> = plan.input_strides.concat();
    if !in_strides.is_empty() {
        encoder.set_strides(&in_strides, slot);
        slot += 1;
    }

    allocator.allocate_outputs(inputs, outputs, plan.contiguous)?;
    for output in outputs {
        encoder.set_output_array(output, slot);
        slot += 1;
    }

    let ndim = plan.effective_rank();
    if !plan.contiguous {
        encoder.set_strides(&plan.output_strides, slot);
        slot += 1;
        let shape: Vec<i32> = plan
            .shape
            .iter()
            .map(|dim| {
                i32::try_from(*dim).map_err(|_| {
                    FuseError::execution(format!(
                        "collapsed dimension {dim} exceeds the device shape-buffer range"
                    ))
                })
            })
            .collect::<FuseResult<_>>()?;
        encoder.set_shape(&shape, slot);
        slot += 1;
        if ndim > MAX_STATIC_RANK {
            encoder.set_rank(ndim as i32, slot);
            slot += 1;
        }
    }
    let _ = slot;

    launch(encoder, &pipeline, &kernel_name, &plan, outputs)
}

fn variant_name(lib_name: &str, plan: &LayoutPlan) -> String {
    if plan.contiguous {
        if plan.use_big_index {
            format!("{lib_name}_contiguous_big")
        } else {
            format!("{lib_name}_contiguous")
        }
    } else if plan.effective_rank() > MAX_STATIC_RANK {
        format!("{lib_name}_strided_dynamic")
    } else {
        format!("{lib_name}_strided_{}", plan.effective_rank())
    }
}

fn launch<E, P>(
    encoder: &mut E,
    pipeline: &P,
    kernel_name: &str,
    plan: &LayoutPlan,
    outputs: &[Array],
) -> FuseResult<()>
where
    E: CommandEncoder,
    P: ComputePipeline,
{
    if plan.contiguous {
        let nthreads = outputs[0].size();
        let grid = if plan.use_big_index {
            crate::utils::get_2d_grid_dims(outputs[0].shape(), outputs[0].strides())?
        } else {
            GridDims::linear(nthreads)
        };
        let group = GridDims::linear(nthreads.min(pipeline.max_total_threads_per_threadgroup()));
        encoder.dispatch_threads(grid, group);
        return Ok(());
    }

    let ndim = plan.effective_rank();
    let dim0 = if ndim > 0 { plan.shape[ndim - 1] } else { 1 };
    let dim1 = if ndim > 1 { plan.shape[ndim - 2] } else { 1 };
    let rest = outputs[0].size() / (dim0 * dim1);

    let max_threads = pipeline.max_total_threads_per_threadgroup();
    if max_threads != STRIDED_THREADGROUP_SIZE {
        return Err(FuseError::ThreadgroupMismatch {
            kernel: kernel_name.to_string(),
            expected: STRIDED_THREADGROUP_SIZE,
            actual: max_threads,
        });
    }

    let group = crate::utils::get_block_dims(dim0, dim1, rest);
    let grid = GridDims::new(dim0, dim1, rest);
    encoder.dispatch_threads(grid, group);
    Ok(())
}
