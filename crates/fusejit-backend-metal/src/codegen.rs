//! Kernel source generation for fused elementwise tapes.
//!
//! Emission goes through a small typed IR instead of free-form string
//! concatenation: a parameter list and a statement list with one
//! pretty-printer per kind. Building the body enforces that every local is
//! bound exactly once before it is referenced, so a malformed tape fails
//! generation instead of producing source that miscompiles.

use std::collections::HashSet;
use std::fmt::Write as _;

use fusejit::{DType, FuseError, FuseResult, FusedComputation, Literal, TapeOp};

use crate::kernels::{LibrarySpec, KERNEL_PREAMBLE};
use crate::namer::NodeNamer;
use crate::{MAX_KERNEL_ARG_SLOTS, MAX_STATIC_RANK};

/// Specialization axes of one emitted kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantSpec {
    pub contiguous: bool,
    /// Target rank for static strided kernels; 0 for contiguous/dynamic.
    pub ndim: usize,
    /// Rank resolved at launch through the bound rank scalar.
    pub dynamic_dims: bool,
    /// 64-bit linear index for very large contiguous buffers.
    pub use_big_index: bool,
}

impl VariantSpec {
    pub fn contiguous(use_big_index: bool) -> Self {
        Self {
            contiguous: true,
            ndim: 0,
            dynamic_dims: false,
            use_big_index,
        }
    }

    pub fn strided(ndim: usize) -> Self {
        Self {
            contiguous: false,
            ndim,
            dynamic_dims: false,
            use_big_index: false,
        }
    }

    pub fn strided_dynamic() -> Self {
        Self {
            contiguous: false,
            ndim: 0,
            dynamic_dims: true,
            use_big_index: false,
        }
    }
}

/// One bound kernel resource, rendered at the slot index equal to its
/// position in the parameter list.
enum KernelParam {
    InputBuffer { name: String, dtype: DType },
    InputStrides,
    OutputBuffer { name: String, dtype: DType },
    OutputStrides,
    OutputShape,
    Rank,
}

/// Right-hand side of one local binding.
enum BindExpr {
    /// Captured constant, inlined as a typed literal cast.
    Constant(Literal),
    /// Scalar input read once into a register.
    ScalarLoad { buffer: String },
    /// Contiguous input addressed by the linear index.
    LinearLoad { buffer: String },
    /// Static-rank strided input: dot product of per-axis indices against
    /// this input's row in the shared stride buffer.
    StridedLoad {
        buffer: String,
        row: usize,
        ndim: usize,
    },
    /// Dynamic-rank strided input: runtime axis decomposition.
    DynamicLoad { buffer: String, row: usize },
    /// Pass-through type conversion of an earlier local.
    Cast { local: String },
    /// Elementwise functor applied to earlier locals.
    Apply {
        functor: &'static str,
        args: Vec<String>,
    },
}

impl BindExpr {
    fn local_refs(&self) -> Vec<&str> {
        match self {
            BindExpr::Cast { local } => vec![local.as_str()],
            BindExpr::Apply { args, .. } => args.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

enum Stmt {
    LinearIndex { wide: bool },
    AxisIndices { ndim: usize },
    Bind {
        name: String,
        dtype: DType,
        expr: BindExpr,
    },
    Store { buffer: String, local: String },
}

struct KernelIr {
    name: String,
    params: Vec<KernelParam>,
    body: Vec<Stmt>,
    bound: HashSet<String>,
}

impl KernelIr {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Vec::new(),
            body: Vec::new(),
            bound: HashSet::new(),
        }
    }

    fn bind(&mut self, name: String, dtype: DType, expr: BindExpr) -> FuseResult<()> {
        for referenced in expr.local_refs() {
            if !self.bound.contains(referenced) {
                return Err(FuseError::invalid(format!(
                    "kernel '{}' references local '{referenced}' before it is bound",
                    self.name
                )));
            }
        }
        if !self.bound.insert(name.clone()) {
            return Err(FuseError::invalid(format!(
                "kernel '{}' binds local '{name}' twice",
                self.name
            )));
        }
        self.body.push(Stmt::Bind { name, dtype, expr });
        Ok(())
    }

    fn store(&mut self, buffer: String, local: String) -> FuseResult<()> {
        if !self.bound.contains(&local) {
            return Err(FuseError::invalid(format!(
                "kernel '{}' stores unbound local '{local}'",
                self.name
            )));
        }
        self.body.push(Stmt::Store { buffer, local });
        Ok(())
    }

    fn render(&self) -> FuseResult<String> {
        if self.params.len() > MAX_KERNEL_ARG_SLOTS {
            return Err(FuseError::ArgumentOverflow {
                kernel: self.name.clone(),
                bound: self.params.len(),
                limit: MAX_KERNEL_ARG_SLOTS,
            });
        }

        let mut os = String::new();
        let _ = writeln!(os, "[[host_name(\"{}\")]]", self.name);
        let _ = writeln!(os, "[[kernel]] void {}(", self.name);
        for (slot, param) in self.params.iter().enumerate() {
            let line = match param {
                KernelParam::InputBuffer { name, dtype } => format!(
                    "device const {}* {name} [[buffer({slot})]]",
                    dtype.source_name()
                ),
                KernelParam::InputStrides => {
                    format!("constant const size_t* in_strides [[buffer({slot})]]")
                }
                KernelParam::OutputBuffer { name, dtype } => {
                    format!("device {}* {name} [[buffer({slot})]]", dtype.source_name())
                }
                KernelParam::OutputStrides => {
                    format!("constant const size_t* output_strides [[buffer({slot})]]")
                }
                KernelParam::OutputShape => {
                    format!("constant const int* output_shape [[buffer({slot})]]")
                }
                KernelParam::Rank => format!("constant const int& ndim [[buffer({slot})]]"),
            };
            let _ = writeln!(os, "    {line},");
        }
        let _ = writeln!(os, "    uint3 pos [[thread_position_in_grid]],");
        let _ = writeln!(os, "    uint3 grid [[threads_per_grid]]) {{");

        for stmt in &self.body {
            render_stmt(&mut os, stmt);
        }

        let _ = writeln!(os, "}}");
        Ok(os)
    }
}

fn render_stmt(os: &mut String, stmt: &Stmt) {
    match stmt {
        Stmt::LinearIndex { wide } => {
            if *wide {
                // Wide contiguous kernels launch without a third grid
                // dimension.
                let _ = writeln!(os, "  size_t index = pos.x + grid.x * size_t(pos.y);");
            } else {
                let _ = writeln!(os, "  uint index = pos.x + grid.x * (pos.y + grid.y * pos.z);");
            }
        }
        Stmt::AxisIndices { ndim } => render_axis_indices(os, *ndim),
        Stmt::Bind { name, dtype, expr } => {
            let rhs = match expr {
                BindExpr::Constant(literal) => format!(
                    "static_cast<{}>({})",
                    dtype.source_name(),
                    literal.source_text()
                ),
                BindExpr::ScalarLoad { buffer } => format!("{buffer}[0]"),
                BindExpr::LinearLoad { buffer } => format!("{buffer}[index]"),
                BindExpr::StridedLoad { buffer, row, ndim } => {
                    let offset = row * ndim;
                    let mut index = format!("index_0 * in_strides[{offset}]");
                    for axis in 1..*ndim {
                        let _ = write!(index, " + index_{axis} * in_strides[{}]", offset + axis);
                    }
                    format!("{buffer}[{index}]")
                }
                BindExpr::DynamicLoad { buffer, row } => format!(
                    "{buffer}[elem_to_loc(index, output_shape, in_strides + {row} * ndim, ndim)]"
                ),
                BindExpr::Cast { local } => {
                    format!("static_cast<{}>({local})", dtype.source_name())
                }
                BindExpr::Apply { functor, args } => {
                    format!("{functor}()({})", args.join(", "))
                }
            };
            let _ = writeln!(os, "  {} {name} = {rhs};", dtype.source_name());
        }
        Stmt::Store { buffer, local } => {
            let _ = writeln!(os, "  {buffer}[index] = {local};");
        }
    }
}

/// Per-axis indices for static-rank strided kernels. Ranks 1-3 map directly
/// onto launch position components; higher ranks derive the leading axes by
/// divide/modulo against the collapsed output strides and shape, with the
/// two innermost axes still taken from the position.
fn render_axis_indices(os: &mut String, ndim: usize) {
    match ndim {
        1 => {
            let _ = writeln!(os, "  uint index_0 = pos.x;");
        }
        2 => {
            let _ = writeln!(os, "  uint index_0 = pos.y;");
            let _ = writeln!(os, "  uint index_1 = pos.x;");
        }
        3 => {
            let _ = writeln!(os, "  uint index_0 = pos.z;");
            let _ = writeln!(os, "  uint index_1 = pos.y;");
            let _ = writeln!(os, "  uint index_2 = pos.x;");
        }
        _ => {
            for axis in 0..ndim - 2 {
                let _ = writeln!(
                    os,
                    "  uint index_{axis} = (index / uint(output_strides[{axis}])) % output_shape[{axis}];"
                );
            }
            let _ = writeln!(os, "  uint index_{} = pos.y;", ndim - 2);
            let _ = writeln!(os, "  uint index_{} = pos.x;", ndim - 1);
        }
    }
}

/// Emits one specialized kernel for `computation`.
pub fn build_kernel(
    computation: &FusedComputation,
    kernel_name: &str,
    variant: VariantSpec,
) -> FuseResult<String> {
    if !variant.contiguous
        && !variant.dynamic_dims
        && !(1..=MAX_STATIC_RANK).contains(&variant.ndim)
    {
        return Err(FuseError::unsupported(format!(
            "kernel '{kernel_name}' requests static rank {}, supported ranks are 1..={MAX_STATIC_RANK}",
            variant.ndim
        )));
    }

    let mut namer = NodeNamer::default();
    let mut ir = KernelIr::new(kernel_name);

    // Parameter list: non-constant inputs, then the shared stride buffer if
    // any input needs per-axis addressing, then outputs and the layout
    // buffers of the variant. Slots are the parameter positions.
    let mut add_indices = false;
    for input in computation.inputs() {
        let name = namer.name(input.id());
        if computation.is_constant(input.id()) {
            continue;
        }
        if !variant.contiguous && !input.is_scalar() {
            add_indices = true;
        }
        ir.params.push(KernelParam::InputBuffer {
            name,
            dtype: input.dtype(),
        });
    }
    if add_indices {
        ir.params.push(KernelParam::InputStrides);
    }
    for output in computation.outputs() {
        ir.params.push(KernelParam::OutputBuffer {
            name: namer.name(output.id()),
            dtype: output.dtype(),
        });
    }
    if !variant.contiguous {
        ir.params.push(KernelParam::OutputStrides);
        ir.params.push(KernelParam::OutputShape);
    }
    if variant.dynamic_dims {
        ir.params.push(KernelParam::Rank);
    }

    ir.body.push(Stmt::LinearIndex {
        wide: variant.use_big_index,
    });
    if add_indices && !variant.dynamic_dims {
        ir.body.push(Stmt::AxisIndices { ndim: variant.ndim });
    }

    // Read every input into a register once.
    let mut stride_row = 0usize;
    for input in computation.inputs() {
        let buffer = namer.name(input.id());
        let local = format!("tmp_{buffer}");
        let expr = if let Some(literal) = computation.constant_value(input.id()) {
            BindExpr::Constant(literal)
        } else if input.is_scalar() {
            BindExpr::ScalarLoad { buffer }
        } else if variant.contiguous {
            BindExpr::LinearLoad { buffer }
        } else if !variant.dynamic_dims {
            let expr = BindExpr::StridedLoad {
                buffer,
                row: stride_row,
                ndim: variant.ndim,
            };
            stride_row += 1;
            expr
        } else {
            let expr = BindExpr::DynamicLoad {
                buffer,
                row: stride_row,
            };
            stride_row += 1;
            expr
        };
        ir.bind(local, input.dtype(), expr)?;
    }

    // Walk the tape once, binding each node to a fresh local.
    for node in computation.tape() {
        let local = format!("tmp_{}", namer.name(node.id));
        let args: Vec<String> = node
            .args
            .iter()
            .map(|arg| format!("tmp_{}", namer.name(computation.ref_id(*arg))))
            .collect();
        let expr = match node.op {
            TapeOp::Cast => BindExpr::Cast {
                local: args.into_iter().next().unwrap_or_default(),
            },
            op => {
                let functor = op.functor().ok_or_else(|| {
                    FuseError::invalid(format!(
                        "kernel '{kernel_name}' has a non-cast node without a functor"
                    ))
                })?;
                BindExpr::Apply { functor, args }
            }
        };
        ir.bind(local, node.dtype, expr)?;
    }

    // Write the outputs from their computed locals.
    for output in computation.outputs() {
        let buffer = namer.name(output.id());
        let local = format!("tmp_{buffer}");
        ir.store(buffer, local)?;
    }

    ir.render()
}

/// Emits the full variant matrix for one signature into a single library
/// text: narrow and wide contiguous kernels, one strided kernel per static
/// rank, and the dynamic-rank kernel. Building everything together lets the
/// external cache compile once per signature regardless of which variant a
/// later call needs.
pub fn build_library(computation: &FusedComputation, lib_name: &str) -> FuseResult<LibrarySpec> {
    let mut source = String::from(KERNEL_PREAMBLE);
    let mut variants = Vec::with_capacity(MAX_STATIC_RANK + 3);

    let mut emit = |variant_name: String, variant: VariantSpec, source: &mut String| {
        build_kernel(computation, &variant_name, variant).map(|kernel| {
            source.push('\n');
            source.push_str(&kernel);
            variants.push(variant_name);
        })
    };

    emit(
        format!("{lib_name}_contiguous"),
        VariantSpec::contiguous(false),
        &mut source,
    )?;
    emit(
        format!("{lib_name}_contiguous_big"),
        VariantSpec::contiguous(true),
        &mut source,
    )?;
    for ndim in 1..=MAX_STATIC_RANK {
        emit(
            format!("{lib_name}_strided_{ndim}"),
            VariantSpec::strided(ndim),
            &mut source,
        )?;
    }
    emit(
        format!("{lib_name}_strided_dynamic"),
        VariantSpec::strided_dynamic(),
        &mut source,
    )?;

    Ok(LibrarySpec {
        name: lib_name.to_string(),
        source,
        variants,
    })
}
