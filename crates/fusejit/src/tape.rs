//! The fused tape: a flattened, topologically ordered list of elementwise
//! operation nodes with by-index input references.
//!
//! The tape is produced by the surrounding graph machinery; this crate only
//! validates and consumes it.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{FuseError, FuseResult};
use crate::spec::{Array, ArrayId, DType, Literal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Abs,
    Exp,
    Log,
    Tanh,
    Erf,
    Rsqrt,
    Reciprocal,
    Sqrt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
    Power,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TernaryOp {
    Select,
}

/// One tape step: an elementwise function application or a pure type cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TapeOp {
    Unary(UnaryOp),
    Binary(BinaryOp),
    Ternary(TernaryOp),
    Cast,
}

impl TapeOp {
    pub fn arity(self) -> usize {
        match self {
            TapeOp::Unary(_) | TapeOp::Cast => 1,
            TapeOp::Binary(_) => 2,
            TapeOp::Ternary(_) => 3,
        }
    }

    /// Functor name applied in generated source. Casts have no functor;
    /// they lower to a `static_cast`.
    pub fn functor(self) -> Option<&'static str> {
        let name = match self {
            TapeOp::Unary(UnaryOp::Neg) => "Neg",
            TapeOp::Unary(UnaryOp::Abs) => "Abs",
            TapeOp::Unary(UnaryOp::Exp) => "Exp",
            TapeOp::Unary(UnaryOp::Log) => "Log",
            TapeOp::Unary(UnaryOp::Tanh) => "Tanh",
            TapeOp::Unary(UnaryOp::Erf) => "Erf",
            TapeOp::Unary(UnaryOp::Rsqrt) => "Rsqrt",
            TapeOp::Unary(UnaryOp::Reciprocal) => "Reciprocal",
            TapeOp::Unary(UnaryOp::Sqrt) => "Sqrt",
            TapeOp::Binary(BinaryOp::Add) => "Add",
            TapeOp::Binary(BinaryOp::Sub) => "Sub",
            TapeOp::Binary(BinaryOp::Mul) => "Mul",
            TapeOp::Binary(BinaryOp::Div) => "Div",
            TapeOp::Binary(BinaryOp::Maximum) => "Maximum",
            TapeOp::Binary(BinaryOp::Minimum) => "Minimum",
            TapeOp::Binary(BinaryOp::Power) => "Power",
            TapeOp::Ternary(TernaryOp::Select) => "Select",
            TapeOp::Cast => return None,
        };
        Some(name)
    }

    /// Lowercase tag used in cache-key names.
    pub fn tag(self) -> &'static str {
        match self {
            TapeOp::Unary(UnaryOp::Neg) => "neg",
            TapeOp::Unary(UnaryOp::Abs) => "abs",
            TapeOp::Unary(UnaryOp::Exp) => "exp",
            TapeOp::Unary(UnaryOp::Log) => "log",
            TapeOp::Unary(UnaryOp::Tanh) => "tanh",
            TapeOp::Unary(UnaryOp::Erf) => "erf",
            TapeOp::Unary(UnaryOp::Rsqrt) => "rsqrt",
            TapeOp::Unary(UnaryOp::Reciprocal) => "recip",
            TapeOp::Unary(UnaryOp::Sqrt) => "sqrt",
            TapeOp::Binary(BinaryOp::Add) => "add",
            TapeOp::Binary(BinaryOp::Sub) => "sub",
            TapeOp::Binary(BinaryOp::Mul) => "mul",
            TapeOp::Binary(BinaryOp::Div) => "div",
            TapeOp::Binary(BinaryOp::Maximum) => "max",
            TapeOp::Binary(BinaryOp::Minimum) => "min",
            TapeOp::Binary(BinaryOp::Power) => "pow",
            TapeOp::Ternary(TernaryOp::Select) => "select",
            TapeOp::Cast => "cast",
        }
    }
}

/// Resolved reference to a kernel input or an earlier tape node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TapeRef {
    Input(usize),
    Node(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapeNode {
    pub id: ArrayId,
    pub dtype: DType,
    pub op: TapeOp,
    pub args: Vec<TapeRef>,
}

/// A complete fused computation: declared inputs and outputs, the tape, and
/// the scalar constants captured by value.
///
/// Construction validates the structural invariants once; the computation is
/// immutable afterwards, so a value in hand is always well formed.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedComputation {
    inputs: Vec<Array>,
    outputs: Vec<Array>,
    tape: Vec<TapeNode>,
    constants: HashMap<ArrayId, Literal>,
}

impl FusedComputation {
    pub fn new(
        inputs: Vec<Array>,
        outputs: Vec<Array>,
        tape: Vec<TapeNode>,
        constants: HashMap<ArrayId, Literal>,
    ) -> FuseResult<Self> {
        let computation = Self {
            inputs,
            outputs,
            tape,
            constants,
        };
        computation.validate()?;
        Ok(computation)
    }

    pub fn inputs(&self) -> &[Array] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Array] {
        &self.outputs
    }

    pub fn tape(&self) -> &[TapeNode] {
        &self.tape
    }

    pub fn constants(&self) -> &HashMap<ArrayId, Literal> {
        &self.constants
    }

    pub fn is_constant(&self, id: ArrayId) -> bool {
        self.constants.contains_key(&id)
    }

    pub fn constant_value(&self, id: ArrayId) -> Option<Literal> {
        self.constants.get(&id).copied()
    }

    /// Resolves a reference to the identity it names.
    pub fn ref_id(&self, reference: TapeRef) -> ArrayId {
        match reference {
            TapeRef::Input(index) => self.inputs[index].id(),
            TapeRef::Node(index) => self.tape[index].id,
        }
    }

    fn validate(&self) -> FuseResult<()> {
        if self.outputs.is_empty() {
            return Err(FuseError::invalid("fused computation has no outputs"));
        }
        if self.tape.is_empty() {
            return Err(FuseError::invalid("fused computation has an empty tape"));
        }

        for (index, node) in self.tape.iter().enumerate() {
            if node.args.len() != node.op.arity() {
                return Err(FuseError::invalid(format!(
                    "tape node {index} expects {} arguments, got {}",
                    node.op.arity(),
                    node.args.len()
                )));
            }
            for arg in &node.args {
                match *arg {
                    TapeRef::Input(input) if input >= self.inputs.len() => {
                        return Err(FuseError::invalid(format!(
                            "tape node {index} references input {input} out of range"
                        )));
                    }
                    TapeRef::Node(producer) if producer >= index => {
                        return Err(FuseError::invalid(format!(
                            "tape node {index} references node {producer}, which is not earlier"
                        )));
                    }
                    _ => {}
                }
            }
        }

        let node_ids: HashSet<ArrayId> = self.tape.iter().map(|node| node.id).collect();
        let output_shape = self.outputs[0].shape();
        for output in &self.outputs {
            if !node_ids.contains(&output.id()) {
                return Err(FuseError::invalid(format!(
                    "output {:?} is not produced by any tape node",
                    output.id()
                )));
            }
            if output.shape() != output_shape {
                return Err(FuseError::invalid(
                    "all fused outputs must share one shape",
                ));
            }
            if !output.is_row_contiguous() {
                return Err(FuseError::invalid(format!(
                    "output {:?} must be row contiguous in its own storage",
                    output.id()
                )));
            }
        }

        for id in self.constants.keys() {
            let Some(input) = self.inputs.iter().find(|input| input.id() == *id) else {
                return Err(FuseError::invalid(format!(
                    "constant {id:?} is not a declared input"
                )));
            };
            if !input.is_scalar() {
                return Err(FuseError::invalid(format!(
                    "constant {id:?} must be scalar to be captured by value"
                )));
            }
        }

        Ok(())
    }
}
