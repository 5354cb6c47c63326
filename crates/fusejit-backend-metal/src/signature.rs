//! Cache-key names for fused computations.
//!
//! The name identifies the shape-class of a computation: element types, tape
//! structure and the captured constants. Concrete shapes and stride values
//! are runtime-bound and deliberately excluded, so one compiled library
//! serves every invocation of the same shape-class. Constant literal values
//! are included because they are baked into the generated source.

use fusejit::hashing::FingerprintHasher;
use fusejit::{FusedComputation, Literal, TapeRef};

/// Derives the library name for a fused computation.
///
/// The name is a readable prefix of leading op tags plus a 64-bit structural
/// fingerprint, deterministic across processes.
pub fn build_lib_name(computation: &FusedComputation) -> String {
    let mut hasher = FingerprintHasher::new();

    for input in computation.inputs() {
        // Constant / scalar / vector markers change the generated loads and
        // therefore belong to the shape-class.
        if computation.is_constant(input.id()) {
            hasher.write_u8(b'C');
            if let Some(literal) = computation.constant_value(input.id()) {
                hash_literal(&mut hasher, literal);
            }
        } else if input.is_scalar() {
            hasher.write_u8(b'S');
        } else {
            hasher.write_u8(b'V');
        }
        hasher.write(&input.dtype());
    }

    for node in computation.tape() {
        hasher.write(&node.op);
        hasher.write(&node.dtype);
        for arg in &node.args {
            match *arg {
                TapeRef::Input(index) => {
                    hasher.write_u8(0);
                    hasher.write(&index);
                }
                TapeRef::Node(index) => {
                    hasher.write_u8(1);
                    hasher.write(&index);
                }
            }
        }
    }

    for output in computation.outputs() {
        hasher.write(&output.dtype());
        let produced_by = computation
            .tape()
            .iter()
            .position(|node| node.id == output.id());
        hasher.write(&produced_by);
    }

    let mut prefix: Vec<&str> = computation
        .tape()
        .iter()
        .take(3)
        .map(|node| node.op.tag())
        .collect();
    if computation.tape().len() > 3 {
        prefix.push("etc");
    }

    format!("fused_{}_{:016x}", prefix.join("_"), hasher.finish())
}

fn hash_literal(hasher: &mut FingerprintHasher, literal: Literal) {
    match literal {
        Literal::I1(value) => {
            hasher.write_u8(0);
            hasher.write(&value);
        }
        Literal::Signed(value) => {
            hasher.write_u8(1);
            hasher.write(&value);
        }
        Literal::Unsigned(value) => {
            hasher.write_u8(2);
            hasher.write(&value);
        }
        Literal::Float(value) => {
            hasher.write_u8(3);
            hasher.write(&value.to_bits());
        }
    }
}
