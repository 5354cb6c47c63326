pub mod error;
pub mod hashing;
pub mod profiling;
pub mod shape_helpers;
pub mod spec;
pub mod tape;

pub use error::{FuseError, FuseResult};
pub use spec::{Array, ArrayId, DType, Literal};
pub use tape::{BinaryOp, FusedComputation, TapeNode, TapeOp, TapeRef, TernaryOp, UnaryOp};
