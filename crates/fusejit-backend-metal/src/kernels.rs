//! Library description handed to the external compile/cache service.

use serde::{Deserialize, Serialize};

/// Shared helpers and op functors emitted ahead of every generated kernel.
pub const KERNEL_PREAMBLE: &str = include_str!("kernels/preamble.metal");

/// One generated kernel library: the cache-key name, the complete source
/// text (preamble plus every specialization variant), and the entry names
/// the variants expose. Created once per distinct signature and reused for
/// the process lifetime by the external cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibrarySpec {
    pub name: String,
    pub source: String,
    pub variants: Vec<String>,
}
