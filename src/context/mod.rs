//! Context module for parblock.
//!
//! Factory types that turn a distributed matrix and a set of options into a
//! ready-to-factor preconditioner.
//!
//! Modules:
//! - [`pc_context`]: the `Pc` sum type and `build_pc`.

pub mod pc_context;
pub use pc_context::{build_pc, Pc};
