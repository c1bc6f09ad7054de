//! Core abstractions: scalar field, operator contract, global inner products.

pub mod scalar;
pub mod traits;

pub use scalar::Scalar;
pub use traits::{DistributedInnerProduct, InnerProduct, LinearOperator};
