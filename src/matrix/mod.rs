//! Matrix module: block kernels, the local block-CSR matrix, and the
//! distributed operators built from it.

pub mod block_ops;
pub mod bcsr;
pub use bcsr::{BlockSparseMatrix, SharedBlockMatrix};
pub mod bc_map;
pub use bc_map::{BcEntry, BcMap};
pub mod distributed;
pub use distributed::{DistributedMatrix, Layout};
pub mod schur;
pub use schur::GlobalSchurMat;
