//! Core linear-algebra traits for parblock.

use crate::core::scalar::Scalar;
use crate::error::KError;
use crate::parallel::Comm;

/// Operator contract shared by the distributed matrix and the global Schur
/// operator, consumed by outer and inner Krylov solvers.
pub trait LinearOperator<T: Scalar> {
    /// Local (rows, cols) in scalars.
    fn size(&self) -> (usize, usize);
    /// Compute y = A · x. Collective: every rank must call it.
    fn mult(&mut self, x: &[T], y: &mut [T]) -> Result<(), KError>;
    /// A zeroed vector laid out like this operator's rows.
    fn create_vec(&self) -> Vec<T>;
}

/// Inner products & norms.
pub trait InnerProduct<T: Scalar> {
    /// Compute dot(x, y) = Σ conj(xᵢ) yᵢ.
    fn dot(&self, x: &[T], y: &[T]) -> T;
    /// Compute ‖x‖₂.
    fn norm(&self, x: &[T]) -> f64;
}

fn local_dot<T: Scalar>(x: &[T], y: &[T]) -> T {
    assert_eq!(x.len(), y.len(), "Vectors must have the same length");
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        x.par_iter()
            .zip(y.par_iter())
            .map(|(&xi, &yi)| xi.conj() * yi)
            .reduce(T::zero, |acc, v| acc + v)
    }
    #[cfg(not(feature = "rayon"))]
    {
        x.iter()
            .zip(y.iter())
            .fold(T::zero(), |acc, (&xi, &yi)| acc + xi.conj() * yi)
    }
}

/// Inner product over vectors partitioned across the ranks of a communicator.
///
/// Local partial sums are formed first and then reduced with one collective
/// call, so every rank receives the same value.
pub struct DistributedInnerProduct<'a> {
    /// Communicator spanning the ranks that own pieces of the vectors.
    pub comm: &'a dyn Comm,
}

impl<'a> DistributedInnerProduct<'a> {
    pub fn new(comm: &'a dyn Comm) -> Self {
        Self { comm }
    }
}

impl<'a, T: Scalar> InnerProduct<T> for DistributedInnerProduct<'a> {
    fn dot(&self, x: &[T], y: &[T]) -> T {
        let local = local_dot(x, y);
        if T::IS_COMPLEX {
            let mut parts = [local.re(), local.im()];
            self.comm.all_reduce_slice(&mut parts);
            T::from_parts(parts[0], parts[1])
        } else {
            T::from_real(self.comm.all_reduce(local.re()))
        }
    }

    fn norm(&self, x: &[T]) -> f64 {
        let local: f64 = x.iter().map(|&xi| xi.modulus_sqr()).sum();
        self.comm.all_reduce(local).sqrt()
    }
}
