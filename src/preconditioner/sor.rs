use std::fmt;

use bitflags::bitflags;

use crate::core::Scalar;
use crate::error::KError;
use crate::matrix::{DistributedMatrix, SharedBlockMatrix};
use crate::parallel::ExchangeContext;
use crate::preconditioner::Preconditioner;

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct RelaxFlags: u32 {
        /// Start every application from y = 0; skips the interface exchange.
        const ZERO_GUESS = 0b01;
        /// Forward sweep followed by a backward sweep.
        const SYMMETRIC  = 0b10;
    }
}

/// Block SOR/SSOR on `Aloc·y = x − [0; Bext·y_ext]`.
///
/// The remote coupling is frozen at the current interface values of `y`,
/// exchanged once per application. A fixed number of sweeps is run; there
/// is no convergence test.
pub struct PointRelaxation<T: Scalar> {
    aloc: SharedBlockMatrix<T>,
    bext: SharedBlockMatrix<T>,
    ctx: Box<dyn ExchangeContext<T>>,
    yext: Vec<T>,
    bvec: Vec<T>,
    ext_offset: usize,
    omega: f64,
    iters: usize,
    flags: RelaxFlags,
    factored: bool,
}

impl<T: Scalar> PointRelaxation<T> {
    pub fn new(mat: &DistributedMatrix<T>, omega: f64, iters: usize, flags: RelaxFlags) -> Self {
        let layout = mat.layout();
        let (aloc, bext) = mat.blocks();
        Self {
            aloc: aloc.clone(),
            bext: bext.clone(),
            ctx: mat.ext_distribution().create_ctx(layout.bsize),
            yext: vec![T::zero(); layout.bsize * layout.m],
            bvec: vec![T::zero(); layout.bsize * layout.n],
            ext_offset: layout.ext_offset(),
            omega,
            iters,
            flags,
            factored: false,
        }
    }

    pub fn set_omega(&mut self, omega: f64) { self.omega = omega; }
    pub fn omega(&self) -> f64 { self.omega }
    pub fn set_iters(&mut self, iters: usize) { self.iters = iters; }
    pub fn iters(&self) -> usize { self.iters }
    pub fn set_flags(&mut self, flags: RelaxFlags) { self.flags = flags; }
    pub fn flags(&self) -> RelaxFlags { self.flags }

    fn sweep(&self, rhs: &[T], y: &mut [T]) -> Result<(), KError> {
        let aloc = self.aloc.read();
        if self.flags.contains(RelaxFlags::SYMMETRIC) {
            aloc.apply_ssor(rhs, y, self.omega, self.iters)
        } else {
            aloc.apply_sor(rhs, y, self.omega, self.iters)
        }
    }
}

impl<T: Scalar> fmt::Display for PointRelaxation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SOR(omega={}, iters={}, flags={:?})", self.omega, self.iters, self.flags)
    }
}

impl<T: Scalar> Preconditioner<T> for PointRelaxation<T> {
    fn factor(&mut self) -> Result<(), KError> {
        self.factored = false;
        self.aloc.write().factor_diag()?;
        self.factored = true;
        Ok(())
    }

    fn apply_factor(&mut self, x: &[T], y: &mut [T]) -> Result<(), KError> {
        if !self.factored {
            return Err(KError::NotFactored("PointRelaxation"));
        }
        KError::check_len(self.bvec.len(), x.len())?;
        KError::check_len(self.bvec.len(), y.len())?;
        if self.flags.contains(RelaxFlags::ZERO_GUESS) {
            y.iter_mut().for_each(|v| *v = T::zero());
            return self.sweep(x, y);
        }
        let token = self.ctx.begin_forward(y, 0)?;
        self.bvec.iter_mut().for_each(|v| *v = T::zero());
        self.ctx.end_forward(token, &mut self.yext)?;
        // b = x - [0; Bext·y_ext]
        self.bext.read().mult(&self.yext, &mut self.bvec[self.ext_offset..])?;
        self.bvec.iter_mut().zip(x).for_each(|(bv, &xv)| *bv = xv - *bv);
        let rhs = std::mem::take(&mut self.bvec);
        let swept = self.sweep(&rhs, y);
        self.bvec = rhs;
        swept
    }
}
