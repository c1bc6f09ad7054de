//! Scalar field used throughout the block kernels and solvers.
//!
//! Every matrix, vector, exchange buffer and Krylov iterate in a given
//! configuration shares one scalar type. Real types cover ordinary analysis;
//! the complex types cover complex-step sensitivity and adjoint runs.
//! Norms and tolerances are always carried as `f64`.

use num_complex::{Complex32, Complex64};
use num_traits::NumAssign;
use std::fmt::Debug;
use std::ops::Neg;

/// Real or complex field element.
pub trait Scalar:
    NumAssign + Copy + Send + Sync + Debug + Neg<Output = Self> + 'static
{
    /// Whether the imaginary part carries information.
    const IS_COMPLEX: bool;

    /// Complex conjugate (identity for real types).
    fn conj(self) -> Self;

    /// Magnitude |z|.
    fn modulus(self) -> f64;

    /// Squared magnitude |z|².
    fn modulus_sqr(self) -> f64 {
        let m = self.modulus();
        m * m
    }

    fn re(self) -> f64;

    fn im(self) -> f64;

    fn from_real(r: f64) -> Self;

    /// Rebuild from real and imaginary parts; real types drop `im`.
    fn from_parts(re: f64, im: f64) -> Self;

    fn is_finite(self) -> bool {
        self.re().is_finite() && self.im().is_finite()
    }
}

impl Scalar for f64 {
    const IS_COMPLEX: bool = false;
    fn conj(self) -> Self {
        self
    }
    fn modulus(self) -> f64 {
        self.abs()
    }
    fn modulus_sqr(self) -> f64 {
        self * self
    }
    fn re(self) -> f64 {
        self
    }
    fn im(self) -> f64 {
        0.0
    }
    fn from_real(r: f64) -> Self {
        r
    }
    fn from_parts(re: f64, _im: f64) -> Self {
        re
    }
}

impl Scalar for f32 {
    const IS_COMPLEX: bool = false;
    fn conj(self) -> Self {
        self
    }
    fn modulus(self) -> f64 {
        self.abs() as f64
    }
    fn re(self) -> f64 {
        self as f64
    }
    fn im(self) -> f64 {
        0.0
    }
    fn from_real(r: f64) -> Self {
        r as f32
    }
    fn from_parts(re: f64, _im: f64) -> Self {
        re as f32
    }
}

impl Scalar for Complex64 {
    const IS_COMPLEX: bool = true;
    fn conj(self) -> Self {
        Complex64::conj(&self)
    }
    fn modulus(self) -> f64 {
        self.norm()
    }
    fn modulus_sqr(self) -> f64 {
        self.norm_sqr()
    }
    fn re(self) -> f64 {
        self.re
    }
    fn im(self) -> f64 {
        self.im
    }
    fn from_real(r: f64) -> Self {
        Complex64::new(r, 0.0)
    }
    fn from_parts(re: f64, im: f64) -> Self {
        Complex64::new(re, im)
    }
}

impl Scalar for Complex32 {
    const IS_COMPLEX: bool = true;
    fn conj(self) -> Self {
        Complex32::conj(&self)
    }
    fn modulus(self) -> f64 {
        self.norm() as f64
    }
    fn re(self) -> f64 {
        self.re as f64
    }
    fn im(self) -> f64 {
        self.im as f64
    }
    fn from_real(r: f64) -> Self {
        Complex32::new(r as f32, 0.0)
    }
    fn from_parts(re: f64, im: f64) -> Self {
        Complex32::new(re as f32, im as f32)
    }
}
