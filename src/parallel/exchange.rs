//! Forward exchange of remote-owned vector entries.
//!
//! A [`VecDistribute`] is the index table: for each of the `M` slots of a
//! receive buffer it names the global block index that fills it. Each consumer
//! (distributed matrix, SOR preconditioner, global Schur operator) creates its
//! own [`ExchangeContext`] from the shared table and drives it with a two-call
//! protocol:
//!
//! ```rust,ignore
//! let token = ctx.begin_forward(&x, 0)?;   // initiate, non-blocking
//! /* local work that does not read `ext` */
//! ctx.end_forward(token, &mut ext)?;        // blocks until `ext` is filled
//! ```
//!
//! The `local` vector handed to `begin_forward` holds block `i` of the owning
//! process at `local[b*(i - var_offset)..]`: `var_offset` is 0 for full local
//! vectors and `Np` for interface-only vectors. Only one exchange may be in
//! flight per context.

use crate::core::Scalar;
use crate::error::KError;

/// Proof that a forward exchange was started on a particular context.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an exchange must be completed with end_forward"]
pub struct ExchangeToken {
    seq: u64,
}

/// Two-phase gather of remote entries into a receive buffer.
pub trait ExchangeContext<T: Scalar> {
    fn block_size(&self) -> usize;
    /// Number of receive slots (blocks).
    fn dimension(&self) -> usize;
    /// Start publishing/sending the entries of `local` that other ranks need.
    fn begin_forward(&mut self, local: &[T], var_offset: usize) -> Result<ExchangeToken, KError>;
    /// Complete the exchange started with `token`, filling `ext` (length `b·M`).
    fn end_forward(&mut self, token: ExchangeToken, ext: &mut [T]) -> Result<(), KError>;
}

/// Index table of the remote blocks referenced by an off-diagonal block.
pub trait VecDistribute<T: Scalar> {
    /// Number of distinct remote blocks `M`.
    fn dimension(&self) -> usize;
    /// Global block index of every receive slot.
    fn indices(&self) -> &[usize];
    /// New exchange context for vectors with block size `bsize`.
    fn create_ctx(&self, bsize: usize) -> Box<dyn ExchangeContext<T>>;
}

/// Tracks the single in-flight exchange of a context.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    next_seq: u64,
    pending: Option<u64>,
}

impl InFlight {
    pub(crate) fn begin(&mut self) -> Result<ExchangeToken, KError> {
        if let Some(seq) = self.pending {
            return Err(KError::Exchange(format!(
                "begin_forward issued while exchange #{seq} is still in flight"
            )));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending = Some(seq);
        Ok(ExchangeToken { seq })
    }

    /// Drop the pending exchange after a failed begin.
    pub(crate) fn abort(&mut self) {
        self.pending = None;
    }

    pub(crate) fn end(&mut self, token: ExchangeToken) -> Result<(), KError> {
        match self.pending {
            Some(seq) if seq == token.seq => {
                self.pending = None;
                Ok(())
            }
            Some(seq) => Err(KError::Exchange(format!(
                "token #{} does not match in-flight exchange #{seq}",
                token.seq
            ))),
            None => Err(KError::Exchange(format!(
                "end_forward with token #{} but no exchange in flight",
                token.seq
            ))),
        }
    }
}

/// Copy block `g` of an owned vector into `dst`.
pub(crate) fn read_block<T: Scalar>(
    local: &[T],
    bsize: usize,
    block: usize,
    var_offset: usize,
    dst: &mut [T],
) -> Result<(), KError> {
    let start = block
        .checked_sub(var_offset)
        .map(|i| i * bsize)
        .filter(|&s| s + bsize <= local.len())
        .ok_or_else(|| {
            KError::Exchange(format!(
                "requested block {block} is not stored in the local vector (offset {var_offset}, length {})",
                local.len()
            ))
        })?;
    dst.copy_from_slice(&local[start..start + bsize]);
    Ok(())
}

/// Distribution for a single process: every referenced block is owned locally.
#[derive(Clone, Debug)]
pub struct SerialDistribute {
    indices: Vec<usize>,
}

impl SerialDistribute {
    pub fn new(indices: Vec<usize>) -> Self {
        Self { indices }
    }

    /// Distribution with no remote blocks.
    pub fn empty() -> Self {
        Self { indices: Vec::new() }
    }
}

struct SerialContext<T> {
    indices: Vec<usize>,
    bsize: usize,
    staged: Vec<T>,
    flight: InFlight,
}

impl<T: Scalar> ExchangeContext<T> for SerialContext<T> {
    fn block_size(&self) -> usize {
        self.bsize
    }

    fn dimension(&self) -> usize {
        self.indices.len()
    }

    fn begin_forward(&mut self, local: &[T], var_offset: usize) -> Result<ExchangeToken, KError> {
        let token = self.flight.begin()?;
        let b = self.bsize;
        for (slot, &g) in self.indices.iter().enumerate() {
            if let Err(e) = read_block(local, b, g, var_offset, &mut self.staged[slot * b..(slot + 1) * b]) {
                self.flight.abort();
                return Err(e);
            }
        }
        Ok(token)
    }

    fn end_forward(&mut self, token: ExchangeToken, ext: &mut [T]) -> Result<(), KError> {
        self.flight.end(token)?;
        KError::check_len(self.staged.len(), ext.len())?;
        ext.copy_from_slice(&self.staged);
        Ok(())
    }
}

impl<T: Scalar> VecDistribute<T> for SerialDistribute {
    fn dimension(&self) -> usize {
        self.indices.len()
    }

    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn create_ctx(&self, bsize: usize) -> Box<dyn ExchangeContext<T>> {
        Box::new(SerialContext {
            indices: self.indices.clone(),
            bsize,
            staged: vec![T::zero(); bsize * self.indices.len()],
            flight: InFlight::default(),
        })
    }
}
