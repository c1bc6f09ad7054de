use thiserror::Error;

// Unified error type for parblock

#[derive(Error, Debug)]
pub enum KError {
    /// Inconsistent composition of blocks, maps or exchange handles.
    #[error("configuration error: {0}")]
    Config(String),
    /// Operand of a value operation does not fit the receiver; nothing was modified.
    #[error("incompatible operand: {0}")]
    IncompatibleOperand(String),
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("singular pivot block at block-row {row}")]
    SingularPivot { row: usize },
    #[error("{0} used before factor()")]
    NotFactored(&'static str),
    #[error("exchange error: {0}")]
    Exchange(String),
    /// Another rank failed its local part of a collective operation.
    #[error("{0} other rank(s) failed before a collective step")]
    PeerFailure(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl KError {
    pub(crate) fn check_len(expected: usize, found: usize) -> Result<(), KError> {
        if expected == found {
            Ok(())
        } else {
            Err(KError::DimensionMismatch { expected, found })
        }
    }
}
