use thiserror::Error;

use crate::datatype::ElementType;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by a foreign runtime implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("foreign allocation of {bytes} bytes failed")]
    AllocationFailed { bytes: usize },
    #[error("unknown element type: {0}")]
    UnknownElementType(ElementType),
    #[error("not a registered type descriptor")]
    UnknownType,
    #[error("not a live array of this runtime")]
    UnknownArray,
    #[error("array type has rank {expected}, got {found} extents")]
    InvalidRank { expected: usize, found: usize },
    #[error("no gc frame is open on this thread")]
    Unrooted,
    #[error("runtime has been shut down")]
    Closed,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("foreign array has incorrect number of dimensions: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("rank mismatch: expected {expected}, found {found}")]
    RankMismatch { expected: usize, found: usize },
    #[error("ragged nested list at level {level}")]
    RaggedList { level: usize },
    #[error("foreign array does not hold {0} elements")]
    ElementTypeMismatch(ElementType),
    #[error("foreign array holds {found} elements, its extents describe {expected}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("element size mismatch: expected {expected} bytes, found {found}")]
    ElementSizeMismatch { expected: usize, found: usize },
    #[error("foreign buffer is not aligned for the element type")]
    Misaligned,
    #[error("element count overflows usize")]
    ShapeOverflow,
    #[error("value is not a {0}")]
    NativeTypeMismatch(&'static str),
    #[error("no foreign runtime installed")]
    RuntimeNotInstalled,
    #[error("a different foreign runtime is already installed")]
    RuntimeAlreadyInstalled,
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
