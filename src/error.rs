//! Error taxonomy shared by every optimization pass.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure modes of the optimization passes.
///
/// A failed call leaves caller-owned buffers unchanged: every entry point
/// validates its arguments before writing any output.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A caller-supplied argument is outside its documented domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A scratch allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// An internal invariant was violated mid-pipeline; indicates a bug.
    #[error("internal error: {0}")]
    Internal(&'static str),
}
