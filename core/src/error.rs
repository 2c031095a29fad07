//! Core error kinds (spec §7).
//!
//! Recoverable errors propagate to the immediate caller as `Result`;
//! invariant violations panic (see Design Notes §9, "Exceptions").

use thiserror::Error;

/// Error kinds produced by the core API.
///
/// These map 1:1 onto the error kinds in spec §7. None of them are tied
/// to a CORBA exception code, that translation belongs to the ORB layer
/// sitting on top of this crate.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    /// A heap operation named memory not owned by the target heap.
    #[error("pointer is not owned by this heap")]
    InvalidPointer,

    /// Illegal flag combination in `allocate`/`copy`.
    #[error("invalid flag combination")]
    InvalidFlag,

    /// Neither a partition slot nor the OS could satisfy the request.
    #[error("out of memory")]
    OutOfMemory,

    /// Release/copy crosses an allocation boundary.
    #[error("operation crosses an allocation boundary")]
    OutOfRange,

    /// Copy into read-only memory without `DST_ALLOCATE`.
    #[error("protection violation")]
    ProtectionViolation,

    /// Wait/signal called outside a sync-domain, or double suspend-prepare.
    #[error("operation requires sync-domain context, or re-entered out of order")]
    BadOrder,

    /// Time-bounded wait elapsed.
    #[error("operation timed out")]
    Timeout,

    /// Operation unwound by abort/shutdown.
    #[error("operation cancelled")]
    Cancelled,

    /// Consistency invariant broken, unreachable unless the port misbehaves.
    #[error("internal consistency error: {0}")]
    Internal(&'static str),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Maps a raw OS error from the port layer onto a `CoreError`.
    pub(crate) fn from_os(errno: i32) -> Self {
        match errno {
            libc::ENOMEM => CoreError::OutOfMemory,
            libc::EINVAL => CoreError::InvalidFlag,
            _ => CoreError::Internal("unexpected OS error"),
        }
    }
}
