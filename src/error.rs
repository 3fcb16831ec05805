//! Error taxonomy and the small outcome types shared by every table layer.

use core::fmt;

/// Failure conditions reported by table and counter operations.
///
/// None of these are fatal to the table: after any error the structure is in
/// the same valid state it was in before the call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// An internal allocation could not be satisfied. Nothing was changed.
    AllocationFailure,
    /// `insert` found an equal key already present.
    DuplicateKey,
    /// The key is not present (or its entry has already been released).
    NotFound,
    /// A counter that already reached zero was asked for another reference.
    AlreadyFreed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Error::AllocationFailure => "allocation failure",
            Error::DuplicateKey => "duplicate key",
            Error::NotFound => "key not found",
            Error::AlreadyFreed => "object already freed",
        })
    }
}

impl std::error::Error for Error {}

/// Side result of a structural change: whether a resize that was due could
/// actually be started.
///
/// `Deferred` is a success. The operation took effect and the table is
/// still correct; it just keeps its current capacity until a later call
/// manages to allocate the new generation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResizeStatus {
    Ready,
    Deferred,
}

impl ResizeStatus {
    pub fn is_deferred(self) -> bool {
        matches!(self, ResizeStatus::Deferred)
    }
}

/// Result of giving back one reference.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Release {
    /// Other holders remain; carries the count left after the release.
    Live(usize),
    /// The count reached zero and the object was destroyed.
    Freed,
}

impl Release {
    pub fn is_freed(self) -> bool {
        matches!(self, Release::Freed)
    }
}
