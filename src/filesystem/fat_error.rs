//! Error types for the FAT volume engine.
//!
//! Every failing operation of the engine reports one of these variants. Payloads name the
//! entry or path the operation was applied to, so the caller can report it as is.

use std::io;
use thiserror::Error;

/// Errors that can occur while opening, navigating or mutating a FAT volume.
#[derive(Error, Debug)]
pub enum FATError {
    /// The boot sector is unreadable or describes an implausible layout.
    #[error("Broken FAT system area: {0}")]
    BrokenLayout(String),

    /// A mutation was requested on a volume opened read-only.
    #[error("{0}: permission denied, the volume is opened read-only")]
    PermissionDenied(String),

    /// An entry with the same name already exists in the directory.
    #[error("{0}: file already exists")]
    AlreadyExists(String),

    /// The entry was expected to be a directory.
    #[error("{0}: is not a directory")]
    NotADirectory(String),

    /// The entry was expected to be a regular file.
    #[error("{0}: is a directory")]
    IsADirectory(String),

    /// No entry with that name exists in the directory.
    #[error("{0}: no such file or directory")]
    NotFound(String),

    /// The name can't be stored in a directory entry.
    #[error("{0:?}: invalid file name")]
    InvalidName(String),

    /// No free cluster is left in the allocation table.
    #[error("No free space left in image")]
    VolumeFull,

    /// A cluster chain loops back on itself at the given cluster.
    #[error("Crossed cluster {0}")]
    CrossedChain(u32),

    /// Underlying I/O errors of the backing image.
    #[error("IO Error: `{0}`")]
    IOError(io::Error),

    /// Parsing error occured during structure initialization
    #[error("BinRead Error: `{0}`")]
    BinReadError(binread::Error),
}

/// Converts standard I/O errors into FATError.
impl From<io::Error> for FATError {
    fn from(err: io::Error) -> Self {
        FATError::IOError(err)
    }
}

/// Converts BinRead errors into FATError.
impl From<binread::Error> for FATError {
    fn from(err: binread::Error) -> Self {
        FATError::BinReadError(err)
    }
}
