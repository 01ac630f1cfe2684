//!
//! fat_repair: A library and CLI for inspecting, editing and repairing FAT32 volume images.
//!
//! This crate provides tools for:
//! - Decoding and encoding the on-disk structures of a FAT32 volume
//! - Navigating directories and creating, reading and removing files and directories
//! - Checking the consistency of a volume and repairing it in place
//! - Printing the volume layout
//!
//! The library is designed to be used both as an interactive shell and as a Rust library
//! working on any `Read + Write + Seek` store.
//!
//! # Re-exports
//! - [`FATVol`]: FAT volume abstraction
//! - [`DirCursor`]: Current directory handle
//! - [`Anomaly`] and [`RepairReport`]: Checker and repair results

pub mod commands;
pub mod filesystem;
pub mod traits;
pub mod utils;

/// FAT volume abstraction (see [`filesystem::fat::FATVol`]).
pub use crate::filesystem::fat::FATVol;
/// Current directory handle (see [`filesystem::directory::DirCursor`]).
pub use crate::filesystem::directory::DirCursor;
/// Listed file or directory (see [`filesystem::dir_entry::DirEntry`]).
pub use crate::filesystem::dir_entry::DirEntry;
/// Error returned by volume operations.
pub use crate::filesystem::fat_error::FATError;
/// Options applied when opening a volume.
pub use crate::filesystem::config::{RootCluster, VolumeConfig};
/// Inconsistency reported by [`FATVol::check`].
pub use crate::filesystem::check::Anomaly;
/// Outcome of [`FATVol::repair`].
pub use crate::filesystem::repair::{Fix, RepairReport};
/// Creation of empty volumes.
pub use crate::filesystem::format::{FormatOptions, format_volume};
