//! This module provides the FAT32 volume engine.
//!
//! It is layered bottom-up: the on-disk codecs (boot sector, FAT entries, directory
//! records, long names, timestamps), the volume with its cluster chains, the directory
//! engine working through an explicit cursor, and finally the checker and the repair.
pub mod bpb;
pub mod check;
pub mod config;
pub mod dir_entry;
pub mod directory;
pub mod fat;
pub mod fat_entry;
pub mod fat_error;
pub mod format;
pub mod lfn;
pub mod repair;
pub mod timestamp;
