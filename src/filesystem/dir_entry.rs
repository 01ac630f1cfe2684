//! FAT directory entry structure, parsing and encoding.
//!
//! This module implements the 32-byte short directory record, the checksum linking long
//! name records to it, and the decoding of a raw directory table into [`DirEntry`] nodes.
//! Each node remembers where its records live in the parent's table so it can be rewritten
//! or deleted in place.

use binread::{BinRead, BinReaderExt};
use getset::{CopyGetters, Getters};
use log::debug;
use std::fmt;
use std::io;

use super::fat_error::FATError;
use super::lfn::{self, LfnRecord};
use super::timestamp::{FatDate, FatDateTime, FatTime};
use crate::utils::{set_u16_at, set_u32_at};

/// Size in bytes of a directory record.
pub const RECORD_LEN: usize = 32;
/// First byte of a deleted record.
pub const DELETED_MARK: u8 = 0xE5;
/// First byte of a record never used.
pub const UNUSED_MARK: u8 = 0x00;
/// Attribute bit of directories.
pub const ATTR_DIRECTORY: u8 = 0x10;
/// Attribute bit of regular files.
pub const ATTR_ARCHIVE: u8 = 0x20;
/// Attribute bit of the volume label.
pub const ATTR_VOLUME_ID: u8 = 0x08;
/// Offset of the size field inside a short record.
pub const SIZE_FIELD_OFFSET: usize = 28;
/// Longest name, in UTF-16 code units, a chain of long name records can hold.
pub const MAX_NAME_UNITS: usize = 255;

/// Raw 32-byte short (8.3) directory record.
#[derive(BinRead, Debug, Clone)]
#[br(little)]
pub struct ShortRecord {
    /// Base name, space padded
    name: [u8; 8],
    /// Extension, space padded
    ext: [u8; 3],
    /// Attributes byte
    attr: u8,
    /// NT reserved (unused)
    _n_t_res: u8,
    /// Creation time: odd second and hundredths
    crt_time_tenth: u8,
    /// Creation time
    crt_time: u16,
    /// Creation date
    crt_date: u16,
    /// Last access date
    _lst_acc_date: u16,
    /// High 16 bits of first cluster number
    fst_clus_hi: u16,
    /// Last write time
    _wrt_time: u16,
    /// Last write date
    _wrt_date: u16,
    /// Low 16 bits of first cluster number
    fst_clus_lo: u16,
    /// File size in bytes (0 for directories)
    file_size: u32,
}

impl ShortRecord {
    /// Parses a short record from the first 32 bytes of `buf`.
    pub fn from_slice(buf: &[u8]) -> Result<Self, FATError> {
        let mut reader = io::Cursor::new(&buf[..RECORD_LEN.min(buf.len())]);
        reader.read_le().map_err(FATError::from)
    }

    /// Returns the complete first cluster number, `(fst_clus_hi << 16) | fst_clus_lo`.
    pub fn cluster_number(&self) -> u32 {
        ((self.fst_clus_hi as u32) << 16) | self.fst_clus_lo as u32
    }

    /// Checks the directory attribute bit (0x10).
    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    /// The 11 name bytes the checksum is computed over.
    pub fn raw_name(&self) -> [u8; 11] {
        let mut raw = [0u8; 11];
        raw[..8].copy_from_slice(&self.name);
        raw[8..].copy_from_slice(&self.ext);
        raw
    }

    /// Human readable 8.3 name: trailing spaces removed, extension joined with a dot.
    pub fn short_name(&self) -> String {
        let to_text = |bytes: &[u8]| -> String {
            bytes
                .iter()
                .map(|b| *b as char)
                .collect::<String>()
                .trim_end()
                .to_string()
        };
        let name = to_text(&self.name);
        let ext = to_text(&self.ext);

        if ext.is_empty() {
            name
        } else {
            format!("{name}.{ext}")
        }
    }

    pub fn created(&self) -> FatDateTime {
        FatDateTime {
            date: FatDate::from_raw(self.crt_date),
            time: FatTime::from_raw(self.crt_time),
            hundredths: self.crt_time_tenth,
        }
    }

    pub fn file_size(&self) -> u32 {
        self.file_size
    }
}

/// Single-byte rolling checksum of the 11 name bytes of a short record.
pub fn checksum(raw_name: &[u8; 11]) -> u8 {
    raw_name.iter().fold(0u8, |chk, byte| {
        ((chk & 1) << 7).wrapping_add(chk >> 1).wrapping_add(*byte)
    })
}

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// Position of an entry's records inside its parent's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct Location {
    /// Byte offset of the first record (long name records included).
    offset: usize,
    /// Number of consecutive records, the short record being the last one.
    count: usize,
}

impl Location {
    pub fn new(offset: usize, count: usize) -> Self {
        Self { offset, count }
    }

    /// Byte offset of the short record.
    pub fn short_record_offset(&self) -> usize {
        self.offset + (self.count - 1) * RECORD_LEN
    }
}

/// A file or directory as listed in its parent directory.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct DirEntry {
    #[getset(get = "pub")]
    name: String,
    #[getset(get_copy = "pub")]
    start: u32,
    #[getset(get_copy = "pub")]
    kind: EntryKind,
    #[getset(get_copy = "pub")]
    created: FatDateTime,
    #[getset(get_copy = "pub")]
    size: u32,
    /// `None` for the synthesized root.
    #[getset(get_copy = "pub")]
    location: Option<Location>,
}

impl DirEntry {
    /// Synthesized root directory node.
    pub fn root(start: u32) -> Self {
        Self {
            name: String::from("/"),
            start,
            kind: EntryKind::Directory,
            created: FatDateTime::epoch(),
            size: 0,
            location: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_root(&self) -> bool {
        self.location.is_none()
    }

    /// Checks whether this is a "." or ".." control entry.
    pub fn is_dot(&self) -> bool {
        self.name == "." || self.name == ".."
    }

    /// The same entry with its chain moved to `start`.
    pub(crate) fn with_start(&self, start: u32) -> Self {
        Self {
            start,
            ..self.clone()
        }
    }
}

impl fmt::Display for DirEntry {
    /// Formats the entry as a long listing line: date, time, kind, size and name.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            EntryKind::Directory => 'd',
            EntryKind::File => 'f',
        };
        write!(f, "{}  {}  {:>10}  {}", self.created, kind, self.size, self.name)
    }
}

/// Checks that `name` can be stored in a directory entry.
///
/// # Errors
/// - `FATError::InvalidName` for empty names, "." and "..", names containing '/' or NUL,
///   and names longer than 255 UTF-16 code units.
pub fn validate_name(name: &str) -> Result<Vec<u16>, FATError> {
    let units: Vec<u16> = name.encode_utf16().collect();

    if units.is_empty()
        || units.len() > MAX_NAME_UNITS
        || name == "."
        || name == ".."
        || name.contains(['/', '\0'])
    {
        return Err(FATError::InvalidName(name.to_string()));
    }

    Ok(units)
}

/// Encodes a short record.
///
/// `name` is the 11-byte name field, already padded.
pub fn encode_short(
    name: &[u8; 11],
    kind: EntryKind,
    start: u32,
    size: u32,
    stamp: FatDateTime,
) -> [u8; RECORD_LEN] {
    let mut record = [0u8; RECORD_LEN];

    record[..11].copy_from_slice(name);
    record[11] = match kind {
        EntryKind::Directory => ATTR_DIRECTORY,
        EntryKind::File => ATTR_ARCHIVE,
    };
    record[13] = stamp.hundredths;
    set_u16_at(&mut record, 14, stamp.time.raw());
    set_u16_at(&mut record, 16, stamp.date.raw());
    set_u16_at(&mut record, 18, stamp.date.raw());
    set_u16_at(&mut record, 20, (start >> 16) as u16);
    set_u16_at(&mut record, 22, stamp.time.raw());
    set_u16_at(&mut record, 24, stamp.date.raw());
    set_u16_at(&mut record, 26, (start & 0xFFFF) as u16);
    set_u32_at(&mut record, SIZE_FIELD_OFFSET, size);

    record
}

/// Encodes a "." or ".." control record.
pub fn encode_dot(dots: &str, start: u32, stamp: FatDateTime) -> [u8; RECORD_LEN] {
    let mut name = [b' '; 11];
    name[..dots.len()].copy_from_slice(dots.as_bytes());
    encode_short(&name, EntryKind::Directory, start, 0, stamp)
}

/// Short name field derived from the position of the entry in its directory.
///
/// The decimal sequence number fills the base name and spills over into the extension.
pub fn sequence_name(seq: usize) -> [u8; 11] {
    let mut name = [b' '; 11];
    let digits = seq.to_string();
    let len = digits.len().min(11);
    name[..len].copy_from_slice(&digits.as_bytes()[..len]);
    name
}

/// Encodes the long name records followed by the short record of a new entry.
///
/// `seq` is the number of entries currently listed in the parent directory.
pub fn encode_entry(
    units: &[u16],
    kind: EntryKind,
    start: u32,
    size: u32,
    seq: usize,
    stamp: FatDateTime,
) -> Vec<u8> {
    let short_name = sequence_name(seq);
    let short = encode_short(&short_name, kind, start, size, stamp);

    let mut records = lfn::encode(units, checksum(&short_name));
    records.extend_from_slice(&short);
    records
}

/// Decodes every live entry of a raw directory table, in table order.
///
/// Deleted and unused records are skipped, as are volume labels. Long name records are
/// concatenated in front of the short record that follows them. When `validate_checksum`
/// is set, long names whose checksum doesn't match the short record are dropped in favour
/// of the short name.
pub fn parse_table(data: &[u8], validate_checksum: bool) -> Result<Vec<DirEntry>, FATError> {
    let record_cnt = data.len() / RECORD_LEN;
    let record = |idx: usize| &data[idx * RECORD_LEN..(idx + 1) * RECORD_LEN];

    let mut entries = vec![];
    let mut idx = 0;

    while idx < record_cnt {
        let first = record(idx);
        if first[0] == DELETED_MARK || first[0] == UNUSED_MARK {
            idx += 1;
            continue;
        }

        let mut units: Vec<u16> = vec![];
        let mut checksums = vec![];
        let mut k = 0;
        while idx + k < record_cnt {
            let long = LfnRecord::from_slice(record(idx + k))?;
            if !long.is_lfn() {
                break;
            }
            let mut chunk = long.units();
            chunk.extend_from_slice(&units);
            units = chunk;
            checksums.push(long.checksum());
            k += 1;
        }
        if idx + k >= record_cnt {
            debug!("Long name records at offset {} have no short record", idx * RECORD_LEN);
            break;
        }

        let tail = record(idx + k);
        if tail[0] == DELETED_MARK || tail[0] == UNUSED_MARK {
            debug!("Orphan long name records at offset {}", idx * RECORD_LEN);
            idx += k.max(1);
            continue;
        }

        let short = ShortRecord::from_slice(tail)?;
        if short.attr & ATTR_VOLUME_ID != 0 {
            idx += k + 1;
            continue;
        }

        let expected = checksum(&short.raw_name());
        let mismatch = checksums.iter().any(|chk| *chk != expected);
        if mismatch {
            debug!(
                "Long name checksum mismatch for short record {:?}",
                short.short_name()
            );
        }

        let name = if units.is_empty() || (mismatch && validate_checksum) {
            short.short_name()
        } else {
            String::from_utf16_lossy(&units)
        };

        entries.push(DirEntry {
            name,
            start: short.cluster_number(),
            kind: if short.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            created: short.created(),
            size: short.file_size,
            location: Some(Location::new(idx * RECORD_LEN, k + 1)),
        });

        idx += k + 1;
    }

    Ok(entries)
}
