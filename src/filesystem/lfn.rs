//! Long file name (LFN) records.
//!
//! A long name is split into chunks of 13 UTF-16 code units. Each chunk lives in its own
//! 32-byte record placed before the short record, highest sequence number first:
//!
//! | Offset | Size | Content                                  |
//! |--------|------|------------------------------------------|
//! | 0x00   | 1    | sequence number (0x40 set on the last)   |
//! | 0x01   | 10   | code units 1-5                           |
//! | 0x0B   | 1    | attribute, always 0x0F                   |
//! | 0x0C   | 1    | type, always 0                           |
//! | 0x0D   | 1    | checksum of the short record name        |
//! | 0x0E   | 12   | code units 6-11                          |
//! | 0x1A   | 2    | first cluster, always 0                  |
//! | 0x1C   | 4    | code units 12-13                         |

use binread::{BinRead, BinReaderExt};
use std::io;

use super::dir_entry::RECORD_LEN;
use super::fat_error::FATError;
use crate::utils::set_u16_at;

/// Attribute byte identifying a long name record.
pub const LFN_ATTR: u8 = 0x0F;
/// Flag set on the sequence number of the last record of a name.
pub const LAST_LFN_FLAG: u8 = 0x40;
/// Number of UTF-16 code units per record.
pub const CHARS_PER_RECORD: usize = 13;

/// Raw 32-byte long name record.
#[derive(BinRead, Debug, Clone, PartialEq, Eq)]
#[br(little)]
pub struct LfnRecord {
    /// Sequence number, `LAST_LFN_FLAG` set on the last record
    seq: u8,
    /// Code units 1-5
    name1: [u16; 5],
    /// Attributes byte, `LFN_ATTR` for long name records
    attr: u8,
    /// Record type, always 0
    _kind: u8,
    /// Checksum of the short record name
    checksum: u8,
    /// Code units 6-11
    name2: [u16; 6],
    /// First cluster, always 0
    _cluster: u16,
    /// Code units 12-13
    name3: [u16; 2],
}

impl LfnRecord {
    /// Builds the record holding `chunk`, terminated and padded when shorter than 13 units.
    fn new(seq: u8, chunk: &[u16], checksum: u8) -> Self {
        let mut padded = [0xFFFFu16; CHARS_PER_RECORD];
        padded[..chunk.len()].copy_from_slice(chunk);
        if chunk.len() < CHARS_PER_RECORD {
            padded[chunk.len()] = 0x0000;
        }

        let mut record = LfnRecord {
            seq,
            name1: [0; 5],
            attr: LFN_ATTR,
            _kind: 0,
            checksum,
            name2: [0; 6],
            _cluster: 0,
            name3: [0; 2],
        };
        record.name1.copy_from_slice(&padded[..5]);
        record.name2.copy_from_slice(&padded[5..11]);
        record.name3.copy_from_slice(&padded[11..]);
        record
    }

    /// Parses a record from the first 32 bytes of `buf`.
    pub fn from_slice(buf: &[u8]) -> Result<Self, FATError> {
        let mut reader = io::Cursor::new(&buf[..RECORD_LEN.min(buf.len())]);
        reader.read_le().map_err(FATError::from)
    }

    /// Checks the attribute byte marking long name records.
    pub fn is_lfn(&self) -> bool {
        self.attr == LFN_ATTR
    }

    /// Checksum of the short record this record belongs to.
    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Code units of the record, up to the terminator.
    pub fn units(&self) -> Vec<u16> {
        self.name1
            .iter()
            .chain(self.name2.iter())
            .chain(self.name3.iter())
            .copied()
            .take_while(|unit| *unit != 0)
            .collect()
    }

    /// Serializes the record into its on-disk form.
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut record = [0u8; RECORD_LEN];
        record[0] = self.seq;
        record[11] = self.attr;
        record[13] = self.checksum;

        let pieces: [(usize, &[u16]); 3] = [
            (1, &self.name1[..]),
            (14, &self.name2[..]),
            (28, &self.name3[..]),
        ];
        for (start, units) in pieces {
            for (i, unit) in units.iter().enumerate() {
                set_u16_at(&mut record, start + 2 * i, *unit);
            }
        }
        record
    }
}

/// Encodes the long name records of `units`, in on-disk order.
///
/// The final chunk is terminated by 0x0000 and padded with 0xFFFF when it isn't full.
///
/// # Panics
/// Panics in debug builds if `units` is empty.
pub fn encode(units: &[u16], checksum: u8) -> Vec<u8> {
    debug_assert!(!units.is_empty(), "long names can't be empty");

    let chunks: Vec<&[u16]> = units.chunks(CHARS_PER_RECORD).collect();
    let mut records = Vec::with_capacity(chunks.len() * RECORD_LEN);

    for (idx, chunk) in chunks.iter().enumerate().rev() {
        let mut seq = (idx + 1) as u8;
        if idx + 1 == chunks.len() {
            seq |= LAST_LFN_FLAG;
        }
        records.extend_from_slice(&LfnRecord::new(seq, chunk, checksum).to_bytes());
    }

    records
}
