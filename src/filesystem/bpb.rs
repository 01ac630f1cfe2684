//! Boot sector parsing and volume geometry.
//!
//! This module implements:
//! - Parsing of the BIOS Parameter Block (Bpb) fields the engine relies on
//! - Validation of the raw layout fields
//! - The derived byte offsets of the FAT and data regions

use binread::{BinRead, BinReaderExt};
use getset::CopyGetters;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

use super::fat_error::FATError;
use crate::utils;

/// Number of bytes read from the start of the image to parse the boot sector.
pub const BOOT_SECTOR_LEN: usize = 512;

/// Leading part of the BIOS Parameter Block of a FAT32 volume.
///
/// Only the fields up to the root cluster number are parsed, plus the boot signature.
#[derive(BinRead, Debug)]
#[br(little)]
pub struct Bpb {
    /// Jump instruction to boot code
    jmp: [u8; 3],
    /// OEM identifier (e.g., "MSWIN4.1")
    oem_name: [u8; 8],
    /// Number of bytes per sector
    bytes_per_sec: u16,
    /// Number of sectors per cluster
    sec_per_clus: u8,
    /// Number of reserved sectors from start of volume
    rsvd_sec_cnt: u16,
    /// Number of FAT copies
    num_fat: u8,
    /// Maximum number of root directory entries (0 for FAT32)
    root_ent_cnt: u16,
    /// Total sectors for small volumes
    tot_sec_16: u16,
    /// Media descriptor (0xF8 for fixed disk)
    media: u8,
    /// Sectors per FAT for FAT12/FAT16
    fat_sz_16: u16,
    /// Sectors per track
    sec_per_trk: u16,
    /// Number of heads
    num_heads: u16,
    /// Number of hidden sectors preceding the partition
    hidd_sec: u32,
    /// Total sectors for large volumes
    tot_sec_32: u32,
    /// Sectors per FAT. Only the low half of the FAT32 field is honoured.
    fat_sz: u16,
    /// High half of the FAT32 sectors-per-FAT field
    fat_sz_hi: u16,
    /// FAT flags (mirroring, active FAT)
    ext_flags: u16,
    /// Filesystem version
    fs_ver: u16,
    /// First cluster of root directory
    root_clus: u32,
    /// Boot sector signature (0x55 0xAA)
    #[br(seek_before = SeekFrom::Start(510))]
    sig: [u8; 2],
}

impl Bpb {
    /// Reads the Bpb from the first sector of an image.
    ///
    /// # Errors
    /// - `FATError::BrokenLayout` if the boot sector can't be read or parsed
    pub fn from<T: Read + Seek>(store: &mut T) -> Result<Bpb, FATError> {
        let buf = utils::read_at(store, 0, BOOT_SECTOR_LEN)
            .map_err(|err| FATError::BrokenLayout(format!("unreadable boot sector: {err}")))?;

        let mut reader = io::Cursor::new(buf);
        reader
            .read_le()
            .map_err(|err| FATError::BrokenLayout(format!("unparsable boot sector: {err}")))
    }

    /// Returns the root cluster number stored in the boot sector.
    pub fn root_clus(&self) -> u32 {
        self.root_clus
    }
}

/// Implements the Display trait for Bpb
impl fmt::Display for Bpb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        macro_rules! field {
            ($offset:expr, $name:expr, $val:expr) => {
                writeln!(f, "  {:<20} 0x{:>04X}: {}", $name, $offset, $val)?
            };
        }

        writeln!(f, "BIOS Parameter Block (Bpb):")?;

        field!(0x00, "jmp", format!("{:02X?}", self.jmp));
        field!(0x03, "oem_name", String::from_utf8_lossy(&self.oem_name));
        field!(0x0B, "bytes_per_sec", self.bytes_per_sec);
        field!(0x0D, "sec_per_clus", self.sec_per_clus);
        field!(0x0E, "rsvd_sec_cnt", self.rsvd_sec_cnt);
        field!(0x10, "num_fat", self.num_fat);
        field!(0x11, "root_ent_cnt", self.root_ent_cnt);
        field!(0x13, "tot_sec_16", self.tot_sec_16);
        field!(0x15, "media", format!("0x{:X}", self.media));
        field!(0x16, "fat_sz_16", self.fat_sz_16);
        field!(0x18, "sec_per_trk", self.sec_per_trk);
        field!(0x1A, "num_heads", self.num_heads);
        field!(0x1C, "hidd_sec", self.hidd_sec);
        field!(0x20, "tot_sec_32", self.tot_sec_32);
        field!(0x24, "fat_sz", self.fat_sz);
        field!(0x26, "fat_sz_hi", self.fat_sz_hi);
        field!(0x28, "ext_flags", self.ext_flags);
        field!(0x2A, "fs_ver", self.fs_ver);
        field!(0x2C, "root_clus", self.root_clus);

        writeln!(f, "\nSignature 0x{:04X}: {:02X?}", 510, self.sig)
    }
}

/// Layout of a volume, derived once from the boot sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct Geometry {
    /// Number of bytes per sector
    bytes_per_sec: u16,
    /// Number of sectors per cluster
    sec_per_clus: u8,
    /// Number of reserved sectors before the first FAT
    rsvd_sec_cnt: u16,
    /// Number of FAT copies
    num_fat: u8,
    /// Sectors per FAT
    fat_sz: u16,
}

impl Geometry {
    /// Builds the geometry from raw layout fields.
    ///
    /// # Errors
    /// - `FATError::BrokenLayout` if any of the fields is zero
    pub fn new(
        bytes_per_sec: u16,
        sec_per_clus: u8,
        rsvd_sec_cnt: u16,
        num_fat: u8,
        fat_sz: u16,
    ) -> Result<Self, FATError> {
        let fields = [
            ("bytes per sector", bytes_per_sec as u32),
            ("sectors per cluster", sec_per_clus as u32),
            ("reserved sectors", rsvd_sec_cnt as u32),
            ("FAT copies", num_fat as u32),
            ("sectors per FAT", fat_sz as u32),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, value)| *value == 0) {
            return Err(FATError::BrokenLayout(format!("{name} is zero")));
        }

        Ok(Self {
            bytes_per_sec,
            sec_per_clus,
            rsvd_sec_cnt,
            num_fat,
            fat_sz,
        })
    }

    /// Builds the geometry from a parsed boot sector.
    pub fn from_bpb(bpb: &Bpb) -> Result<Self, FATError> {
        Self::new(
            bpb.bytes_per_sec,
            bpb.sec_per_clus,
            bpb.rsvd_sec_cnt,
            bpb.num_fat,
            bpb.fat_sz,
        )
    }

    /// Byte offset of the first FAT.
    pub fn fat_offset(&self) -> u64 {
        self.rsvd_sec_cnt as u64 * self.bytes_per_sec as u64
    }

    /// Byte length of one FAT copy.
    pub fn fat_len(&self) -> u64 {
        self.fat_sz as u64 * self.bytes_per_sec as u64
    }

    /// Byte offset of the FAT copy `copy`.
    pub fn fat_copy_offset(&self, copy: u8) -> u64 {
        self.fat_offset() + copy as u64 * self.fat_len()
    }

    /// Byte offset of the data region.
    pub fn data_offset(&self) -> u64 {
        self.fat_copy_offset(self.num_fat)
    }

    /// Size in bytes of a cluster.
    pub fn cluster_size(&self) -> u32 {
        self.bytes_per_sec as u32 * self.sec_per_clus as u32
    }

    /// Number of entries held by one FAT copy.
    pub fn fat_entry_count(&self) -> u32 {
        (self.fat_len() / 4) as u32
    }

    /// Byte offset of the FAT entry of `cluster` in the first FAT.
    pub fn fat_entry_offset(&self, cluster: u32) -> u64 {
        self.fat_offset() + cluster as u64 * 4
    }

    /// Byte offset of the data of `cluster`.
    ///
    /// # Panics
    /// Panics in debug builds if `cluster` is lower than 2.
    pub fn cluster_offset(&self, cluster: u32) -> u64 {
        debug_assert!(cluster >= 2, "cluster {cluster} doesn't address data");
        self.data_offset() + (cluster as u64 - 2) * self.cluster_size() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_offsets() {
        let geometry = Geometry::new(512, 2, 32, 2, 8).unwrap();

        assert_eq!(geometry.fat_offset(), 32 * 512);
        assert_eq!(geometry.fat_len(), 8 * 512);
        assert_eq!(geometry.data_offset(), 32 * 512 + 2 * 8 * 512);
        assert_eq!(geometry.cluster_size(), 1024);
        assert_eq!(geometry.fat_entry_count(), 1024);
        assert_eq!(geometry.cluster_offset(2), geometry.data_offset());
        assert_eq!(geometry.cluster_offset(5), geometry.data_offset() + 3 * 1024);
    }

    #[test]
    fn zero_field_is_a_broken_layout() {
        assert!(matches!(
            Geometry::new(512, 0, 32, 2, 8),
            Err(FATError::BrokenLayout(_))
        ));
        assert!(matches!(
            Geometry::new(512, 1, 32, 2, 0),
            Err(FATError::BrokenLayout(_))
        ));
    }

    #[test]
    fn parse_boot_sector_fields() {
        let mut sector = vec![0u8; BOOT_SECTOR_LEN];
        sector[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        utils::set_u16_at(&mut sector, 0x0B, 512);
        sector[0x0D] = 4;
        utils::set_u16_at(&mut sector, 0x0E, 32);
        sector[0x10] = 2;
        utils::set_u16_at(&mut sector, 0x24, 16);
        utils::set_u32_at(&mut sector, 0x2C, 7);
        sector[510] = 0x55;
        sector[511] = 0xAA;

        let bpb = Bpb::from(&mut io::Cursor::new(sector)).unwrap();
        let geometry = Geometry::from_bpb(&bpb).unwrap();

        assert_eq!(geometry, Geometry::new(512, 4, 32, 2, 16).unwrap());
        assert_eq!(bpb.root_clus(), 7);
    }

    #[test]
    fn fields_are_listed_with_their_offsets() {
        let mut sector = vec![0u8; BOOT_SECTOR_LEN];
        utils::set_u16_at(&mut sector, 0x0B, 512);
        utils::set_u16_at(&mut sector, 0x24, 16);
        utils::set_u32_at(&mut sector, 0x2C, 2);
        sector[510] = 0x55;
        sector[511] = 0xAA;

        let text = Bpb::from(&mut io::Cursor::new(sector)).unwrap().to_string();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "BIOS Parameter Block (Bpb):");
        assert!(lines.contains(&"  bytes_per_sec        0x000B: 512"));
        assert!(lines.contains(&"  fat_sz               0x0024: 16"));
        assert!(lines.contains(&"  root_clus            0x002C: 2"));
        assert_eq!(lines.last(), Some(&"Signature 0x01FE: [55, AA]"));
    }

    #[test]
    fn short_image_is_a_broken_layout() {
        let result = Bpb::from(&mut io::Cursor::new(vec![0u8; 100]));
        assert!(matches!(result, Err(FATError::BrokenLayout(_))));
    }
}
