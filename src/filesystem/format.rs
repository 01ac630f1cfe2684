//! Creation of empty volumes.
//!
//! The formatter writes a minimal FAT32 boot sector, empty FAT copies with the reserved
//! entries and the root directory chain set, and a zeroed data region.

use std::io::{Seek, Write};

use super::bpb::{BOOT_SECTOR_LEN, Geometry};
use super::fat_entry::{EOC, ENTRY_MASK};
use super::fat_error::FATError;
use crate::utils::{set_u16_at, set_u32_at, write_at};

const MEDIA_FIXED_DISK: u8 = 0xF8;

/// Parameters of a new volume.
#[derive(Debug, Clone, Copy)]
pub struct FormatOptions {
    pub bytes_per_sec: u16,
    pub sec_per_clus: u8,
    pub rsvd_sec_cnt: u16,
    pub num_fat: u8,
    /// Number of data clusters, the root directory's included.
    pub clusters: u32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            bytes_per_sec: 512,
            sec_per_clus: 1,
            rsvd_sec_cnt: 32,
            num_fat: 2,
            clusters: 64,
        }
    }
}

impl FormatOptions {
    pub fn with_clusters(mut self, clusters: u32) -> Self {
        self.clusters = clusters;
        self
    }

    pub fn with_sec_per_clus(mut self, sec_per_clus: u8) -> Self {
        self.sec_per_clus = sec_per_clus;
        self
    }

    /// Sectors needed by one FAT copy to describe every cluster.
    fn fat_sz(&self) -> Result<u16, FATError> {
        let bytes = (self.clusters as u64 + 2) * 4;
        u16::try_from(bytes.div_ceil(self.bytes_per_sec.max(1) as u64)).map_err(|_| {
            FATError::BrokenLayout(format!("{} clusters need too large a FAT", self.clusters))
        })
    }
}

/// Writes an empty volume at the start of `store`.
///
/// # Errors
/// - `FATError::BrokenLayout` if the options describe an invalid geometry
/// - `FATError::IOError` if the store can't be written
pub fn format_volume<T: Write + Seek>(
    store: &mut T,
    options: &FormatOptions,
) -> Result<Geometry, FATError> {
    if options.clusters == 0 {
        return Err(FATError::BrokenLayout(String::from(
            "a volume needs at least one cluster",
        )));
    }
    let geometry = Geometry::new(
        options.bytes_per_sec,
        options.sec_per_clus,
        options.rsvd_sec_cnt,
        options.num_fat,
        options.fat_sz()?,
    )?;

    let total_len =
        geometry.data_offset() + options.clusters as u64 * geometry.cluster_size() as u64;
    let total_sectors = total_len / options.bytes_per_sec as u64;
    if (BOOT_SECTOR_LEN as u64) > geometry.fat_offset() {
        return Err(FATError::BrokenLayout(String::from(
            "the reserved region can't hold the boot sector",
        )));
    }

    // Zero the whole volume first so it has its final length
    let zeroes = vec![0u8; geometry.cluster_size() as usize];
    let mut offset = 0;
    while offset < total_len {
        let len = zeroes.len().min((total_len - offset) as usize);
        write_at(store, offset, &zeroes[..len])?;
        offset += len as u64;
    }

    let mut sector = vec![0u8; BOOT_SECTOR_LEN];
    sector[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
    sector[3..11].copy_from_slice(b"FATREPR ");
    set_u16_at(&mut sector, 0x0B, options.bytes_per_sec);
    sector[0x0D] = options.sec_per_clus;
    set_u16_at(&mut sector, 0x0E, options.rsvd_sec_cnt);
    sector[0x10] = options.num_fat;
    sector[0x15] = MEDIA_FIXED_DISK;
    set_u32_at(&mut sector, 0x20, total_sectors as u32);
    set_u16_at(&mut sector, 0x24, geometry.fat_sz());
    set_u32_at(&mut sector, 0x2C, 2);
    sector[0x42] = 0x29;
    sector[0x47..0x52].copy_from_slice(b"NO NAME    ");
    sector[0x52..0x5A].copy_from_slice(b"FAT32   ");
    sector[510] = 0x55;
    sector[511] = 0xAA;
    write_at(store, 0, &sector)?;

    let mut reserved = [0u8; 12];
    set_u32_at(&mut reserved, 0, ENTRY_MASK & (0x0FFF_FF00 | MEDIA_FIXED_DISK as u32));
    set_u32_at(&mut reserved, 4, EOC);
    // Root directory
    set_u32_at(&mut reserved, 8, EOC);
    for copy in 0..options.num_fat {
        write_at(store, geometry.fat_copy_offset(copy), &reserved)?;
    }

    store.flush()?;
    Ok(geometry)
}
