//! FAT volume structure and cluster chain operations.
//!
//! This module implements the core functions to interact with a FAT volume, including:
//! - Reading the boot sector and deriving the geometry
//! - Reading and writing clusters and FAT entries (mirrored on every FAT copy)
//! - Walking, allocating, reading, writing and freeing cluster chains
//! - Displaying the volume layout

use log::{debug, info, warn};
use std::collections::HashSet;
use std::fmt::Write as FmtWrite;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::bpb::{Bpb, Geometry};
use super::config::{RootCluster, VolumeConfig};
use super::dir_entry::DirEntry;
use super::fat_entry::FatEntry;
use super::fat_error::FATError;
use crate::traits::LayoutDisplay;
use crate::utils::{read_at, u32_at, write_at};

/// Clusters of a chain, in chain order, and where it loops back if it does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChainTrace {
    pub clusters: Vec<u32>,
    pub loop_at: Option<u32>,
}

/// Structure for a FAT volume.
///
/// It owns the backing image, the geometry read from its boot sector and the settings it
/// was opened with.
pub struct FATVol<T> {
    store: T,
    bpb: Bpb,
    geometry: Geometry,
    config: VolumeConfig,
    writable: bool,
    /// One past the last cluster index present both in the FAT and in the image.
    cluster_limit: u32,
    root: DirEntry,
}

impl FATVol<File> {
    /// Opens a disk image, read-write when possible and read-only otherwise.
    ///
    /// # Errors
    /// - `FATError::IOError` if the image can't be opened at all
    /// - `FATError::BrokenLayout` if the boot sector is unusable
    pub fn open(path: &Path, config: VolumeConfig) -> Result<Self, FATError> {
        let (file, writable) = if *config.read_only() {
            (File::open(path)?, false)
        } else {
            match File::options().read(true).write(true).open(path) {
                Ok(file) => (file, true),
                Err(err) => {
                    info!("{} opened read-only: {err}", path.display());
                    (File::open(path)?, false)
                }
            }
        };

        Self::from_store(file, writable, config)
    }
}

impl<T: Read + Write + Seek> FATVol<T> {
    /// Reads the boot sector of `store` and derives the geometry of the volume.
    ///
    /// # Parameters
    /// - `store`: The image holding the volume, starting with the boot sector
    /// - `writable`: Whether mutations are allowed
    /// - `config`: Interpretation settings
    ///
    /// # Errors
    /// - `FATError::BrokenLayout` if the boot sector can't be parsed, a layout field is zero,
    ///   or the image holds no data cluster for the root directory
    pub fn from_store(
        mut store: T,
        writable: bool,
        config: VolumeConfig,
    ) -> Result<Self, FATError> {
        let bpb = Bpb::from(&mut store)?;
        let geometry = Geometry::from_bpb(&bpb)?;

        let image_len = store.seek(SeekFrom::End(0))?;
        let data_clusters = image_len.saturating_sub(geometry.data_offset())
            / geometry.cluster_size() as u64;
        let cluster_limit = (geometry.fat_entry_count() as u64).min(2 + data_clusters) as u32;

        let root_clus = match config.root_cluster() {
            RootCluster::Fixed => {
                if bpb.root_clus() != 2 {
                    warn!(
                        "Boot sector places the root directory at cluster {}, using cluster 2",
                        bpb.root_clus()
                    );
                }
                2
            }
            RootCluster::BootSector => bpb.root_clus(),
        };
        if root_clus < 2 || root_clus >= cluster_limit {
            return Err(FATError::BrokenLayout(format!(
                "root cluster {root_clus} is outside of the {cluster_limit} addressable clusters"
            )));
        }

        debug!(
            "Opened volume: {geometry:?}, {cluster_limit} clusters, writable: {writable}"
        );

        Ok(Self {
            store,
            bpb,
            geometry,
            writable: writable && !*config.read_only(),
            config,
            cluster_limit,
            root: DirEntry::root(root_clus),
        })
    }

    /// Releases the backing image.
    pub fn into_inner(self) -> T {
        self.store
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn bpb(&self) -> &Bpb {
        &self.bpb
    }

    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// The synthesized root directory node.
    pub fn root(&self) -> &DirEntry {
        &self.root
    }

    /// One past the highest usable cluster index.
    pub fn cluster_limit(&self) -> u32 {
        self.cluster_limit
    }

    pub fn cluster_size(&self) -> u32 {
        self.geometry.cluster_size()
    }

    /// Fails with `PermissionDenied` naming `target` unless the volume is writable.
    pub(crate) fn ensure_writable(&self, target: &str) -> Result<(), FATError> {
        if self.writable {
            Ok(())
        } else {
            Err(FATError::PermissionDenied(target.to_string()))
        }
    }

    /// Whether `cluster` addresses the data region.
    pub(crate) fn is_data_cluster(&self, cluster: u32) -> bool {
        cluster >= 2 && cluster < self.cluster_limit
    }

    /// Reads the whole data of a cluster.
    pub fn read_cluster(&mut self, cluster: u32) -> Result<Vec<u8>, FATError> {
        let len = self.cluster_size() as usize;
        let offset = self.geometry.cluster_offset(cluster);
        Ok(read_at(&mut self.store, offset, len)?)
    }

    /// Writes `data` at the start of a cluster. Longer data is cut at the cluster size.
    pub fn write_cluster(&mut self, cluster: u32, data: &[u8]) -> Result<(), FATError> {
        let len = data.len().min(self.cluster_size() as usize);
        let offset = self.geometry.cluster_offset(cluster);
        Ok(write_at(&mut self.store, offset, &data[..len])?)
    }

    /// Reads the entry of `cluster` from the first FAT.
    pub fn fat_entry(&mut self, cluster: u32) -> Result<FatEntry, FATError> {
        let buf = read_at(&mut self.store, self.geometry.fat_entry_offset(cluster), 4)?;
        Ok(FatEntry::from(u32_at(&buf, 0)))
    }

    /// Reads the entries of every addressable cluster from the first FAT.
    pub fn fat_entries(&mut self) -> Result<Vec<FatEntry>, FATError> {
        let buf = read_at(
            &mut self.store,
            self.geometry.fat_offset(),
            self.cluster_limit as usize * 4,
        )?;

        Ok(buf
            .chunks_exact(4)
            .map(|raw| FatEntry::from(u32_at(raw, 0)))
            .collect())
    }

    /// Updates the entry of `cluster` in every FAT copy.
    pub fn set_fat_entry(&mut self, cluster: u32, entry: FatEntry) -> Result<(), FATError> {
        self.ensure_writable(&format!("FAT entry {cluster}"))?;

        let data = entry.raw().to_le_bytes();
        for copy in 0..self.geometry.num_fat() {
            let off = self.geometry.fat_copy_offset(copy) + cluster as u64 * 4;
            write_at(&mut self.store, off, &data)?;
        }

        Ok(())
    }

    /// Follows the chain starting at `start`, stopping where it loops back.
    pub(crate) fn trace(&mut self, start: u32) -> Result<ChainTrace, FATError> {
        let mut clusters = vec![];
        let mut seen = HashSet::new();
        let mut cluster = start;

        while self.is_data_cluster(cluster) {
            if !seen.insert(cluster) {
                return Ok(ChainTrace {
                    clusters,
                    loop_at: Some(cluster),
                });
            }
            clusters.push(cluster);

            match self.fat_entry(cluster)? {
                FatEntry::Next(next) => cluster = next,
                _ => break,
            }
        }

        Ok(ChainTrace {
            clusters,
            loop_at: None,
        })
    }

    /// Lists the clusters of the chain starting at `start`.
    ///
    /// # Errors
    /// - `FATError::CrossedChain` with the repeated cluster if the chain loops back
    pub fn walk(&mut self, start: u32) -> Result<Vec<u32>, FATError> {
        let trace = self.trace(start)?;
        match trace.loop_at {
            Some(cluster) => Err(FATError::CrossedChain(cluster)),
            None => Ok(trace.clusters),
        }
    }

    /// Allocates the first free cluster, terminates it and zero-fills its data.
    ///
    /// # Parameters
    /// - `link_from`: Last cluster of a chain to extend with the new cluster
    ///
    /// # Errors
    /// - `FATError::VolumeFull` if no cluster is free
    /// - `FATError::PermissionDenied` on a read-only volume
    pub fn allocate(&mut self, link_from: Option<u32>) -> Result<u32, FATError> {
        self.ensure_writable("cluster allocation")?;

        let cluster = self
            .fat_entries()?
            .iter()
            .enumerate()
            .skip(2)
            .find(|(_, entry)| **entry == FatEntry::Free)
            .map(|(idx, _)| idx as u32)
            .ok_or(FATError::VolumeFull)?;

        self.set_fat_entry(cluster, FatEntry::EndOfChain)?;
        self.write_cluster(cluster, &vec![0; self.cluster_size() as usize])?;
        if let Some(prev) = link_from {
            self.set_fat_entry(prev, FatEntry::Next(cluster))?;
        }

        debug!("Allocated cluster {cluster} (linked from {link_from:?})");
        Ok(cluster)
    }

    /// Counts the clusters still free.
    pub fn free_cluster_count(&mut self) -> Result<usize, FATError> {
        Ok(self
            .fat_entries()?
            .iter()
            .skip(2)
            .filter(|entry| **entry == FatEntry::Free)
            .count())
    }

    /// Concatenates the data of every cluster of the chain.
    pub fn read_chain(&mut self, start: u32) -> Result<Vec<u8>, FATError> {
        let clusters = self.trace(start)?.clusters;
        let mut data = Vec::with_capacity(clusters.len() * self.cluster_size() as usize);

        for cluster in clusters {
            data.extend(self.read_cluster(cluster)?);
        }

        Ok(data)
    }

    /// Spreads `data` over the clusters of the chain, in chain order.
    ///
    /// The chain is never extended: data past its last cluster is dropped.
    pub fn write_chain(&mut self, start: u32, data: &[u8]) -> Result<(), FATError> {
        self.ensure_writable(&format!("chain {start}"))?;

        let clusters = self.trace(start)?.clusters;
        let pieces = data.chunks(self.cluster_size() as usize);
        for (cluster, piece) in clusters.into_iter().zip(pieces) {
            self.write_cluster(cluster, piece)?;
        }

        Ok(())
    }

    /// Overwrites bytes at `offset` within the data of the chain starting at `start`.
    pub(crate) fn patch_chain(
        &mut self,
        start: u32,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), FATError> {
        self.ensure_writable(&format!("chain {start}"))?;

        let cluster_size = self.cluster_size() as usize;
        let clusters = self.trace(start)?.clusters;
        let mut pos = offset;
        let mut remaining = bytes;

        while !remaining.is_empty() {
            let Some(cluster) = clusters.get(pos / cluster_size) else {
                break;
            };
            let in_cluster = pos % cluster_size;
            let len = remaining.len().min(cluster_size - in_cluster);
            let off = self.geometry.cluster_offset(*cluster) + in_cluster as u64;
            write_at(&mut self.store, off, &remaining[..len])?;

            pos += len;
            remaining = &remaining[len..];
        }

        Ok(())
    }

    /// Releases every cluster of the chain.
    pub fn free_chain(&mut self, start: u32) -> Result<(), FATError> {
        self.ensure_writable(&format!("chain {start}"))?;

        let clusters = self.trace(start)?.clusters;
        for cluster in clusters.iter() {
            self.set_fat_entry(*cluster, FatEntry::Free)?;
        }

        debug!("Freed chain {start}: {} clusters", clusters.len());
        Ok(())
    }
}

/// Implements the LayoutDisplay trait for FATVol
impl<T> LayoutDisplay for FATVol<T> {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error> {
        let mut out = String::from("");
        let indent = " ".repeat(indent.into());
        let geometry = &self.geometry;

        writeln!(out, "{}┌{:─^55}┐", indent, " FAT32 Volume Layout ")?;
        writeln!(
            out,
            "{}├{:^12}┬{:^12}┬{:^12}┬{:^16}┤",
            indent, "Region", "Start", "End", "Description"
        )?;
        writeln!(
            out,
            "{}├{:─<12}┼{:─<12}┼{:─<12}┼{:─<16}┤",
            indent, "", "", "", ""
        )?;

        writeln!(
            out,
            "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
            indent,
            "Reserved",
            0,
            geometry.fat_offset(),
            "Boot + Reserved"
        )?;
        for i in 0..geometry.num_fat() {
            let fat_i_start = geometry.fat_copy_offset(i);
            writeln!(
                out,
                "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
                indent,
                format!("FAT #{}", i),
                fat_i_start,
                fat_i_start + geometry.fat_len(),
                "FAT Tables"
            )?;
        }
        let data_end = geometry.data_offset()
            + (self.cluster_limit as u64 - 2) * geometry.cluster_size() as u64;
        writeln!(
            out,
            "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
            indent,
            "Data",
            geometry.data_offset(),
            data_end,
            "Cluster Data"
        )?;
        writeln!(
            out,
            "{}└{:─<12}┴{:─<12}┴{:─<12}┴{:─<16}┘",
            indent, "", "", "", ""
        )?;
        writeln!(
            out,
            "{}  {} clusters of {} bytes, root directory at cluster {}",
            indent,
            self.cluster_limit - 2,
            geometry.cluster_size(),
            self.root.start()
        )?;

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::format::{FormatOptions, format_volume};
    use std::io::Cursor;

    fn volume(clusters: u32) -> FATVol<Cursor<Vec<u8>>> {
        let mut store = Cursor::new(vec![]);
        format_volume(&mut store, &FormatOptions::default().with_clusters(clusters)).unwrap();
        FATVol::from_store(store, true, VolumeConfig::default()).unwrap()
    }

    #[test]
    fn zero_sectors_per_fat_is_refused() {
        let mut store = Cursor::new(vec![]);
        format_volume(&mut store, &FormatOptions::default()).unwrap();
        store.get_mut()[0x24..0x26].copy_from_slice(&[0, 0]);

        let result = FATVol::from_store(store, true, VolumeConfig::default());
        assert!(matches!(result, Err(FATError::BrokenLayout(_))));
    }

    #[test]
    fn zero_sectors_per_cluster_is_refused() {
        let mut store = Cursor::new(vec![]);
        format_volume(&mut store, &FormatOptions::default()).unwrap();
        store.get_mut()[0x0D] = 0;

        let result = FATVol::from_store(store, false, VolumeConfig::default());
        assert!(matches!(result, Err(FATError::BrokenLayout(_))));
    }

    #[test]
    fn allocation_consumes_free_entries_in_order() {
        let mut vol = volume(16);
        let free_before = vol.free_cluster_count().unwrap();

        let first = vol.allocate(None).unwrap();
        let second = vol.allocate(Some(first)).unwrap();
        let third = vol.allocate(Some(second)).unwrap();

        assert_eq!((first, second, third), (3, 4, 5));
        assert_eq!(vol.free_cluster_count().unwrap(), free_before - 3);
        assert_eq!(vol.walk(first).unwrap(), vec![3, 4, 5]);
        assert_eq!(vol.fat_entry(5).unwrap(), FatEntry::EndOfChain);
    }

    #[test]
    fn freed_clusters_are_reused() {
        let mut vol = volume(16);
        let first = vol.allocate(None).unwrap();
        let second = vol.allocate(Some(first)).unwrap();
        let kept = vol.allocate(None).unwrap();

        vol.free_chain(first).unwrap();
        assert_eq!(vol.fat_entry(first).unwrap(), FatEntry::Free);
        assert_eq!(vol.fat_entry(second).unwrap(), FatEntry::Free);

        let again = vol.allocate(None).unwrap();
        assert_eq!(again, first);
        assert_ne!(again, kept);
        assert_eq!(vol.walk(kept).unwrap(), vec![kept]);
    }

    #[test]
    fn allocation_fails_when_full() {
        let mut vol = volume(4);
        // Root holds cluster 2, clusters 3 to 5 remain
        for _ in 0..3 {
            vol.allocate(None).unwrap();
        }
        assert!(matches!(vol.allocate(None), Err(FATError::VolumeFull)));
    }

    #[test]
    fn cluster_reads_are_one_cluster_long() {
        let mut vol = volume(8);
        vol.write_cluster(4, &[0x5A; 16]).unwrap();

        let data = vol.read_cluster(4).unwrap();
        assert_eq!(data.len(), vol.cluster_size() as usize);
        assert_eq!(data[..16], [0x5A; 16]);
        assert!(data[16..].iter().all(|b| *b == 0));
        assert!(vol.read_cluster(3).unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    fn allocation_zero_fills() {
        let mut vol = volume(8);
        vol.write_cluster(3, &[0xAA; 64]).unwrap();

        let cluster = vol.allocate(None).unwrap();
        assert_eq!(cluster, 3);
        assert!(vol.read_cluster(3).unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    fn walk_reports_loops() {
        let mut vol = volume(8);
        let a = vol.allocate(None).unwrap();
        let b = vol.allocate(Some(a)).unwrap();
        vol.set_fat_entry(b, FatEntry::Next(a)).unwrap();

        assert!(matches!(vol.walk(a), Err(FATError::CrossedChain(c)) if c == a));
        let trace = vol.trace(a).unwrap();
        assert_eq!(trace.clusters, vec![a, b]);
        assert_eq!(trace.loop_at, Some(a));
    }

    #[test]
    fn chain_write_truncates_to_chain_length() {
        let mut vol = volume(8);
        let size = vol.cluster_size() as usize;
        let a = vol.allocate(None).unwrap();
        vol.allocate(Some(a)).unwrap();

        let data: Vec<u8> = (0..3 * size).map(|i| (i % 251) as u8).collect();
        vol.write_chain(a, &data).unwrap();

        assert_eq!(vol.read_chain(a).unwrap(), data[..2 * size]);
    }

    #[test]
    fn patch_spans_clusters() {
        let mut vol = volume(8);
        let size = vol.cluster_size() as usize;
        let a = vol.allocate(None).unwrap();
        vol.allocate(Some(a)).unwrap();

        vol.patch_chain(a, size - 2, &[1, 2, 3, 4]).unwrap();
        let data = vol.read_chain(a).unwrap();
        assert_eq!(data[size - 2..size + 2], [1, 2, 3, 4]);
    }

    #[test]
    fn fat_writes_are_mirrored() {
        let mut vol = volume(8);
        let cluster = vol.allocate(None).unwrap();
        let geometry = *vol.geometry();

        let mut store = vol.into_inner();
        for copy in 0..geometry.num_fat() {
            let off = geometry.fat_copy_offset(copy) + cluster as u64 * 4;
            let raw = read_at(&mut store, off, 4).unwrap();
            assert_eq!(FatEntry::from(u32_at(&raw, 0)), FatEntry::EndOfChain);
        }
    }

    #[test]
    fn read_only_volume_refuses_writes() {
        let mut store = Cursor::new(vec![]);
        format_volume(&mut store, &FormatOptions::default()).unwrap();
        let mut vol = FATVol::from_store(store, false, VolumeConfig::default()).unwrap();

        assert!(matches!(vol.allocate(None), Err(FATError::PermissionDenied(_))));
    }
}
