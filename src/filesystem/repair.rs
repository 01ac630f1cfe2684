//! In-place repair of a volume.
//!
//! The repair walks the tree like the checker does and fixes each inconsistency as soon as
//! it is found, then gathers the clusters nothing reaches into files of a recovery
//! directory at the root.

use getset::Getters;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::io::{Read, Seek, Write};

use super::check::{child_path, has_dot_entries, size_fits};
use super::dir_entry::{self, DirEntry, RECORD_LEN};
use super::directory::DirCursor;
use super::fat::FATVol;
use super::fat_entry::FatEntry;
use super::fat_error::FATError;
use super::timestamp::FatDateTime;

/// A fix applied by the repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fix {
    /// A looping chain was terminated.
    SelfCrossedFile { path: String },
    /// The shared part of a chain was duplicated.
    CrossedFile { path: String },
    /// A size field was rewritten.
    IllegalSize { path: String, size: u32 },
    /// "." and ".." were rebuilt at the head of a directory.
    DirectoryStructure { path: String },
    /// Orphan clusters were gathered into `files` recovery files.
    LostClusters { clusters: usize, files: usize },
    /// A directory record pointing at an ancestor was deleted.
    DirectoryLoop { path: String },
    /// A directory record pointing nowhere was deleted.
    DanglingEntry { path: String },
}

impl Fix {
    pub fn category(&self) -> &'static str {
        match self {
            Fix::SelfCrossedFile { .. } => "Self-crossed file",
            Fix::CrossedFile { .. } => "Crossed file",
            Fix::IllegalSize { .. } => "Illegal size",
            Fix::DirectoryStructure { .. } => "Wrong directory structure",
            Fix::LostClusters { .. } => "Found lost clusters",
            Fix::DirectoryLoop { .. } => "Directory loop",
            Fix::DanglingEntry { .. } => "Dangling directory entry",
        }
    }
}

impl fmt::Display for Fix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fix::SelfCrossedFile { path }
            | Fix::CrossedFile { path }
            | Fix::DirectoryStructure { path }
            | Fix::DirectoryLoop { path }
            | Fix::DanglingEntry { path } => write!(f, "{}: {path}", self.category()),
            Fix::IllegalSize { path, size } => {
                write!(f, "{}: {path} set to {size} bytes", self.category())
            }
            Fix::LostClusters { clusters, files } => {
                write!(f, "{}: {clusters} clusters in {files} files", self.category())
            }
        }
    }
}

/// Outcome of a repair.
#[derive(Debug, Clone, Default, Getters)]
pub struct RepairReport {
    /// Every fix, in the order it was applied.
    #[getset(get = "pub")]
    fixes: Vec<Fix>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.fixes.is_empty()
    }

    /// Distinct fix categories, in order of first occurrence.
    pub fn categories(&self) -> Vec<&'static str> {
        let mut categories = vec![];
        for fix in self.fixes.iter() {
            if !categories.contains(&fix.category()) {
                categories.push(fix.category());
            }
        }
        categories
    }
}

impl fmt::Display for RepairReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "No errors found");
        }
        write!(f, "Fixed errors:")?;
        for category in self.categories() {
            write!(f, "\n{category}")?;
        }
        Ok(())
    }
}

/// Splits orphan clusters into chains.
///
/// Chains are followed from their heads first, the clusters no other orphan links to. The
/// remaining orphans belong to loops and are cut at an arbitrary point. A chain stops at
/// the first cluster that isn't an orphan or already belongs to another chain.
pub(crate) fn group_chains(entries: &[FatEntry], lost: &BTreeSet<u32>) -> Vec<Vec<u32>> {
    let next = |cluster: u32| match entries[cluster as usize] {
        FatEntry::Next(next) if lost.contains(&next) => Some(next),
        _ => None,
    };
    let pointed: HashSet<u32> = lost.iter().filter_map(|cluster| next(*cluster)).collect();

    let heads = lost.iter().filter(|cluster| !pointed.contains(cluster));
    let mut taken = HashSet::new();
    let mut groups = vec![];

    for &head in heads.chain(lost.iter()) {
        if taken.contains(&head) {
            continue;
        }
        let mut group = vec![];
        let mut cluster = Some(head);
        while let Some(current) = cluster {
            if !taken.insert(current) {
                break;
            }
            group.push(current);
            cluster = next(current);
        }
        groups.push(group);
    }

    groups
}

impl<T: Read + Write + Seek> FATVol<T> {
    /// Fixes every inconsistency the checker would report.
    ///
    /// # Errors
    /// - `FATError::PermissionDenied` on a read-only volume
    /// - `FATError::VolumeFull` if a duplicated chain doesn't fit
    pub fn repair(&mut self) -> Result<RepairReport, FATError> {
        self.ensure_writable("repair")?;

        let root = self.root().clone();
        let mut fixes = vec![];
        let trace = self.trace(root.start())?;
        if trace.loop_at.is_some() {
            self.terminate(&trace.clusters)?;
            fixes.push(Fix::SelfCrossedFile {
                path: String::from("/"),
            });
        }

        let mut visited: HashSet<u32> = [0, 1].into_iter().collect();
        visited.extend(trace.clusters);

        let cursor = self.root_cursor()?;
        fixes.extend(self.repair_dir(cursor, "/", &[root.start()], &mut visited)?);
        fixes.extend(self.recover_lost(&visited)?);

        for fix in fixes.iter() {
            info!("{fix}");
        }
        Ok(RepairReport { fixes })
    }

    /// Ends a chain at its last cluster.
    fn terminate(&mut self, clusters: &[u32]) -> Result<(), FATError> {
        if let Some(last) = clusters.last() {
            self.set_fat_entry(*last, FatEntry::EndOfChain)?;
        }
        Ok(())
    }

    /// Value stored in ".." for a directory whose parent starts at `parent`.
    fn parent_ref(&self, parent: u32) -> u32 {
        if self.is_root_start(parent) { 0 } else { parent }
    }

    fn repair_dir(
        &mut self,
        mut cursor: DirCursor,
        path: &str,
        ancestors: &[u32],
        visited: &mut HashSet<u32>,
    ) -> Result<Vec<Fix>, FATError> {
        let mut fixes = vec![];
        let dir_start = cursor.dir().start();

        if !cursor.dir().is_root() && !has_dot_entries(&cursor) {
            let parent = ancestors.iter().rev().nth(1).copied().unwrap_or(0);
            if let Some(grown) = self.rebuild_dots(dir_start, self.parent_ref(parent))? {
                visited.insert(grown);
            }
            self.refresh(&mut cursor)?;
            fixes.push(Fix::DirectoryStructure {
                path: path.to_string(),
            });
        }

        let children: Vec<DirEntry> = cursor.children().cloned().collect();
        for entry in children.iter() {
            let entry_path = child_path(path, entry.name());
            fixes.extend(self.repair_entry(dir_start, entry, &entry_path, ancestors, visited)?);
        }

        Ok(fixes)
    }

    fn repair_entry(
        &mut self,
        dir_start: u32,
        entry: &DirEntry,
        path: &str,
        ancestors: &[u32],
        visited: &mut HashSet<u32>,
    ) -> Result<Vec<Fix>, FATError> {
        let Some(location) = entry.location() else {
            return Ok(vec![]);
        };
        let path = path.to_string();

        if entry.is_dir() && !self.is_data_cluster(entry.start()) {
            self.delete_records(dir_start, location)?;
            return Ok(vec![Fix::DanglingEntry { path }]);
        }
        if entry.is_dir() && ancestors.contains(&entry.start()) {
            self.delete_records(dir_start, location)?;
            return Ok(vec![Fix::DirectoryLoop { path }]);
        }

        let mut fixes = vec![];
        let trace = self.trace(entry.start())?;
        let mut clusters = trace.clusters;
        if trace.loop_at.is_some() {
            self.terminate(&clusters)?;
            fixes.push(Fix::SelfCrossedFile { path: path.clone() });
        }

        if let Some(shared) = clusters.iter().position(|cluster| visited.contains(cluster)) {
            clusters = self.duplicate_tail(&clusters, shared)?;
            if shared == 0 {
                self.rewrite_start(dir_start, location, clusters[0])?;
            }
            if entry.is_dir() {
                self.retarget_dots(clusters[0], self.parent_ref(dir_start))?;
            }
            fixes.push(Fix::CrossedFile { path: path.clone() });
        }
        visited.extend(clusters.iter().copied());

        let chain_bytes = clusters.len() as u64 * self.cluster_size() as u64;
        if entry.is_dir() {
            if entry.size() != 0 {
                self.rewrite_size(dir_start, location, 0)?;
                fixes.push(Fix::IllegalSize {
                    path: path.clone(),
                    size: 0,
                });
            }

            let start = clusters.first().copied().unwrap_or(entry.start());
            let cursor = self.change_dir(&entry.with_start(start))?;
            let mut inner = ancestors.to_vec();
            inner.push(start);
            fixes.extend(self.repair_dir(cursor, &path, &inner, visited)?);
        } else if !size_fits(entry.size(), chain_bytes, self.cluster_size()) {
            let size = chain_bytes.min(u32::MAX as u64) as u32;
            self.rewrite_size(dir_start, location, size)?;
            fixes.push(Fix::IllegalSize { path, size });
        }

        Ok(fixes)
    }

    /// Copies the clusters from index `shared` on onto fresh clusters.
    ///
    /// The copy is linked after the unshared prefix. Returns the resulting chain.
    fn duplicate_tail(&mut self, clusters: &[u32], shared: usize) -> Result<Vec<u32>, FATError> {
        let mut chain = clusters[..shared].to_vec();
        let mut last = chain.last().copied();

        for cluster in &clusters[shared..] {
            let data = self.read_cluster(*cluster)?;
            let copy = self.allocate(last)?;
            self.write_cluster(copy, &data)?;
            debug!("Cluster {cluster} duplicated onto {copy}");

            chain.push(copy);
            last = Some(copy);
        }

        Ok(chain)
    }

    /// Points "." and ".." of a directory at itself and its parent, when present.
    fn retarget_dots(&mut self, start: u32, parent: u32) -> Result<(), FATError> {
        let node = self.root().with_start(start);
        let entries = self.list_dir(&node)?;

        for (entry, target) in entries.iter().take(2).zip([(".", start), ("..", parent)]) {
            if entry.name() == target.0 {
                if let Some(location) = entry.location() {
                    self.rewrite_start(start, location, target.1)?;
                }
            }
        }
        Ok(())
    }

    /// Rewrites a directory table with fresh "." and ".." records first.
    ///
    /// Zeroed records and records whose name starts with a dot are dropped. The table keeps
    /// its length unless the new records don't fit, in which case the chain grows by one
    /// cluster, returned.
    fn rebuild_dots(&mut self, start: u32, parent: u32) -> Result<Option<u32>, FATError> {
        let data = self.read_chain(start)?;
        let stamp = FatDateTime::now();

        let mut table = dir_entry::encode_dot(".", start, stamp).to_vec();
        table.extend_from_slice(&dir_entry::encode_dot("..", parent, stamp));
        for record in data.chunks_exact(RECORD_LEN) {
            if record[0] == b'.' || record.iter().all(|b| *b == 0) {
                continue;
            }
            table.extend_from_slice(record);
        }

        let mut grown = None;
        let mut len = data.len();
        if table.len() > len {
            let last = self.trace(start)?.clusters.last().copied().unwrap_or(start);
            grown = Some(self.allocate(Some(last))?);
            len += self.cluster_size() as usize;
        }
        table.resize(len, 0);

        self.write_chain(start, &table)?;
        Ok(grown)
    }

    /// Opens the recovery directory at the root, creating it when missing.
    ///
    /// When a file holds the configured name, the first free `<name>.<n>` is used instead.
    fn recovery_cursor(&mut self) -> Result<DirCursor, FATError> {
        let base = self.config().recovery_dir().clone();
        let mut root = self.root_cursor()?;

        let mut name = base.clone();
        let mut n = 0;
        let dir = loop {
            match root.find(&name).ok().cloned() {
                Some(entry) if entry.is_dir() => break entry,
                Some(_) => {
                    name = format!("{base}.{n}");
                    n += 1;
                }
                None => break self.create_dir(&mut root, &name)?,
            }
        };
        if name != base {
            warn!("{base:?} is a file, recovering lost clusters into {name:?}");
        }
        self.change_dir(&dir)
    }

    /// Registers every allocated but unreached cluster under the recovery directory.
    fn recover_lost(&mut self, visited: &HashSet<u32>) -> Result<Vec<Fix>, FATError> {
        let entries = self.fat_entries()?;
        let lost: BTreeSet<u32> = entries
            .iter()
            .enumerate()
            .skip(2)
            .filter(|(idx, entry)| entry.is_allocated() && !visited.contains(&(*idx as u32)))
            .map(|(idx, _)| idx as u32)
            .collect();
        if lost.is_empty() {
            return Ok(vec![]);
        }

        let groups = group_chains(&entries, &lost);
        for group in groups.iter() {
            let last = group[group.len() - 1];
            if entries[last as usize] != FatEntry::EndOfChain {
                self.set_fat_entry(last, FatEntry::EndOfChain)?;
            }
        }

        let mut dir = self.recovery_cursor()?;
        let mut n = 0;
        for group in groups.iter() {
            while dir.find(&format!("FILE.{n}")).is_ok() {
                n += 1;
            }
            let size = group.len() as u64 * self.cluster_size() as u64;
            self.create_file(
                &mut dir,
                &format!("FILE.{n}"),
                group[0],
                size.min(u32::MAX as u64) as u32,
            )?;
        }

        Ok(vec![Fix::LostClusters {
            clusters: lost.len(),
            files: groups.len(),
        }])
    }
}
