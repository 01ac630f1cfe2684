//! Read-only consistency check of a volume.
//!
//! The whole tree is traversed from the root while every cluster reached is recorded. A
//! cluster reached twice is crossed; an allocated cluster never reached is lost.

use log::debug;
use std::collections::HashSet;
use std::fmt;
use std::io::{Read, Seek, Write};

use super::dir_entry::DirEntry;
use super::directory::DirCursor;
use super::fat::FATVol;
use super::fat_error::FATError;

/// An inconsistency found by the checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// A cluster claimed by more than one chain.
    CrossedCluster(u32),
    /// A chain looping back on itself.
    SelfCrossedFile { path: String, cluster: u32 },
    /// An allocated cluster no entry reaches.
    LostCluster(u32),
    /// A directory not starting with "." and "..", or pointing nowhere.
    MalformedDirectory { path: String },
    NonZeroDirectorySize { path: String },
    /// A file size that doesn't fit the length of its chain.
    InconsistentFileSize {
        path: String,
        size: u32,
        chain_bytes: u64,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::CrossedCluster(cluster) => write!(f, "Crossed cluster {cluster}"),
            Anomaly::SelfCrossedFile { path, cluster } => {
                write!(f, "{path}: chain loops back at cluster {cluster}")
            }
            Anomaly::LostCluster(cluster) => write!(f, "Lost cluster {cluster}"),
            Anomaly::MalformedDirectory { path } => write!(f, "{path}: wrong directory structure"),
            Anomaly::NonZeroDirectorySize { path } => write!(f, "{path}: directory has a size"),
            Anomaly::InconsistentFileSize {
                path,
                size,
                chain_bytes,
            } => write!(f, "{path}: size {size} doesn't match its {chain_bytes} bytes chain"),
        }
    }
}

/// Joins a directory path and an entry name.
pub(crate) fn child_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Checks whether a non-root directory listing starts with "." then "..".
pub(crate) fn has_dot_entries(cursor: &DirCursor) -> bool {
    let names: Vec<&str> = cursor
        .entries()
        .iter()
        .take(2)
        .map(|entry| entry.name().as_str())
        .collect();
    names == [".", ".."]
}

/// Checks whether `size` fits a chain of `chain_bytes` bytes.
///
/// The last cluster of a file holds between 1 and `cluster_size` bytes of it; an empty
/// file has no chain.
pub(crate) fn size_fits(size: u32, chain_bytes: u64, cluster_size: u32) -> bool {
    let size = size as u64;
    if chain_bytes == 0 {
        return size == 0;
    }
    size > chain_bytes.saturating_sub(cluster_size as u64) && size <= chain_bytes
}

impl<T: Read + Write + Seek> FATVol<T> {
    /// Traverses the whole tree and reports every inconsistency, in traversal order.
    ///
    /// The volume is never modified. An empty list means the volume is consistent.
    pub fn check(&mut self) -> Result<Vec<Anomaly>, FATError> {
        let root = self.root().clone();
        let trace = self.trace(root.start())?;

        let mut anomalies = vec![];
        if let Some(cluster) = trace.loop_at {
            anomalies.push(Anomaly::SelfCrossedFile {
                path: String::from("/"),
                cluster,
            });
        }

        let mut visited: HashSet<u32> = [0, 1].into_iter().collect();
        visited.extend(trace.clusters);

        let cursor = self.root_cursor()?;
        anomalies.extend(self.check_dir(&cursor, "/", &[root.start()], &mut visited)?);

        for (idx, entry) in self.fat_entries()?.iter().enumerate().skip(2) {
            if entry.is_allocated() && !visited.contains(&(idx as u32)) {
                anomalies.push(Anomaly::LostCluster(idx as u32));
            }
        }

        debug!("Check found {} anomalies", anomalies.len());
        Ok(anomalies)
    }

    fn check_dir(
        &mut self,
        cursor: &DirCursor,
        path: &str,
        ancestors: &[u32],
        visited: &mut HashSet<u32>,
    ) -> Result<Vec<Anomaly>, FATError> {
        let mut anomalies = vec![];
        if !cursor.dir().is_root() && !has_dot_entries(cursor) {
            anomalies.push(Anomaly::MalformedDirectory {
                path: path.to_string(),
            });
        }

        for entry in cursor.children() {
            let entry_path = child_path(path, entry.name());
            anomalies.extend(self.check_entry(entry, &entry_path, ancestors, visited)?);
        }

        Ok(anomalies)
    }

    fn check_entry(
        &mut self,
        entry: &DirEntry,
        path: &str,
        ancestors: &[u32],
        visited: &mut HashSet<u32>,
    ) -> Result<Vec<Anomaly>, FATError> {
        let mut anomalies = vec![];

        if entry.is_dir() && !self.is_data_cluster(entry.start()) {
            anomalies.push(Anomaly::MalformedDirectory {
                path: path.to_string(),
            });
            return Ok(anomalies);
        }
        if entry.is_dir() && ancestors.contains(&entry.start()) {
            anomalies.push(Anomaly::CrossedCluster(entry.start()));
            return Ok(anomalies);
        }

        let trace = self.trace(entry.start())?;
        if let Some(cluster) = trace.loop_at {
            anomalies.push(Anomaly::SelfCrossedFile {
                path: path.to_string(),
                cluster,
            });
        }

        for cluster in trace.clusters.iter() {
            if !visited.insert(*cluster) {
                anomalies.push(Anomaly::CrossedCluster(*cluster));
            }
        }

        let chain_bytes = trace.clusters.len() as u64 * self.cluster_size() as u64;
        if entry.is_dir() {
            if entry.size() != 0 {
                anomalies.push(Anomaly::NonZeroDirectorySize {
                    path: path.to_string(),
                });
            }
            // Crossed directories are still descended, entries of their own clusters
            // would be reported lost otherwise
            let cursor = self.change_dir(entry)?;
            let mut inner = ancestors.to_vec();
            inner.push(entry.start());
            anomalies.extend(self.check_dir(&cursor, path, &inner, visited)?);
        } else if !size_fits(entry.size(), chain_bytes, self.cluster_size()) {
            anomalies.push(Anomaly::InconsistentFileSize {
                path: path.to_string(),
                size: entry.size(),
                chain_bytes,
            });
        }

        Ok(anomalies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::config::VolumeConfig;
    use crate::filesystem::fat_entry::FatEntry;
    use crate::filesystem::format::{FormatOptions, format_volume};
    use std::io::Cursor;

    fn volume() -> FATVol<Cursor<Vec<u8>>> {
        let mut store = Cursor::new(vec![]);
        format_volume(&mut store, &FormatOptions::default()).unwrap();
        FATVol::from_store(store, true, VolumeConfig::default()).unwrap()
    }

    #[test]
    fn size_bounds() {
        assert!(size_fits(0, 0, 512));
        assert!(!size_fits(1, 0, 512));
        assert!(size_fits(1, 512, 512));
        assert!(size_fits(512, 512, 512));
        assert!(!size_fits(0, 512, 512));
        assert!(!size_fits(513, 512, 512));
        assert!(size_fits(513, 1024, 512));
        assert!(!size_fits(512, 1024, 512));
    }

    #[test]
    fn paths_are_joined_once() {
        assert_eq!(child_path("/", "a"), "/a");
        assert_eq!(child_path("/a", "b"), "/a/b");
    }

    #[test]
    fn fresh_volume_is_consistent() {
        assert!(volume().check().unwrap().is_empty());
    }

    #[test]
    fn wrong_size_and_lost_cluster_are_reported() {
        let mut vol = volume();
        let mut cwd = vol.root_cursor().unwrap();
        let start = vol.allocate(None).unwrap();
        vol.create_file(&mut cwd, "short", start, 2000).unwrap();
        let lost = vol.allocate(None).unwrap();

        assert_eq!(
            vol.check().unwrap(),
            vec![
                Anomaly::InconsistentFileSize {
                    path: String::from("/short"),
                    size: 2000,
                    chain_bytes: 512,
                },
                Anomaly::LostCluster(lost),
            ]
        );
    }

    #[test]
    fn directory_with_a_size_is_reported() {
        let mut vol = volume();
        let mut cwd = vol.root_cursor().unwrap();
        let dir = vol.create_dir(&mut cwd, "sized").unwrap();
        vol.rewrite_size(2, dir.location().unwrap(), 512).unwrap();

        assert_eq!(
            vol.check().unwrap(),
            vec![Anomaly::NonZeroDirectorySize {
                path: String::from("/sized"),
            }]
        );
    }

    #[test]
    fn looping_chain_is_reported() {
        let mut vol = volume();
        let mut cwd = vol.root_cursor().unwrap();
        let a = vol.allocate(None).unwrap();
        let b = vol.allocate(Some(a)).unwrap();
        vol.set_fat_entry(b, FatEntry::Next(a)).unwrap();
        vol.create_file(&mut cwd, "loop", a, 1024).unwrap();

        assert_eq!(
            vol.check().unwrap(),
            vec![Anomaly::SelfCrossedFile {
                path: String::from("/loop"),
                cluster: a,
            }]
        );
    }

    #[test]
    fn crossed_directory_is_still_descended() {
        let mut vol = volume();
        let mut cwd = vol.root_cursor().unwrap();
        let d1 = vol.create_dir(&mut cwd, "D1").unwrap();
        let mut in_d1 = vol.change_dir(&d1).unwrap();
        let f = vol.write_new_file(&mut in_d1, "f", &b"first"[..]).unwrap();
        let d2 = vol.create_dir(&mut cwd, "D2").unwrap();
        let mut in_d2 = vol.change_dir(&d2).unwrap();
        vol.write_new_file(&mut in_d2, "g", &b"second"[..]).unwrap();

        // The chain of D2 runs into the cluster of D1
        vol.set_fat_entry(d2.start(), FatEntry::Next(d1.start())).unwrap();

        assert_eq!(
            vol.check().unwrap(),
            vec![
                Anomaly::CrossedCluster(d1.start()),
                Anomaly::CrossedCluster(f.start()),
            ]
        );
    }

    #[test]
    fn directory_pointing_at_ancestor_is_not_followed() {
        let mut vol = volume();
        let mut cwd = vol.root_cursor().unwrap();
        let dir = vol.create_dir(&mut cwd, "A").unwrap();
        let mut inner = vol.change_dir(&dir).unwrap();

        // Record group of a directory named "back" pointing at "A" itself
        let units = crate::filesystem::dir_entry::validate_name("back").unwrap();
        let records = crate::filesystem::dir_entry::encode_entry(
            &units,
            crate::filesystem::dir_entry::EntryKind::Directory,
            dir.start(),
            0,
            2,
            crate::filesystem::timestamp::FatDateTime::epoch(),
        );
        vol.append_entry(inner.dir(), &records).unwrap();
        vol.refresh(&mut inner).unwrap();

        assert_eq!(vol.check().unwrap(), vec![Anomaly::CrossedCluster(dir.start())]);
    }
}
