//! Directory navigation and mutation.
//!
//! A directory's content is the concatenated data of its cluster chain, read as a table of
//! 32-byte records. Navigation state is an explicit [`DirCursor`] value owned by the caller:
//! every operation that works "in the current directory" takes the cursor as a parameter
//! and refreshes its listing after a mutation.

use getset::Getters;
use log::{debug, warn};
use std::io::{self, Read, Seek, Write};
use std::vec;

use super::dir_entry::{
    self, DELETED_MARK, DirEntry, EntryKind, Location, RECORD_LEN, SIZE_FIELD_OFFSET,
    UNUSED_MARK,
};
use super::fat::FATVol;
use super::fat_error::FATError;
use super::timestamp::FatDateTime;

/// The current directory and its listing.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct DirCursor {
    /// The directory the cursor points to.
    dir: DirEntry,
    /// Its entries in table order, "." and ".." included.
    entries: Vec<DirEntry>,
}

impl DirCursor {
    /// Looks an entry up by its exact name.
    ///
    /// # Errors
    /// - `FATError::NotFound` naming the missing entry
    pub fn find(&self, name: &str) -> Result<&DirEntry, FATError> {
        self.entries
            .iter()
            .find(|entry| entry.name() == name)
            .ok_or_else(|| FATError::NotFound(name.to_string()))
    }

    /// Entries other than "." and "..".
    pub fn children(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.iter().filter(|entry| !entry.is_dot())
    }
}

/// Lazy reader over the content of a file, one cluster per item.
///
/// The last item is cut at the declared size of the file.
pub struct FileChunks<'a, T> {
    vol: &'a mut FATVol<T>,
    clusters: vec::IntoIter<u32>,
    remaining: u64,
}

impl<T: Read + Write + Seek> Iterator for FileChunks<'_, T> {
    type Item = Result<Vec<u8>, FATError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let cluster = self.clusters.next()?;

        match self.vol.read_cluster(cluster) {
            Ok(mut data) => {
                data.truncate(self.remaining.min(data.len() as u64) as usize);
                self.remaining -= data.len() as u64;
                Some(Ok(data))
            }
            Err(err) => {
                self.remaining = 0;
                Some(Err(err))
            }
        }
    }
}

impl<T: Read + Write + Seek> FATVol<T> {
    /// Whether `start` designates the root directory. 0 is used by ".." records for it.
    pub(crate) fn is_root_start(&self, start: u32) -> bool {
        start < 2 || start == self.root().start()
    }

    /// Start cluster of a directory, with 0 resolved to the root.
    fn dir_start(&self, dir: &DirEntry) -> u32 {
        if self.is_root_start(dir.start()) {
            self.root().start()
        } else {
            dir.start()
        }
    }

    /// Lists the entries of a directory in table order.
    ///
    /// # Errors
    /// - `FATError::NotADirectory` if `dir` is a file
    pub fn list_dir(&mut self, dir: &DirEntry) -> Result<Vec<DirEntry>, FATError> {
        if !dir.is_dir() {
            return Err(FATError::NotADirectory(dir.name().clone()));
        }

        let data = self.read_chain(self.dir_start(dir))?;
        dir_entry::parse_table(&data, *self.config().validate_lfn_checksum())
    }

    /// Cursor on the root directory.
    pub fn root_cursor(&mut self) -> Result<DirCursor, FATError> {
        let root = self.root().clone();
        let entries = self.list_dir(&root)?;
        Ok(DirCursor { dir: root, entries })
    }

    /// Opens a cursor on `target`. A start cluster of 0 designates the root.
    ///
    /// # Errors
    /// - `FATError::NotADirectory` if `target` is a file
    pub fn change_dir(&mut self, target: &DirEntry) -> Result<DirCursor, FATError> {
        if !target.is_dir() {
            return Err(FATError::NotADirectory(target.name().clone()));
        }
        if self.is_root_start(target.start()) {
            return self.root_cursor();
        }

        let entries = self.list_dir(target)?;
        Ok(DirCursor {
            dir: target.clone(),
            entries,
        })
    }

    /// Reloads the listing of the cursor's directory.
    pub fn refresh(&mut self, cwd: &mut DirCursor) -> Result<(), FATError> {
        cwd.entries = self.list_dir(&cwd.dir)?;
        Ok(())
    }

    fn enter(&mut self, cursor: &DirCursor, name: &str) -> Result<DirCursor, FATError> {
        if name == ".." && self.is_root_start(cursor.dir.start()) {
            return self.root_cursor();
        }
        let target = cursor.find(name)?.clone();
        self.change_dir(&target)
    }

    /// Resolves a '/'-separated path, absolute or relative to `cwd`.
    ///
    /// # Errors
    /// - `FATError::NotFound` for a missing component
    /// - `FATError::NotADirectory` if an intermediate component is a file
    pub fn resolve(&mut self, cwd: &DirCursor, path: &str) -> Result<DirEntry, FATError> {
        let mut cursor = if path.starts_with('/') {
            self.root_cursor()?
        } else {
            cwd.clone()
        };

        let parts: Vec<&str> = path
            .split('/')
            .filter(|part| !part.is_empty() && *part != ".")
            .collect();
        let Some((last, dirs)) = parts.split_last() else {
            return Ok(cursor.dir);
        };

        for part in dirs {
            cursor = self.enter(&cursor, part)?;
        }
        if *last == ".." && self.is_root_start(cursor.dir.start()) {
            return Ok(self.root().clone());
        }

        Ok(cursor.find(last)?.clone())
    }

    /// Fails with `AlreadyExists` if `name` is listed in the cursor's directory.
    fn ensure_absent(&mut self, cwd: &mut DirCursor, name: &str) -> Result<(), FATError> {
        self.refresh(cwd)?;
        if cwd.entries.iter().any(|entry| entry.name() == name) {
            return Err(FATError::AlreadyExists(name.to_string()));
        }
        Ok(())
    }

    /// Registers a file in the current directory.
    ///
    /// # Parameters
    /// - `cwd`: The current directory
    /// - `name`: The long name of the file
    /// - `start`: First cluster of an existing chain holding the data, 0 for none
    /// - `size`: Size of the file in bytes
    ///
    /// # Errors
    /// - `FATError::PermissionDenied` on a read-only volume
    /// - `FATError::InvalidName` if the name can't be stored
    /// - `FATError::AlreadyExists` if the name is taken
    pub fn create_file(
        &mut self,
        cwd: &mut DirCursor,
        name: &str,
        start: u32,
        size: u32,
    ) -> Result<DirEntry, FATError> {
        self.ensure_writable(name)?;
        let units = dir_entry::validate_name(name)?;
        self.ensure_absent(cwd, name)?;

        let records = dir_entry::encode_entry(
            &units,
            EntryKind::File,
            start,
            size,
            cwd.entries.len(),
            FatDateTime::now(),
        );
        self.append_entry(&cwd.dir, &records)?;
        self.refresh(cwd)?;

        debug!("Created file {name:?} at cluster {start}, {size} bytes");
        Ok(cwd.find(name)?.clone())
    }

    /// Creates an empty directory in the current directory.
    ///
    /// # Errors
    /// - `FATError::PermissionDenied` on a read-only volume
    /// - `FATError::InvalidName` if the name can't be stored
    /// - `FATError::AlreadyExists` if the name is taken
    /// - `FATError::VolumeFull` if no cluster is left
    pub fn create_dir(&mut self, cwd: &mut DirCursor, name: &str) -> Result<DirEntry, FATError> {
        self.ensure_writable(name)?;
        let units = dir_entry::validate_name(name)?;
        self.ensure_absent(cwd, name)?;

        let stamp = FatDateTime::now();
        let start = self.allocate(None)?;
        let parent = if self.is_root_start(cwd.dir.start()) {
            0
        } else {
            cwd.dir.start()
        };

        let mut dots = dir_entry::encode_dot(".", start, stamp).to_vec();
        dots.extend_from_slice(&dir_entry::encode_dot("..", parent, stamp));

        let records = dir_entry::encode_entry(
            &units,
            EntryKind::Directory,
            start,
            0,
            cwd.entries.len(),
            stamp,
        );
        let registered = self
            .write_cluster(start, &dots)
            .and_then(|_| self.append_entry(&cwd.dir, &records));
        if let Err(err) = registered {
            self.free_chain(start)?;
            return Err(err);
        }
        self.refresh(cwd)?;

        debug!("Created directory {name:?} at cluster {start}");
        Ok(cwd.find(name)?.clone())
    }

    /// Removes an entry of the current directory, recursively for directories.
    ///
    /// # Errors
    /// - `FATError::PermissionDenied` on a read-only volume
    /// - `FATError::InvalidName` for "." and ".." entries and the root
    pub fn remove(&mut self, cwd: &mut DirCursor, entry: &DirEntry) -> Result<(), FATError> {
        self.ensure_writable(entry.name())?;
        if entry.is_dot() || entry.is_root() {
            return Err(FATError::InvalidName(entry.name().clone()));
        }

        let parent = self.dir_start(&cwd.dir);
        let mut ancestors = vec![self.root().start(), parent];
        self.remove_rec(parent, entry, &mut ancestors)?;
        self.refresh(cwd)
    }

    fn remove_rec(
        &mut self,
        parent: u32,
        entry: &DirEntry,
        ancestors: &mut Vec<u32>,
    ) -> Result<(), FATError> {
        let start = entry.start();
        let owns_chain = start >= 2 && !ancestors.contains(&start);

        if entry.is_dir() && owns_chain {
            ancestors.push(start);
            let children: Vec<DirEntry> = self
                .list_dir(entry)?
                .into_iter()
                .filter(|child| !child.is_dot())
                .collect();
            for child in children.iter() {
                self.remove_rec(start, child, ancestors)?;
            }
            ancestors.pop();
        }

        if owns_chain {
            self.free_chain(start)?;
        } else if start >= 2 {
            warn!("{:?} points at an ancestor directory, chain kept", entry.name());
        }
        if let Some(location) = entry.location() {
            self.delete_records(parent, location)?;
        }

        debug!("Removed {:?}", entry.name());
        Ok(())
    }

    /// Stores a record group in the first run of free slots of a directory.
    ///
    /// The directory chain grows by one cluster at a time until the group fits.
    pub(crate) fn append_entry(&mut self, dir: &DirEntry, records: &[u8]) -> Result<(), FATError> {
        let start = self.dir_start(dir);
        let needed = records.len() / RECORD_LEN;

        loop {
            let data = self.read_chain(start)?;
            if let Some(offset) = free_run(&data, needed) {
                return self.patch_chain(start, offset, records);
            }

            let last = self.trace(start)?.clusters.last().copied().unwrap_or(start);
            let grown = self.allocate(Some(last))?;
            debug!("Directory at cluster {start} extended with cluster {grown}");
        }
    }

    /// Marks every record of an entry as deleted.
    pub(crate) fn delete_records(
        &mut self,
        dir_start: u32,
        location: Location,
    ) -> Result<(), FATError> {
        for i in 0..location.count() {
            self.patch_chain(dir_start, location.offset() + i * RECORD_LEN, &[DELETED_MARK])?;
        }
        Ok(())
    }

    /// Rewrites the size field of an entry's short record.
    pub(crate) fn rewrite_size(
        &mut self,
        dir_start: u32,
        location: Location,
        size: u32,
    ) -> Result<(), FATError> {
        let offset = location.short_record_offset() + SIZE_FIELD_OFFSET;
        self.patch_chain(dir_start, offset, &size.to_le_bytes())
    }

    /// Rewrites the first cluster fields of an entry's short record.
    pub(crate) fn rewrite_start(
        &mut self,
        dir_start: u32,
        location: Location,
        start: u32,
    ) -> Result<(), FATError> {
        let offset = location.short_record_offset();
        self.patch_chain(dir_start, offset + 20, &((start >> 16) as u16).to_le_bytes())?;
        self.patch_chain(dir_start, offset + 26, &((start & 0xFFFF) as u16).to_le_bytes())
    }

    /// Streams the content of a file.
    ///
    /// # Errors
    /// - `FATError::IsADirectory` if `entry` is a directory
    pub fn read_file(&mut self, entry: &DirEntry) -> Result<FileChunks<'_, T>, FATError> {
        if entry.is_dir() {
            return Err(FATError::IsADirectory(entry.name().clone()));
        }

        let trace = self.trace(entry.start())?;
        if let Some(cluster) = trace.loop_at {
            warn!("{:?} loops back at cluster {cluster}", entry.name());
        }

        Ok(FileChunks {
            vol: self,
            clusters: trace.clusters.into_iter(),
            remaining: entry.size() as u64,
        })
    }

    /// Creates a file in the current directory holding everything `reader` yields.
    ///
    /// Clusters are allocated as data arrives; they are released again if the file can't
    /// be registered.
    ///
    /// # Errors
    /// - `FATError::PermissionDenied`, `FATError::InvalidName`, `FATError::AlreadyExists`
    /// - `FATError::VolumeFull` if the data doesn't fit
    pub fn write_new_file<R: Read>(
        &mut self,
        cwd: &mut DirCursor,
        name: &str,
        mut reader: R,
    ) -> Result<DirEntry, FATError> {
        self.ensure_writable(name)?;
        dir_entry::validate_name(name)?;
        self.ensure_absent(cwd, name)?;

        let mut first = None;
        let result = self.write_stream(&mut reader, &mut first).and_then(|size| {
            self.create_file(cwd, name, first.unwrap_or(0), size)
        });

        if result.is_err() {
            if let Some(start) = first {
                self.free_chain(start)?;
            }
        }
        result
    }

    /// Copies a stream into a new chain and returns its length in bytes.
    fn write_stream<R: Read>(
        &mut self,
        reader: &mut R,
        first: &mut Option<u32>,
    ) -> Result<u32, FATError> {
        let mut buf = vec![0u8; self.cluster_size() as usize];
        let mut last = None;
        let mut size: u64 = 0;

        loop {
            let len = fill(reader, &mut buf)?;
            if len == 0 {
                break;
            }

            let cluster = self.allocate(last)?;
            first.get_or_insert(cluster);
            self.write_cluster(cluster, &buf[..len])?;
            last = Some(cluster);
            size += len as u64;
        }

        u32::try_from(size).map_err(|_| {
            FATError::IOError(io::Error::other(format!("{size} bytes exceed the file size limit")))
        })
    }
}

/// Reads until `buf` is full or the reader is exhausted.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut len = 0;
    while len < buf.len() {
        match reader.read(&mut buf[len..]) {
            Ok(0) => break,
            Ok(n) => len += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(len)
}

/// Byte offset of the first run of `needed` free records of a directory table.
fn free_run(data: &[u8], needed: usize) -> Option<usize> {
    let mut run = 0;
    for (idx, record) in data.chunks_exact(RECORD_LEN).enumerate() {
        if record[0] == UNUSED_MARK || record[0] == DELETED_MARK {
            run += 1;
            if run == needed {
                return Some((idx + 1 - needed) * RECORD_LEN);
            }
        } else {
            run = 0;
        }
    }
    None
}
