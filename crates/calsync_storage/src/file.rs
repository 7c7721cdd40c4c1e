//! File-based journal backend.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A journal stored in a single file.
///
/// Appends go to the end of the file. `replace` writes a sibling temp file,
/// syncs it and renames it over the journal, so compaction never leaves a
/// half-written journal behind.
///
/// # Example
///
/// ```no_run
/// use calsync_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("replica.journal")).unwrap();
/// backend.append(b"frame").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    size: Mutex<u64>,
}

impl FileBackend {
    /// Opens or creates the journal file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = Self::open_file(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size: Mutex::new(size),
        })
    }

    /// Opens or creates the journal, creating parent directories first.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the journal path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_file(path: &Path) -> StorageResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".compact");
        self.path.with_file_name(name)
    }
}

impl StorageBackend for FileBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let mut file = self.file.lock();
        let size = *self.size.lock();
        let mut buffer = Vec::with_capacity(size as usize);
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut file = self.file.lock();
        let mut size = self.size.lock();
        let offset = *size;
        if data.is_empty() {
            return Ok(offset);
        }

        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;
        Ok(offset)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let temp = self.temp_path();
        {
            let mut out = File::create(&temp)?;
            out.write_all(data)?;
            out.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        // The old handle points at the unlinked inode; reopen the journal.
        let mut file = self.file.lock();
        *file = Self::open_file(&self.path)?;
        *self.size.lock() = data.len() as u64;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.lock())
    }
}
