//! Storage directory management.
//!
//! ```text
//! <storage>/
//! ├─ LOCK                    # Advisory lock, exclusive for writers
//! ├─ engine.state            # Persisted EngineState
//! ├─ engine_{n}.wal          # Engine lifecycle WAL
//! └─ <catalog>/
//!    ├─ catalog.header       # Catalog snapshot header
//!    ├─ <TYPE>.collection    # One file per collection
//!    └─ <catalog>_{n}.wal    # Catalog transaction WAL
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const ENGINE_STATE_FILE: &str = "engine.state";

/// Prefix of engine WAL file names.
pub(crate) const ENGINE_WAL_PREFIX: &str = "engine";

const REPLACEMENT_SUFFIX: &str = "replacement";

/// The engine storage directory, locked for the lifetime of this value.
///
/// Writers take an exclusive lock, read-only engines a shared one, so a
/// read-only engine may run next to other readers but never next to a writer.
#[derive(Debug)]
pub struct StorageDir {
    path: PathBuf,
    _lock_file: File,
}

impl StorageDir {
    /// Opens or creates the storage directory and locks it.
    ///
    /// # Errors
    ///
    /// - the directory is missing and `create_if_missing` is false
    /// - another engine holds a conflicting lock (`DatabaseLocked`)
    /// - I/O errors
    pub fn open(path: &Path, create_if_missing: bool, read_only: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing && !read_only {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "storage directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        let locked = if read_only {
            FileExt::try_lock_shared(&lock_file)
        } else {
            FileExt::try_lock_exclusive(&lock_file)
        };
        if locked.is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Root path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the persisted engine state.
    #[must_use]
    pub fn engine_state_path(&self) -> PathBuf {
        self.path.join(ENGINE_STATE_FILE)
    }

    /// Path of engine WAL file `file_name`.
    #[must_use]
    pub fn engine_wal_path(&self, file_name: &str) -> PathBuf {
        self.path.join(file_name)
    }

    /// Directory of catalog `name`.
    #[must_use]
    pub fn catalog_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Directory a replacement of catalog `name` is staged in before it
    /// takes over the name.
    #[must_use]
    pub fn replacement_path(&self, name: &str) -> PathBuf {
        self.path.join(format!("{name}.{REPLACEMENT_SUFFIX}"))
    }

    /// Names of all sub-directories.
    pub(crate) fn subdirectories(&self) -> CoreResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Replaces `path` with `data` atomically.
///
/// Writes a sibling temp file, fsyncs it, renames it over `path` and fsyncs
/// the parent directory.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> CoreResult<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    let mut file = File::create(&temp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp, path)?;
    if let Some(parent) = path.parent() {
        sync_directory(parent)?;
    }
    Ok(())
}

/// Fsyncs a directory so created, renamed or deleted entries are durable.
#[cfg(unix)]
pub(crate) fn sync_directory(path: &Path) -> CoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

/// NTFS journals metadata updates; there is no directory fsync to issue.
#[cfg(not(unix))]
pub(crate) fn sync_directory(_path: &Path) -> CoreResult<()> {
    Ok(())
}

/// Removes `path` when it exists.
pub(crate) fn remove_file_if_exists(path: &Path) -> CoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Removes the directory tree at `path` when it exists.
pub(crate) fn remove_dir_if_exists(path: &Path) -> CoreResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Moves directory `from` to `to`, replacing whatever `to` held.
pub(crate) fn replace_dir(from: &Path, to: &Path) -> CoreResult<()> {
    remove_dir_if_exists(to)?;
    fs::rename(from, to)?;
    if let Some(parent) = to.parent() {
        sync_directory(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_writer_is_locked_out() {
        let temp = tempdir().unwrap();
        let _first = StorageDir::open(temp.path(), true, false).unwrap();
        let second = StorageDir::open(temp.path(), true, false);
        assert!(matches!(second, Err(CoreError::DatabaseLocked)));
    }

    #[test]
    fn missing_directory_is_created_only_when_asked() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("store");
        assert!(StorageDir::open(&path, false, false).is_err());
        let dir = StorageDir::open(&path, true, false).unwrap();
        assert!(dir.path().is_dir());
        assert_eq!(dir.catalog_path("shop"), path.join("shop"));
    }

    #[test]
    fn atomic_write_replaces_content() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("engine.state");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!temp.path().join("engine.state.tmp").exists());
        remove_file_if_exists(&path).unwrap();
        remove_file_if_exists(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn replacement_takes_over_directory() {
        let temp = tempdir().unwrap();
        let dir = StorageDir::open(temp.path(), true, false).unwrap();
        let (target, staged) = (dir.catalog_path("shop"), dir.replacement_path("shop"));
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("old"), b"old").unwrap();
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("new"), b"new").unwrap();

        replace_dir(&staged, &target).unwrap();
        assert!(target.join("new").exists());
        assert!(!target.join("old").exists());
        assert_eq!(dir.subdirectories().unwrap(), vec!["shop"]);
        remove_dir_if_exists(&target).unwrap();
        remove_dir_if_exists(&target).unwrap();
        assert!(dir.subdirectories().unwrap().is_empty());
    }
}
