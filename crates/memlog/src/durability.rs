//! Filesystem durability interface.
//!
//! Stores never touch `std::fs` directly. Every operation whose ordering
//! matters for crash safety (fsync, atomic rename, directory sync, truncate)
//! goes through [`Durability`], so the rotation protocol can be exercised
//! against the in-memory fake in [`crate::memory`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// An open, append-only log file.
pub trait LogFile: Write + Send {
    /// Flush file contents to stable storage.
    fn sync(&mut self) -> io::Result<()>;

    /// Current length of the file in bytes.
    fn size(&self) -> io::Result<u64>;

    /// Cut the file down to `len` bytes. Later writes append after `len`.
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

/// Filesystem operations a store relies on for durability.
///
/// Implementations must be thread-safe: a single instance is shared by the
/// registry and all stores it opens.
pub trait Durability: Send + Sync {
    /// Create `dir` and any missing parents. Returns the directories that
    /// did not exist before, outermost first. Their entries are not durable
    /// until the parent is synced; see [`create_dir_durable`].
    fn create_dir_all(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// Read a whole file. Returns `Ok(None)` if it does not exist.
    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>>;

    /// Create or replace `path` with `data` and fsync it before returning.
    fn write_synced(&self, path: &Path, data: &[u8], mode: u32) -> io::Result<()>;

    /// Atomically replace `to` with `from`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Make directory entry changes (creates, renames, removals) in `dir`
    /// durable.
    fn sync_dir(&self, dir: &Path) -> io::Result<()>;

    /// Remove a file.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Paths of the regular files directly inside `dir`.
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// Open (or create) `path` for appending.
    fn open_log(&self, path: &Path, mode: u32) -> io::Result<Box<dyn LogFile>>;
}

/// Suffix of files being written by [`write_atomic`]. Leftovers are garbage.
pub const TMP_SUFFIX: &str = ".tmp";

/// Replace `dir/file_name` with `data` so that a crash leaves either the old
/// or the new contents, never a mix.
///
/// Order: write `file_name.tmp`, fsync it, rename over the target, fsync the
/// directory.
pub fn write_atomic(
    fs: &dyn Durability,
    dir: &Path,
    file_name: &str,
    data: &[u8],
    mode: u32,
) -> io::Result<()> {
    let target = dir.join(file_name);
    let tmp = dir.join(format!("{file_name}{TMP_SUFFIX}"));

    fs.write_synced(&tmp, data, mode)?;
    fs.rename(&tmp, &target)?;
    fs.sync_dir(dir)
}

/// Create `dir` and any missing parents, then sync the parent of every
/// directory created so a crash cannot drop the new entries.
pub fn create_dir_durable(fs: &dyn Durability, dir: &Path) -> io::Result<()> {
    for created in fs.create_dir_all(dir)? {
        if let Some(parent) = created.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs.sync_dir(parent)?;
        }
    }
    Ok(())
}

/// [`Durability`] backed by the operating system's filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsDurability;

impl OsDurability {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
fn apply_mode(opts: &mut OpenOptions, mode: u32) {
    use std::os::unix::fs::OpenOptionsExt;
    opts.mode(mode);
}

#[cfg(not(unix))]
fn apply_mode(_opts: &mut OpenOptions, _mode: u32) {}

impl Durability for OsDurability {
    fn create_dir_all(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut missing: Vec<PathBuf> = dir
            .ancestors()
            .take_while(|p| !p.as_os_str().is_empty() && !p.is_dir())
            .map(Path::to_path_buf)
            .collect();
        fs::create_dir_all(dir)?;
        missing.reverse();
        Ok(missing)
    }

    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_synced(&self, path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
        let mut opts = OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        apply_mode(&mut opts, mode);

        let mut file = opts.open(path)?;
        file.write_all(data)?;
        file.sync_all()
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    #[cfg(unix)]
    fn sync_dir(&self, dir: &Path) -> io::Result<()> {
        File::open(dir)?.sync_all()
    }

    #[cfg(not(unix))]
    fn sync_dir(&self, _dir: &Path) -> io::Result<()> {
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn open_log(&self, path: &Path, mode: u32) -> io::Result<Box<dyn LogFile>> {
        let mut opts = OpenOptions::new();
        opts.create(true).read(true).append(true);
        apply_mode(&mut opts, mode);
        Ok(Box::new(OsLogFile { file: opts.open(path)? }))
    }
}

struct OsLogFile {
    file: File,
}

impl Write for OsLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl LogFile for OsLogFile {
    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)?;
        self.file.sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsDurability::new();
        assert!(fs.read(&dir.path().join("nope")).unwrap().is_none());
    }

    #[test]
    fn write_synced_then_rename() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsDurability::new();
        let tmp = dir.path().join("a.tmp");
        let dst = dir.path().join("a.json");

        fs.write_synced(&dst, b"old", 0o600).unwrap();
        fs.write_synced(&tmp, b"new", 0o600).unwrap();
        fs.rename(&tmp, &dst).unwrap();
        fs.sync_dir(dir.path()).unwrap();

        assert_eq!(fs.read(&dst).unwrap().unwrap(), b"new");
        assert_eq!(fs.list_dir(dir.path()).unwrap(), vec![dst]);
    }

    #[cfg(unix)]
    #[test]
    fn new_files_get_configured_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fs = OsDurability::new();
        let path = dir.path().join("m");
        fs.write_synced(&path, b"x", 0o600).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn create_dir_reports_new_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsDurability::new();
        let nested = dir.path().join("root").join("store");

        let created = fs.create_dir_all(&nested).unwrap();
        assert_eq!(created, vec![dir.path().join("root"), nested.clone()]);
        assert!(nested.is_dir());

        assert!(fs.create_dir_all(&nested).unwrap().is_empty());
        create_dir_durable(&fs, &nested.join("more")).unwrap();
        assert!(nested.join("more").is_dir());
    }

    #[test]
    fn log_append_and_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsDurability::new();
        let path = dir.path().join("log");

        let mut log = fs.open_log(&path, 0o600).unwrap();
        log.write_all(b"hello world").unwrap();
        log.sync().unwrap();
        assert_eq!(log.size().unwrap(), 11);

        log.truncate_to(5).unwrap();
        log.write_all(b"!").unwrap();
        log.flush().unwrap();
        drop(log);

        assert_eq!(fs.read(&path).unwrap().unwrap(), b"hello!");
    }
}
