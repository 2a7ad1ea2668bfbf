use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::durability::{Durability, LogFile};

/// Operations on [`InMemoryDurability`] that can be made to fail once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultPoint {
    /// `write_synced` fails before writing anything.
    WriteSynced,
    /// `rename` fails, leaving the source in place.
    Rename,
    /// `truncate_to` on a log fails, leaving the log untouched.
    Truncate,
    /// A log write stores only the first half of its buffer, then fails.
    TornAppend,
    /// A log `sync` fails after the written bytes reached the file.
    Sync,
}

#[derive(Clone, Debug, Default)]
struct FileData {
    /// Contents visible to readers.
    data: Vec<u8>,
    /// Contents that survive a crash.
    synced: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
struct MemState {
    files: HashMap<u64, FileData>,
    /// Current namespace.
    names: BTreeMap<PathBuf, u64>,
    /// Namespace as of the last `sync_dir` of each parent directory.
    durable_names: BTreeMap<PathBuf, u64>,
    dirs: BTreeSet<PathBuf>,
    /// Directories whose entry in the parent has been synced.
    durable_dirs: BTreeSet<PathBuf>,
    next_id: u64,
    faults: Vec<FaultPoint>,
}

impl MemState {
    fn take_fault(&mut self, point: FaultPoint) -> bool {
        match self.faults.iter().position(|f| *f == point) {
            Some(idx) => {
                self.faults.remove(idx);
                true
            }
            None => false,
        }
    }

    fn require_parent(&self, path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) if self.dirs.contains(parent) => Ok(()),
            _ => Err(not_found(path)),
        }
    }

    /// A directory survives a crash if it and every ancestor are durable.
    fn dir_survives(&self, dir: &Path) -> bool {
        dir.ancestors()
            .filter(|a| !a.as_os_str().is_empty())
            .all(|a| self.durable_dirs.contains(a))
    }

    fn create_file(&mut self, path: &Path) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.files.insert(id, FileData::default());
        self.names.insert(path.to_path_buf(), id);
        id
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} not found", path.display()),
    )
}

fn injected(point: FaultPoint) -> io::Error {
    io::Error::other(format!("injected fault: {point:?}"))
}

/// In-memory [`Durability`] implementation for tests.
///
/// Tracks which bytes were fsynced and which directory entries were made
/// durable by `sync_dir`. [`crash`](Self::crash) returns a new instance
/// holding only that durable view, simulating power loss. A new directory
/// becomes durable once its parent is synced; filesystem roots always are.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDurability {
    state: Arc<Mutex<MemState>>,
}

impl InMemoryDurability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next operation at `point` fail. Faults queue up and each
    /// fires once.
    pub fn fail_on(&self, point: FaultPoint) {
        self.lock().faults.push(point);
    }

    /// Simulate power loss: a fresh filesystem with only synced data under
    /// durable names.
    pub fn crash(&self) -> Self {
        let state = self.lock();
        let dirs: BTreeSet<PathBuf> = state
            .dirs
            .iter()
            .filter(|d| state.dir_survives(d))
            .cloned()
            .collect();
        let mut recovered = MemState {
            durable_dirs: dirs.clone(),
            dirs,
            ..Default::default()
        };
        for (path, id) in &state.durable_names {
            if !path.parent().is_some_and(|p| recovered.dirs.contains(p)) {
                continue;
            }
            let synced = state
                .files
                .get(id)
                .map(|f| f.synced.clone())
                .unwrap_or_default();
            let new_id = recovered.create_file(path);
            recovered.files.insert(
                new_id,
                FileData {
                    data: synced.clone(),
                    synced,
                },
            );
        }
        recovered.durable_names = recovered.names.clone();
        Self {
            state: Arc::new(Mutex::new(recovered)),
        }
    }

    /// Simulate a process restart without power loss: a fresh filesystem
    /// holding everything currently visible, synced or not.
    pub fn fork(&self) -> Self {
        let mut state = self.lock().clone();
        state.faults.clear();
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Place a file directly, durable and visible, bypassing fault injection.
    pub fn put_file(&self, path: &Path, data: &[u8]) {
        let mut state = self.lock();
        if let Some(parent) = path.parent() {
            for dir in parent.ancestors().filter(|a| !a.as_os_str().is_empty()) {
                state.dirs.insert(dir.to_path_buf());
                state.durable_dirs.insert(dir.to_path_buf());
            }
        }
        let id = match state.names.get(path) {
            Some(id) => *id,
            None => state.create_file(path),
        };
        state.files.insert(
            id,
            FileData {
                data: data.to_vec(),
                synced: data.to_vec(),
            },
        );
        state.durable_names.insert(path.to_path_buf(), id);
    }

    /// Returns `true` if `path` is currently visible.
    pub fn exists(&self, path: &Path) -> bool {
        self.lock().names.contains_key(path)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemState> {
        self.state.lock().expect("memory fs lock poisoned")
    }
}

impl Durability for InMemoryDurability {
    fn create_dir_all(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut state = self.lock();
        let mut created = Vec::new();
        for ancestor in dir.ancestors() {
            if ancestor.as_os_str().is_empty() || state.dirs.contains(ancestor) {
                break;
            }
            if ancestor.parent().is_none() {
                state.dirs.insert(ancestor.to_path_buf());
                state.durable_dirs.insert(ancestor.to_path_buf());
                break;
            }
            state.dirs.insert(ancestor.to_path_buf());
            created.push(ancestor.to_path_buf());
        }
        created.reverse();
        Ok(created)
    }

    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        let state = self.lock();
        Ok(state
            .names
            .get(path)
            .and_then(|id| state.files.get(id))
            .map(|f| f.data.clone()))
    }

    fn write_synced(&self, path: &Path, data: &[u8], _mode: u32) -> io::Result<()> {
        let mut state = self.lock();
        if state.take_fault(FaultPoint::WriteSynced) {
            return Err(injected(FaultPoint::WriteSynced));
        }
        state.require_parent(path)?;
        let id = match state.names.get(path) {
            Some(id) => *id,
            None => state.create_file(path),
        };
        state.files.insert(
            id,
            FileData {
                data: data.to_vec(),
                synced: data.to_vec(),
            },
        );
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut state = self.lock();
        if state.take_fault(FaultPoint::Rename) {
            return Err(injected(FaultPoint::Rename));
        }
        state.require_parent(to)?;
        let id = state.names.remove(from).ok_or_else(|| not_found(from))?;
        state.names.insert(to.to_path_buf(), id);
        Ok(())
    }

    fn sync_dir(&self, dir: &Path) -> io::Result<()> {
        let mut state = self.lock();
        if !state.dirs.contains(dir) {
            return Err(not_found(dir));
        }
        state
            .durable_names
            .retain(|path, _| path.parent() != Some(dir));
        let current: Vec<(PathBuf, u64)> = state
            .names
            .iter()
            .filter(|(path, _)| path.parent() == Some(dir))
            .map(|(path, id)| (path.clone(), *id))
            .collect();
        state.durable_names.extend(current);
        let children: Vec<PathBuf> = state
            .dirs
            .iter()
            .filter(|d| d.parent() == Some(dir))
            .cloned()
            .collect();
        state.durable_dirs.extend(children);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let mut state = self.lock();
        state.names.remove(path).map(|_| ()).ok_or_else(|| not_found(path))
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let state = self.lock();
        if !state.dirs.contains(dir) {
            return Err(not_found(dir));
        }
        Ok(state
            .names
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .cloned()
            .collect())
    }

    fn open_log(&self, path: &Path, _mode: u32) -> io::Result<Box<dyn LogFile>> {
        let mut state = self.lock();
        state.require_parent(path)?;
        let id = match state.names.get(path) {
            Some(id) => *id,
            None => state.create_file(path),
        };
        Ok(Box::new(MemLogFile {
            state: Arc::clone(&self.state),
            id,
        }))
    }
}

struct MemLogFile {
    state: Arc<Mutex<MemState>>,
    id: u64,
}

impl MemLogFile {
    fn with_file<T>(&self, f: impl FnOnce(&mut MemState, u64) -> io::Result<T>) -> io::Result<T> {
        let mut state = self.state.lock().expect("memory fs lock poisoned");
        f(&mut state, self.id)
    }
}

impl Write for MemLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|state, id| {
            let torn = state.take_fault(FaultPoint::TornAppend);
            let file = state.files.entry(id).or_default();
            if torn {
                file.data.extend_from_slice(&buf[..buf.len() / 2]);
                return Err(injected(FaultPoint::TornAppend));
            }
            file.data.extend_from_slice(buf);
            Ok(buf.len())
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogFile for MemLogFile {
    fn sync(&mut self) -> io::Result<()> {
        self.with_file(|state, id| {
            if state.take_fault(FaultPoint::Sync) {
                return Err(injected(FaultPoint::Sync));
            }
            let file = state.files.entry(id).or_default();
            file.synced = file.data.clone();
            Ok(())
        })
    }

    fn size(&self) -> io::Result<u64> {
        self.with_file(|state, id| Ok(state.files.get(&id).map_or(0, |f| f.data.len() as u64)))
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.with_file(|state, id| {
            if state.take_fault(FaultPoint::Truncate) {
                return Err(injected(FaultPoint::Truncate));
            }
            let file = state.files.entry(id).or_default();
            file.data.truncate(len as usize);
            file.synced = file.data.clone();
            Ok(())
        })
    }
}
