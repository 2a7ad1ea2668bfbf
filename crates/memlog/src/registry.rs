use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::Settings;
use crate::durability::{Durability, OsDurability, TMP_SUFFIX};
use crate::error::{MemlogError, Result};
use crate::store::Store;
use crate::wait_group::WaitGroup;

/// Characters that may not appear in a store name.
const FORBIDDEN_CHARS: &[char] = &['/', '\\', '\0'];

/// Validate a store name, returning `Ok(())` if it maps to exactly one
/// sub-directory of the registry root.
pub fn validate_store_name(name: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(MemlogError::InvalidStoreName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() {
        return reject("store name must not be empty");
    }
    if let Some(ch) = name.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return reject(&format!("contains forbidden character: {ch:?}"));
    }
    if name.starts_with('.') {
        return reject("must not start with '.'");
    }
    if name.ends_with(TMP_SUFFIX) {
        return reject("must not end with the temporary file suffix");
    }
    Ok(())
}

#[derive(Debug)]
struct RegistryState {
    /// Cleared once by `close`, never set again.
    active: bool,
    /// Names with an open handle.
    open: HashSet<String>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<RegistryState>,
    outstanding: WaitGroup,
}

/// Reservation of a store name, held by the store handle. Dropping it
/// releases the name and counts the store as finished.
pub(crate) struct Lease {
    shared: Arc<Shared>,
    name: String,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open
            .remove(&self.name);
        self.shared.outstanding.done();
        debug!(store = %self.name, "store released");
    }
}

/// Manages the named stores under one root directory.
///
/// `access` hands out at most one open handle per name. `close` stops new
/// accesses and blocks until every handle has been closed.
///
/// The registry lock only guards the accepting flag and the set of open
/// names. It is released before store files are opened, so a slow open does
/// not delay accesses to other stores.
pub struct Registry {
    settings: Settings,
    fs: Arc<dyn Durability>,
    shared: Arc<Shared>,
}

impl Registry {
    /// Create a registry on the local filesystem.
    ///
    /// Fills default settings and resolves the root to an absolute path. The
    /// root directory itself is created on first access.
    pub fn new(settings: Settings) -> Result<Self> {
        Self::with_durability(settings, Arc::new(OsDurability::new()))
    }

    /// Create a registry on an arbitrary [`Durability`] implementation.
    pub fn with_durability(settings: Settings, fs: Arc<dyn Durability>) -> Result<Self> {
        let settings = settings.normalize()?;
        info!(
            root = %settings.root.display(),
            file_mode = %format!("{:#o}", settings.file_mode),
            buffer_size = settings.buffer_size,
            checkpoint = ?settings.checkpoint,
            ignore_version_check = settings.ignore_version_check,
            "registry created"
        );
        Ok(Self {
            settings,
            fs,
            shared: Arc::new(Shared {
                state: Mutex::new(RegistryState {
                    active: true,
                    open: HashSet::new(),
                }),
                outstanding: WaitGroup::new(),
            }),
        })
    }

    /// Absolute root directory.
    pub fn root(&self) -> &Path {
        &self.settings.root
    }

    /// Normalized settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Returns `false` once `close` has been called.
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().expect("registry lock poisoned").active
    }

    /// Number of handed out stores that have not been closed yet.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.count()
    }

    /// Open (or create) the store `name` under the root.
    ///
    /// Fails with [`MemlogError::RegistryClosed`] once `close` has begun and
    /// with [`MemlogError::StoreInUse`] while another handle for `name` is
    /// open. A failed access leaves no reservation behind and can be retried.
    pub fn access(&self, name: &str) -> Result<Store> {
        validate_store_name(name)?;

        let lease = {
            let mut state = self.shared.state.lock().expect("registry lock poisoned");
            if !state.active {
                return Err(MemlogError::RegistryClosed);
            }
            if !state.open.insert(name.to_string()) {
                return Err(MemlogError::StoreInUse(name.to_string()));
            }
            self.shared.outstanding.add(1);
            Lease {
                shared: Arc::clone(&self.shared),
                name: name.to_string(),
            }
        };

        let home = self.settings.root.join(name);
        Store::open_leased(home, &self.settings, Arc::clone(&self.fs), Some(lease))
    }

    /// Stop handing out stores, then block until every store obtained from
    /// this registry is closed.
    ///
    /// Safe to call more than once; later calls return as soon as no stores
    /// are outstanding.
    pub fn close(&self) -> Result<()> {
        self.begin_close();
        self.shared.outstanding.wait();
        info!(root = %self.settings.root.display(), "registry closed");
        Ok(())
    }

    /// Like [`close`](Self::close), but gives up after `timeout` with
    /// [`MemlogError::CloseTimeout`]. The registry stays closed either way.
    pub fn close_timeout(&self, timeout: Duration) -> Result<()> {
        self.begin_close();
        if self.shared.outstanding.wait_timeout(timeout) {
            info!(root = %self.settings.root.display(), "registry closed");
            Ok(())
        } else {
            Err(MemlogError::CloseTimeout {
                outstanding: self.shared.outstanding.count(),
            })
        }
    }

    fn begin_close(&self) {
        let mut state = self.shared.state.lock().expect("registry lock poisoned");
        if state.active {
            state.active = false;
            info!(
                root = %self.settings.root.display(),
                outstanding = self.shared.outstanding.count(),
                "registry closing"
            );
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("root", &self.settings.root)
            .field("active", &self.is_active())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
