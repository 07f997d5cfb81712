//! Durable storage for the session
//!
//! The store calls [`SessionPersistence::save`] on every authenticated change,
//! [`SessionPersistence::clear`] when the session ends and
//! [`SessionPersistence::load`] once at construction. Only the user and access
//! token pair is ever written; refresh material is never visible here.

use crate::config::ClientConfig;
use crate::error::{CoreError, CoreResult};
use crate::types::PersistedSession;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Default name of the single storage entry holding the session
pub const DEFAULT_STORAGE_KEY: &str = "auth-storage";

#[cfg_attr(test, mockall::automock)]
pub trait SessionPersistence: Send + Sync {
    /// Load the persisted session, `None` when nothing usable is stored
    fn load(&self) -> CoreResult<Option<PersistedSession>>;

    /// Replace the stored session
    fn save(&self, session: &PersistedSession) -> CoreResult<()>;

    /// Remove the stored session; succeeds when nothing is stored
    fn clear(&self) -> CoreResult<()>;
}

/// In-process key/value storage.
///
/// Clones share the same entries, so building a second store from a clone
/// behaves like reloading the page against the same browser storage.
#[derive(Debug, Clone)]
pub struct MemoryPersistence {
    key: String,
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryPersistence {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            entries: Arc::default(),
        }
    }

    /// Raw serialized entry, as a storage inspector would see it
    pub fn raw_entry(&self) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(&self.key).cloned())
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, String>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CoreError::storage_error("memory storage lock poisoned"))?;
        f(&mut entries)
    }
}

impl Default for MemoryPersistence {
    fn default() -> Self {
        Self::new(DEFAULT_STORAGE_KEY)
    }
}

impl SessionPersistence for MemoryPersistence {
    fn load(&self) -> CoreResult<Option<PersistedSession>> {
        self.with_entries(|entries| match entries.get(&self.key) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        })
    }

    fn save(&self, session: &PersistedSession) -> CoreResult<()> {
        let raw = serde_json::to_string(session)?;
        self.with_entries(|entries| {
            entries.insert(self.key.clone(), raw);
            Ok(())
        })
    }

    fn clear(&self) -> CoreResult<()> {
        self.with_entries(|entries| {
            entries.remove(&self.key);
            Ok(())
        })
    }
}

/// JSON file under the client state directory
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(dir: impl AsRef<Path>, key: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{key}.json")),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(&config.state_dir, &config.storage_key)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionPersistence for FilePersistence {
    fn load(&self) -> CoreResult<Option<PersistedSession>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&content) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                // A corrupt entry is not worth failing startup over
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable session file");
                Ok(None)
            }
        }
    }

    fn save(&self, session: &PersistedSession) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(session)?;
        std::fs::write(&self.path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    fn clear(&self) -> CoreResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
