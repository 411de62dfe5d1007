//! CSRF token storage
//!
//! The coordinator reads the token before every state-changing request and
//! writes back whatever the server rotates it to. Writes are last-write-wins.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, warn};

/// Default header carrying the token in both directions
pub const DEFAULT_CSRF_HEADER: &str = "X-CSRF-Token";

/// Backing storage for the CSRF token
pub trait TokenStore: Send + Sync {
    /// Current token, if one has been issued
    fn read(&self) -> Option<String>;

    /// Replace the stored token
    fn write(&self, token: &str);
}

/// Token held in memory
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an initial token
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn read(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn write(&self, token: &str) {
        debug!("MemoryTokenStore::write: called");
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.to_string());
    }
}

/// Token persisted in a file so it survives across runs
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn read(&self) -> Option<String> {
        debug!(path = %self.path.display(), "FileTokenStore::read: called");
        let content = fs::read_to_string(&self.path).ok()?;
        let token = content.trim();
        if token.is_empty() {
            debug!("FileTokenStore::read: file empty");
            None
        } else {
            Some(token.to_string())
        }
    }

    fn write(&self, token: &str) {
        debug!(path = %self.path.display(), "FileTokenStore::write: called");
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warn!("Failed to create token directory {}: {}", parent.display(), e);
            return;
        }
        if let Err(e) = fs::write(&self.path, token) {
            warn!("Failed to write CSRF token to {}: {}", self.path.display(), e);
        }
    }
}
