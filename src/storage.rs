//! Key/value storage backing the token store.
//!
//! Two backends:
//! - [`FileStorage`]: one file per key in the platform config directory, so
//!   values survive restarts:
//!   - Linux: `~/.config/chathub/`
//!   - macOS: `~/Library/Application Support/chathub/`
//!   - Windows: `%APPDATA%\chathub\`
//! - [`MemoryStorage`]: process-lifetime only (session scope).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Raw string storage.
pub trait Storage: Send + Sync {
    fn load_raw(&self, key: &str) -> Option<String>;

    /// Returns `true` if the operation succeeded.
    fn save_raw(&self, key: &str, value: &str) -> bool;

    /// Removing a missing key is not an error.
    fn remove_raw(&self, key: &str);

    fn exists(&self, key: &str) -> bool {
        self.load_raw(key).is_some()
    }
}

// =========================================
// File-backed implementation
// =========================================

#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Storage under the platform config directory for `app_name`.
    pub fn for_app(app_name: &str) -> Option<Self> {
        let dir = dirs::config_dir()?.join(app_name);
        Some(Self { dir })
    }

    /// Storage rooted at an explicit directory.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    fn ensure_dir(&self) -> Option<()> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir).ok()?;
        }
        Some(())
    }

    fn file_path(&self, key: &str) -> PathBuf {
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{}.json", safe_key))
    }
}

impl Storage for FileStorage {
    fn load_raw(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.file_path(key)).ok()
    }

    fn save_raw(&self, key: &str, value: &str) -> bool {
        if self.ensure_dir().is_none() {
            tracing::warn!(dir = %self.dir.display(), "could not create storage directory");
            return false;
        }
        // Write-then-rename so a reader never sees a truncated value
        let path = self.file_path(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value).is_ok() && std::fs::rename(&tmp, &path).is_ok()
    }

    fn remove_raw(&self, key: &str) {
        let _ = std::fs::remove_file(self.file_path(key));
    }
}

// =========================================
// In-memory implementation
// =========================================

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn load_raw(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn save_raw(&self, key: &str, value: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        true
    }

    fn remove_raw(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}
