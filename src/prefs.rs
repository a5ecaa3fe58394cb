//! Persisted user preferences
//!
//! Stored as `preferences.json` in the data directory. The file is read once
//! at open and rewritten on every change.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collab::PreferenceStore;
use crate::intent::BackendId;
use crate::{Error, Result};

/// On-disk preference record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preferences {
    /// Vision backend chosen by voice command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_backend: Option<BackendId>,

    /// When the record was last written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// JSON-file preference store
#[derive(Debug)]
pub struct JsonPreferenceStore {
    path: PathBuf,
    current: RwLock<Preferences>,
}

impl JsonPreferenceStore {
    /// Open the store at `path`; a missing file is an empty record
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let current = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let prefs: Preferences = serde_json::from_str(&content)
                .map_err(|e| Error::Preferences(format!("invalid {}: {e}", path.display())))?;
            tracing::debug!(
                path = %path.display(),
                backend = ?prefs.selected_backend,
                "loaded preferences"
            );
            prefs
        } else {
            Preferences::default()
        };

        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    /// Open, falling back to an empty record if the file is corrupt
    ///
    /// The corrupt file is left in place and overwritten on the next change.
    #[must_use]
    pub fn open_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::open(path.clone()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring unreadable preferences");
            Self {
                path,
                current: RwLock::new(Preferences::default()),
            }
        })
    }

    /// File backing this store
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current record
    #[must_use]
    pub fn snapshot(&self) -> Preferences {
        self.current
            .read()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn write(&self, prefs: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write-then-rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(prefs)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PreferenceStore for JsonPreferenceStore {
    fn selected_backend(&self) -> Option<BackendId> {
        self.current.read().ok().and_then(|p| p.selected_backend)
    }

    fn set_selected_backend(&self, backend: BackendId) -> Result<()> {
        let mut guard = self
            .current
            .write()
            .map_err(|_| Error::Preferences("preference lock poisoned".to_string()))?;

        let next = Preferences {
            selected_backend: Some(backend),
            updated_at: Some(Utc::now()),
        };
        self.write(&next)?;
        *guard = next;

        tracing::info!(%backend, path = %self.path.display(), "saved backend preference");
        Ok(())
    }
}
