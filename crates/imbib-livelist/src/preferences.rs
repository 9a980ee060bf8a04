//! Persisted list preferences

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use imbib_items::ItemsSortType;
use serde::{Deserialize, Serialize};

use crate::error::PreferencesError;

/// Where the item list keeps user choices between sessions.
pub trait Preferences: Send + Sync {
    fn items_sort_type(&self) -> ItemsSortType;
    fn set_items_sort_type(&self, sort: ItemsSortType) -> Result<(), PreferencesError>;
}

/// Preferences that live as long as the process.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    sort: Mutex<ItemsSortType>,
}

impl MemoryPreferences {
    pub fn with_sort(sort: ItemsSortType) -> Self {
        Self {
            sort: Mutex::new(sort),
        }
    }
}

impl Preferences for MemoryPreferences {
    fn items_sort_type(&self) -> ItemsSortType {
        *self.sort.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_items_sort_type(&self, sort: ItemsSortType) -> Result<(), PreferencesError> {
        *self.sort.lock().unwrap_or_else(PoisonError::into_inner) = sort;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct PreferencesFile {
    items_sort: ItemsSortType,
}

/// Preferences stored in a TOML file.
#[derive(Debug)]
pub struct TomlPreferences {
    path: PathBuf,
    data: Mutex<PreferencesFile>,
}

impl TomlPreferences {
    /// `<config dir>/imbib/preferences.toml`
    pub fn default_path() -> Result<PathBuf, PreferencesError> {
        let config = dirs::config_dir().ok_or(PreferencesError::NoDirectory)?;
        Ok(config.join("imbib").join("preferences.toml"))
    }

    /// Open the file at `path`; a missing file means defaults.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PreferencesError> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            PreferencesFile::default()
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, data: &PreferencesFile) -> Result<(), PreferencesError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, toml::to_string_pretty(data)?)?;
        Ok(())
    }
}

impl Preferences for TomlPreferences {
    fn items_sort_type(&self) -> ItemsSortType {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items_sort
    }

    fn set_items_sort_type(&self, sort: ItemsSortType) -> Result<(), PreferencesError> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        data.items_sort = sort;
        self.save(&data)
    }
}
