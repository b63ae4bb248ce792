//! Provider settings: a handful of string keys read on demand and written on
//! explicit save.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use directories::ProjectDirs;
use tracing::{debug, info};

use crate::error::SettingsError;

/// Model used when none has been saved.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    AiApiKey,
    AiModel,
    VirustotalApiKey,
}

impl SettingKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::AiApiKey => "ai_api_key",
            SettingKey::AiModel => "ai_model",
            SettingKey::VirustotalApiKey => "virustotal_api_key",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key/value store for provider settings.
///
/// Values are trimmed on `set`; an empty value reads back as `None`.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: SettingKey) -> Option<String>;
    fn set(&self, key: SettingKey, value: &str) -> Result<(), SettingsError>;

    fn model(&self) -> String {
        self.get(SettingKey::AiModel)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }
}

type Values = BTreeMap<String, String>;

fn read_value(values: &Values, key: SettingKey) -> Option<String> {
    values
        .get(key.as_str())
        .filter(|v| !v.is_empty())
        .cloned()
}

fn write_value(values: &mut Values, key: SettingKey, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        values.remove(key.as_str());
    } else {
        values.insert(key.as_str().to_string(), value.to_string());
    }
}

// A panic elsewhere must not make saved keys unreadable or drop writes.
fn read_lock(values: &RwLock<Values>) -> RwLockReadGuard<'_, Values> {
    values.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock(values: &RwLock<Values>) -> RwLockWriteGuard<'_, Values> {
    values.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Settings that live only as long as the process.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<Values>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: SettingKey, value: &str) -> Self {
        write_value(&mut write_lock(&self.values), key, value);
        self
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: SettingKey) -> Option<String> {
        read_value(&read_lock(&self.values), key)
    }

    fn set(&self, key: SettingKey, value: &str) -> Result<(), SettingsError> {
        write_value(&mut write_lock(&self.values), key, value);
        Ok(())
    }
}

/// Settings persisted as a flat JSON object, rewritten on every `set`.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    values: RwLock<Values>,
}

impl FileSettings {
    /// Load `path`, starting empty when it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Values::new(),
            Ok(content) => serde_json::from_str(&content).map_err(|source| {
                SettingsError::Parse {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file yet");
                Values::new()
            }
            Err(source) => return Err(SettingsError::Read { path, source }),
        };
        info!(path = %path.display(), keys = values.len(), "settings loaded");
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    /// `<platform config dir>/settings.json`, if a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "threat-scan-rs").map(|d| d.config_dir().join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &Values) -> Result<(), SettingsError> {
        let write_err = |source| SettingsError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(values)
            .map_err(|e| write_err(std::io::Error::new(ErrorKind::InvalidData, e)))?;
        fs::write(&self.path, json).map_err(write_err)
    }
}

impl SettingsStore for FileSettings {
    fn get(&self, key: SettingKey) -> Option<String> {
        read_value(&read_lock(&self.values), key)
    }

    fn set(&self, key: SettingKey, value: &str) -> Result<(), SettingsError> {
        let mut values = write_lock(&self.values);
        write_value(&mut values, key, value);
        self.persist(&values)?;
        debug!(%key, "setting saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_trims_and_treats_blank_as_unset() {
        let s = MemorySettings::new();
        s.set(SettingKey::AiApiKey, "  sk-test  ").unwrap();
        assert_eq!(s.get(SettingKey::AiApiKey).as_deref(), Some("sk-test"));
        s.set(SettingKey::AiApiKey, "   ").unwrap();
        assert_eq!(s.get(SettingKey::AiApiKey), None);
    }

    #[test]
    fn model_defaults_when_unset() {
        let s = MemorySettings::new();
        assert_eq!(s.model(), DEFAULT_MODEL);
        let s = s.with(SettingKey::AiModel, "gpt-4o");
        assert_eq!(s.model(), "gpt-4o");
    }

    #[test]
    fn memory_store_keeps_working_after_a_panicking_writer() {
        let s = std::sync::Arc::new(MemorySettings::new().with(SettingKey::AiApiKey, "sk-old"));
        let held = s.clone();
        let crashed = std::thread::spawn(move || {
            let _guard = held.values.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(crashed.is_err());
        assert!(s.values.is_poisoned());

        assert_eq!(s.get(SettingKey::AiApiKey).as_deref(), Some("sk-old"));
        s.set(SettingKey::AiApiKey, "sk-new").unwrap();
        assert_eq!(s.get(SettingKey::AiApiKey).as_deref(), Some("sk-new"));
    }

    #[test]
    fn file_store_round_trips_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let s = FileSettings::open(&path).unwrap();
        assert_eq!(s.get(SettingKey::VirustotalApiKey), None);
        s.set(SettingKey::VirustotalApiKey, "vt-123").unwrap();

        let reopened = FileSettings::open(&path).unwrap();
        assert_eq!(
            reopened.get(SettingKey::VirustotalApiKey).as_deref(),
            Some("vt-123")
        );
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"virustotal_api_key\""));
    }

    #[test]
    fn file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileSettings::open(&path),
            Err(SettingsError::Parse { .. })
        ));
    }
}
