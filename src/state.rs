use crate::i18n::Locale;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Small amount of state kept between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalState {
    pub last_report_at: Option<DateTime<Utc>>,
    pub locale: Option<Locale>,
}

/// TOML file backing `LocalState`.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vigil")
            .join("state.toml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable state is treated as empty.
    pub fn load(&self) -> LocalState {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return LocalState::default(),
            Err(e) => {
                warn!("Could not read {}: {}", self.path.display(), e);
                return LocalState::default();
            }
        };
        toml::from_str(&text).unwrap_or_else(|e| {
            warn!("Ignoring corrupt state file {}: {}", self.path.display(), e);
            LocalState::default()
        })
    }

    pub fn save(&self, state: &LocalState) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string(state).map_err(io::Error::other)?;
        fs::write(&self.path, text)
    }

    pub fn save_locale(&self, locale: Locale) -> io::Result<()> {
        let mut state = self.load();
        state.locale = Some(locale);
        self.save(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// The state file sits in a subdirectory that does not exist yet.
    fn temp_state(dir: &TempDir) -> StateFile {
        StateFile::new(dir.path().join("vigil").join("state.toml"))
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let file = temp_state(&dir);
        assert_eq!(file.load(), LocalState::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let file = temp_state(&dir);
        let at: DateTime<Utc> = "2026-02-01T10:00:00Z".parse().unwrap();
        file.save(&LocalState { last_report_at: Some(at), locale: None }).unwrap();
        file.save_locale(Locale::Es).unwrap();
        let loaded = file.load();
        assert_eq!(loaded.last_report_at, Some(at));
        assert_eq!(loaded.locale, Some(Locale::Es));
    }

    #[test]
    fn test_corrupt_file_is_default() {
        let dir = TempDir::new().unwrap();
        let file = temp_state(&dir);
        fs::create_dir_all(file.path().parent().unwrap()).unwrap();
        fs::write(file.path(), "last_report_at = 42 [[").unwrap();
        assert_eq!(file.load(), LocalState::default());
    }
}
