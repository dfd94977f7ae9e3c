use crate::cluster::DEFAULT_THRESHOLD_PX;
use crate::error::ConfigError;
use crate::filter::TimeWindow;
use crate::geo::{LngLat, Viewport};
use crate::translate::{DEFAULT_CACHE_CAPACITY, DEFAULT_ENDPOINT};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub url: Option<String>,
    pub api_key: String,
    pub bucket: String,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            url: None,
            api_key: String::new(),
            bucket: "sighting-photos".to_string(),
            max_retries: 3,
            base_delay_ms: 500,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapSettings {
    pub threshold_px: f64,
    /// Relevance tick; filtered results are never staler than this.
    pub tick_secs: u64,
    /// Change feed poll period.
    pub poll_secs: u64,
    pub window: TimeWindow,
    pub center: LngLat,
    pub zoom: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for MapSettings {
    fn default() -> Self {
        let vp = Viewport::default();
        Self {
            threshold_px: DEFAULT_THRESHOLD_PX,
            tick_secs: 30,
            poll_secs: 5,
            window: TimeWindow::All,
            center: vp.center,
            zoom: vp.zoom,
            width: vp.width,
            height: vp.height,
        }
    }
}

impl MapSettings {
    pub fn viewport(&self) -> Viewport {
        Viewport {
            center: self.center,
            zoom: self.zoom,
            width: self.width,
            height: self.height,
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn poll(&self) -> Duration {
        Duration::from_secs(self.poll_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateSettings {
    pub endpoint: String,
    pub cache_capacity: usize,
}

impl Default for TranslateSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushSettings {
    /// Relay base URLs; a broadcast goes to each of them.
    pub endpoints: Vec<String>,
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub state_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub map: MapSettings,
    pub translate: TranslateSettings,
    pub push: PushSettings,
    pub report: ReportSettings,
}

impl Settings {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vigil")
            .join("config.toml")
    }

    /// Reads `path` (or the default location) and applies `VIGIL_*`
    /// environment overrides. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        let mut settings = match fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {}, using defaults", path.display());
                Settings::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn parse(text: &str) -> Result<Settings, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, var: F) {
        if let Some(url) = var("VIGIL_STORAGE_URL") {
            self.storage.url = Some(url);
        }
        if let Some(key) = var("VIGIL_API_KEY") {
            self.storage.api_key = key;
        }
        if let Some(urls) = var("VIGIL_PUSH_URL") {
            self.push.endpoints = urls
                .split(',')
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect();
        }
        if let Some(secret) = var("VIGIL_PUSH_SECRET") {
            self.push.secret = Some(secret);
        }
    }

    pub fn storage_url(&self) -> Result<&str, ConfigError> {
        self.storage
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingStorageUrl)
    }

    pub fn state_path(&self) -> PathBuf {
        self.report
            .state_path
            .clone()
            .unwrap_or_else(crate::state::StateFile::default_path)
    }
}
