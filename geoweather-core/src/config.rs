use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::client::DEFAULT_BASE_URL;
use crate::location::StaticPlatform;
use crate::model::Fix;
use crate::permission::PermissionRetry;

const DIRS_QUALIFIER: &str = "dev";
const DIRS_ORGANIZATION: &str = "geoweather";
const DIRS_APPLICATION: &str = "geoweather";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Last known fix of one location provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    pub provider: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// How to re-prompt for location access after a denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionRetryConfig {
    /// Ask again forever with no pause.
    pub forever: bool,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for PermissionRetryConfig {
    fn default() -> Self {
        Self {
            forever: false,
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// OpenWeatherMap API key.
    pub api_key: Option<String>,

    /// Override for the current-weather endpoint.
    pub base_url: Option<String>,

    pub permission_granted: bool,

    pub permission_retry: PermissionRetryConfig,

    /// Example TOML:
    /// [[locations]]
    /// provider = "network"
    /// latitude = 40.71
    /// longitude = -74.0
    pub locations: Vec<LocationConfig>,
}

impl Config {
    pub fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty()).ok_or_else(|| {
            anyhow!(
                "No API key configured.\n\
                 Hint: run `geoweather configure` or pass `--api-key`."
            )
        })
    }

    pub fn set_api_key(&mut self, api_key: String) {
        self.api_key = Some(api_key);
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn retry_policy(&self) -> PermissionRetry {
        let retry = &self.permission_retry;
        if retry.forever {
            PermissionRetry::Forever
        } else {
            PermissionRetry::Bounded {
                max_attempts: retry.max_attempts.max(1),
                initial_backoff: Duration::from_millis(retry.backoff_ms),
            }
        }
    }

    /// Set/replace the fix stored for `provider`, keeping its registration slot.
    pub fn upsert_location(&mut self, provider: &str, fix: Fix) {
        let entry = LocationConfig {
            provider: provider.to_string(),
            latitude: fix.latitude,
            longitude: fix.longitude,
        };

        match self.locations.iter_mut().find(|l| l.provider == provider) {
            Some(existing) => *existing = entry,
            None => self.locations.push(entry),
        }
    }

    /// Location platform holding the configured providers in file order.
    pub fn platform(&self) -> StaticPlatform {
        let platform = StaticPlatform::new(self.permission_granted);
        for loc in &self.locations {
            platform.register(loc.provider.clone(), Some(Fix::new(loc.latitude, loc.longitude)));
        }
        platform
    }

    /// Reads the config from the platform config directory.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    /// A missing file means nothing was configured yet and yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents)
                .with_context(|| format!("Invalid configuration in {}", path.display())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err).with_context(|| format!("Cannot read {}", path.display())),
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    /// Writes a sibling temp file and renames it over `path`, so an
    /// interrupted save never leaves a half-written config behind.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).context("Cannot encode configuration as TOML")?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create directory {}", dir.display()))?;
        }

        let staging = path.with_extension("toml.tmp");
        fs::write(&staging, text)
            .with_context(|| format!("Cannot write {}", staging.display()))?;
        fs::rename(&staging, path)
            .with_context(|| format!("Cannot replace {}", path.display()))
    }

    pub fn config_file_path() -> Result<PathBuf> {
        ProjectDirs::from(DIRS_QUALIFIER, DIRS_ORGANIZATION, DIRS_APPLICATION)
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .ok_or_else(|| anyhow!("No config directory is known for this platform"))
    }
}
