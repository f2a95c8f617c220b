use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use core_types::AppMode;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const CURRENT_SCHEMA_VERSION: u32 = 2;
pub const DATA_DIR_ENV: &str = "SLIDEAPP_DATA_DIR";
const APP_DIR_NAME: &str = "slideapp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapAdmin {
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl Default for BootstrapAdmin {
    fn default() -> Self {
        Self {
            display_name: "Administrator".to_string(),
            email: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Blocking serum species; primaries raised in it are never suggested.
    pub serum_type: String,
    pub default_width: usize,
    #[serde(default)]
    pub primary_catalog: Option<PathBuf>,
    #[serde(default)]
    pub secondary_catalog: Option<PathBuf>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            serum_type: "goat".to_string(),
            default_width: 3,
            primary_catalog: None,
            secondary_catalog: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolPresets {
    pub primary_volume_ul: f64,
    pub primary_incubation: String,
    pub secondary_volume_ul: f64,
    pub secondary_incubation: String,
}

impl Default for ProtocolPresets {
    fn default() -> Self {
        Self {
            primary_volume_ul: 250.0,
            primary_incubation: "overnight at 4C".to_string(),
            secondary_volume_ul: 250.0,
            secondary_incubation: "2 hours at RT".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub schema_version: u32,
    pub database_file: String,
    #[serde(default)]
    pub default_output_dir: Option<PathBuf>,
    #[serde(default)]
    pub default_mode: AppMode,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub bootstrap_admin: Option<BootstrapAdmin>,
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub protocol: ProtocolPresets,
    #[serde(default = "default_recent_locations")]
    pub recent_locations: usize,
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_recent_locations() -> usize {
    8
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            database_file: "slideapp.db".to_string(),
            default_output_dir: None,
            default_mode: AppMode::Researcher,
            log_filter: default_log_filter(),
            bootstrap_admin: Some(BootstrapAdmin::default()),
            panel: PanelConfig::default(),
            protocol: ProtocolPresets::default(),
            recent_locations: default_recent_locations(),
        }
    }
}

impl AppConfig {
    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.database_file)
    }

    /// Configured output directory, else the platform downloads folder, else
    /// `<data_dir>/exports`.
    pub fn output_dir(&self, data_dir: &Path) -> PathBuf {
        self.default_output_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| data_dir.join("exports"))
    }
}

/// `SLIDEAPP_DATA_DIR` when set, else the platform local data directory.
pub fn resolve_data_dir() -> Result<PathBuf> {
    data_dir_from(std::env::var_os(DATA_DIR_ENV))
}

fn data_dir_from(env_override: Option<OsString>) -> Result<PathBuf> {
    if let Some(dir) = env_override.filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let mut dir = dirs::data_local_dir().context("failed to resolve data_local_dir")?;
    dir.push(APP_DIR_NAME);
    Ok(dir)
}

pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join("config.json"),
        }
    }

    /// Config lives beside the data when `SLIDEAPP_DATA_DIR` is set, else in the
    /// platform config directory.
    pub fn from_default_location() -> Result<Self> {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::from_dir(PathBuf::from(dir)));
        }
        let mut dir = dirs::config_dir().context("failed to resolve config_dir")?;
        dir.push(APP_DIR_NAME);
        Ok(Self::from_dir(dir))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        if !self.path.exists() {
            let config = AppConfig::default();
            self.save(&config)?;
            return Ok(config);
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let mut config: AppConfig =
            serde_json::from_str(&raw).context("failed to parse app config json")?;
        self.migrate(&mut config);
        self.save(&config)?;
        Ok(config)
    }

    pub fn save(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let text = serde_json::to_string_pretty(config).context("failed to serialize config")?;
        fs::write(&self.path, text)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    fn migrate(&self, config: &mut AppConfig) {
        if config.schema_version >= CURRENT_SCHEMA_VERSION {
            return;
        }

        warn!(
            from = config.schema_version,
            to = CURRENT_SCHEMA_VERSION,
            "migrating app config schema"
        );

        // v1 had no bootstrap admin and allowed an empty log filter.
        if config.schema_version < 2 {
            if config.bootstrap_admin.is_none() {
                config.bootstrap_admin = Some(BootstrapAdmin::default());
            }
            if config.log_filter.trim().is_empty() {
                config.log_filter = default_log_filter();
            }
        }
        config.schema_version = CURRENT_SCHEMA_VERSION;
    }
}
