//! Configuration management
//!
//! Handles TOML configuration parsing and validation. Every field has a
//! built-in default, so an empty or absent file is a valid configuration.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_CATALOG_URL, DEFAULT_IMAGE_SIZE, DEFAULT_MOUNT_ROOT,
    DEFAULT_WORKDIR, HDIUTIL_PATH, INSTALLER_PATH, SCRIPT_PATH,
};
use crate::install::TerminalMode;
use crate::replicate::ReplicationPolicy;

/// Main pipeline configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub catalog: CatalogSettings,
    pub paths: PathSettings,
    pub tools: ToolSettings,
    pub image: ImageSettings,
    pub behavior: BehaviorSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogSettings {
    /// Software update catalog to install from
    pub url: String,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_CATALOG_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathSettings {
    /// Replicated catalog, payloads and the sparse image live here
    pub workdir: PathBuf,
    /// Parent directory for hdiutil's random mountpoints
    pub mount_root: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from(DEFAULT_WORKDIR),
            mount_root: PathBuf::from(DEFAULT_MOUNT_ROOT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolSettings {
    pub hdiutil: PathBuf,
    pub installer: PathBuf,
    /// Terminal wrapper used when no native pty is available
    pub script: PathBuf,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            hdiutil: PathBuf::from(HDIUTIL_PATH),
            installer: PathBuf::from(INSTALLER_PATH),
            script: PathBuf::from(SCRIPT_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageSettings {
    /// hdiutil size argument, e.g. `8g`
    pub size: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            size: DEFAULT_IMAGE_SIZE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BehaviorSettings {
    /// Skip downloading packages whose local copy already has the catalog size
    pub reuse_packages: bool,
    /// Abort an installer tool that prints nothing for this many seconds
    pub line_timeout_secs: Option<u64>,
    pub terminal: TerminalMode,
}

impl PipelineConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("In config file {}", path.display()))
    }

    /// Load `explicit` if given (it must exist), else the default location
    /// if present, else built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.catalog.url)
            .with_context(|| format!("Invalid catalog URL '{}'", self.catalog.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("Catalog URL must use http or https, got '{}'", url.scheme());
        }

        if !is_valid_image_size(&self.image.size) {
            bail!(
                "Invalid image size '{}': expected digits followed by one of b, k, m, g, t",
                self.image.size
            );
        }

        if self.behavior.line_timeout_secs == Some(0) {
            bail!("line_timeout_secs must be greater than 0");
        }

        if self.paths.workdir.as_os_str().is_empty() {
            bail!("workdir must not be empty");
        }

        Ok(())
    }

    pub fn line_timeout(&self) -> Option<Duration> {
        self.behavior.line_timeout_secs.map(Duration::from_secs)
    }

    pub fn replication_policy(&self) -> ReplicationPolicy {
        if self.behavior.reuse_packages {
            ReplicationPolicy::ReuseMatchingSize
        } else {
            ReplicationPolicy::Always
        }
    }
}

/// `<config dir>/osreinstaller/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// `<digits>[bkmgt]`, case-insensitive
fn is_valid_image_size(size: &str) -> bool {
    let Some(unit) = size.chars().last() else {
        return false;
    };
    let digits = &size[..size.len() - unit.len_utf8()];
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && matches!(unit.to_ascii_lowercase(), 'b' | 'k' | 'm' | 'g' | 't')
}
