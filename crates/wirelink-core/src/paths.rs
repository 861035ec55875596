//! XDG-compliant path resolution for application directories.
//!
//! The data directory holds the session store, the node index and the share
//! list. Shared files live under `sharing.root_dir`, or `<data_dir>/files`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::schema::generate_example_config;
use crate::wire::FileSessionStore;
use crate::{APP_NAME, AppConfig};

/// Folder name of the shared files inside the data directory.
const FILES_DIR: &str = "files";

/// Application paths for config, data, state and shared files.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Path to the configuration file.
    pub config_file: PathBuf,
    /// Directory for sessions, node index and shares.
    pub data_dir: PathBuf,
    /// Directory for application state files.
    pub state_dir: PathBuf,
    /// Root of the per-user shared folders.
    pub files_dir: PathBuf,
}

impl AppPaths {
    /// Discover application paths, optionally overriding the config file location.
    ///
    /// # Errors
    ///
    /// Returns an error if paths cannot be resolved or expanded.
    pub fn discover(override_path: Option<&Path>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!(
                "invalid config file path: {}",
                config_file.display()
            ));
        }

        let data_dir = default_data_dir()?;
        let state_dir = default_state_dir()?;
        let files_dir = data_dir.join(FILES_DIR);

        Ok(Self {
            config_file,
            data_dir,
            state_dir,
            files_dir,
        })
    }

    /// Apply path overrides from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if override paths cannot be expanded.
    pub fn apply_overrides(mut self, cfg: &AppConfig) -> Result<Self> {
        if let Some(ref data_override) = cfg.paths.data_dir {
            self.data_dir = expand_str_path(data_override)?;
            self.files_dir = self.data_dir.join(FILES_DIR);
        }
        if let Some(ref state_override) = cfg.paths.state_dir {
            self.state_dir = expand_str_path(state_override)?;
        }
        if let Some(ref root) = cfg.sharing.root_dir {
            self.files_dir = expand_str_path(root)?;
        }
        Ok(self)
    }

    /// Location of the persisted session store.
    #[must_use]
    pub fn sessions_file(&self) -> PathBuf {
        self.data_dir.join(FileSessionStore::FILE_NAME)
    }

    /// Ensure all required directories exist.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created.
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("creating data directory {}", self.data_dir.display()))?;
        fs::create_dir_all(&self.state_dir)
            .with_context(|| format!("creating state directory {}", self.state_dir.display()))?;
        fs::create_dir_all(&self.files_dir)
            .with_context(|| format!("creating files directory {}", self.files_dir.display()))?;
        Ok(())
    }

    /// Log directory creation in dry-run mode.
    pub fn log_dry_run(&self) {
        log::info!(
            "dry-run: would ensure data dir {}, state dir {} and files dir {}",
            self.data_dir.display(),
            self.state_dir.display(),
            self.files_dir.display()
        );
    }
}

impl std::fmt::Display for AppPaths {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "config: {}, data: {}, state: {}, files: {}",
            self.config_file.display(),
            self.data_dir.display(),
            self.state_dir.display(),
            self.files_dir.display()
        )
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    path.to_str()
        .map_or_else(|| Ok(path.to_path_buf()), expand_str_path)
}

/// Expand `~` and environment variables in a configured path.
///
/// # Errors
///
/// Returns an error if a referenced variable is unset.
pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

/// `$<var>/wirelink`, else the platform directory, else `~/<home_rel>/wirelink`.
fn xdg_dir(var: &str, platform: Option<PathBuf>, home_rel: &[&str]) -> Result<PathBuf> {
    let base = env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or(platform)
        .or_else(|| dirs::home_dir().map(|home| home_rel.iter().fold(home, |p, part| p.join(part))))
        .ok_or_else(|| anyhow!("unable to determine {var} directory"))?;
    Ok(base.join(APP_NAME))
}

fn default_config_dir() -> Result<PathBuf> {
    xdg_dir("XDG_CONFIG_HOME", dirs::config_dir(), &[".config"])
}

/// Directory for sessions, node index and shares unless `paths.data_dir` is set.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_data_dir() -> Result<PathBuf> {
    xdg_dir("XDG_DATA_HOME", dirs::data_dir(), &[".local", "share"])
}

/// Directory for state files unless `paths.state_dir` is set.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_state_dir() -> Result<PathBuf> {
    xdg_dir("XDG_STATE_HOME", dirs::state_dir(), &[".local", "state"])
}

/// Write the example configuration to `path`, creating its directory.
///
/// # Errors
///
/// Returns an error if the file cannot be written or the directory cannot be created.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {}", parent.display()))?;
    }
    let body = generate_example_config(APP_NAME)?;
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}
