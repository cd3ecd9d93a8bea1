use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub workflow: WorkflowSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Deployment Poller calls before the rollout counts as failed.
    pub deployment_poll_budget: u32,
    /// Capacity Poller calls before capacity counts as not converged.
    pub capacity_poll_budget: u32,
    /// Delay the local engine inserts between two polls.
    pub poll_interval_ms: u64,
    /// Container the manifest update targets; the first one when unset.
    pub container_name: Option<String>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            deployment_poll_budget: 30,
            capacity_poll_budget: 30,
            poll_interval_ms: 0,
            container_name: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreSettings {
    pub db_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { db_path: "~/.rlu/records.db".to_string() }
    }
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| "parse rlu.toml")?;
        Ok(cfg)
    }

    /// Loads `path` when it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn config_path(root: &Path) -> PathBuf {
        root.join(".rlu").join("rlu.toml")
    }

    /// Database path with `~` expanded. Relative paths are taken from `root`.
    pub fn db_path(&self, root: &Path) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(&self.store.db_path).to_string());
        if expanded.is_absolute() {
            expanded
        } else {
            root.join(expanded)
        }
    }
}
