use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "QUICKWINDOW_CONFIG";

const DEFAULT_USER_AGENT: &str = concat!("quickwindow/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub fetch: FetchConfig,
    pub script: ScriptConfig,
    pub tasks: TaskConfig,
    pub navigator: NavigatorConfig,
    pub screen: ScreenConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// QuickJS heap limit in bytes; unlimited when absent.
    pub memory_limit: Option<usize>,
    pub max_stack_size: Option<usize>,
    /// Promise jobs run after each evaluation before giving up.
    pub max_pending_jobs: usize,
    /// Deepest array/object nesting converted from script to host.
    pub max_bridge_depth: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            memory_limit: None,
            max_stack_size: Some(1024 * 1024),
            max_pending_jobs: 1000,
            max_bridge_depth: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub max_tasks_per_drain: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_tasks_per_drain: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigatorConfig {
    pub user_agent: String,
    pub platform: String,
    pub language: String,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            platform: std::env::consts::OS.to_string(),
            language: "en-US".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub width: u32,
    pub height: u32,
    pub color_depth: u32,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            color_depth: 24,
        }
    }
}

impl WindowConfig {
    /// Resolve configuration from an explicit path, `QUICKWINDOW_CONFIG`, or
    /// the platform config directory, falling back to defaults when no file
    /// exists.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let path = config_path
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(default_config_path);

        match path {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "quickwindow").map(|dirs| dirs.config_dir().join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn missing_file_uses_defaults() {
        let config = WindowConfig::load(Some(PathBuf::from("/nonexistent/quickwindow.yaml")))
            .unwrap();
        assert_eq!(config, WindowConfig::default());
        assert_eq!(config.script.max_bridge_depth, 64);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "tasks:\n  max_tasks_per_drain: 5\nscreen:\n  width: 800").unwrap();
        let config = WindowConfig::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.tasks.max_tasks_per_drain, 5);
        assert_eq!(config.screen.width, 800);
        assert_eq!(config.screen.height, 768);
        assert_eq!(config.fetch, FetchConfig::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "tasks: [not, a, map]").unwrap();
        assert!(WindowConfig::load(Some(file.path().to_path_buf())).is_err());
    }
}
