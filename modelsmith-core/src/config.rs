//! Layered configuration loading.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Files live at
//! `~/.config/modelsmith/config.toml` and `<workspace>/.modelsmith/config.toml`.
//!
//! The loader is generic so each crate can own its configuration type.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};

/// Prefix for environment overrides (`MODELSMITH_SEARCH__N_TRIALS=80`).
pub const ENV_PREFIX: &str = "MODELSMITH_";

const CONFIG_FILE: &str = "config.toml";
const WORKSPACE_DIR: &str = ".modelsmith";

/// Path of the user-level config file, if a home directory can be resolved.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "modelsmith", "modelsmith")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(WORKSPACE_DIR).join(CONFIG_FILE)
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `MODELSMITH_`, nested keys split on `__`)
/// 3. Workspace-local config (`.modelsmith/config.toml`)
/// 4. User config (`~/.config/modelsmith/config.toml`)
/// 5. Built-in defaults
pub fn load_layered<T>(
    workspace: Option<&Path>,
    overrides: Option<&T>,
) -> Result<T, Box<figment::Error>>
where
    T: Serialize + DeserializeOwned + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            tracing::debug!(path = %ws_config.display(), "Merging workspace config");
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether any modelsmith configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SearchSection {
        #[serde(default = "default_trials")]
        n_trials: usize,
        #[serde(default)]
        timeout_secs: Option<f64>,
    }

    impl Default for SearchSection {
        fn default() -> Self {
            Self {
                n_trials: default_trials(),
                timeout_secs: None,
            }
        }
    }

    fn default_trials() -> usize {
        50
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        search: SearchSection,
        #[serde(default)]
        label: String,
    }

    fn write_workspace_config(dir: &TempDir, body: &str) {
        let path = workspace_config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn test_defaults_without_files() {
        let dir = TempDir::new().unwrap();
        let config: TestConfig = load_layered(Some(dir.path()), None).unwrap();
        assert_eq!(config.search.n_trials, 50);
        assert_eq!(config.search.timeout_secs, None);
    }

    #[test]
    fn test_workspace_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let body = toml::to_string(&TestConfig {
            search: SearchSection {
                n_trials: 12,
                timeout_secs: Some(30.0),
            },
            label: "ws".into(),
        })
        .unwrap();
        write_workspace_config(&dir, &body);

        let config: TestConfig = load_layered(Some(dir.path()), None).unwrap();
        assert_eq!(config.search.n_trials, 12);
        assert_eq!(config.search.timeout_secs, Some(30.0));
        assert_eq!(config.label, "ws");
        assert!(config_exists(Some(dir.path())));
    }

    #[test]
    fn test_explicit_overrides_win() {
        let dir = TempDir::new().unwrap();
        write_workspace_config(&dir, "label = \"from-file\"\n[search]\nn_trials = 7\n");

        let overrides = TestConfig {
            search: SearchSection {
                n_trials: 99,
                timeout_secs: None,
            },
            label: "override".into(),
        };
        let config: TestConfig = load_layered(Some(dir.path()), Some(&overrides)).unwrap();
        assert_eq!(config.search.n_trials, 99);
        assert_eq!(config.label, "override");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        write_workspace_config(&dir, "[search]\nn_trials = \"many\"\n");

        let result: Result<TestConfig, _> = load_layered(Some(dir.path()), None);
        assert!(result.is_err());
    }
}
