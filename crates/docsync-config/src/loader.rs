//! Where a working tree's configuration comes from and goes to

use crate::{Config, ConfigBuilder, ConfigError, ConfigResult};
use std::path::{Path, PathBuf};

/// Prefix of environment variables that override configuration values
pub const ENV_PREFIX: &str = "DOCSYNC";

/// Name of the per-tree control directory
pub const CONTROL_DIR: &str = ".docsync";

const CONFIG_NAMES: [&str; 4] = ["config.yaml", "config.yml", "config.toml", "config.json"];

/// Finds, loads and saves configuration files
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a working tree
    ///
    /// The first existing file among the tree's control directory, the current
    /// directory and the user config directory is used, then the environment
    /// is applied on top.
    pub fn load_for_root<P: AsRef<Path>>(root: P) -> ConfigResult<Config> {
        let mut builder = ConfigBuilder::new().add_defaults();
        if let Some(path) = Self::find_config(root.as_ref()) {
            builder = builder.add_source_file(path);
        }
        builder.add_env_prefix(ENV_PREFIX).build()
    }

    /// Load configuration from a file that must exist
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Config> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Configuration file not found",
                ),
            });
        }

        ConfigBuilder::new()
            .add_defaults()
            .add_source_file(path)
            .add_env_prefix(ENV_PREFIX)
            .build()
    }

    /// Load from an explicit file when given, otherwise from the tree's defaults
    pub fn load<P: AsRef<Path>>(root: P, explicit: Option<&Path>) -> ConfigResult<Config> {
        match explicit {
            Some(path) => Self::load_from_file(path),
            None => Self::load_for_root(root),
        }
    }

    /// Write `config` to `path` in the format its extension names
    pub fn save_to_file<P: AsRef<Path>>(config: &Config, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = encode(config, path)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Configuration file `init` writes for a tree
    pub fn tree_config_path<P: AsRef<Path>>(root: P) -> PathBuf {
        root.as_ref().join(CONTROL_DIR).join(CONFIG_NAMES[0])
    }

    /// First existing configuration file for a tree
    pub fn find_config(root: &Path) -> Option<PathBuf> {
        let control = root.join(CONTROL_DIR);
        let tree = CONFIG_NAMES.iter().map(|name| control.join(name));
        let cwd = ["docsync.yaml", "docsync.yml", "docsync.toml"]
            .iter()
            .map(PathBuf::from);
        let user = user_config_dir()
            .into_iter()
            .flat_map(|dir| CONFIG_NAMES.iter().map(move |name| dir.join(name)));

        tree.chain(cwd).chain(user).find(|path| path.is_file())
    }
}

fn encode(config: &Config, path: &Path) -> ConfigResult<String> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => {
            toml::to_string_pretty(config).map_err(|e| ConfigError::format("TOML", e))
        }
        Some("json") => {
            serde_json::to_string_pretty(config).map_err(|e| ConfigError::format("JSON", e))
        }
        _ => Ok(serde_yaml::to_string(config)?),
    }
}

/// `docsync` under the platform's user configuration directory
fn user_config_dir() -> Option<PathBuf> {
    let var = |name: &str| std::env::var_os(name).filter(|v| !v.is_empty()).map(PathBuf::from);

    let base = if cfg!(windows) {
        var("APPDATA")
    } else if cfg!(target_os = "macos") {
        var("HOME").map(|home| home.join("Library").join("Application Support"))
    } else {
        var("XDG_CONFIG_HOME").or_else(|| var("HOME").map(|home| home.join(".config")))
    };
    base.map(|dir| dir.join("docsync"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("config.yaml")]
    #[case("config.toml")]
    #[case("config.json")]
    fn test_save_and_load(#[case] name: &str) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(name);

        let mut original = Config::default();
        original.remote.root_url = Some("https://pages.local/root".to_string());
        original.sync.concurrency = 3;
        ConfigLoader::save_to_file(&original, &config_path).unwrap();

        let loaded = ConfigLoader::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.sync.concurrency, 3);
        assert_eq!(loaded.remote.root_url, original.remote.root_url);
    }

    #[test]
    fn test_load_for_root_prefers_control_dir() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.sync.discovery_depth = 5;
        ConfigLoader::save_to_file(&config, ConfigLoader::tree_config_path(temp_dir.path()))
            .unwrap();

        let found = ConfigLoader::find_config(temp_dir.path()).unwrap();
        assert!(found.starts_with(temp_dir.path().join(CONTROL_DIR)));

        let loaded = ConfigLoader::load_for_root(temp_dir.path()).unwrap();
        assert_eq!(loaded.sync.discovery_depth, 5);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = ConfigLoader::load(temp_dir.path(), Some(&temp_dir.path().join("nope.yaml")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = ConfigLoader::tree_config_path(temp_dir.path());

        ConfigLoader::save_to_file(&Config::default(), &config_path).unwrap();
        assert!(config_path.ends_with(".docsync/config.yaml"));
        assert_eq!(ConfigLoader::load_from_file(&config_path).unwrap(), Config::default());
    }
}
