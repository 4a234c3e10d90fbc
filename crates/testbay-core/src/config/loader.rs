//! Configuration loading

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, Result};

use super::defaults::config_file_names;
use super::types::WorkspaceConfig;
use super::validation::validate_config;

/// Load configuration from a file
pub fn load_config(path: &Path) -> Result<WorkspaceConfig> {
    let format = if path.extension().is_some_and(|e| e == "toml") {
        "TOML"
    } else {
        "YAML"
    };
    info!(path = %path.display(), format, "loading config");

    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

    let config: WorkspaceConfig = if format == "TOML" {
        toml::from_str(&content).map_err(ConfigError::TomlError)?
    } else {
        serde_yaml::from_str(&content).map_err(ConfigError::YamlError)?
    };

    validate_config(&config)?;
    debug!(path = %path.display(), "config loaded and validated");
    Ok(config)
}

/// Find the workspace configuration file in `start_dir` or its parents.
///
/// The first directory (walking upward) that contains one of
/// [`config_file_names`] wins.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    debug!(start_dir = %start_dir.display(), "searching for config file");
    let mut current = start_dir.to_path_buf();

    loop {
        for name in config_file_names() {
            let config_path = current.join(name);
            if config_path.exists() {
                info!(path = %config_path.display(), "found config file");
                return Some(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    debug!("no config file found");
    None
}

/// Load the workspace configuration and its root directory.
///
/// When no config file exists the defaults are used and `dir` becomes the
/// workspace root. A config file that exists but fails to parse or validate
/// is an error.
pub fn load_workspace(dir: &Path) -> Result<(WorkspaceConfig, PathBuf)> {
    match find_config(dir) {
        Some(path) => {
            let config = load_config(&path)?;
            let root = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| dir.to_path_buf());
            Ok((config, root))
        }
        None => {
            debug!(dir = %dir.display(), "no config found, using defaults");
            Ok((WorkspaceConfig::default(), dir.to_path_buf()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_config_toml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("testbay.toml");
        std::fs::write(&config_path, "install = false\n").unwrap();

        let found = find_config(temp.path());
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_find_config_prefers_toml_over_yaml() {
        let temp = TempDir::new().unwrap();
        let toml_path = temp.path().join("testbay.toml");
        let yaml_path = temp.path().join("testbay.yaml");
        std::fs::write(&toml_path, "install = false\n").unwrap();
        std::fs::write(&yaml_path, "install: false\n").unwrap();

        let found = find_config(temp.path()).unwrap();
        assert_eq!(found, toml_path);
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join(".testbay.yaml");
        std::fs::write(&config_path, "install: false\n").unwrap();
        let nested = temp.path().join("src").join("pkg");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config(&nested), Some(config_path));
    }

    #[test]
    fn test_load_config_yaml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("testbay.yaml");
        std::fs::write(
            &config_path,
            "make_args: [\"-k\"]\nallow: [a, b]\nspaces:\n  build: out\n",
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.make_args, vec!["-k"]);
        assert_eq!(config.allow, vec!["a", "b"]);
        assert_eq!(config.spaces.build, "out");
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("testbay.toml");
        std::fs::write(&config_path, "status_rate = -1.0\n").unwrap();

        assert!(load_config(&config_path).is_err());
    }

    #[test]
    fn test_load_workspace_uses_config_dir_as_root() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("testbay.toml"), "install = false\n").unwrap();
        let nested = temp.path().join("src");
        std::fs::create_dir_all(&nested).unwrap();

        let (_, root) = load_workspace(&nested).unwrap();
        assert_eq!(root, temp.path());
    }

    #[test]
    fn test_load_workspace_defaults_without_config() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use tracing_subscriber::layer::SubscriberExt;

        struct Warnings(Arc<AtomicUsize>);

        impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for Warnings {
            fn on_event(
                &self,
                event: &tracing::Event<'_>,
                _ctx: tracing_subscriber::layer::Context<'_, S>,
            ) {
                if *event.metadata().level() <= tracing::Level::WARN {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let temp = TempDir::new().unwrap();
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(Warnings(warnings.clone()));

        let (config, root) =
            tracing::subscriber::with_default(subscriber, || load_workspace(temp.path())).unwrap();
        assert_eq!(root, temp.path());
        assert!(!config.install);
        // A workspace without a config file is the normal case
        assert_eq!(warnings.load(Ordering::SeqCst), 0);
    }
}
