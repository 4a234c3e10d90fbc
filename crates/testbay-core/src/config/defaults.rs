//! Default configuration values

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "testbay.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "testbay.yaml";

/// Name of the build metadata directory inside a package build space
pub const BUILD_METADATA_DIR: &str = "CMakeFiles";

/// Root makefile expected in a configured package build space
pub const ROOT_MAKEFILE: &str = "Makefile";

/// Package manifest file name
pub const PACKAGE_MANIFEST: &str = "package.xml";

/// Marker files that hide a directory from package discovery
pub const IGNORE_MARKERS: &[&str] = &["CATKIN_IGNORE", "TESTBAY_IGNORE"];

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".testbay.toml",
        ".testbay.yaml",
    ]
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# testbay workspace configuration

install = false
isolate_devel = false
make_args = []
extra_make_args = []
allow = []
deny = []
use_env_cache = true
supported_build_types = ["catkin"]
status_rate = 10.0

[spaces]
source = "src"
build = "build"
devel = "devel"
install = "install"
log = "logs"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkspaceConfig;

    #[test]
    fn test_template_parses_to_defaults() {
        let config: WorkspaceConfig = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.spaces, WorkspaceConfig::default().spaces);
    }
}
