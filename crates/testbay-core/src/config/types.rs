//! Configuration types

use serde::{Deserialize, Serialize};

/// Workspace configuration, read from `testbay.toml` / `testbay.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Version of the config schema
    #[serde(rename = "$schema")]
    pub schema: Option<String>,

    /// Space (directory) names relative to the workspace root
    pub spaces: SpacesConfig,

    /// Whether packages are installed into the install space
    pub install: bool,

    /// Whether each package gets its own devel space (`devel/<pkg>`)
    pub isolate_devel: bool,

    /// Arguments passed to every native build tool invocation
    pub make_args: Vec<String>,

    /// Additional build tool arguments appended after `make_args`
    pub extra_make_args: Vec<String>,

    /// Packages to consider when no explicit names are given (empty = all)
    pub allow: Vec<String>,

    /// Packages never considered unless named explicitly
    pub deny: Vec<String>,

    /// Cache resolved dependency environments for the duration of a run
    pub use_env_cache: bool,

    /// `build_type` export values this tool knows how to test
    pub supported_build_types: Vec<String>,

    /// Default cap on concurrently tested packages
    pub parallel_packages: Option<usize>,

    /// Status line refresh rate in Hz (0 = unlimited)
    pub status_rate: f64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            schema: None,
            spaces: SpacesConfig::default(),
            install: false,
            isolate_devel: false,
            make_args: Vec::new(),
            extra_make_args: Vec::new(),
            allow: Vec::new(),
            deny: Vec::new(),
            use_env_cache: true,
            supported_build_types: vec!["catkin".to_string()],
            parallel_packages: None,
            status_rate: 10.0,
        }
    }
}

/// Names of the workspace spaces
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SpacesConfig {
    /// Package sources
    pub source: String,
    /// Per-package build directories
    pub build: String,
    /// Development result space
    pub devel: String,
    /// Install result space
    pub install: String,
    /// Job logs
    pub log: String,
}

impl Default for SpacesConfig {
    fn default() -> Self {
        Self {
            source: "src".to_string(),
            build: "build".to_string(),
            devel: "devel".to_string(),
            install: "install".to_string(),
            log: "logs".to_string(),
        }
    }
}
