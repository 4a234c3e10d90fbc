//! Error types for testbay

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using TestbayError
pub type Result<T> = std::result::Result<T, TestbayError>;

/// Main error type for testbay operations
#[derive(Debug, Error)]
pub enum TestbayError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Package discovery errors
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Test target resolution errors
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// Testing against an install-space layout is not supported
    #[error("Cannot test with an installed workspace (install space is enabled)")]
    InstallSpaceUnsupported,

    /// A required executable is not on PATH
    #[error("Executable '{0}' not found on PATH")]
    ExecutableNotFound(String),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Package discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Two manifests declare the same package name
    #[error("Package '{name}' is declared twice: {first} and {second}")]
    DuplicatePackage {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// A package manifest could not be parsed
    #[error("Failed to parse manifest {path}: {reason}")]
    ManifestParse { path: PathBuf, reason: String },

    /// Named package is not part of the workspace
    #[error("Package `{0}` not in workspace")]
    PackageNotInWorkspace(String),

    /// Walking the source tree failed
    #[error("Failed to walk source space: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Test target resolution errors
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The package has no build metadata directory (never configured)
    #[error("Package '{package}' is not configured: {metadata_dir} does not exist (build the package first)")]
    Unconfigured {
        package: String,
        metadata_dir: PathBuf,
    },

    /// Reading the build metadata directory failed
    #[error("Failed to read build metadata for '{package}': {source}")]
    Io {
        package: String,
        #[source]
        source: std::io::Error,
    },
}

impl ResolveError {
    /// Name of the package the error refers to
    pub fn package(&self) -> &str {
        match self {
            Self::Unconfigured { package, .. } | Self::Io { package, .. } => package,
        }
    }
}

impl TestbayError {
    /// Whether this error stems from workspace configuration (as opposed to IO)
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Resolve(ResolveError::Unconfigured { .. })
        )
    }
}
