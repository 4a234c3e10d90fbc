//! Build context: resolved workspace spaces and build settings

use std::path::{Path, PathBuf};

use crate::config::WorkspaceConfig;

/// Everything downstream components need to know about the workspace.
///
/// Built once per invocation and consumed read-only.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Workspace root
    pub root: PathBuf,
    /// Absolute source space
    pub source_space: PathBuf,
    /// Absolute build space
    pub build_space: PathBuf,
    /// Absolute devel space
    pub devel_space: PathBuf,
    /// Absolute install space
    pub install_space: PathBuf,
    /// Absolute log space
    pub log_space: PathBuf,
    /// Whether the workspace installs its packages
    pub install: bool,
    /// Whether each package has an isolated devel space
    pub isolate_devel: bool,
    /// Global native build tool arguments
    pub make_args: Vec<String>,
    /// Extra build tool arguments appended after `make_args`
    pub extra_make_args: Vec<String>,
    /// Allow list (empty = everything)
    pub allow: Vec<String>,
    /// Deny list
    pub deny: Vec<String>,
    /// Cache dependency environments across jobs
    pub use_env_cache: bool,
    /// Supported `build_type` export values
    pub supported_build_types: Vec<String>,
}

impl BuildContext {
    /// Create a context from a parsed config and the workspace root
    pub fn from_config(config: &WorkspaceConfig, root: &Path) -> Self {
        let spaces = &config.spaces;
        Self {
            root: root.to_path_buf(),
            source_space: root.join(&spaces.source),
            build_space: root.join(&spaces.build),
            devel_space: root.join(&spaces.devel),
            install_space: root.join(&spaces.install),
            log_space: root.join(&spaces.log),
            install: config.install,
            isolate_devel: config.isolate_devel,
            make_args: config.make_args.clone(),
            extra_make_args: config.extra_make_args.clone(),
            allow: config.allow.clone(),
            deny: config.deny.clone(),
            use_env_cache: config.use_env_cache,
            supported_build_types: config.supported_build_types.clone(),
        }
    }

    /// Build directory of a single package
    pub fn package_build_space(&self, package: &str) -> PathBuf {
        self.build_space.join(package)
    }

    /// Devel space a package builds into
    pub fn package_devel_space(&self, package: &str) -> PathBuf {
        if self.isolate_devel {
            self.devel_space.join(package)
        } else {
            self.devel_space.clone()
        }
    }

    /// Install space a package installs into
    pub fn package_install_space(&self) -> PathBuf {
        self.install_space.clone()
    }

    /// Result space whose environment a package's dependents would see
    pub fn package_final_path(&self, package: &str) -> PathBuf {
        if self.install {
            self.package_install_space()
        } else {
            self.package_devel_space(package)
        }
    }

    /// Global build tool arguments (`make_args` followed by `extra_make_args`)
    pub fn build_tool_args(&self) -> Vec<String> {
        self.make_args
            .iter()
            .chain(self.extra_make_args.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(config: WorkspaceConfig) -> BuildContext {
        BuildContext::from_config(&config, Path::new("/ws"))
    }

    #[test]
    fn test_spaces_are_rooted() {
        let ctx = ctx(WorkspaceConfig::default());
        assert_eq!(ctx.source_space, PathBuf::from("/ws/src"));
        assert_eq!(ctx.package_build_space("foo"), PathBuf::from("/ws/build/foo"));
        assert_eq!(ctx.log_space, PathBuf::from("/ws/logs"));
    }

    #[test]
    fn test_merged_devel_final_path() {
        let ctx = ctx(WorkspaceConfig::default());
        assert_eq!(ctx.package_final_path("foo"), PathBuf::from("/ws/devel"));
    }

    #[test]
    fn test_isolated_devel_final_path() {
        let ctx = ctx(WorkspaceConfig {
            isolate_devel: true,
            ..Default::default()
        });
        assert_eq!(ctx.package_final_path("foo"), PathBuf::from("/ws/devel/foo"));
    }

    #[test]
    fn test_install_final_path() {
        let ctx = ctx(WorkspaceConfig {
            install: true,
            ..Default::default()
        });
        assert_eq!(ctx.package_final_path("foo"), PathBuf::from("/ws/install"));
    }

    #[test]
    fn test_build_tool_args_order() {
        let ctx = ctx(WorkspaceConfig {
            make_args: vec!["-k".to_string()],
            extra_make_args: vec!["VERBOSE=1".to_string()],
            ..Default::default()
        });
        assert_eq!(ctx.build_tool_args(), vec!["-k", "VERBOSE=1"]);
    }
}
