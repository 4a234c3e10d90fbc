//! Dependency environment resolution for package jobs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use testbay_core::workspace::find_packages;
use testbay_core::{BuildContext, ConfigError, DiscoveryError, TestbayError};

use crate::job::{EnvironmentMutation, JobEnv, StageError};

/// Script a result space provides to run commands inside its environment
pub const ENV_SCRIPT: &str = "env.sh";

/// Cache of resolved result space environments, keyed by result space path.
///
/// Lives for one run and is shared between jobs; each entry holds only the
/// variables the result space adds or changes.
#[derive(Debug, Default)]
pub struct EnvCache {
    entries: RwLock<HashMap<PathBuf, JobEnv>>,
}

impl EnvCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, path: &Path) -> Option<JobEnv> {
        self.entries.read().ok()?.get(path).cloned()
    }

    fn insert(&self, path: PathBuf, env: JobEnv) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(path, env);
        }
    }

    /// Number of cached result spaces
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves the environment a result space exports to its dependents
#[derive(Debug, Clone, Default)]
pub struct EnvironmentResolver {
    cache: Option<Arc<EnvCache>>,
}

impl EnvironmentResolver {
    /// Resolver without caching
    pub fn new() -> Self {
        Self { cache: None }
    }

    /// Resolver sharing `cache` with other users
    pub fn with_cache(cache: Arc<EnvCache>) -> Self {
        Self { cache: Some(cache) }
    }

    /// Resolver configured from the build context's cache setting
    pub fn for_context(ctx: &BuildContext) -> Self {
        if ctx.use_env_cache {
            Self::with_cache(Arc::new(EnvCache::new()))
        } else {
            Self::new()
        }
    }

    /// Variables that `result_space` adds or changes relative to `base_env`.
    ///
    /// A result space without an environment script contributes nothing.
    #[instrument(skip_all, fields(path = %result_space.display()))]
    pub async fn resultspace_environment(
        &self,
        result_space: &Path,
        base_env: &JobEnv,
    ) -> Result<JobEnv, StageError> {
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(result_space)) {
            debug!("using cached environment");
            return Ok(cached);
        }

        let script = result_space.join(ENV_SCRIPT);
        if !script.is_file() {
            debug!(script = %script.display(), "no environment script, nothing to load");
            return Ok(JobEnv::new());
        }

        let output = Command::new(&script)
            .args(["env", "-0"])
            .env_clear()
            .envs(base_env)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| StageError::Environment {
                path: script.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(StageError::Environment {
                path: script,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let loaded = parse_env_output(&output.stdout);
        let changed: JobEnv = loaded
            .into_iter()
            .filter(|(k, v)| base_env.get(k) != Some(v))
            .collect();
        debug!(changed = changed.len(), "loaded result space environment");

        if let Some(cache) = &self.cache {
            cache.insert(result_space.to_path_buf(), changed.clone());
        }
        Ok(changed)
    }
}

/// Parse NUL-separated `KEY=value` records
fn parse_env_output(bytes: &[u8]) -> JobEnv {
    String::from_utf8_lossy(bytes)
        .split('\0')
        .filter_map(|record| {
            let record = record.trim_start_matches('\n');
            let (key, value) = record.split_once('=')?;
            if key.is_empty() {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect()
}

/// Loads a package's dependency environment into a job environment
#[derive(Debug, Clone)]
pub struct LoadEnv {
    /// Package the environment is loaded for
    pub package: String,
    /// Result space whose environment is loaded
    pub result_space: PathBuf,
    /// Whether the workspace uses an install layout
    pub install: bool,
    /// Shared resolver
    pub resolver: EnvironmentResolver,
}

impl LoadEnv {
    /// Mutation for `package` in `ctx`
    pub fn for_package(ctx: &BuildContext, package: &str, resolver: EnvironmentResolver) -> Self {
        Self {
            package: package.to_string(),
            result_space: ctx.package_final_path(package),
            install: ctx.install,
            resolver,
        }
    }
}

#[async_trait]
impl EnvironmentMutation for LoadEnv {
    async fn apply(&self, env: &mut JobEnv) -> Result<(), StageError> {
        if self.install {
            return Err(ConfigError::InstallSpaceUnsupported.into());
        }
        let vars = self
            .resolver
            .resultspace_environment(&self.result_space, env)
            .await?;
        debug!(package = %self.package, vars = vars.len(), "applied dependency environment");
        env.extend(vars);
        Ok(())
    }
}

/// Errors from resolving a single package's test environment
#[derive(Debug, thiserror::Error)]
pub enum TestEnvError {
    /// Workspace discovery failed
    #[error(transparent)]
    Workspace(#[from] TestbayError),

    /// Loading the environment failed
    #[error(transparent)]
    Stage(#[from] StageError),
}

/// Environment a package's tests run with: the process environment plus the
/// package's dependency environment. Returns sorted `KEY=value` lines.
pub async fn test_environment(
    ctx: &BuildContext,
    package_name: &str,
    resolver: EnvironmentResolver,
) -> Result<Vec<String>, TestEnvError> {
    let packages = find_packages(&ctx.source_space)?;
    let package = packages
        .iter()
        .find(|p| p.name == package_name)
        .ok_or_else(|| {
            TestbayError::from(DiscoveryError::PackageNotInWorkspace(package_name.to_string()))
        })?;

    let mut env: JobEnv = std::env::vars().collect();
    LoadEnv::for_package(ctx, &package.name, resolver)
        .apply(&mut env)
        .await?;

    Ok(format_env(&env))
}

/// Render an environment as sorted `KEY=value` lines
pub fn format_env(env: &JobEnv) -> Vec<String> {
    let mut lines: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    lines.sort();
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;
    use testbay_core::config::WorkspaceConfig;

    fn write_env_script(dir: &Path, exports: &str) {
        std::fs::create_dir_all(dir).unwrap();
        let script = dir.join(ENV_SCRIPT);
        std::fs::write(&script, format!("#!/bin/sh\n{}\nexec \"$@\"\n", exports)).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn base_env() -> JobEnv {
        let mut env = JobEnv::new();
        env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
        env.insert("KEEP".to_string(), "same".to_string());
        env
    }

    #[test]
    fn test_parse_env_output() {
        let env = parse_env_output(b"A=1\0B=x=y\0\0=bad\0");
        assert_eq!(env.get("A").map(String::as_str), Some("1"));
        assert_eq!(env.get("B").map(String::as_str), Some("x=y"));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_format_env_sorted() {
        let mut env = JobEnv::new();
        env.insert("B".to_string(), "2".to_string());
        env.insert("A".to_string(), "1".to_string());
        assert_eq!(format_env(&env), vec!["A=1", "B=2"]);
    }

    #[tokio::test]
    async fn test_missing_script_contributes_nothing() {
        let temp = TempDir::new().unwrap();
        let resolver = EnvironmentResolver::new();
        let env = resolver
            .resultspace_environment(temp.path(), &base_env())
            .await
            .unwrap();
        assert!(env.is_empty());
    }

    #[tokio::test]
    async fn test_loads_changed_variables_only() {
        let temp = TempDir::new().unwrap();
        write_env_script(temp.path(), "export ROS_PACKAGE_PATH=/ws/src\nexport KEEP=same");

        let resolver = EnvironmentResolver::new();
        let env = resolver
            .resultspace_environment(temp.path(), &base_env())
            .await
            .unwrap();
        assert_eq!(env.get("ROS_PACKAGE_PATH").map(String::as_str), Some("/ws/src"));
        assert!(!env.contains_key("KEEP"));
    }

    #[tokio::test]
    async fn test_cache_reused_across_lookups() {
        let temp = TempDir::new().unwrap();
        write_env_script(temp.path(), "export FOO=1");

        let cache = Arc::new(EnvCache::new());
        let resolver = EnvironmentResolver::with_cache(cache.clone());
        resolver
            .resultspace_environment(temp.path(), &base_env())
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);

        // A cached entry survives the script disappearing
        std::fs::remove_file(temp.path().join(ENV_SCRIPT)).unwrap();
        let env = resolver
            .resultspace_environment(temp.path(), &base_env())
            .await
            .unwrap();
        assert_eq!(env.get("FOO").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_failing_script_is_error() {
        let temp = TempDir::new().unwrap();
        write_env_script(temp.path(), "echo broken >&2\nexit 3");

        let err = EnvironmentResolver::new()
            .resultspace_environment(temp.path(), &base_env())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[tokio::test]
    async fn test_load_env_rejects_install_layout() {
        let config = WorkspaceConfig {
            install: true,
            ..Default::default()
        };
        let ctx = BuildContext::from_config(&config, Path::new("/ws"));
        let stage = LoadEnv::for_package(&ctx, "foo", EnvironmentResolver::new());

        let mut env = base_env();
        let err = stage.apply(&mut env).await.unwrap_err();
        assert!(matches!(
            err,
            StageError::Config(ConfigError::InstallSpaceUnsupported)
        ));
        assert_eq!(env, base_env());
    }

    #[tokio::test]
    async fn test_load_env_extends_job_env() {
        let temp = TempDir::new().unwrap();
        write_env_script(&temp.path().join("devel"), "export CMAKE_PREFIX_PATH=/ws/devel");
        let ctx = BuildContext::from_config(&WorkspaceConfig::default(), temp.path());

        let mut env = base_env();
        LoadEnv::for_package(&ctx, "foo", EnvironmentResolver::new())
            .apply(&mut env)
            .await
            .unwrap();
        assert_eq!(
            env.get("CMAKE_PREFIX_PATH").map(String::as_str),
            Some("/ws/devel")
        );
        assert_eq!(env.get("KEEP").map(String::as_str), Some("same"));
    }

    #[tokio::test]
    async fn test_environment_for_unknown_package() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("src")).unwrap();
        let ctx = BuildContext::from_config(&WorkspaceConfig::default(), temp.path());

        let err = test_environment(&ctx, "ghost", EnvironmentResolver::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Package `ghost` not in workspace"));
    }

    #[tokio::test]
    async fn test_environment_for_known_package() {
        let temp = TempDir::new().unwrap();
        let pkg = temp.path().join("src/foo");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("package.xml"), "<package><name>foo</name></package>").unwrap();
        write_env_script(&temp.path().join("devel"), "export TESTBAY_MARKER=yes");
        let ctx = BuildContext::from_config(&WorkspaceConfig::default(), temp.path());

        let lines = test_environment(&ctx, "foo", EnvironmentResolver::new())
            .await
            .unwrap();
        assert!(lines.contains(&"TESTBAY_MARKER=yes".to_string()));
        let mut sorted = lines.clone();
        sorted.sort();
        assert_eq!(lines, sorted);
    }
}
