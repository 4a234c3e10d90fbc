//! Test Target Resolver: find configured test targets in build output

use std::collections::BTreeSet;
use std::path::Path;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::BUILD_METADATA_DIR;
use crate::context::BuildContext;
use crate::error::ResolveError;
use crate::workspace::Package;

/// Prefix of generated per-test build targets
pub const RUN_TESTS_PREFIX: &str = "run_tests";

/// Name of the generated build target that runs `target` of `package`
pub fn run_tests_target(package: &str, target: &str) -> String {
    format!("{}_{}_{}", RUN_TESTS_PREFIX, package, target)
}

/// A package together with the test targets configured for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfiguredTestSet {
    /// The package
    pub package: Package,
    /// Distinct target names, sorted; never empty
    pub targets: Vec<String>,
}

impl ConfiguredTestSet {
    /// Package name shortcut
    pub fn name(&self) -> &str {
        &self.package.name
    }

    /// Generated build target names for every test in the set
    pub fn build_targets(&self) -> Vec<String> {
        self.targets
            .iter()
            .map(|t| run_tests_target(&self.package.name, t))
            .collect()
    }
}

/// Resolve the test targets configured for one package.
///
/// Returns `Ok(None)` when the package is configured but defines no tests, and
/// [`ResolveError::Unconfigured`] when its build metadata directory is missing.
pub fn resolve_package(
    ctx: &BuildContext,
    package: &Package,
) -> Result<Option<ConfiguredTestSet>, ResolveError> {
    let metadata_dir = ctx
        .package_build_space(&package.name)
        .join(BUILD_METADATA_DIR);

    if !metadata_dir.is_dir() {
        return Err(ResolveError::Unconfigured {
            package: package.name.clone(),
            metadata_dir,
        });
    }

    let targets = scan_targets(&metadata_dir, &package.name)?;
    if targets.is_empty() {
        debug!(package = %package.name, "package defines no tests");
        return Ok(None);
    }

    debug!(package = %package.name, targets = targets.len(), "resolved test targets");
    Ok(Some(ConfiguredTestSet {
        package: package.clone(),
        targets,
    }))
}

/// Extract target names from `run_tests_<package>_<target>.dir` children
fn scan_targets(metadata_dir: &Path, package: &str) -> Result<Vec<String>, ResolveError> {
    let pattern = format!(
        r"^{}_{}_(.+)\.dir$",
        RUN_TESTS_PREFIX,
        regex::escape(package)
    );
    let re = Regex::new(&pattern).map_err(|e| ResolveError::Io {
        package: package.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
    })?;

    let io_err = |source| ResolveError::Io {
        package: package.to_string(),
        source,
    };

    let mut targets = BTreeSet::new();
    for entry in std::fs::read_dir(metadata_dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(caps) = re.captures(name) {
            targets.insert(caps[1].to_string());
        }
    }

    Ok(targets.into_iter().collect())
}

/// Outcome of resolving a set of packages.
///
/// Packages without tests are absent from both fields; unconfigured packages
/// are kept separately so they are never mistaken for "no tests".
#[derive(Debug, Default)]
pub struct Resolution {
    /// Packages with at least one configured test target, in input order
    pub sets: Vec<ConfiguredTestSet>,
    /// Packages that failed to resolve
    pub errors: Vec<ResolveError>,
}

impl Resolution {
    /// Whether every package resolved
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Keep only the named targets; packages left without targets are dropped
    pub fn filter_targets(mut self, names: &[String]) -> Self {
        if names.is_empty() {
            return self;
        }
        self.sets = self
            .sets
            .into_iter()
            .filter_map(|mut set| {
                set.targets.retain(|t| names.contains(t));
                if set.targets.is_empty() {
                    None
                } else {
                    Some(set)
                }
            })
            .collect();
        self
    }

    /// `(package, targets)` pairs sorted by package then target name
    pub fn listing(&self) -> Vec<(String, Vec<String>)> {
        let mut listing: Vec<(String, Vec<String>)> = self
            .sets
            .iter()
            .map(|set| {
                let mut targets = set.targets.clone();
                targets.sort();
                (set.package.name.clone(), targets)
            })
            .collect();
        listing.sort_by(|a, b| a.0.cmp(&b.0));
        listing
    }
}

/// Resolve every package, collecting failures instead of stopping at the first
#[instrument(skip_all, fields(packages = packages.len()))]
pub fn resolve_all(ctx: &BuildContext, packages: &[Package]) -> Resolution {
    let mut resolution = Resolution::default();

    for package in packages {
        match resolve_package(ctx, package) {
            Ok(Some(set)) => resolution.sets.push(set),
            Ok(None) => {}
            Err(e) => {
                warn!(package = %package.name, error = %e, "failed to resolve tests");
                resolution.errors.push(e);
            }
        }
    }

    info!(
        with_tests = resolution.sets.len(),
        failed = resolution.errors.len(),
        "resolved test targets"
    );
    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkspaceConfig;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn package(name: &str) -> Package {
        Package {
            name: name.to_string(),
            path: PathBuf::from(format!("src/{}", name)),
            manifest_path: PathBuf::from(format!("src/{}/package.xml", name)),
            exports: Vec::new(),
        }
    }

    fn context(root: &Path) -> BuildContext {
        BuildContext::from_config(&WorkspaceConfig::default(), root)
    }

    fn configure(root: &Path, name: &str, entries: &[&str]) {
        let metadata = root.join("build").join(name).join("CMakeFiles");
        std::fs::create_dir_all(&metadata).unwrap();
        for entry in entries {
            std::fs::create_dir_all(metadata.join(entry)).unwrap();
        }
    }

    #[test]
    fn test_resolves_marker_directories() {
        let temp = TempDir::new().unwrap();
        configure(
            temp.path(),
            "foo",
            &[
                "run_tests_foo_unit.dir",
                "run_tests_foo_integration.dir",
                "foo_node.dir",
                "run_tests.dir",
                "run_tests_bar_unit.dir",
            ],
        );

        let set = resolve_package(&context(temp.path()), &package("foo"))
            .unwrap()
            .unwrap();
        assert_eq!(set.targets, vec!["integration", "unit"]);
        assert_eq!(
            set.build_targets(),
            vec!["run_tests_foo_integration", "run_tests_foo_unit"]
        );
    }

    #[test]
    fn test_package_name_is_escaped() {
        let temp = TempDir::new().unwrap();
        configure(temp.path(), "a.b", &["run_tests_aXb_t.dir", "run_tests_a.b_t.dir"]);

        let set = resolve_package(&context(temp.path()), &package("a.b"))
            .unwrap()
            .unwrap();
        assert_eq!(set.targets, vec!["t"]);
    }

    #[test]
    fn test_zero_tests_is_not_unconfigured() {
        let temp = TempDir::new().unwrap();
        configure(temp.path(), "quiet", &["quiet_lib.dir"]);

        let result = resolve_package(&context(temp.path()), &package("quiet")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_unconfigured_is_distinct_error() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("build/raw")).unwrap();

        let err = resolve_package(&context(temp.path()), &package("raw")).unwrap_err();
        match err {
            ResolveError::Unconfigured {
                package,
                metadata_dir,
            } => {
                assert_eq!(package, "raw");
                assert!(metadata_dir.ends_with("build/raw/CMakeFiles"));
            }
            other => panic!("expected unconfigured, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_all_separates_outcomes() {
        let temp = TempDir::new().unwrap();
        configure(temp.path(), "a", &["run_tests_a_t1.dir"]);
        configure(temp.path(), "empty", &[]);

        let resolution = resolve_all(
            &context(temp.path()),
            &[package("a"), package("b"), package("empty")],
        );

        assert_eq!(resolution.listing(), vec![("a".to_string(), vec!["t1".to_string()])]);
        assert!(!resolution.is_complete());
        assert_eq!(resolution.errors.len(), 1);
        assert!(matches!(
            &resolution.errors[0],
            ResolveError::Unconfigured { package, .. } if package == "b"
        ));
    }

    #[test]
    fn test_listing_sorted_by_package() {
        let temp = TempDir::new().unwrap();
        configure(temp.path(), "zed", &["run_tests_zed_b.dir", "run_tests_zed_a.dir"]);
        configure(temp.path(), "abc", &["run_tests_abc_x.dir"]);

        let resolution = resolve_all(&context(temp.path()), &[package("zed"), package("abc")]);
        let listing = resolution.listing();
        assert_eq!(listing[0].0, "abc");
        assert_eq!(listing[1], ("zed".to_string(), vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_filter_targets_drops_emptied_packages() {
        let temp = TempDir::new().unwrap();
        configure(temp.path(), "a", &["run_tests_a_unit.dir", "run_tests_a_slow.dir"]);
        configure(temp.path(), "b", &["run_tests_b_slow.dir"]);

        let resolution = resolve_all(&context(temp.path()), &[package("a"), package("b")])
            .filter_targets(&["unit".to_string()]);

        assert_eq!(resolution.sets.len(), 1);
        assert_eq!(resolution.sets[0].targets, vec!["unit"]);
    }
}
