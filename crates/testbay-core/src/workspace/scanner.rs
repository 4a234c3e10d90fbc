//! Workspace Scanner: package discovery and selection

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::{IGNORE_MARKERS, PACKAGE_MANIFEST};
use crate::context::BuildContext;
use crate::error::{DiscoveryError, Result};

use super::manifest::Package;

/// Find every package under `source_root`, in path order.
///
/// A directory holding a manifest is a package and is not searched further.
/// Hidden directories and directories carrying an ignore marker are skipped.
/// A missing source root yields no packages.
#[instrument(skip_all, fields(source = %source_root.display()))]
pub fn find_packages(source_root: &Path) -> Result<Vec<Package>> {
    if !source_root.is_dir() {
        warn!(path = %source_root.display(), "source space does not exist");
        return Ok(Vec::new());
    }

    let mut packages = Vec::new();
    let mut seen: HashMap<String, PathBuf> = HashMap::new();

    let mut walker = WalkDir::new(source_root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    while let Some(entry) = walker.next() {
        let entry = entry.map_err(DiscoveryError::from)?;
        if !entry.file_type().is_dir() {
            continue;
        }

        let dir = entry.path();
        if IGNORE_MARKERS.iter().any(|m| dir.join(m).exists()) {
            debug!(path = %dir.display(), "ignoring directory");
            walker.skip_current_dir();
            continue;
        }

        let manifest = dir.join(PACKAGE_MANIFEST);
        if !manifest.is_file() {
            continue;
        }

        let package = Package::load(&manifest)?;
        if let Some(first) = seen.get(&package.name) {
            return Err(DiscoveryError::DuplicatePackage {
                name: package.name.clone(),
                first: first.clone(),
                second: package.path.clone(),
            }
            .into());
        }
        debug!(package = %package.name, path = %dir.display(), "found package");
        seen.insert(package.name.clone(), package.path.clone());
        packages.push(package);
        walker.skip_current_dir();
    }

    info!(count = packages.len(), "discovered packages");
    Ok(packages)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Selection rules applied to discovered packages
#[derive(Debug, Clone, Default)]
pub struct PackageFilter {
    /// Explicit package names; when non-empty the allow/deny lists are ignored
    pub names: Vec<String>,
    /// Allow list (empty = everything)
    pub allow: Vec<String>,
    /// Deny list
    pub deny: Vec<String>,
    /// `build_type` export values that can be tested
    pub supported_build_types: Vec<String>,
}

impl PackageFilter {
    /// Filter using the workspace allow/deny lists and explicit names
    pub fn from_context(ctx: &BuildContext, names: &[String]) -> Self {
        Self {
            names: names.to_vec(),
            allow: ctx.allow.clone(),
            deny: ctx.deny.clone(),
            supported_build_types: ctx.supported_build_types.clone(),
        }
    }

    /// Whether a package passes the name / allow / deny rules
    fn selects(&self, package: &Package) -> bool {
        if !self.names.is_empty() {
            return self.names.contains(&package.name);
        }
        if !self.allow.is_empty() && !self.allow.contains(&package.name) {
            return false;
        }
        !self.deny.contains(&package.name)
    }

    /// Whether the package's exports allow it to be tested
    fn testable(&self, package: &Package) -> bool {
        if package.is_metapackage() {
            debug!(package = %package.name, "skipping metapackage");
            return false;
        }
        match package.build_type() {
            Some(bt) if !self.supported_build_types.iter().any(|s| s == bt) => {
                debug!(package = %package.name, build_type = bt, "skipping unsupported build type");
                false
            }
            _ => true,
        }
    }

    /// Apply the filter, keeping discovery order
    pub fn apply(&self, packages: Vec<Package>) -> Vec<Package> {
        packages
            .into_iter()
            .filter(|p| self.selects(p))
            .filter(|p| self.testable(p))
            .collect()
    }
}

/// Packages eligible for testing in the context's source space.
///
/// An empty result is valid; callers decide how to report it.
#[instrument(skip_all, fields(explicit = names.len()))]
pub fn packages_to_test(ctx: &BuildContext, names: &[String]) -> Result<Vec<Package>> {
    let discovered = find_packages(&ctx.source_space)?;
    let selected = PackageFilter::from_context(ctx, names).apply(discovered);
    info!(count = selected.len(), "selected packages to test");
    Ok(selected)
}

/// The package whose source directory contains `dir`, if any
pub fn package_containing<'a>(packages: &'a [Package], dir: &Path) -> Option<&'a Package> {
    packages
        .iter()
        .filter(|p| dir.starts_with(&p.path))
        .max_by_key(|p| p.path.components().count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkspaceConfig;
    use tempfile::TempDir;

    fn write_package(root: &Path, rel: &str, name: &str, exports: &str) {
        let dir = root.join(rel);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("package.xml"),
            format!(
                "<package format=\"2\">\n  <name>{}</name>\n  <export>{}</export>\n</package>\n",
                name, exports
            ),
        )
        .unwrap();
    }

    fn pkg(name: &str, exports: Vec<(&str, &str)>) -> Package {
        Package {
            name: name.to_string(),
            path: PathBuf::from(format!("/ws/src/{}", name)),
            manifest_path: PathBuf::from(format!("/ws/src/{}/package.xml", name)),
            exports: exports
                .into_iter()
                .map(|(t, c)| crate::workspace::Export {
                    tagname: t.to_string(),
                    content: c.to_string(),
                })
                .collect(),
        }
    }

    fn names(packages: &[Package]) -> Vec<&str> {
        packages.iter().map(|p| p.name.as_str()).collect()
    }

    fn filter(names: &[&str], allow: &[&str], deny: &[&str]) -> PackageFilter {
        let s = |v: &[&str]| v.iter().map(|x| x.to_string()).collect();
        PackageFilter {
            names: s(names),
            allow: s(allow),
            deny: s(deny),
            supported_build_types: vec!["catkin".to_string()],
        }
    }

    #[test]
    fn test_find_packages_in_path_order() {
        let temp = TempDir::new().unwrap();
        write_package(temp.path(), "zeta", "zeta", "");
        write_package(temp.path(), "alpha", "alpha", "");
        write_package(temp.path(), "group/mid", "mid", "");

        let found = find_packages(temp.path()).unwrap();
        assert_eq!(names(&found), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_find_packages_excludes_subspaces() {
        let temp = TempDir::new().unwrap();
        write_package(temp.path(), "outer", "outer", "");
        write_package(temp.path(), "outer/vendored", "vendored", "");

        let found = find_packages(temp.path()).unwrap();
        assert_eq!(names(&found), vec!["outer"]);
    }

    #[test]
    fn test_find_packages_skips_ignored_and_hidden() {
        let temp = TempDir::new().unwrap();
        write_package(temp.path(), "kept", "kept", "");
        write_package(temp.path(), "ignored/pkg", "ignored_pkg", "");
        std::fs::write(temp.path().join("ignored/CATKIN_IGNORE"), "").unwrap();
        write_package(temp.path(), ".hidden/pkg", "hidden_pkg", "");

        let found = find_packages(temp.path()).unwrap();
        assert_eq!(names(&found), vec!["kept"]);
    }

    #[test]
    fn test_find_packages_duplicate_name() {
        let temp = TempDir::new().unwrap();
        write_package(temp.path(), "a", "same", "");
        write_package(temp.path(), "b", "same", "");

        let err = find_packages(temp.path()).unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_find_packages_missing_source_space() {
        let temp = TempDir::new().unwrap();
        let found = find_packages(&temp.path().join("nope")).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_empty_allow_list_includes_everything_not_denied() {
        let packages = vec![pkg("a", vec![]), pkg("b", vec![]), pkg("c", vec![])];
        let selected = filter(&[], &[], &["b"]).apply(packages);
        assert_eq!(names(&selected), vec!["a", "c"]);
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let packages = vec![pkg("a", vec![]), pkg("b", vec![])];
        let selected = filter(&[], &["a", "b"], &["b"]).apply(packages);
        assert_eq!(names(&selected), vec!["a"]);
    }

    #[test]
    fn test_explicit_names_keep_discovery_order() {
        let packages = vec![pkg("a", vec![]), pkg("b", vec![]), pkg("c", vec![])];
        let selected = filter(&["c", "a"], &["b"], &["a"]).apply(packages);
        assert_eq!(names(&selected), vec!["a", "c"]);
    }

    #[test]
    fn test_metapackage_and_foreign_build_type_dropped() {
        let packages = vec![
            pkg("meta", vec![("metapackage", "")]),
            pkg("py", vec![("build_type", "ament_python")]),
            pkg("cat", vec![("build_type", "catkin")]),
            pkg("plain", vec![]),
        ];
        let selected = filter(&[], &[], &[]).apply(packages);
        assert_eq!(names(&selected), vec!["cat", "plain"]);
    }

    #[test]
    fn test_packages_to_test_uses_context_lists() {
        let temp = TempDir::new().unwrap();
        write_package(&temp.path().join("src"), "a", "a", "");
        write_package(&temp.path().join("src"), "b", "b", "");
        write_package(&temp.path().join("src"), "m", "m", "<metapackage/>");

        let config = WorkspaceConfig {
            deny: vec!["b".to_string()],
            ..Default::default()
        };
        let ctx = BuildContext::from_config(&config, temp.path());

        let selected = packages_to_test(&ctx, &[]).unwrap();
        assert_eq!(names(&selected), vec!["a"]);
    }

    #[test]
    fn test_package_containing_prefers_deepest() {
        let packages = vec![pkg("a", vec![]), pkg("b", vec![])];
        let found = package_containing(&packages, Path::new("/ws/src/b/include/b"));
        assert_eq!(found.map(|p| p.name.as_str()), Some("b"));
        assert!(package_containing(&packages, Path::new("/elsewhere")).is_none());
    }
}
