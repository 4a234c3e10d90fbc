//! External build tool lookup and argument handling

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use tracing::debug;

use crate::error::ConfigError;

/// Native build tool invoked for test targets
pub const MAKE_EXEC: &str = "make";

/// Per-run cache of resolved executable paths.
///
/// Constructed by the caller and shared by reference; lookups from several
/// workers only take the write lock on a miss.
#[derive(Debug, Default)]
pub struct ExecutableCache {
    paths: RwLock<HashMap<String, PathBuf>>,
}

impl ExecutableCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `program` on PATH, caching the result
    pub fn resolve(&self, program: &str) -> Result<PathBuf, ConfigError> {
        if let Some(path) = self
            .paths
            .read()
            .ok()
            .and_then(|paths| paths.get(program).cloned())
        {
            return Ok(path);
        }

        let path = which::which(program)
            .map_err(|_| ConfigError::ExecutableNotFound(program.to_string()))?;
        debug!(program, path = %path.display(), "resolved executable");

        if let Ok(mut paths) = self.paths.write() {
            paths.insert(program.to_string(), path.clone());
        }
        Ok(path)
    }

    /// Pre-seed a program path (used when the tool location is known)
    pub fn insert(&self, program: impl Into<String>, path: impl Into<PathBuf>) {
        if let Ok(mut paths) = self.paths.write() {
            paths.insert(program.into(), path.into());
        }
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.paths.read().map(|p| p.len()).unwrap_or(0)
    }

    /// Whether nothing has been resolved yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default number of build jobs when nothing else is specified
pub fn default_job_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Whether an argument list already carries a job or load limit
fn has_job_flags<'a>(args: impl IntoIterator<Item = &'a str>) -> bool {
    args.into_iter().any(|arg| {
        arg == "-j"
            || arg == "-l"
            || arg.starts_with("--jobs")
            || arg.starts_with("--load-average")
            || (arg.starts_with("-j") && arg[2..].chars().all(|c| c.is_ascii_digit()))
            || (arg.starts_with("-l") && arg[2..].chars().all(|c| c.is_ascii_digit() || c == '.'))
    })
}

/// Finalize native build tool arguments.
///
/// Explicit `-j`/`-l` flags in `args` win; otherwise job flags present in
/// `makeflags` (the `MAKEFLAGS` value) are respected and nothing is added;
/// otherwise `-j<jobs>` is appended, defaulting to the available parallelism.
pub fn handle_make_arguments(
    args: Vec<String>,
    jobs: Option<usize>,
    makeflags: Option<&str>,
) -> Vec<String> {
    let mut args = args;

    if has_job_flags(args.iter().map(String::as_str)) {
        return args;
    }

    if let Some(flags) = makeflags {
        if has_job_flags(flags.split_whitespace()) {
            debug!(makeflags = flags, "respecting job flags from MAKEFLAGS");
            return args;
        }
    }

    let jobs = jobs.unwrap_or_else(default_job_count).max(1);
    args.push(format!("-j{}", jobs));
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_appends_jobs() {
        let args = handle_make_arguments(strings(&["run_tests_foo_unit"]), Some(3), None);
        assert_eq!(args, strings(&["run_tests_foo_unit", "-j3"]));
    }

    #[test]
    fn test_keeps_explicit_jobs() {
        let args = handle_make_arguments(strings(&["-j2", "target"]), Some(8), None);
        assert_eq!(args, strings(&["-j2", "target"]));

        let args = handle_make_arguments(strings(&["--jobs=2"]), Some(8), None);
        assert_eq!(args, strings(&["--jobs=2"]));
    }

    #[test]
    fn test_respects_makeflags() {
        let args = handle_make_arguments(strings(&["t"]), Some(8), Some("-j4 -l2"));
        assert_eq!(args, strings(&["t"]));
    }

    #[test]
    fn test_unrelated_flags_not_mistaken_for_jobs() {
        let args = handle_make_arguments(strings(&["-k", "-link"]), Some(2), Some("-s"));
        assert_eq!(args, strings(&["-k", "-link", "-j2"]));
    }

    #[test]
    fn test_zero_jobs_clamped() {
        let args = handle_make_arguments(Vec::new(), Some(0), None);
        assert_eq!(args, strings(&["-j1"]));
    }

    #[test]
    fn test_cache_insert_and_resolve() {
        let cache = ExecutableCache::new();
        assert!(cache.is_empty());
        cache.insert("fake-make", "/opt/bin/fake-make");
        assert_eq!(
            cache.resolve("fake-make").unwrap(),
            PathBuf::from("/opt/bin/fake-make")
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_missing_program() {
        let cache = ExecutableCache::new();
        let err = cache
            .resolve("definitely-not-a-real-program-testbay")
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
