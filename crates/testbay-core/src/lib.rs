//! testbay Core - workspace discovery for the test runner
//!
//! This crate provides the error types, workspace configuration, build
//! context, package scanning and test target resolution used by testbay.

pub mod config;
pub mod context;
pub mod error;
pub mod resolver;
pub mod tools;
pub mod workspace;

pub use context::BuildContext;
pub use error::{ConfigError, DiscoveryError, ResolveError, Result, TestbayError};
pub use resolver::{resolve_all, resolve_package, ConfiguredTestSet, Resolution};
pub use tools::{handle_make_arguments, ExecutableCache, MAKE_EXEC};
pub use workspace::{find_packages, packages_to_test, Export, Package, PackageFilter};
