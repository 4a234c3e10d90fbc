//! Workspace packages: manifests and discovery

pub mod manifest;
pub mod scanner;

pub use manifest::{Export, Package};
pub use scanner::{find_packages, package_containing, packages_to_test, PackageFilter};
