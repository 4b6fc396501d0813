//! Operator Lifecycle Manager integration
//!
//! - [`catalog`]: custom CatalogSource for the requested registry image
//! - [`installer`]: subscription driven operator installs
//! - [`package_manifest`]: channel and CSV lookups on PackageManifests
//! - [`tags`]: downstream index tag resolution against quay

pub mod catalog;
pub mod installer;
pub mod package_manifest;
pub mod tags;

pub use catalog::{select_image, CatalogImage, CatalogSourceManager, OPERATOR_CATALOG_SOURCE};
pub use installer::{
    dependent_operators, InstallReport, InstallState, OperatorInstaller, OperatorRequest,
};
pub use package_manifest::{catalog_selector, PackageManifest, MARKETPLACE_NAMESPACE};
pub use tags::QuayTagResolver;
