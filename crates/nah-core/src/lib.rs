//! Composition root for nah.
//!
//! [`Host`] wires the pipeline together: parse and validate a manifest,
//! resolve its NAK requirement against a catalog, materialize the chosen
//! NAK into the cache, and compose the launch contract. It also installs,
//! lists and removes application packages under the apps root, pinning the
//! NAK chosen at install time, and routes Ctrl-C into the materializer's
//! cancellation token.

pub mod concurrency;
pub mod host;
pub mod record;

pub use concurrency::{install_signal_handler, shutdown_requested};
pub use host::{Host, InstalledApp};
pub use record::InstallRecord;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] nah_schema::ManifestError),
    #[error("config error: {0}")]
    Config(#[from] nah_schema::ConfigError),
    #[error("package error: {0}")]
    Package(#[from] nah_package::PackageError),
    #[error("resolve error: {0}")]
    Resolve(#[from] nah_resolve::ResolveError),
    #[error("catalog error: {0}")]
    Catalog(#[from] nah_resolve::CatalogError),
    #[error("cache error: {0}")]
    Materialize(#[from] nah_materialize::MaterializeError),
    #[error("contract error: {0}")]
    Contract(#[from] nah_compose::ContractError),
    #[error("expected a {expected} package, got {actual}")]
    WrongPackageFormat {
        expected: nah_package::PackageFormat,
        actual: nah_package::PackageFormat,
    },
    #[error("app already installed at {0}")]
    AppAlreadyInstalled(PathBuf),
    #[error("app not installed: {0}")]
    AppNotInstalled(String),
    #[error("invalid install record {path}: {reason}")]
    InvalidRecord { path: PathBuf, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
