#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! File-backed configuration for the mediafleet manager.
//!
//! Layout: `model.rs` (typed sections and defaults), `loader.rs` (YAML parsing
//! and environment overrides), `validate.rs` (field checks).

pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{DEFAULT_CONFIG_PATH, apply_overrides, from_yaml_str, load, load_with};
pub use model::{
    BusConfig, LoggingSettings, ManagerConfig, NodeClientConfig, RegistryConfig, StorageConfig,
    TransferConfig,
};
pub use validate::validate;
