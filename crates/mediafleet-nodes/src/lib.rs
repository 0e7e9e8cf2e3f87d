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

//! Fleet membership and per-node access.
//!
//! Layout: `model.rs` (`NodeConfig`), `registry.rs` (registry seam and node id
//! derivation), `consul.rs` (HTTP registry client), `client.rs` (per-node
//! content client), `watcher.rs` (connectivity watcher).

pub mod client;
pub mod consul;
pub mod error;
pub mod model;
pub mod registry;
pub mod watcher;

pub use client::{HttpContentClient, NodeContentClient};
pub use consul::{ConsulRegistry, ServiceRegistration};
pub use error::{NodeError, NodeResult};
pub use model::NodeConfig;
pub use registry::{NodeRegistry, ServiceWatch, manager_node_id};
pub use watcher::{ConnectivityWatcher, NodeRemoved};
