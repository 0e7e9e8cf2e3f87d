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

//! Mediafleet manager wiring.
//!
//! Layout: `bootstrap.rs` (service wiring and the boot sequence), `sync.rs`
//! (catalog reconciliation), `media.rs` (query and media operations),
//! `handlers.rs` (bus handlers for consumed topics).

/// Application bootstrap and service wiring.
pub mod bootstrap;
/// Application error types.
pub mod error;
/// Bus handlers for the consumed topics.
pub mod handlers;
/// Catalog queries and media operations.
pub mod media;
/// Catalog reconciliation against the fleet.
pub mod sync;

pub use bootstrap::{
    ServiceDeps, Services, WATCH_RETRY_DELAY, run_app, spawn_expiry_sweep,
    spawn_removal_subscriber,
};
pub use error::{AppError, AppResult};
pub use handlers::{HandlerContext, register_handlers};
pub use media::{MediaRef, MediaRequest, MediaService};
pub use sync::SyncCoordinator;
