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

//! Fan-out download queue.
//!
//! Layout: `queue.rs` (concurrent per-node fetch with first-error
//! cancellation), `merge.rs` (per-node archives into one), `error.rs`.

pub mod error;
pub mod merge;
pub mod queue;

pub use error::{DownloadError, DownloadResult, NodeFailure};
pub use merge::merge_archives;
pub use queue::{DownloadJob, DownloadQueue, DownloadSource, media_jobs};
