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

//! Shared test helpers used across the workspace's suites.
//! Layout: fixtures.rs (nodes, items, archives), fakes.rs (in-memory registry and content client).

pub mod fakes;
pub mod fixtures;

pub use fakes::{FakeContentClient, FakeRegistry};
pub use fixtures::{archive_entries, media_item, mp3_item, node, zip_archive};
