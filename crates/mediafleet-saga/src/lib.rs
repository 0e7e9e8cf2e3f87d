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

//! Changeset and transfer sagas.
//!
//! A saga record is created with one `false` output per node in its inputs,
//! announced with a single fan-out message, and advanced by per-node replies
//! until it reaches a terminal status. Replies may arrive in any order, twice,
//! or never; a saga missing a reply stays visible in its last state.
//!
//! Layout: `model/` (records and reply application), `store.rs` (record
//! persistence), `archive.rs` (transfer archives on disk), `recipe.rs`
//! (tag-edit recipes), `changeset.rs` and `transfer.rs` (coordinators).

pub mod archive;
pub mod changeset;
pub mod error;
pub mod model;
pub mod recipe;
pub mod store;
pub mod transfer;

mod locks;

pub use archive::ArchiveStore;
pub use changeset::{ChangeRequest, ChangesetCoordinator};
pub use error::{SagaError, SagaResult};
pub use model::{
    Changeset, ChangesetStatus, DiscardReason, ReplyOutcome, SagaRecord, Transfer, TransferStatus,
};
pub use recipe::{UpdateRecipe, apply_change};
pub use store::{FileStore, MemoryStore, RecordStore};
pub use transfer::{TransferCoordinator, TransferDeps, TransferRequest};
