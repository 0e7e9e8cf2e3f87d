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

//! Message-bus contract for the mediafleet control plane.
//!
//! Layout: `topics.rs` (routing keys), `payloads.rs` (typed message bodies),
//! `bus.rs` (transport trait and the in-process broadcast bus), `publisher.rs`
//! (bounded publish retry), `dispatch.rs` (explicit handler registration and
//! per-delivery task dispatch).

pub mod bus;
pub mod dispatch;
pub mod error;
pub mod payloads;
pub mod publisher;
pub mod topics;

pub use bus::{LocalBus, MessageBus, MessageStream};
pub use dispatch::{ConsumerRegistry, MessageHandler};
pub use error::{BusError, BusResult};
pub use payloads::{
    ChangesetItem, ChangesetNodeUpdate, ChangesetRequested, MediaChange, MediaDelete, Message,
    MessageEnvelope, MessageId, NodeMediaChanged, NodeReady, TransferNodeUpdate, TransferReady,
    TransferReadyUpdate, TransferRequested,
};
pub use publisher::{Publisher, RetryPolicy};
pub use topics::Topic;
