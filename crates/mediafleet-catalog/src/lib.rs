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

//! In-memory view of every node's media listing.
//!
//! Layout: `model.rs` (`MediaItem`), `store.rs` (`Catalog`, the shared
//! reader/writer-locked index), `filter.rs` (composable filters), `sort.rs`
//! (typed comparators with a validation pass), `pagination.rs`.

pub mod error;
pub mod filter;
pub mod model;
pub mod pagination;
pub mod sort;
pub mod store;

pub use error::{CatalogError, CatalogResult};
pub use filter::{ExcludeFilter, FilterField, MediaFilter};
pub use model::{MediaItem, catalog_order};
pub use pagination::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT, Page, PageRequest};
pub use sort::{SortDirection, SortField, SortOrder, allowed_sort_fields, sort_items};
pub use store::{Catalog, MediaQuery};
