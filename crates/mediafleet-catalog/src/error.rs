//! # Design
//!
//! - Every catalog error is a caller mistake (bad field, bad page) and maps to a
//!   client error; none is retried.
//! - Messages are constant; the offending values travel in fields.

use thiserror::Error;

/// Result alias for catalog queries.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Validation errors raised by catalog queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Sort expression was not `asc(field)` or `desc(field)`.
    #[error("malformed sort expression")]
    MalformedSort {
        /// Raw expression.
        value: String,
    },
    /// Sort field name is not known for any media type.
    #[error("unknown sort field")]
    UnknownSortField {
        /// Raw field name.
        value: String,
    },
    /// Sort field exists but not for the extension of a candidate item.
    #[error("sort field not supported for media type")]
    UnsupportedSortField {
        /// Requested field.
        field: &'static str,
        /// Extension of the first offending item.
        extension: String,
        /// Fields valid for that extension.
        allowed: Vec<&'static str>,
    },
    /// Filter field name is not known.
    #[error("unknown filter field")]
    UnknownFilterField {
        /// Raw field name.
        value: String,
    },
    /// Pagination parameter is out of bounds.
    #[error("invalid pagination parameter")]
    InvalidPage {
        /// Parameter name.
        field: &'static str,
        /// Supplied value.
        value: usize,
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// Requested page lies beyond the available results.
    #[error("page out of range")]
    PageOutOfRange {
        /// Requested page.
        page: usize,
        /// Pages available.
        total_pages: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_sort_field_keeps_details_in_fields() {
        let err = CatalogError::UnsupportedSortField {
            field: "album",
            extension: "wav".into(),
            allowed: vec!["name", "extension", "nodeId"],
        };
        assert_eq!(err.to_string(), "sort field not supported for media type");
    }
}
