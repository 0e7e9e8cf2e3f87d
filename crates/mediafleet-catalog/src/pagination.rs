//! Page slicing for catalog responses.

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};

/// Page size used when the caller does not pick one.
pub const DEFAULT_PAGE_LIMIT: usize = 10;
/// Largest accepted page size.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Validated page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    page: usize,
    limit: usize,
}

impl PageRequest {
    /// Build a request, defaulting the limit when absent.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidPage`] when `page` is zero or the limit is
    /// zero or above [`MAX_PAGE_LIMIT`].
    pub fn new(page: usize, limit: Option<usize>) -> CatalogResult<Self> {
        if page == 0 {
            return Err(CatalogError::InvalidPage {
                field: "page",
                value: page,
                reason: "must be at least 1",
            });
        }
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(CatalogError::InvalidPage {
                field: "limit",
                value: limit,
                reason: "must be between 1 and 100",
            });
        }
        Ok(Self { page, limit })
    }

    /// 1-based page number.
    #[must_use]
    pub const fn page(&self) -> usize {
        self.page
    }

    /// Page size.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Slice `items` to the requested page.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::PageOutOfRange`] when the page starts past the
    /// end of `items`. The first page of an empty result is an empty page.
    pub fn paginate<T>(&self, items: Vec<T>) -> CatalogResult<Page<T>> {
        let total = items.len();
        let total_pages = total.div_ceil(self.limit);
        if self.page > total_pages.max(1) {
            return Err(CatalogError::PageOutOfRange {
                page: self.page,
                total_pages,
            });
        }

        let start = (self.page - 1) * self.limit;
        let results: Vec<T> = items.into_iter().skip(start).take(self.limit).collect();
        Ok(Page {
            results,
            total,
            current_page: self.page,
            next_page: (self.page < total_pages).then_some(self.page + 1),
            previous_page: (self.page > 1).then(|| self.page - 1),
        })
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Items on this page.
    pub results: Vec<T>,
    /// Items across all pages.
    pub total: usize,
    /// This page's number.
    pub current_page: usize,
    /// Following page, if any.
    pub next_page: Option<usize>,
    /// Preceding page, if any.
    pub previous_page: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_enforced() {
        assert!(matches!(
            PageRequest::new(0, None),
            Err(CatalogError::InvalidPage { field: "page", .. })
        ));
        assert!(matches!(
            PageRequest::new(1, Some(101)),
            Err(CatalogError::InvalidPage { field: "limit", value: 101, .. })
        ));
        assert!(matches!(
            PageRequest::new(1, Some(0)),
            Err(CatalogError::InvalidPage { field: "limit", .. })
        ));
        assert_eq!(PageRequest::new(2, None).map(|p| p.limit()).ok(), Some(10));
    }

    #[test]
    fn middle_page_links_both_ways() -> CatalogResult<()> {
        let page = PageRequest::new(2, Some(3))?.paginate((1..=8).collect())?;
        assert_eq!(page.results, vec![4, 5, 6]);
        assert_eq!(page.total, 8);
        assert_eq!(page.next_page, Some(3));
        assert_eq!(page.previous_page, Some(1));

        let last = PageRequest::new(3, Some(3))?.paginate((1..=8).collect())?;
        assert_eq!(last.results, vec![7, 8]);
        assert_eq!(last.next_page, None);
        Ok(())
    }

    #[test]
    fn empty_results_have_one_empty_page() -> CatalogResult<()> {
        let page = PageRequest::default().paginate(Vec::<u8>::new())?;
        assert!(page.results.is_empty());
        assert_eq!((page.next_page, page.previous_page), (None, None));

        let err = PageRequest::new(2, None)?.paginate(Vec::<u8>::new()).err();
        assert_eq!(
            err,
            Some(CatalogError::PageOutOfRange {
                page: 2,
                total_pages: 0
            })
        );
        Ok(())
    }
}
