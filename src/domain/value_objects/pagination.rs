//! # Pagination
//!
//! Page requests are normalised rather than rejected: page `0` becomes `1`,
//! limit `0` becomes [`DEFAULT_LIMIT`] and anything above [`MAX_LIMIT`] is
//! clamped. A page beyond the end yields an empty item list with the true
//! total.
//!
//! # Examples
//!
//! ```
//! use trade_accounts::domain::value_objects::pagination::{Page, PageRequest};
//!
//! let req = PageRequest::new(0, 500);
//! assert_eq!((req.page(), req.limit()), (1, 100));
//!
//! let page = Page::new(vec![1, 2, 3], 23, req);
//! assert_eq!(page.total_pages, 1);
//! ```

use serde::{Deserialize, Serialize};

/// Limit applied when none (or zero) is given.
pub const DEFAULT_LIMIT: u32 = 10;

/// Largest accepted limit.
pub const MAX_LIMIT: u32 = 100;

/// A normalised page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRequest {
    page: u32,
    limit: u32,
}

impl PageRequest {
    /// Creates a normalised request.
    #[must_use]
    pub fn new(page: u32, limit: u32) -> Self {
        let page = page.max(1);
        let limit = match limit {
            0 => DEFAULT_LIMIT,
            l => l.min(MAX_LIMIT),
        };
        Self { page, limit }
    }

    /// 1-based page number.
    #[inline]
    #[must_use]
    pub const fn page(&self) -> u32 {
        self.page
    }

    /// Items per page, in `1..=100`.
    #[inline]
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Number of rows to skip.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }

    /// Slices an already ordered in-memory collection.
    #[must_use]
    pub fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        let start = usize::try_from(self.offset()).unwrap_or(usize::MAX);
        items
            .iter()
            .skip(start)
            .take(self.limit as usize)
            .cloned()
            .collect()
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_LIMIT)
    }
}

/// One page of results plus the total count for pagers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Total matching rows.
    pub total: u64,
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub limit: u32,
    /// `ceil(total / limit)`.
    pub total_pages: u64,
}

impl<T> Page<T> {
    /// Builds a page from its items, the total and the request.
    #[must_use]
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        let limit = u64::from(request.limit());
        Self {
            items,
            total,
            page: request.page(),
            limit: request.limit(),
            total_pages: total.div_ceil(limit),
        }
    }

    /// Maps the items, keeping pagination metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
            total_pages: self.total_pages,
        }
    }
}
