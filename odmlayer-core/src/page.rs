//! Pagination of query results.
//!
//! [`Manager::paginate`](crate::manager::Manager::paginate) counts the matching records,
//! fetches a single window of them with skip/limit and wraps it in a [`Page`].

use serde::{Deserialize, Serialize};

/// A single page of query results.
///
/// # Example
///
/// ```ignore
/// let page = store
///     .objects::<Movie>()
///     .sort("year", SortDirection::Asc)
///     .paginate(PaginationParams::new(2, 10))
///     .await?;
///
/// assert_eq!(page.page, 2);
/// assert_eq!(page.previous_page, Some(1));
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// The rows of this page.
    pub items: Vec<T>,
    /// Number of records matching the query across all pages.
    pub count: u64,
    /// This page number (1-indexed).
    pub page: u64,
    /// The next page number, if more records exist.
    pub next_page: Option<u64>,
    /// The previous page number, if this is not the first page.
    pub previous_page: Option<u64>,
}

impl<T> Page<T> {
    /// Creates a new builder for a page holding `items`.
    pub fn builder(items: Vec<T>) -> PageBuilder<T> {
        PageBuilder::new(items)
    }

    /// Number of pages needed for `count` records.
    pub fn total_pages(&self, per_page: u64) -> u64 {
        if per_page == 0 {
            return 0;
        }
        self.count.div_ceil(per_page)
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            count: 0,
            page: 1,
            next_page: None,
            previous_page: None,
        }
    }
}

/// Builder for [`Page`] instances.
pub struct PageBuilder<T> {
    items: Vec<T>,
    count: u64,
    page: u64,
    next_page: Option<u64>,
    previous_page: Option<u64>,
}

impl<T> PageBuilder<T> {
    /// Creates a new builder with the given items.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            count: 0,
            page: 1,
            next_page: None,
            previous_page: None,
        }
    }

    /// Sets the total number of matching records.
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    /// Sets the page number.
    pub fn with_page(mut self, page: u64) -> Self {
        self.page = page;
        self
    }

    /// Sets the next page number.
    pub fn with_next_page(mut self, next_page: Option<u64>) -> Self {
        self.next_page = next_page;
        self
    }

    /// Sets the previous page number.
    pub fn with_previous_page(mut self, previous_page: Option<u64>) -> Self {
        self.previous_page = previous_page;
        self
    }

    /// Builds the [`Page`].
    pub fn build(self) -> Page<T> {
        Page {
            items: self.items,
            count: self.count,
            page: self.page,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

/// Which page to fetch and how large pages are. Pages are 1-indexed; page `0` is
/// treated as page `1`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationParams {
    /// The page number (1-indexed).
    pub page: u64,
    /// Number of rows per page.
    pub per_page: u64,
}

impl PaginationParams {
    /// Creates new pagination parameters.
    pub fn new(page: u64, per_page: u64) -> Self {
        Self { page, per_page }
    }

    /// Creates a builder starting from the defaults (page 1, 10 per page).
    pub fn builder() -> PaginationParamsBuilder {
        PaginationParamsBuilder::new()
    }

    /// The effective page number.
    pub fn page(&self) -> u64 {
        self.page.max(1)
    }

    /// Number of records to skip to reach this page.
    pub fn offset(&self) -> u64 {
        (self.page() - 1) * self.per_page
    }

    /// Wraps the rows of this page, computing the navigation metadata from `count`.
    pub fn page_of<T>(&self, items: Vec<T>, count: u64) -> Page<T> {
        let end = self.offset() + items.len() as u64;

        Page::builder(items)
            .with_count(count)
            .with_page(self.page())
            .with_next_page((end < count).then(|| self.page() + 1))
            .with_previous_page((self.page() > 1).then(|| self.page() - 1))
            .build()
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self { page: 1, per_page: 10 }
    }
}

/// Builder for [`PaginationParams`].
pub struct PaginationParamsBuilder {
    page: Option<u64>,
    per_page: Option<u64>,
}

impl PaginationParamsBuilder {
    /// Creates a new builder with no parameters set.
    pub fn new() -> Self {
        Self { page: None, per_page: None }
    }

    /// Sets the page number (1-indexed).
    pub fn with_page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    /// Sets the number of rows per page.
    pub fn with_per_page(mut self, per_page: u64) -> Self {
        self.per_page = Some(per_page);
        self
    }

    /// Builds the parameters, using page 1 and 10 per page for unset values.
    pub fn build(self) -> PaginationParams {
        PaginationParams {
            page: self.page.unwrap_or(1),
            per_page: self.per_page.unwrap_or(10),
        }
    }
}

impl Default for PaginationParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
