//! # Pagination Module
//!
//! The paginated result envelope and its page math. Page numbers are
//! 1-based; `lastPage` is `ceil(total / perPage)`. The count query behind
//! `total` shares the data query's WHERE clause but drops ordering and
//! limit/offset (see `SelectQueryBuilder::paginate`).

use serde::{Deserialize, Serialize};

/// A page of records plus metadata about the whole matching set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    /// The records of the requested page
    pub records: Vec<T>,
    /// 1-based page number that was requested
    pub current_page: usize,
    /// Last page holding any records; 1 when the set is empty
    pub last_page: usize,
    /// Page size the query ran with
    pub per_page: usize,
    /// Total records matching the query, ignoring pagination
    pub total: i64,
}

/// `ceil(total / per_page)`, never below 1 so that `currentPage = 1` on an
/// empty set still points at a valid page.
pub(crate) fn last_page(total: i64, per_page: usize) -> usize {
    if total <= 0 || per_page == 0 {
        return 1;
    }
    let pages = (total as usize).div_ceil(per_page);
    pages.max(1)
}
