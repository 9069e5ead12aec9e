use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// 1-based pagination parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Pageable {
    pub page: u64,
    pub per_page: u64,
}

impl Default for Pageable {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

impl Pageable {
    /// Validate raw caller input. Non-positive values are rejected rather
    /// than coerced.
    pub fn new(page: i64, per_page: i64) -> Result<Self, DataError> {
        if per_page <= 0 {
            return Err(DataError::validation(format!(
                "per_page must be positive, got {per_page}"
            )));
        }
        if page < 1 {
            return Err(DataError::validation(format!(
                "page must be at least 1, got {page}"
            )));
        }
        let (page, per_page) = (page as u64, per_page as u64);
        if (page - 1).checked_mul(per_page).is_none() {
            return Err(DataError::validation(format!(
                "page {page} with {per_page} rows per page is out of range"
            )));
        }
        Ok(Self { page, per_page })
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }
}

/// A page of results with pagination metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, pageable: &Pageable, total: u64) -> Self {
        let total_pages = if pageable.per_page == 0 {
            0
        } else {
            total.div_ceil(pageable.per_page)
        };
        Self {
            data,
            total,
            page: pageable.page,
            per_page: pageable.per_page,
            total_pages,
        }
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }
}
