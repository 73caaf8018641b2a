//! Shared value types used across the event store, aggregate, scanner and
//! HTTP surface. Kept deliberately small and `Copy`/`Clone`-friendly,
//! following the newtype-id style of `ferrex-core::types::ids`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a corruption aggregate, derived from a file's
/// canonical absolute path (see `aggregate::derive_aggregate_id`).
pub type AggregateId = String;

/// Database id of a configured scan path.
pub type PathId = i64;

/// Database id of a scan process record.
pub type ScanId = Uuid;

/// Database id of an external-manager instance.
pub type InstanceId = i64;

/// Pagination request, already validated (spec §4.9, P4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    /// Normalise raw, possibly-hostile query parameters per spec §4.9:
    /// `page >= 1`, `limit` clamped to `[1, max]`, invalid input falls back
    /// to `default_limit`.
    pub fn normalize(
        page: Option<u32>,
        limit: Option<u32>,
        max_limit: u32,
        default_limit: u32,
    ) -> Self {
        let page = match page {
            Some(p) if p >= 1 => p,
            _ => 1,
        };
        let limit = match limit {
            Some(l) if l >= 1 && l <= max_limit => l,
            _ => default_limit,
        };
        Self { page, limit }
    }

    pub fn offset(&self) -> i64 {
        ((self.page as i64) - 1) * (self.limit as i64)
    }
}

/// A page of results plus the metadata needed to render pagination controls.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: PageMeta,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PageMeta {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

impl PageMeta {
    pub fn new(pagination: Pagination, total: i64) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            (total + pagination.limit as i64 - 1) / pagination.limit as i64
        };
        Self {
            page: pagination.page,
            limit: pagination.limit,
            total,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_normalizes_invalid_input() {
        let p = Pagination::normalize(Some(0), Some(9999), 500, 50);
        assert_eq!(p.page, 1);
        assert_eq!(p.limit, 50);
    }

    #[test]
    fn pagination_keeps_valid_input() {
        let p = Pagination::normalize(Some(3), Some(20), 500, 50);
        assert_eq!(p.page, 3);
        assert_eq!(p.limit, 20);
        assert_eq!(p.offset(), 40);
    }

    #[test]
    fn page_meta_computes_ceil_division() {
        let pagination = Pagination {
            page: 1,
            limit: 10,
        };
        let meta = PageMeta::new(pagination, 25);
        assert_eq!(meta.total_pages, 3);

        let meta_zero = PageMeta::new(pagination, 0);
        assert_eq!(meta_zero.total_pages, 0);
    }
}
