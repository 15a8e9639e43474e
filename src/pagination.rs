/// Pagination metadata as reported by the server for one list response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMeta {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationState {
    pub current_page: u32,
    pub page_size: u32,
    pub total_items: u64,
}

impl PaginationState {
    pub fn new(page_size: u32) -> Self {
        Self {
            current_page: 1,
            page_size: page_size.max(1),
            total_items: 0,
        }
    }

    /// Adopts the server's view verbatim. The server is authoritative; the
    /// only adjustment is raising a zero page or limit to 1.
    pub fn reconcile_after_fetch(meta: &PageMeta) -> Self {
        if meta.page == 0 || meta.limit == 0 {
            tracing::warn!(?meta, "server returned empty page or limit, clamping to 1");
        }
        Self {
            current_page: meta.page.max(1),
            page_size: meta.limit.max(1),
            total_items: meta.total,
        }
    }

    /// Page to refetch after deleting a row from the current page.
    /// `items_on_page` is the row count before the delete.
    pub fn rollback_target_after_delete(&self, items_on_page: usize) -> u32 {
        if self.current_page > 1 && items_on_page == 1 {
            self.current_page - 1
        } else {
            self.current_page
        }
    }

    pub fn page_count(&self) -> u32 {
        let pages = self.total_items.div_ceil(u64::from(self.page_size.max(1)));
        u32::try_from(pages).unwrap_or(u32::MAX)
    }

    pub fn is_within_bounds(&self) -> bool {
        self.current_page <= self.page_count().max(1)
    }

    /// 1-based index range of rows shown on the current page, if any.
    pub fn visible_range(&self) -> Option<(u64, u64)> {
        if self.total_items == 0 {
            return None;
        }
        let start =
            u64::from(self.current_page.saturating_sub(1)) * u64::from(self.page_size) + 1;
        if start > self.total_items {
            return None;
        }
        let end = (start + u64::from(self.page_size) - 1).min(self.total_items);
        Some((start, end))
    }
}

impl Default for PaginationState {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(page: u32) -> PaginationState {
        PaginationState {
            current_page: page,
            page_size: 10,
            total_items: 95,
        }
    }

    #[test]
    fn rollback_steps_back_when_last_row_of_later_page_is_deleted() {
        for page in 2..=12 {
            assert_eq!(state(page).rollback_target_after_delete(1), page - 1);
        }
    }

    #[test]
    fn rollback_keeps_page_otherwise() {
        assert_eq!(state(1).rollback_target_after_delete(1), 1);
        assert_eq!(state(3).rollback_target_after_delete(0), 3);
        assert_eq!(state(3).rollback_target_after_delete(2), 3);
        assert_eq!(state(3).rollback_target_after_delete(10), 3);
    }

    #[test]
    fn reconcile_adopts_server_meta() {
        let reconciled = PaginationState::reconcile_after_fetch(&PageMeta {
            page: 4,
            limit: 25,
            total: 80,
        });
        assert_eq!(
            reconciled,
            PaginationState {
                current_page: 4,
                page_size: 25,
                total_items: 80
            }
        );
        assert_eq!(reconciled.page_count(), 4);
        assert!(reconciled.is_within_bounds());
    }

    #[test]
    fn reconcile_clamps_zero_page_and_limit() {
        let reconciled = PaginationState::reconcile_after_fetch(&PageMeta {
            page: 0,
            limit: 0,
            total: 3,
        });
        assert_eq!(reconciled.current_page, 1);
        assert_eq!(reconciled.page_size, 1);
    }

    #[test]
    fn bounds_track_page_count() {
        let mut pagination = PaginationState {
            current_page: 2,
            page_size: 10,
            total_items: 10,
        };
        assert!(!pagination.is_within_bounds());
        pagination.current_page = 1;
        assert!(pagination.is_within_bounds());
        pagination.total_items = 0;
        assert_eq!(pagination.page_count(), 0);
        assert!(pagination.is_within_bounds());
    }

    #[test]
    fn visible_range_is_clamped_to_total() {
        assert_eq!(state(10).visible_range(), Some((91, 95)));
        assert_eq!(state(1).visible_range(), Some((1, 10)));
        assert_eq!(state(11).visible_range(), None);
        assert_eq!(PaginationState::new(5).visible_range(), None);
        let unset = PaginationState {
            current_page: 0,
            page_size: 10,
            total_items: 4,
        };
        assert_eq!(unset.visible_range(), Some((1, 4)));
    }
}
