//! Page arithmetic for list endpoints

/// Page size used when the request gives none or an out of range one
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Largest page size a request may ask for
pub const MAX_PAGE_SIZE: i64 = 10000;

/// Resolved page window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub page_size: i64,
    pub last_page: i64,
}

impl Page {
    /// Row offset of the first item on this page
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

/// Normalize a requested page against `total` rows.
///
/// The page is clamped to the last page when it runs past the end; with no
/// rows at all `last_page` is 0 and the page stays as requested.
pub fn init_page(req_page: i64, req_page_size: i64, total: i64) -> Page {
    let page_size = if req_page_size > 0 && req_page_size <= MAX_PAGE_SIZE {
        req_page_size
    } else {
        DEFAULT_PAGE_SIZE
    };
    let mut page = req_page.max(1);

    let total = total.max(0);
    let last_page = total / page_size + i64::from(total % page_size != 0);
    if page > last_page && last_page > 0 {
        page = last_page;
    }

    Page {
        page,
        page_size,
        last_page,
    }
}

/// Page number (1-based) and in-page index of the `progress`-th item.
///
/// Returns `(0, 0)` when there is no progress or `page_size` is not positive.
pub fn paper_index_page(progress: i64, page_size: i64) -> (i64, i64) {
    if progress == 0 || page_size <= 0 {
        return (0, 0);
    }
    (progress / page_size + 1, progress % page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let page = init_page(0, 0, 95);
        assert_eq!(
            page,
            Page {
                page: 1,
                page_size: DEFAULT_PAGE_SIZE,
                last_page: 10
            }
        );
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn test_oversized_page_size_falls_back() {
        let page = init_page(2, MAX_PAGE_SIZE + 1, 100);
        assert_eq!(page.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(page.page, 2);
        assert_eq!(page.offset(), 10);
    }

    #[test]
    fn test_page_clamped_to_last() {
        let page = init_page(9, 20, 45);
        assert_eq!(page.last_page, 3);
        assert_eq!(page.page, 3);
    }

    #[test]
    fn test_empty_total_keeps_requested_page() {
        let page = init_page(4, 10, 0);
        assert_eq!(page.last_page, 0);
        assert_eq!(page.page, 4);
    }

    #[test]
    fn test_huge_total_does_not_overflow() {
        let page = init_page(1, 10, i64::MAX);
        assert_eq!(page.last_page, i64::MAX / 10 + 1);
        assert_eq!(page.page, 1);

        let page = init_page(1, 1, i64::MAX);
        assert_eq!(page.last_page, i64::MAX);
    }

    #[test]
    fn test_paper_index_page() {
        assert_eq!(paper_index_page(0, 10), (0, 0));
        assert_eq!(paper_index_page(5, 0), (0, 0));
        assert_eq!(paper_index_page(5, 10), (1, 5));
        assert_eq!(paper_index_page(10, 10), (2, 0));
        assert_eq!(paper_index_page(23, 10), (3, 3));
    }
}
