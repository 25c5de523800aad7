/// One page of an already filtered and sorted row set.
#[derive(Debug, PartialEq)]
pub struct Page<'a, T> {
    pub rows: &'a [T],
    pub current_page: usize,
    pub total_pages: usize,
}

/// Slices `rows` into the requested 1-based page.
///
/// The requested page is clamped into `1..=total_pages`, so callers must read
/// `current_page` back instead of assuming their request was honoured. An empty
/// set still has one (empty) page.
pub fn paginate<T>(rows: &[T], page: usize, page_size: usize) -> Page<'_, T> {
    let page_size = page_size.max(1);
    let total_pages = rows.len().div_ceil(page_size).max(1);
    let current_page = page.clamp(1, total_pages);

    let begin = std::cmp::min((current_page - 1) * page_size, rows.len());
    let end = std::cmp::min(begin + page_size, rows.len());

    Page {
        rows: &rows[begin..end],
        current_page,
        total_pages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twenty_five_rows_in_pages_of_ten() {
        let rows: Vec<usize> = (0..25).collect();
        let first = paginate(&rows, 1, 10);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.rows.len(), 10);
        let last = paginate(&rows, 3, 10);
        assert_eq!(last.rows, &[20, 21, 22, 23, 24]);
    }

    #[test]
    fn clamps_requested_page() {
        let rows: Vec<usize> = (0..25).collect();
        let page = paginate(&rows, 3 + 5, 10);
        assert_eq!(page.current_page, 3);
        assert_eq!(page.rows.len(), 5);

        let page = paginate(&rows, 0, 10);
        assert_eq!(page.current_page, 1);
        assert_eq!(page.rows[0], 0);
    }

    #[test]
    fn empty_set_has_one_empty_page() {
        let rows: Vec<usize> = Vec::new();
        let page = paginate(&rows, 4, 10);
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.current_page, 1);
        assert!(page.rows.is_empty());
    }

    #[test]
    fn pages_cover_all_rows_exactly_once() {
        let rows: Vec<usize> = (0..37).collect();
        for page_size in 1..=40 {
            let total = paginate(&rows, 1, page_size).total_pages;
            let joined: Vec<usize> = (1..=total)
                .flat_map(|p| paginate(&rows, p, page_size).rows.to_vec())
                .collect();
            assert_eq!(joined, rows, "page size {page_size}");
        }
    }

    #[test]
    fn growing_page_size_only_moves_derived_page() {
        let rows: Vec<usize> = (0..25).collect();
        let stored_page = 3;
        assert_eq!(paginate(&rows, stored_page, 10).current_page, 3);

        // Stored page now exceeds the total; the derived page is clamped.
        let page = paginate(&rows, stored_page, 25);
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.current_page, 1);
        assert_eq!(page.rows.len(), 25);

        // Shrinking again brings the stored page back into range.
        assert_eq!(paginate(&rows, stored_page, 10).current_page, 3);
    }
}
