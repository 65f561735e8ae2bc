//! Paginated result sets

use serde::Serialize;

/// One page of a larger result set
///
/// Pages are 1-indexed. `last_page` is never less than 1, so an empty result
/// set still has a single (empty) page.
///
/// ```rust
/// use crud_core::repository::Page;
///
/// let page = Page::new((11..=20).collect::<Vec<u32>>(), 2, 10, 25);
/// assert_eq!(page.last_page(), 3);
/// assert_eq!(page.next(), Some(3));
/// assert_eq!(page.prev(), Some(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    items: Vec<T>,
    current_page: u64,
    per_page: u64,
    total: u64,
}

impl<T> Page<T> {
    /// A page holding `items`; `per_page` of 0 is treated as 1
    pub fn new(items: Vec<T>, current_page: u64, per_page: u64, total: u64) -> Self {
        Self {
            items,
            current_page: current_page.max(1),
            per_page: per_page.max(1),
            total,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn current_page(&self) -> u64 {
        self.current_page
    }

    pub fn per_page(&self) -> u64 {
        self.per_page
    }

    /// Total rows across every page
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn last_page(&self) -> u64 {
        self.total.div_ceil(self.per_page).max(1)
    }

    /// Following page number, if there is one
    pub fn next(&self) -> Option<u64> {
        (self.current_page < self.last_page()).then(|| self.current_page + 1)
    }

    /// Preceding page number, if there is one
    pub fn prev(&self) -> Option<u64> {
        (self.current_page > 1).then(|| self.current_page - 1)
    }

    /// Convert the items, keeping the page numbers
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            current_page: self.current_page,
            per_page: self.per_page,
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_middle_page() {
        let page = Page::new(vec![0; 10], 2, 10, 25);
        assert_eq!(page.items().len(), 10);
        assert_eq!(page.last_page(), 3);
        assert_eq!(page.next(), Some(3));
        assert_eq!(page.prev(), Some(1));
    }

    #[test]
    fn test_last_page_has_no_next() {
        let page = Page::new(vec![0; 5], 3, 10, 25);
        assert_eq!(page.next(), None);
        assert_eq!(page.prev(), Some(2));
    }

    #[test]
    fn test_first_page_has_no_prev() {
        let page = Page::new(vec![0; 10], 1, 10, 25);
        assert_eq!(page.prev(), None);
    }

    #[test]
    fn test_empty_result_has_one_page() {
        let page: Page<u8> = Page::new(vec![], 1, 10, 0);
        assert_eq!(page.last_page(), 1);
        assert_eq!(page.next(), None);
        assert_eq!(page.prev(), None);
    }

    #[test]
    fn test_zero_per_page_is_clamped() {
        let page: Page<u8> = Page::new(vec![], 0, 0, 3);
        assert_eq!(page.per_page(), 1);
        assert_eq!(page.current_page(), 1);
        assert_eq!(page.last_page(), 3);
    }

    #[test]
    fn test_beyond_last_page() {
        let page: Page<u8> = Page::new(vec![], 9, 10, 25);
        assert_eq!(page.next(), None);
        assert_eq!(page.prev(), Some(8));
    }

    #[test]
    fn test_map_keeps_numbers() {
        let page = Page::new(vec![1, 2], 1, 2, 4).map(|n| n * 10);
        assert_eq!(page.items(), &[10, 20]);
        assert_eq!(page.total(), 4);
        assert_eq!(page.next(), Some(2));
    }
}
