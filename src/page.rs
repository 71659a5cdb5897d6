//! Pagination window derived from a total count, a requested index and a page size.

use serde::Serialize;

pub const DEFAULT_PAGE_SIZE: u64 = 10;

/// One page of a listing. Out-of-range requests normalize to an empty first page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Page {
    page_index: u64,
    page_count: u64,
    item_count: u64,
    has_next: bool,
    has_previous: bool,
    #[serde(skip)]
    offset: u64,
    #[serde(skip)]
    limit: u64,
}

impl Page {
    pub fn new(item_count: u64, page_index: u64, page_size: u64) -> Self {
        let page_size = page_size.max(1);
        let page_count = item_count.div_ceil(page_size);
        if item_count == 0 || page_index < 1 || page_index > page_count {
            return Page {
                page_index: 1,
                page_count,
                item_count,
                has_next: false,
                has_previous: false,
                offset: 0,
                limit: 0,
            };
        }
        Page {
            page_index,
            page_count,
            item_count,
            has_next: page_index < page_count,
            has_previous: page_index > 1,
            offset: page_size * (page_index - 1),
            limit: page_size,
        }
    }

    /// Parse a `?page=` query value; anything unparsable means page 1.
    pub fn index_from(raw: Option<&str>) -> u64 {
        raw.and_then(|s| s.trim().parse().ok()).unwrap_or(1)
    }

    pub fn page_index(&self) -> u64 {
        self.page_index
    }

    pub fn page_count(&self) -> u64 {
        self.page_count
    }

    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    pub fn has_previous(&self) -> bool {
        self.has_previous
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn empty_listing_is_an_empty_first_page() {
        for index in [0, 1, 7] {
            let p = Page::new(0, index, 10);
            assert_eq!((p.offset(), p.limit(), p.page_index()), (0, 0, 1));
            assert!(!p.has_next());
            assert!(!p.has_previous());
        }
    }

    #[test]
    fn last_partial_page() {
        let p = Page::new(25, 3, 10);
        assert_eq!(p.page_count(), 3);
        assert_eq!((p.offset(), p.limit()), (20, 10));
        assert!(!p.has_next());
        assert!(p.has_previous());
    }

    #[test]
    fn out_of_range_index_normalizes() {
        let p = Page::new(25, 4, 10);
        assert_eq!((p.page_index(), p.offset(), p.limit()), (1, 0, 0));
        assert_eq!(p.page_count(), 3);
    }

    #[test]
    fn serializes_only_the_metadata() {
        let p = Page::new(11, 1, 10);
        assert_eq!(
            serde_json::to_value(p).unwrap(),
            json!({"page_index": 1, "page_count": 2, "item_count": 11, "has_next": true, "has_previous": false})
        );
    }

    #[test]
    fn index_parsing_falls_back_to_first_page() {
        assert_eq!(Page::index_from(Some("3")), 3);
        assert_eq!(Page::index_from(Some("x")), 1);
        assert_eq!(Page::index_from(None), 1);
    }
}
