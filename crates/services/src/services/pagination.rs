use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

/// Slice one page out of an ordered list. `page_number` is 1-based; a page past
/// the end is empty. A `page_size` of 0 is treated as 1.
pub fn paginate<T: Clone>(list: &[T], page_size: usize, page_number: usize) -> Page<T> {
    let page_size = page_size.max(1);
    let page = page_number.max(1);
    let total_items = list.len();

    let items = list
        .iter()
        .skip((page - 1).saturating_mul(page_size))
        .take(page_size)
        .cloned()
        .collect();

    Page {
        items,
        page,
        page_size,
        total_pages: total_pages(total_items, page_size),
        total_items,
    }
}

pub fn total_pages(len: usize, page_size: usize) -> usize {
    len.div_ceil(page_size.max(1)).max(1)
}
