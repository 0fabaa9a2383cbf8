use std::ops::Range;

/// Rows a page can hold; one keycap reaction per row.
pub const MAX_PAGE_SIZE: usize = 9;

pub const NUMBER_EMOJIS: [&str; MAX_PAGE_SIZE] = [
    "1️⃣", "2️⃣", "3️⃣", "4️⃣", "5️⃣", "6️⃣", "7️⃣", "8️⃣", "9️⃣",
];

/// 1-based row for a keycap emoji.
pub fn row_for_emoji(emoji: &str) -> Option<usize> {
    NUMBER_EMOJIS
        .iter()
        .position(|e| *e == emoji)
        .map(|i| i + 1)
}

/// 1-based row typed as text.
pub fn parse_row(input: &str) -> Option<usize> {
    input.trim().parse::<usize>().ok().filter(|n| *n > 0)
}

/// Splits a list into fixed-size pages and tracks the visible one.
///
/// Paging past either end is a no-op.
#[derive(Debug, Clone)]
pub struct Pager<T> {
    items: Vec<T>,
    page_size: usize,
    page: usize,
}

impl<T> Pager<T> {
    pub fn new(items: Vec<T>, page_size: usize) -> Self {
        Self {
            items,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            page: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.items.len().div_ceil(self.page_size).max(1)
    }

    /// 0-based index of the visible page.
    pub fn page(&self) -> usize {
        self.page
    }

    pub fn has_many_pages(&self) -> bool {
        self.page_count() > 1
    }

    pub fn current_range(&self) -> Range<usize> {
        let start = (self.page * self.page_size).min(self.items.len());
        let end = (start + self.page_size).min(self.items.len());
        start..end
    }

    pub fn current(&self) -> &[T] {
        &self.items[self.current_range()]
    }

    pub fn next_page(&mut self) -> bool {
        if self.page + 1 < self.page_count() {
            self.page += 1;
            true
        } else {
            false
        }
    }

    pub fn prev_page(&mut self) -> bool {
        if self.page > 0 {
            self.page -= 1;
            true
        } else {
            false
        }
    }

    /// Index into the full list for a 1-based row of the visible page.
    pub fn global_index(&self, row: usize) -> Option<usize> {
        let range = self.current_range();
        let index = range.start + row.checked_sub(1)?;
        range.contains(&index).then_some(index)
    }

    /// Row emojis needed for the largest page.
    pub fn row_emojis(&self) -> &'static [&'static str] {
        &NUMBER_EMOJIS[..self.page_size.min(self.items.len())]
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [T] {
        &mut self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}
