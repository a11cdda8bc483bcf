//! Windowed cursor over a list of `item_count` rows, `visible_rows` at a time.
//!
//! Invariants held after every operation:
//! - `cursor < item_count` when the list is non-empty, `cursor == 0` otherwise
//! - `offset <= cursor < offset + visible_rows` when the list is non-empty
//! - `offset + visible_rows <= max(item_count, visible_rows)`

/// Scroll state for one list panel. All operations are O(1) and total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportScroller {
    cursor: usize,
    offset: usize,
    item_count: usize,
    visible_rows: usize,
}

impl ViewportScroller {
    /// Empty list with a window of `visible_rows` (at least one).
    #[must_use]
    pub fn new(visible_rows: usize) -> Self {
        Self {
            cursor: 0,
            offset: 0,
            item_count: 0,
            visible_rows: visible_rows.max(1),
        }
    }

    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub const fn item_count(&self) -> usize {
        self.item_count
    }

    #[must_use]
    pub const fn visible_rows(&self) -> usize {
        self.visible_rows
    }

    /// Half-open `[start, end)` range of rows to render.
    #[must_use]
    pub fn visible_range(&self) -> (usize, usize) {
        let end = (self.offset + self.visible_rows).min(self.item_count);
        (self.offset.min(end), end)
    }

    /// The list changed size (e.g. after a refresh). Keeps the cursor where
    /// it was when it is still in range.
    pub fn set_item_count(&mut self, n: usize) {
        self.item_count = n;
        if self.cursor >= n {
            self.cursor = n.saturating_sub(1);
        }
        self.clamp_offset();
        self.contain_cursor();
    }

    /// The viewport was resized.
    pub fn set_visible_rows(&mut self, rows: usize) {
        self.visible_rows = rows.max(1);
        self.clamp_offset();
        self.contain_cursor();
    }

    pub fn cursor_down(&mut self) {
        self.move_to(self.cursor.saturating_add(1));
    }

    pub fn cursor_up(&mut self) {
        self.move_to(self.cursor.saturating_sub(1));
    }

    pub fn page_down(&mut self) {
        self.move_to(self.cursor.saturating_add(self.visible_rows));
    }

    pub fn page_up(&mut self) {
        self.move_to(self.cursor.saturating_sub(self.visible_rows));
    }

    pub fn cursor_to_start(&mut self) {
        self.cursor = 0;
        self.offset = 0;
    }

    pub fn cursor_to_end(&mut self) {
        self.cursor = self.last_index();
        self.offset = self.max_offset();
    }

    /// Back to an empty list at the top.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.offset = 0;
        self.item_count = 0;
    }

    fn last_index(&self) -> usize {
        self.item_count.saturating_sub(1)
    }

    fn max_offset(&self) -> usize {
        self.item_count.saturating_sub(self.visible_rows)
    }

    fn move_to(&mut self, target: usize) {
        self.cursor = target.min(self.last_index());
        self.contain_cursor();
    }

    /// Slide the window by the minimum amount that puts the cursor inside it.
    fn contain_cursor(&mut self) {
        if self.cursor < self.offset {
            self.offset = self.cursor;
        } else if self.cursor >= self.offset + self.visible_rows {
            self.offset = self.cursor + 1 - self.visible_rows;
        }
    }

    fn clamp_offset(&mut self) {
        self.offset = self.offset.min(self.max_offset());
    }
}

impl Default for ViewportScroller {
    fn default() -> Self {
        Self::new(10)
    }
}
