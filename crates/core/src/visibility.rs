//! Page layout and visibility tracking
//!
//! Pages are laid out on a grid of `pages_per_row` columns. Each column is as
//! wide as its widest page and each row as tall as its tallest page; pages are
//! centred in their cell. A page is visible when its extent overlaps the
//! viewport with nonzero area.

use crate::document::Page;
use crate::geometry::Rect;
use serde::{Deserialize, Serialize};

/// Grid layout of the page strip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub pages_per_row: usize,
    /// 1-based column of the first page (books start on the right)
    pub first_page_column: usize,
    pub page_h_padding: f64,
    pub page_v_padding: f64,
    pub page_right_to_left: bool,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            pages_per_row: 1,
            first_page_column: 1,
            page_h_padding: 1.0,
            page_v_padding: 1.0,
            page_right_to_left: false,
        }
    }
}

impl Layout {
    /// Coerce out-of-range values. Returns a warning when `pages_per_row`
    /// had to be raised from zero.
    pub fn normalize(&mut self) -> Option<String> {
        let warning = (self.pages_per_row == 0).then(|| {
            self.pages_per_row = 1;
            "pages-per-row must be positive, using 1".to_string()
        });
        self.first_page_column = self.first_page_column.clamp(1, self.pages_per_row);
        self.page_h_padding = self.page_h_padding.max(0.0);
        self.page_v_padding = self.page_v_padding.max(0.0);
        warning
    }

    /// Extent of every page in layout coordinates, in page order
    pub fn page_extents(&self, pages: &[Page]) -> Vec<Rect> {
        let per_row = self.pages_per_row.max(1);
        let offset = self.first_page_column.clamp(1, per_row) - 1;
        let rows = (pages.len() + offset).div_ceil(per_row);

        let mut col_widths = vec![0.0_f64; per_row];
        let mut row_heights = vec![0.0_f64; rows];
        for (i, page) in pages.iter().enumerate() {
            let (row, col) = self.cell(i + offset, per_row);
            col_widths[col] = col_widths[col].max(page.width);
            row_heights[row] = row_heights[row].max(page.height);
        }

        let col_x = prefix_offsets(&col_widths, self.page_h_padding);
        let row_y = prefix_offsets(&row_heights, self.page_v_padding);

        pages
            .iter()
            .enumerate()
            .map(|(i, page)| {
                let (row, col) = self.cell(i + offset, per_row);
                let x = col_x[col] + (col_widths[col] - page.width) / 2.0;
                let y = row_y[row] + (row_heights[row] - page.height) / 2.0;
                Rect::from_size(x, y, page.width, page.height)
            })
            .collect()
    }

    /// Visual (row, column) of a grid position; columns are mirrored for
    /// right-to-left layouts
    fn cell(&self, position: usize, per_row: usize) -> (usize, usize) {
        let row = position / per_row;
        let col = position % per_row;
        if self.page_right_to_left {
            (row, per_row - 1 - col)
        } else {
            (row, col)
        }
    }
}

fn prefix_offsets(sizes: &[f64], padding: f64) -> Vec<f64> {
    let mut offsets = Vec::with_capacity(sizes.len());
    let mut acc = 0.0;
    for size in sizes {
        offsets.push(acc);
        acc += size + padding;
    }
    offsets
}

/// Visible region in layout coordinates (scroll offset plus size)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::from_size(self.x, self.y, self.width.max(0.0), self.height.max(0.0))
    }
}

/// Pages whose visibility changed, in ascending page order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityDelta {
    pub became_visible: Vec<usize>,
    pub became_invisible: Vec<usize>,
}

impl VisibilityDelta {
    pub fn is_empty(&self) -> bool {
        self.became_visible.is_empty() && self.became_invisible.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct VisibilityTracker {
    layout: Layout,
}

impl VisibilityTracker {
    pub fn new(mut layout: Layout) -> Self {
        layout.normalize();
        Self { layout }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn set_layout(&mut self, mut layout: Layout) -> Option<String> {
        let warning = layout.normalize();
        self.layout = layout;
        warning
    }

    /// Compare each page's current flag with its overlap of `viewport`
    ///
    /// Pure: the caller applies the delta.
    pub fn update(&self, pages: &[Page], viewport: &Viewport) -> VisibilityDelta {
        let view = viewport.rect();
        let mut delta = VisibilityDelta::default();
        for (page, extent) in pages.iter().zip(self.layout.page_extents(pages)) {
            let visible = extent.intersects(&view);
            match (page.visible, visible) {
                (false, true) => delta.became_visible.push(page.index),
                (true, false) => delta.became_invisible.push(page.index),
                _ => {}
            }
        }
        delta
    }

    /// Extent of one page, for scrolling to it
    pub fn page_extent(&self, pages: &[Page], index: usize) -> Option<Rect> {
        if index >= pages.len() {
            return None;
        }
        self.layout.page_extents(pages).get(index).copied()
    }
}
