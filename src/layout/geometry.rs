//! Pixel geometry and its conversion to terminal grid sizes.

use super::types::SplitDirection;

/// A rectangle in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    /// X position of the left edge.
    pub x: f32,
    /// Y position of the top edge.
    pub y: f32,
    /// Width.
    pub width: f32,
    /// Height.
    pub height: f32,
}

impl Rect {
    /// Creates a rectangle.
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Creates a rectangle covering a terminal grid of the given size.
    #[must_use]
    pub fn from_grid(size: GridSize, cell: CellMetrics) -> Self {
        Self::new(
            0.0,
            0.0,
            f32::from(size.cols) * cell.width,
            f32::from(size.rows) * cell.height,
        )
    }

    /// X position of the right edge.
    #[must_use]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// Y position of the bottom edge.
    #[must_use]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Center point.
    #[must_use]
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Checks if a point is inside the rectangle.
    #[must_use]
    pub fn contains(&self, px: f32, py: f32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }

    /// Grows the rectangle by `amount` on every side.
    #[must_use]
    pub fn inflate(&self, amount: f32) -> Self {
        Self::new(
            self.x - amount,
            self.y - amount,
            self.width + amount * 2.0,
            self.height + amount * 2.0,
        )
    }

    /// Length along the axis a split in `direction` divides.
    #[must_use]
    pub fn extent(&self, direction: SplitDirection) -> f32 {
        match direction {
            SplitDirection::Horizontal => self.width,
            SplitDirection::Vertical => self.height,
        }
    }
}

/// Terminal dimensions in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridSize {
    /// Columns.
    pub cols: u16,
    /// Rows.
    pub rows: u16,
}

impl GridSize {
    /// Creates a grid size. Zero is raised to one.
    #[must_use]
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
        }
    }
}

/// Pixel size of one terminal cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellMetrics {
    /// Cell width.
    pub width: f32,
    /// Cell height.
    pub height: f32,
}

impl Default for CellMetrics {
    fn default() -> Self {
        Self {
            width: 1.0,
            height: 1.0,
        }
    }
}

impl CellMetrics {
    /// Creates cell metrics. Non-positive or non-finite sizes become 1.
    #[must_use]
    pub fn new(width: f32, height: f32) -> Self {
        let sane = |v: f32| if v.is_finite() && v > 0.0 { v } else { 1.0 };
        Self {
            width: sane(width),
            height: sane(height),
        }
    }

    /// Cell size along the axis a split in `direction` divides.
    #[must_use]
    pub fn along(&self, direction: SplitDirection) -> f32 {
        match direction {
            SplitDirection::Horizontal => self.width,
            SplitDirection::Vertical => self.height,
        }
    }

    /// Number of whole cells that fit in `rect`, at least 1x1.
    #[must_use]
    pub fn grid_size(&self, rect: &Rect) -> GridSize {
        GridSize::new(
            cells_in(rect.width, self.width),
            cells_in(rect.height, self.height),
        )
    }
}

/// Whole cells of size `cell` fitting in `length`.
fn cells_in(length: f32, cell: f32) -> u16 {
    // Tolerate float noise so 12 cells never turn into 11.999.
    let cells = (length / cell + 1e-3).floor();
    if cells.is_nan() || cells <= 0.0 {
        0
    } else if cells >= f32::from(u16::MAX) {
        u16::MAX
    } else {
        cells as u16
    }
}

/// The three parts a split carves out of its area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitRects {
    /// Area of the first child (left or top).
    pub first: Rect,
    /// The divider between the children.
    pub divider: Rect,
    /// Area of the second child (right or bottom).
    pub second: Rect,
}

/// Divides `rect` between two children.
///
/// The first child receives `ratio` of the space left after the divider,
/// rounded to whole cells so both children land on cell boundaries. When
/// there is room for two cells neither child is rounded down to nothing.
#[must_use]
pub fn split_rect(
    rect: Rect,
    direction: SplitDirection,
    ratio: f32,
    divider_width: f32,
    cell: CellMetrics,
) -> SplitRects {
    let divider_width = divider_width.max(0.0);
    let available = (rect.extent(direction) - divider_width).max(0.0);
    let step = cell.along(direction);
    let mut first = ((available * ratio / step).round() * step).clamp(0.0, available);
    if available >= 2.0 * step {
        let last_whole = ((available - step) / step).floor() * step;
        first = first.clamp(step, last_whole);
    }
    let second = available - first;

    match direction {
        SplitDirection::Horizontal => SplitRects {
            first: Rect::new(rect.x, rect.y, first, rect.height),
            divider: Rect::new(rect.x + first, rect.y, divider_width, rect.height),
            second: Rect::new(rect.x + first + divider_width, rect.y, second, rect.height),
        },
        SplitDirection::Vertical => SplitRects {
            first: Rect::new(rect.x, rect.y, rect.width, first),
            divider: Rect::new(rect.x, rect.y + first, rect.width, divider_width),
            second: Rect::new(rect.x, rect.y + first + divider_width, rect.width, second),
        },
    }
}
