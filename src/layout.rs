use thiserror::Error;

use crate::types::Layout;

/// Grid shapes for 1..=10 panes, indexed by `count - 1`. Slightly more rows
/// than columns for small counts so each `bosh ssh` pane keeps a usable width.
const LAYOUT_TABLE: [Layout; 10] = [
    Layout::new(1, 1),
    Layout::new(2, 1),
    Layout::new(2, 2),
    Layout::new(2, 2),
    Layout::new(2, 3),
    Layout::new(2, 3),
    Layout::new(3, 3),
    Layout::new(3, 3),
    Layout::new(3, 3),
    Layout::new(4, 3),
];

pub const TABLE_MAX: usize = LAYOUT_TABLE.len();

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("cannot lay out zero panes")]
    Empty,
}

/// Pick the grid for `count` panes.
///
/// Counts past the table fall back to a near-square grid with rows
/// `ceil(sqrt(count))`, which agrees with the table's last entry.
pub fn select_layout(count: usize) -> Result<Layout, LayoutError> {
    match count {
        0 => Err(LayoutError::Empty),
        n if n <= TABLE_MAX => Ok(LAYOUT_TABLE[n - 1]),
        n => {
            let rows = ceil_sqrt(n);
            Ok(Layout::new(rows, n.div_ceil(rows)))
        }
    }
}

fn ceil_sqrt(n: usize) -> usize {
    let mut r = (n as f64).sqrt() as usize;
    while r * r < n { r += 1; }
    while r > 1 && (r - 1) * (r - 1) >= n { r -= 1; }
    r
}
