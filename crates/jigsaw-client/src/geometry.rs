//! Piece size limits for rendering.
//!
//! One formula for both axes: the per-cell budget is the viewport divided by
//! the grid, the native piece size is the image divided by the grid, and the
//! limit is the native size scaled uniformly to the largest size that fits
//! the budget. Width always comes from `imageWidth`/`xSize`, height from
//! `imageHeight`/`ySize`.

use serde::{Deserialize, Serialize};

use jigsaw_types::Board;

use crate::constants::{DEFAULT_VIEWPORT_HEIGHT, DEFAULT_VIEWPORT_WIDTH};

/// Drawable area reported by the renderer, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(DEFAULT_VIEWPORT_WIDTH, DEFAULT_VIEWPORT_HEIGHT)
    }
}

/// Maximum on-screen size of a single piece.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PieceLimits {
    pub max_width: f32,
    pub max_height: f32,
}

/// Compute piece limits for `board` inside `viewport`.
pub fn piece_limits(viewport: Viewport, board: &Board) -> PieceLimits {
    if board.x_size == 0 || board.y_size == 0 {
        return PieceLimits::default();
    }
    let budget_w = viewport.width.max(0.0) / board.x_size as f32;
    let budget_h = viewport.height.max(0.0) / board.y_size as f32;

    let native_w = board.image_width as f32 / board.x_size as f32;
    let native_h = board.image_height as f32 / board.y_size as f32;
    if native_w <= 0.0 || native_h <= 0.0 {
        // no image geometry yet: fill the cell budget
        return PieceLimits {
            max_width: budget_w,
            max_height: budget_h,
        };
    }

    let scale = (budget_w / native_w).min(budget_h / native_h);
    PieceLimits {
        max_width: native_w * scale,
        max_height: native_h * scale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jigsaw_types::{Piece, Position};

    fn board(x_size: u32, y_size: u32, image_width: u32, image_height: u32) -> Board {
        let rows = (0..y_size)
            .map(|y| {
                (0..x_size)
                    .map(|x| Piece::new(Position::new(x, y), "p.jpeg"))
                    .collect()
            })
            .collect();
        let mut b = Board::new("p", rows);
        b.image_width = image_width;
        b.image_height = image_height;
        b
    }

    #[test]
    fn height_bound_scales_width_proportionally() {
        // 4x2 grid of 100x100 pieces in a 1000x100 viewport: height-limited
        let limits = piece_limits(Viewport::new(1000.0, 100.0), &board(4, 2, 400, 200));
        assert_eq!(limits.max_height, 50.0);
        assert_eq!(limits.max_width, 50.0);
    }

    #[test]
    fn width_bound_uses_image_width() {
        // pieces are 200 wide, 100 tall; width budget is 100
        let limits = piece_limits(Viewport::new(300.0, 1000.0), &board(3, 1, 600, 100));
        assert_eq!(limits.max_width, 100.0);
        assert_eq!(limits.max_height, 50.0);
    }

    #[test]
    fn missing_image_geometry_fills_budget() {
        let limits = piece_limits(Viewport::new(800.0, 600.0), &board(4, 3, 0, 0));
        assert_eq!(limits.max_width, 200.0);
        assert_eq!(limits.max_height, 200.0);
    }

    #[test]
    fn empty_grid_yields_zero() {
        let limits = piece_limits(Viewport::default(), &Board::new("p", Vec::new()));
        assert_eq!(limits, PieceLimits::default());
    }
}
