//! Pixel geometry resolved from placements.
//!
//! Unlike placement ratios, everything here is in absolute canvas pixels.

use serde::{Deserialize, Serialize};

use crate::placement::Role;

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn fits_within(&self, other: Size) -> bool {
        self.width <= other.width && self.height <= other.height
    }
}

/// An axis-aligned rectangle in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering a whole canvas of `size`.
    pub fn full(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Whether this rectangle lies fully inside `bounds`.
    pub fn is_within(&self, bounds: Size) -> bool {
        self.right() <= bounds.width && self.bottom() <= bounds.height
    }
}

/// Resolved pixel geometry of one placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedGeometry {
    /// Declaration index of the placement.
    pub index: usize,
    pub role: Role,
    /// Area the placement occupies on the canvas.
    pub rect: Rect,
    /// Where the scaled picture sits inside `rect`'s coordinate space.
    ///
    /// Equal to `rect` for overlays. For the primary it is the letterboxed
    /// content box within the full canvas.
    pub content: Rect,
    /// Region of the source frame kept before scaling, in source pixels.
    /// `None` keeps the whole frame.
    pub source_crop: Option<Rect>,
}

impl ResolvedGeometry {
    /// Bars must be painted around the content.
    pub fn needs_padding(&self) -> bool {
        self.content != self.rect
    }
}
