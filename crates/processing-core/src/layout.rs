//! Layout resolver.
//!
//! Turns canvas-relative placement parameters into absolute pixel
//! rectangles. The primary is letterboxed into the whole canvas; overlays get
//! a box from their scale policy and are pinned to their anchor, offset
//! inward by the margin, and clamped so they never leave the canvas.
//!
//! Every resolved dimension is even because the output is 4:2:0 subsampled.

use duet_common::error::{DuetError, DuetResult};
use duet_project_model::{
    Anchor, Canvas, Composition, PlacementSpec, Rect, ResolvedGeometry, Role, ScalePolicy, Size,
};

/// Resolve every placement of a composition, in declaration order.
pub fn resolve_composition(composition: &Composition) -> DuetResult<Vec<ResolvedGeometry>> {
    resolve(composition.canvas(), composition.placements())
}

/// Resolve placements against a canvas, in declaration order.
///
/// Fails with `CanvasTooSmall` when a box rounds below two pixels or an
/// overlay does not fit in the canvas.
pub fn resolve(canvas: &Canvas, placements: &[PlacementSpec]) -> DuetResult<Vec<ResolvedGeometry>> {
    let bounds = canvas.size();
    if bounds.width < 2 || bounds.height < 2 {
        return Err(DuetError::canvas_too_small(format!(
            "canvas {}x{} is degenerate",
            bounds.width, bounds.height
        )));
    }

    placements
        .iter()
        .enumerate()
        .map(|(index, placement)| {
            let geometry = match placement.role {
                Role::Primary => resolve_primary(index, placement, bounds)?,
                Role::Overlay => resolve_overlay(index, placement, bounds)?,
            };
            tracing::trace!(
                index,
                x = geometry.rect.x,
                y = geometry.rect.y,
                width = geometry.rect.width,
                height = geometry.rect.height,
                "Resolved placement"
            );
            Ok(geometry)
        })
        .collect()
}

fn resolve_primary(
    index: usize,
    placement: &PlacementSpec,
    canvas: Size,
) -> DuetResult<ResolvedGeometry> {
    let natural = natural_size(placement);
    let content = fit_within(natural, canvas.width as f64, canvas.height as f64, index)?;
    let content = Size::new(
        content.width.min(canvas.width),
        content.height.min(canvas.height),
    );

    let x = (canvas.width - content.width) / 2;
    let y = (canvas.height - content.height) / 2;

    Ok(ResolvedGeometry {
        index,
        role: Role::Primary,
        rect: Rect::full(canvas),
        content: Rect::new(x, y, content.width, content.height),
        source_crop: None,
    })
}

fn resolve_overlay(
    index: usize,
    placement: &PlacementSpec,
    canvas: Size,
) -> DuetResult<ResolvedGeometry> {
    let natural = natural_size(placement);

    let (size, source_crop) = match placement.scale_policy {
        ScalePolicy::FitBox {
            width_ratio,
            height_ratio,
        } => {
            let size = fit_within(
                natural,
                canvas.width as f64 * width_ratio,
                canvas.height as f64 * height_ratio,
                index,
            )?;
            (size, None)
        }
        ScalePolicy::Fixed { width, height } => {
            let size = Size::new(
                even_dimension(width as f64, index, "width")?,
                even_dimension(height as f64, index, "height")?,
            );
            (size, cover_crop(natural, size))
        }
    };

    if !size.fits_within(canvas) {
        return Err(DuetError::canvas_too_small(format!(
            "overlay {index} is {}x{} but the canvas is {}x{}",
            size.width, size.height, canvas.width, canvas.height
        )));
    }

    let margin_x = (canvas.width as f64 * placement.margin.x_ratio).round() as i64;
    let margin_y = (canvas.height as f64 * placement.margin.y_ratio).round() as i64;
    let free_x = (canvas.width - size.width) as i64;
    let free_y = (canvas.height - size.height) as i64;

    let (x, y) = match placement.anchor {
        Anchor::TopLeft => (margin_x, margin_y),
        Anchor::TopCenter => (free_x / 2, margin_y),
        Anchor::TopRight => (free_x - margin_x, margin_y),
        Anchor::Center => (free_x / 2, free_y / 2),
        Anchor::BottomLeft => (margin_x, free_y - margin_y),
        Anchor::BottomCenter => (free_x / 2, free_y - margin_y),
        Anchor::BottomRight => (free_x - margin_x, free_y - margin_y),
        Anchor::Offset { x, y } => (x, y),
    };

    let rect = Rect::new(
        x.clamp(0, free_x) as u32,
        y.clamp(0, free_y) as u32,
        size.width,
        size.height,
    );

    Ok(ResolvedGeometry {
        index,
        role: Role::Overlay,
        rect,
        content: rect,
        source_crop,
    })
}

fn natural_size(placement: &PlacementSpec) -> Size {
    Size::new(
        placement.clip.natural_width(),
        placement.clip.natural_height(),
    )
}

/// Largest aspect-preserving size of `natural` inside a `box_w` x `box_h` box.
fn fit_within(natural: Size, box_w: f64, box_h: f64, index: usize) -> DuetResult<Size> {
    let scale = (box_w / natural.width as f64).min(box_h / natural.height as f64);
    Ok(Size::new(
        even_dimension(natural.width as f64 * scale, index, "width")?,
        even_dimension(natural.height as f64 * scale, index, "height")?,
    ))
}

/// Round to the nearest even integer, refusing anything under two pixels.
fn even_dimension(value: f64, index: usize, what: &str) -> DuetResult<u32> {
    if !value.is_finite() || value < 2.0 {
        return Err(DuetError::canvas_too_small(format!(
            "placement {index} {what} resolves to {value:.2}px"
        )));
    }
    Ok(((value / 2.0).round() * 2.0) as u32)
}

/// Centered source region with the aspect ratio of `target`.
///
/// `None` when the source already has (nearly) the target aspect ratio.
fn cover_crop(natural: Size, target: Size) -> Option<Rect> {
    let source_aspect = natural.width as f64 / natural.height as f64;
    let target_aspect = target.width as f64 / target.height as f64;
    if (source_aspect - target_aspect).abs() < 1e-3 {
        return None;
    }

    let (width, height) = if source_aspect > target_aspect {
        let width = (natural.height as f64 * target_aspect).round() as u32;
        (width.clamp(1, natural.width), natural.height)
    } else {
        let height = (natural.width as f64 / target_aspect).round() as u32;
        (natural.width, height.clamp(1, natural.height))
    };
    Some(Rect::new(
        (natural.width - width) / 2,
        (natural.height - height) / 2,
        width,
        height,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_project_model::{ClipDescriptor, Margin, Rational};

    fn clip(width: u32, height: u32) -> ClipDescriptor {
        ClipDescriptor::new(
            format!("{width}x{height}.mp4"),
            Rational::from_int(10),
            Rational::from_int(30),
            width,
            height,
            true,
        )
        .unwrap()
    }

    #[test]
    fn test_primary_letterboxes_into_canvas() {
        let canvas = Canvas::new(1080, 1920);
        let geometry = resolve(&canvas, &[PlacementSpec::primary(clip(1920, 1080))]).unwrap();

        let primary = geometry[0];
        assert_eq!(primary.rect, Rect::new(0, 0, 1080, 1920));
        assert_eq!(primary.content, Rect::new(0, 656, 1080, 608));
        assert!(primary.needs_padding());
    }

    #[test]
    fn test_primary_with_matching_aspect_needs_no_padding() {
        let canvas = Canvas::new(1280, 720);
        let geometry = resolve(&canvas, &[PlacementSpec::primary(clip(1920, 1080))]).unwrap();
        assert!(!geometry[0].needs_padding());
    }

    #[test]
    fn test_top_right_overlay_geometry() {
        let canvas = Canvas::new(1920, 1080);
        let overlay = PlacementSpec::overlay(clip(640, 480))
            .anchored(Anchor::TopRight)
            .scaled(ScalePolicy::width_ratio(0.05))
            .with_margin(Margin::uniform(0.05));
        let geometry = resolve(
            &canvas,
            &[PlacementSpec::primary(clip(1920, 1080)), overlay],
        )
        .unwrap();

        assert_eq!(geometry[1].rect, Rect::new(1728, 54, 96, 72));
    }

    #[test]
    fn test_default_webcam_box_bottom_right() {
        let canvas = Canvas::new(1920, 1080);
        let overlay = PlacementSpec::overlay(clip(1280, 720));
        let geometry = resolve(&canvas, &[overlay]).unwrap();

        // 460.8x259.2 rounds to the nearest even pair
        let rect = geometry[0].rect;
        assert_eq!((rect.width, rect.height), (460, 260));
        assert_eq!(rect.x, 1920 - 460 - 58);
        assert_eq!(rect.y, 1080 - 260 - 32);
    }

    #[test]
    fn test_offset_anchor_is_clamped_into_canvas() {
        let canvas = Canvas::new(640, 360);
        let overlay = PlacementSpec::overlay(clip(320, 180))
            .anchored(Anchor::Offset { x: 600, y: -40 })
            .scaled(ScalePolicy::Fixed {
                width: 160,
                height: 90,
            });
        let rect = resolve(&canvas, &[overlay]).unwrap()[0].rect;
        assert_eq!(rect, Rect::new(480, 0, 160, 90));
        assert!(rect.is_within(canvas.size()));
    }

    #[test]
    fn test_tiny_overlay_is_rejected() {
        let canvas = Canvas::new(100, 100);
        let overlay = PlacementSpec::overlay(clip(640, 480)).scaled(ScalePolicy::FitBox {
            width_ratio: 0.01,
            height_ratio: 0.01,
        });
        let result = resolve(&canvas, &[overlay]);
        assert!(matches!(result, Err(DuetError::CanvasTooSmall { .. })));
    }

    #[test]
    fn test_oversized_fixed_overlay_is_rejected() {
        let canvas = Canvas::new(320, 240);
        let overlay = PlacementSpec::overlay(clip(640, 480)).scaled(ScalePolicy::Fixed {
            width: 640,
            height: 480,
        });
        assert!(matches!(
            resolve(&canvas, &[overlay]),
            Err(DuetError::CanvasTooSmall { .. })
        ));
    }

    #[test]
    fn test_fixed_box_crops_source_to_aspect() {
        let canvas = Canvas::new(1920, 1080);
        let overlay = PlacementSpec::overlay(clip(1280, 720)).scaled(ScalePolicy::Fixed {
            width: 400,
            height: 400,
        });
        let geometry = resolve(&canvas, &[overlay]).unwrap();
        assert_eq!(geometry[0].source_crop, Some(Rect::new(280, 0, 720, 720)));
    }

    #[test]
    fn test_odd_dimensions_round_to_even() {
        assert_eq!(even_dimension(97.0, 0, "width").unwrap(), 98);
        assert_eq!(even_dimension(2.4, 0, "width").unwrap(), 2);
        assert!(even_dimension(1.9, 0, "width").is_err());
    }
}
