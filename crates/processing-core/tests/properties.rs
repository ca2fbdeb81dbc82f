//! Property-based tests for layout, synchronization and compilation.
//!
//! Compositions are generated with random canvases, clip sizes, durations,
//! anchors, offsets and fill policies.

use proptest::prelude::*;

use duet_common::error::DuetError;
use duet_processing_core::{compile_composition, resolve_composition, synchronize};
use duet_project_model::{
    Anchor, Canvas, ClipDescriptor, Composition, FillPolicy, Margin, PlacementSpec, Rational,
    Role, ScalePolicy,
};

fn anchor_strategy() -> impl Strategy<Value = Anchor> {
    prop_oneof![
        Just(Anchor::TopLeft),
        Just(Anchor::TopCenter),
        Just(Anchor::TopRight),
        Just(Anchor::Center),
        Just(Anchor::BottomLeft),
        Just(Anchor::BottomCenter),
        Just(Anchor::BottomRight),
        (-500i64..5000, -500i64..5000).prop_map(|(x, y)| Anchor::Offset { x, y }),
    ]
}

fn fill_strategy() -> impl Strategy<Value = FillPolicy> {
    prop_oneof![
        Just(FillPolicy::Trim),
        Just(FillPolicy::PadSilenceOrBlack),
        Just(FillPolicy::HoldLastFrame),
    ]
}

fn scale_strategy() -> impl Strategy<Value = ScalePolicy> {
    prop_oneof![
        (0.05f64..=1.0, 0.05f64..=1.0).prop_map(|(width_ratio, height_ratio)| {
            ScalePolicy::FitBox {
                width_ratio,
                height_ratio,
            }
        }),
        (2u32..400, 2u32..400).prop_map(|(width, height)| ScalePolicy::Fixed { width, height }),
    ]
}

prop_compose! {
    fn clip_strategy(name: &'static str)(
        millis in 500i64..120_000,
        rate in prop_oneof![Just((30i64, 1i64)), Just((25, 1)), Just((30000, 1001)), Just((60, 1))],
        width in 16u32..3840,
        height in 16u32..2160,
        audio in any::<bool>(),
    ) -> ClipDescriptor {
        ClipDescriptor::new(
            name,
            Rational::from_millis(millis),
            Rational::new(rate.0, rate.1).unwrap(),
            width,
            height,
            audio,
        ).unwrap()
    }
}

prop_compose! {
    fn overlay_strategy()(
        clip in clip_strategy("overlay.mp4"),
        anchor in anchor_strategy(),
        scale in scale_strategy(),
        margin_x in 0.0f64..0.2,
        margin_y in 0.0f64..0.2,
        offset_ms in 0i64..150_000,
        fill in fill_strategy(),
        gain in 0.0f64..2.0,
        opacity in 0.1f64..=1.0,
    ) -> PlacementSpec {
        PlacementSpec::overlay(clip)
            .anchored(anchor)
            .scaled(scale)
            .with_margin(Margin { x_ratio: margin_x, y_ratio: margin_y })
            .starting_at(Rational::from_millis(offset_ms))
            .with_fill(fill)
            .with_gain(gain)
            .with_opacity(opacity)
    }
}

prop_compose! {
    fn composition_strategy()(
        half_width in 160u32..1920,
        half_height in 160u32..1920,
        primary in clip_strategy("primary.mp4"),
        overlays in prop::collection::vec(overlay_strategy(), 0..6),
    ) -> Composition {
        let mut placements = vec![PlacementSpec::primary(primary)];
        placements.extend(overlays);
        Composition::new(Canvas::new(half_width * 2, half_height * 2), placements).unwrap()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Resolved rectangles stay inside the canvas and have even sizes.
    #[test]
    fn layout_stays_in_bounds(composition in composition_strategy()) {
        let canvas = composition.canvas().size();
        match resolve_composition(&composition) {
            Ok(geometry) => {
                prop_assert_eq!(geometry.len(), composition.placements().len());
                for g in geometry {
                    prop_assert!(g.rect.is_within(canvas), "{:?} outside {:?}", g.rect, canvas);
                    prop_assert!(g.content.is_within(canvas));
                    prop_assert_eq!(g.rect.width % 2, 0);
                    prop_assert_eq!(g.rect.height % 2, 0);
                    prop_assert_eq!(g.content.width % 2, 0);
                    prop_assert_eq!(g.content.height % 2, 0);
                    if g.role == Role::Primary {
                        prop_assert_eq!(g.rect.size(), canvas);
                    }
                }
            }
            Err(DuetError::CanvasTooSmall { .. }) => {}
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }

    /// The primary and every extended overlay starting at 0 span exactly the
    /// output duration; no mapping ever leaves the output timeline.
    #[test]
    fn synchronization_spans_output(composition in composition_strategy()) {
        let duration = composition.output_duration();
        let mappings = synchronize(&composition).unwrap();

        for (placement, mapping) in composition.placements().iter().zip(&mappings) {
            prop_assert!(mapping.output_end <= duration);
            prop_assert!(mapping.output_start >= Rational::ZERO);
            prop_assert!(mapping.input_start >= placement.clip.trim_start());
            prop_assert!(mapping.input_end <= placement.clip.trim_end());
            prop_assert!(mapping.input_span() <= mapping.output_span() || mapping.is_empty());

            let extended = placement.is_primary()
                || (placement.start_offset.is_zero() && placement.effective_fill().extends());
            if extended {
                prop_assert_eq!(mapping.output_span(), duration);
            }
            if !mapping.fill_policy.extends() && !mapping.is_empty() {
                prop_assert_eq!(mapping.output_span(), mapping.input_span());
            }
        }

        prop_assert_eq!(synchronize(&composition).unwrap(), mappings);
    }

    /// Compilation yields a validated DAG and is deterministic.
    #[test]
    fn compile_is_a_deterministic_dag(composition in composition_strategy()) {
        match compile_composition(&composition) {
            Ok(graph) => {
                graph.validate().unwrap();
                let again = compile_composition(&composition).unwrap();
                prop_assert_eq!(graph.to_filter_complex(), again.to_filter_complex());
                prop_assert_eq!(&graph, &again);
                prop_assert!(!graph.inputs.is_empty());
                prop_assert_eq!(graph.duration, composition.output_duration());
            }
            Err(DuetError::CanvasTooSmall { .. }) => {}
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }
}
