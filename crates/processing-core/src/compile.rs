//! Filter-graph compiler.
//!
//! Lowers a laid-out, synchronized composition into a [`CompiledGraph`].
//!
//! Video: each clip gets its own chain (trim first so dropped frames are
//! never scaled), then the overlays are folded onto the primary in
//! declaration order. An image or video backdrop, when the primary leaves
//! part of the canvas uncovered, is the bottom layer.
//!
//! Audio: each audio-bearing clip and cue gets a short chain and everything
//! meets in one mix node.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use duet_common::error::{DuetError, DuetResult};
use duet_project_model::{
    Background, Composition, FillPolicy, PlacementSpec, Rational, ResolvedGeometry, Size,
    TimeMapping,
};

use crate::graph::{
    CompiledGraph, ExtendMode, GraphNode, InputBinding, InputMode, LabelAllocator, Operation,
    StreamKind, StreamLabel,
};
use crate::layout::resolve_composition;
use crate::sync::{synchronize, synchronize_cues};

/// Pixel format of every video chain.
pub const OUTPUT_PIXEL_FORMAT: &str = "yuv420p";

/// Pixel format used while an alpha channel is needed.
const ALPHA_PIXEL_FORMAT: &str = "yuva420p";

/// Resolve, synchronize and compile a composition in one step.
pub fn compile_composition(composition: &Composition) -> DuetResult<CompiledGraph> {
    let geometry = resolve_composition(composition)?;
    let mappings = synchronize(composition)?;
    compile(composition, &geometry, &mappings)
}

/// Compile a composition with precomputed geometry and time mappings.
///
/// `geometry` and `mappings` must be in declaration order, one entry per
/// placement. The result is validated before it is returned.
pub fn compile(
    composition: &Composition,
    geometry: &[ResolvedGeometry],
    mappings: &[TimeMapping],
) -> DuetResult<CompiledGraph> {
    let placements = composition.placements();
    if placements.is_empty() || geometry.is_empty() {
        return Err(DuetError::EmptyComposition);
    }
    if geometry.len() != placements.len() || mappings.len() != placements.len() {
        return Err(DuetError::invalid_composition(format!(
            "{} placements but {} geometries and {} time mappings",
            placements.len(),
            geometry.len(),
            mappings.len()
        )));
    }

    let (primary_index, _) = composition.primary();
    let frame_rate = composition.frame_rate();
    let duration = composition.output_duration();
    let mut builder = GraphBuilder::new(frame_rate);
    let canvas = composition.canvas();
    let primary_geometry = &geometry[primary_index];

    // A full-canvas primary hides the backdrop entirely.
    let backdrop = if primary_geometry.needs_padding() {
        builder.backdrop(&canvas.background, canvas.size(), duration)
    } else {
        None
    };

    // Bind sources in declaration order so input indices follow first use.
    for (placement, mapping) in placements.iter().zip(mappings) {
        if !mapping.is_empty() {
            builder.bind(placement.clip.source_path());
        }
    }

    let pad_color = match (&canvas.background, &backdrop) {
        (Background::Color(color), None) => Some(color.as_str()),
        _ => None,
    };
    let mut video = builder.video_chain(
        &placements[primary_index],
        primary_geometry,
        &mappings[primary_index],
        pad_color,
    );
    if let Some(backdrop) = backdrop {
        video = builder.push(
            Operation::Overlay {
                x: primary_geometry.content.x,
                y: primary_geometry.content.y,
                pass_on_end: false,
            },
            vec![backdrop, video],
        );
    }

    for (index, placement) in placements.iter().enumerate() {
        if index == primary_index {
            continue;
        }
        let mapping = &mappings[index];
        if mapping.is_empty() {
            tracing::warn!(
                index,
                source = %placement.clip.source_path().display(),
                "Skipping overlay with an empty output span"
            );
            continue;
        }
        let rect = geometry[index].rect;
        let overlay = builder.video_chain(placement, &geometry[index], mapping, None);
        video = builder.push(
            Operation::Overlay {
                x: rect.x,
                y: rect.y,
                pass_on_end: mapping.fill_policy == FillPolicy::Trim,
            },
            vec![video, overlay],
        );
    }

    let mut audio_streams = Vec::new();
    for (index, placement) in placements.iter().enumerate() {
        if placement.clip.has_audio() && !mappings[index].is_empty() {
            audio_streams.push(builder.audio_chain(placement, &mappings[index]));
        }
    }

    let cue_mappings = synchronize_cues(composition.audio_cues(), duration);
    for (cue, mapping) in composition.audio_cues().iter().zip(&cue_mappings) {
        if mapping.is_empty() {
            tracing::warn!(
                source = %cue.source.source_path.display(),
                "Skipping audio cue that starts after the output ends"
            );
            continue;
        }
        let input = builder.bind(&cue.source.source_path);
        let mut label = StreamLabel::raw(input, StreamKind::Audio);
        if mapping.input_end < cue.source.duration {
            label = builder.push(
                Operation::Trim {
                    kind: StreamKind::Audio,
                    start: mapping.input_start,
                    end: mapping.input_end,
                },
                vec![label],
            );
        }
        label = builder.delay(label, StreamKind::Audio, mapping.output_start);
        label = builder.volume(label, cue.gain);
        audio_streams.push(label);
    }

    let audio_label = match audio_streams.len() {
        0 => None,
        1 => Some(builder.push(
            Operation::PassThrough {
                kind: StreamKind::Audio,
            },
            audio_streams,
        )),
        inputs => Some(builder.push(Operation::Mix { inputs }, audio_streams)),
    };

    let graph = CompiledGraph {
        nodes: builder.nodes,
        inputs: builder.inputs,
        video_label: video,
        audio_label,
        duration,
        frame_rate,
        canvas: composition.canvas().size(),
    };
    graph.validate()?;

    tracing::debug!(
        nodes = graph.nodes.len(),
        inputs = graph.inputs.len(),
        duration = %graph.duration.to_secs_string(),
        "Compiled filter graph"
    );
    Ok(graph)
}

/// Per-compile mutable state: node list, label allocator and input table.
struct GraphBuilder {
    nodes: Vec<GraphNode>,
    labels: LabelAllocator,
    inputs: Vec<InputBinding>,
    bound: HashMap<(PathBuf, InputMode), usize>,
    frame_rate: Rational,
}

impl GraphBuilder {
    fn new(frame_rate: Rational) -> Self {
        Self {
            nodes: Vec::new(),
            labels: LabelAllocator::new(),
            inputs: Vec::new(),
            bound: HashMap::new(),
            frame_rate,
        }
    }

    /// Input index of a source, binding it on first use.
    fn bind(&mut self, path: &Path) -> usize {
        self.bind_as(path, InputMode::Once)
    }

    fn bind_as(&mut self, path: &Path, mode: InputMode) -> usize {
        let key = (path.to_path_buf(), mode);
        if let Some(index) = self.bound.get(&key) {
            return *index;
        }
        let index = self.inputs.len();
        self.inputs.push(InputBinding {
            index,
            path: path.to_path_buf(),
            mode,
        });
        self.bound.insert(key, index);
        index
    }

    /// Looping image or video covering the canvas for the whole output.
    /// `None` for a plain color.
    fn backdrop(
        &mut self,
        background: &Background,
        canvas: Size,
        duration: Rational,
    ) -> Option<StreamLabel> {
        let (path, mode) = match background {
            Background::Color(_) => return None,
            Background::Image { image } => (image, InputMode::LoopImage),
            Background::Video { video } => (video, InputMode::LoopVideo),
        };
        let input = self.bind_as(path, mode);
        let mut label = StreamLabel::raw(input, StreamKind::Video);

        // The looped input never ends on its own.
        label = self.push(
            Operation::Trim {
                kind: StreamKind::Video,
                start: Rational::ZERO,
                end: duration,
            },
            vec![label],
        );
        label = self.push(
            Operation::FrameRate {
                rate: self.frame_rate,
            },
            vec![label],
        );
        label = self.push(
            Operation::FormatConvert {
                pixel_format: OUTPUT_PIXEL_FORMAT.to_string(),
            },
            vec![label],
        );
        Some(self.push(
            Operation::Cover {
                width: canvas.width,
                height: canvas.height,
            },
            vec![label],
        ))
    }

    fn push(&mut self, operation: Operation, inputs: Vec<StreamLabel>) -> StreamLabel {
        let output = self.labels.allocate();
        self.nodes.push(GraphNode {
            operation,
            inputs,
            output: output.clone(),
        });
        output
    }

    fn video_chain(
        &mut self,
        placement: &PlacementSpec,
        geometry: &ResolvedGeometry,
        mapping: &TimeMapping,
        pad_color: Option<&str>,
    ) -> StreamLabel {
        let clip = &placement.clip;
        let input = self.bind(clip.source_path());
        let mut label = StreamLabel::raw(input, StreamKind::Video);

        if mapping.input_start.is_positive() || mapping.input_end < clip.duration() {
            label = self.push(
                Operation::Trim {
                    kind: StreamKind::Video,
                    start: mapping.input_start,
                    end: mapping.input_end,
                },
                vec![label],
            );
        }

        if clip.frame_rate() != self.frame_rate {
            label = self.push(
                Operation::FrameRate {
                    rate: self.frame_rate,
                },
                vec![label],
            );
        }

        let translucent = placement.opacity < 1.0;
        label = self.push(
            Operation::FormatConvert {
                pixel_format: if translucent {
                    ALPHA_PIXEL_FORMAT
                } else {
                    OUTPUT_PIXEL_FORMAT
                }
                .to_string(),
            },
            vec![label],
        );

        if let Some(crop) = geometry.source_crop {
            label = self.push(
                Operation::Crop {
                    x: crop.x,
                    y: crop.y,
                    width: crop.width,
                    height: crop.height,
                },
                vec![label],
            );
        }

        let content = geometry.content;
        let source_size = geometry
            .source_crop
            .map(|crop| (crop.width, crop.height))
            .unwrap_or((clip.natural_width(), clip.natural_height()));
        if source_size != (content.width, content.height) {
            label = self.push(
                Operation::Scale {
                    width: content.width,
                    height: content.height,
                },
                vec![label],
            );
        }

        match pad_color {
            Some(color) if placement.is_primary() && geometry.needs_padding() => {
                label = self.push(
                    Operation::Pad {
                        width: geometry.rect.width,
                        height: geometry.rect.height,
                        x: content.x,
                        y: content.y,
                        color: color.to_string(),
                    },
                    vec![label],
                );
            }
            _ => {}
        }

        if translucent {
            label = self.push(
                Operation::Opacity {
                    alpha: placement.opacity,
                },
                vec![label],
            );
        }

        let extension = mapping.extension();
        if extension.is_positive() {
            let mode = match mapping.fill_policy {
                FillPolicy::HoldLastFrame => ExtendMode::Clone,
                FillPolicy::PadSilenceOrBlack | FillPolicy::Trim => ExtendMode::Black,
            };
            label = self.push(
                Operation::Extend {
                    mode,
                    duration: extension,
                },
                vec![label],
            );
        }

        self.delay(label, StreamKind::Video, mapping.output_start)
    }

    fn audio_chain(&mut self, placement: &PlacementSpec, mapping: &TimeMapping) -> StreamLabel {
        let clip = &placement.clip;
        let input = self.bind(clip.source_path());
        let mut label = StreamLabel::raw(input, StreamKind::Audio);

        if mapping.input_start.is_positive() || mapping.input_end < clip.duration() {
            label = self.push(
                Operation::Trim {
                    kind: StreamKind::Audio,
                    start: mapping.input_start,
                    end: mapping.input_end,
                },
                vec![label],
            );
        }

        label = self.delay(label, StreamKind::Audio, mapping.output_start);

        // Audio never holds; any extension is silence.
        let extension = mapping.extension();
        if extension.is_positive() {
            label = self.push(
                Operation::Extend {
                    mode: ExtendMode::Silence,
                    duration: extension,
                },
                vec![label],
            );
        }

        self.volume(label, placement.gain)
    }

    fn delay(&mut self, label: StreamLabel, kind: StreamKind, offset: Rational) -> StreamLabel {
        if !offset.is_positive() {
            return label;
        }
        self.push(Operation::Delay { kind, offset }, vec![label])
    }

    fn volume(&mut self, label: StreamLabel, gain: f64) -> StreamLabel {
        if (gain - 1.0).abs() < f64::EPSILON {
            return label;
        }
        self.push(Operation::Volume { gain }, vec![label])
    }
}
