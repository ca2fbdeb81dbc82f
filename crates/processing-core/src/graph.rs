//! Processing graph model.
//!
//! A compiled graph is a list of typed nodes in topological order. Each node
//! consumes labeled streams and produces exactly one new labeled stream.
//! Labels are either raw input streams (`0:v`, `1:a`) or allocated by the
//! compiler (`s0`, `s1`, ...).

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use duet_common::error::{DuetError, DuetResult};
use duet_project_model::{Rational, Size};

use crate::filtergraph;

/// Media type carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

/// How an Extend node fills the added time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtendMode {
    /// Repeat the last video frame.
    Clone,
    /// Append black video frames.
    Black,
    /// Append silent audio.
    Silence,
}

/// A stream label inside the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StreamLabel(String);

impl StreamLabel {
    /// Raw stream of an input file (`<index>:v` / `<index>:a`).
    pub fn raw(input: usize, kind: StreamKind) -> Self {
        let suffix = match kind {
            StreamKind::Video => "v",
            StreamKind::Audio => "a",
        };
        Self(format!("{input}:{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The input index if this is a raw input stream.
    pub fn raw_input(&self) -> Option<usize> {
        let (index, kind) = self.0.split_once(':')?;
        if kind != "v" && kind != "a" {
            return None;
        }
        index.parse().ok()
    }
}

impl fmt::Display for StreamLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic label source. One allocator per compile, so identical inputs
/// always compile to identical labels.
#[derive(Debug, Default)]
pub struct LabelAllocator {
    next: usize,
}

impl LabelAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> StreamLabel {
        let label = StreamLabel(format!("s{}", self.next));
        self.next += 1;
        label
    }
}

/// A typed processing step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Scale {
        width: u32,
        height: u32,
    },
    Crop {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    /// Scale preserving aspect until the box is covered, then center-crop
    /// the excess.
    Cover {
        width: u32,
        height: u32,
    },
    Pad {
        width: u32,
        height: u32,
        x: u32,
        y: u32,
        color: String,
    },
    /// Paint the second input over the first.
    Overlay {
        x: u32,
        y: u32,
        /// Let the main stream continue unchanged once the overlay ends.
        pass_on_end: bool,
    },
    /// Sum audio streams with equal weights.
    Mix {
        inputs: usize,
    },
    /// Keep `[start, end)` of the input and reset timestamps to zero.
    Trim {
        kind: StreamKind,
        start: Rational,
        end: Rational,
    },
    FormatConvert {
        pixel_format: String,
    },
    FrameRate {
        rate: Rational,
    },
    Extend {
        mode: ExtendMode,
        duration: Rational,
    },
    /// Shift the stream later on the output timeline.
    Delay {
        kind: StreamKind,
        offset: Rational,
    },
    Volume {
        gain: f64,
    },
    Opacity {
        alpha: f64,
    },
    PassThrough {
        kind: StreamKind,
    },
}

impl Operation {
    /// Short operation name used in logs and dumps.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Scale { .. } => "scale",
            Operation::Crop { .. } => "crop",
            Operation::Cover { .. } => "cover",
            Operation::Pad { .. } => "pad",
            Operation::Overlay { .. } => "overlay",
            Operation::Mix { .. } => "mix",
            Operation::Trim { .. } => "trim",
            Operation::FormatConvert { .. } => "format",
            Operation::FrameRate { .. } => "frame_rate",
            Operation::Extend { .. } => "extend",
            Operation::Delay { .. } => "delay",
            Operation::Volume { .. } => "volume",
            Operation::Opacity { .. } => "opacity",
            Operation::PassThrough { .. } => "pass_through",
        }
    }
}

/// One node of the graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub operation: Operation,
    pub inputs: Vec<StreamLabel>,
    pub output: StreamLabel,
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for input in &self.inputs {
            write!(f, "[{input}]")?;
        }
        write!(
            f,
            "{}[{}]",
            filtergraph::render_operation(&self.operation),
            self.output
        )
    }
}

/// How the engine reads an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Read once, start to end.
    #[default]
    Once,
    /// A still image repeated without end.
    LoopImage,
    /// A video restarted from the beginning whenever it ends.
    LoopVideo,
}

impl InputMode {
    pub fn is_once(&self) -> bool {
        *self == InputMode::Once
    }
}

/// An input file bound to an engine input index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputBinding {
    pub index: usize,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "InputMode::is_once")]
    pub mode: InputMode,
}

impl InputBinding {
    /// An input read once.
    pub fn once(index: usize, path: impl Into<PathBuf>) -> Self {
        Self {
            index,
            path: path.into(),
            mode: InputMode::Once,
        }
    }
}

/// The compiled, validated processing graph for one render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledGraph {
    /// Nodes in topological order.
    pub nodes: Vec<GraphNode>,
    /// Distinct input files in first-use order.
    pub inputs: Vec<InputBinding>,
    pub video_label: StreamLabel,
    pub audio_label: Option<StreamLabel>,
    pub duration: Rational,
    pub frame_rate: Rational,
    pub canvas: Size,
}

impl CompiledGraph {
    /// Serialize into ffmpeg `-filter_complex` syntax.
    pub fn to_filter_complex(&self) -> String {
        self.nodes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(";")
    }

    /// One node per line; used for diagnostics and `duet plan`.
    pub fn dump(&self) -> String {
        self.nodes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(";\n")
    }

    /// Total number of output frames.
    pub fn frame_count(&self) -> u64 {
        self.duration.frames_at(self.frame_rate)
    }

    /// Check structural soundness.
    ///
    /// Every node input must be a bound raw stream or the output of an
    /// earlier node, which also guarantees the graph is acyclic and already
    /// in topological order. Outputs must be unique, every derived stream is
    /// consumed at most once, and the final labels must exist.
    pub fn validate(&self) -> DuetResult<()> {
        let mut produced: HashSet<&StreamLabel> = HashSet::new();
        let mut consumed: HashMap<&StreamLabel, usize> = HashMap::new();

        for node in &self.nodes {
            for input in &node.inputs {
                let resolved = match input.raw_input() {
                    Some(index) => index < self.inputs.len(),
                    None => produced.contains(input),
                };
                if !resolved {
                    return Err(self.dangling(input, &node.to_string()));
                }
                if input.raw_input().is_none() {
                    *consumed.entry(input).or_default() += 1;
                }
            }
            if node.output.raw_input().is_some() || !produced.insert(&node.output) {
                return Err(DuetError::invalid_composition(format!(
                    "stream [{}] is produced more than once\n{}",
                    node.output,
                    self.dump()
                )));
            }
        }

        if let Some((label, _)) = consumed.iter().find(|(_, count)| **count > 1) {
            return Err(DuetError::invalid_composition(format!(
                "stream [{label}] is consumed more than once\n{}",
                self.dump()
            )));
        }

        let finals = std::iter::once(&self.video_label).chain(self.audio_label.as_ref());
        for label in finals {
            if !produced.contains(label) && label.raw_input().is_none() {
                return Err(self.dangling(label, "output mapping"));
            }
            if consumed.contains_key(label) {
                return Err(DuetError::invalid_composition(format!(
                    "final stream [{label}] is also consumed inside the graph"
                )));
            }
        }

        Ok(())
    }

    fn dangling(&self, label: &StreamLabel, node: &str) -> DuetError {
        DuetError::DanglingReference {
            label: label.to_string(),
            node: node.to_string(),
            graph: self.dump(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(op: Operation, inputs: &[&StreamLabel], output: &StreamLabel) -> GraphNode {
        GraphNode {
            operation: op,
            inputs: inputs.iter().map(|l| (*l).clone()).collect(),
            output: output.clone(),
        }
    }

    fn graph(nodes: Vec<GraphNode>, video: StreamLabel) -> CompiledGraph {
        CompiledGraph {
            nodes,
            inputs: vec![
                InputBinding::once(0, "main.mp4"),
                InputBinding::once(1, "cam.mp4"),
            ],
            video_label: video,
            audio_label: None,
            duration: Rational::from_int(10),
            frame_rate: Rational::from_int(30),
            canvas: Size::new(1920, 1080),
        }
    }

    #[test]
    fn test_allocator_is_monotonic() {
        let mut labels = LabelAllocator::new();
        assert_eq!(labels.allocate().as_str(), "s0");
        assert_eq!(labels.allocate().as_str(), "s1");
    }

    #[test]
    fn test_raw_label_parsing() {
        assert_eq!(StreamLabel::raw(2, StreamKind::Audio).as_str(), "2:a");
        assert_eq!(StreamLabel::raw(2, StreamKind::Audio).raw_input(), Some(2));
        assert_eq!(LabelAllocator::new().allocate().raw_input(), None);
    }

    #[test]
    fn test_valid_chain_serializes() {
        let mut labels = LabelAllocator::new();
        let (a, b, c) = (labels.allocate(), labels.allocate(), labels.allocate());
        let main = StreamLabel::raw(0, StreamKind::Video);
        let cam = StreamLabel::raw(1, StreamKind::Video);

        let g = graph(
            vec![
                node(
                    Operation::FormatConvert {
                        pixel_format: "yuv420p".into(),
                    },
                    &[&main],
                    &a,
                ),
                node(
                    Operation::Scale {
                        width: 96,
                        height: 72,
                    },
                    &[&cam],
                    &b,
                ),
                node(
                    Operation::Overlay {
                        x: 1728,
                        y: 54,
                        pass_on_end: true,
                    },
                    &[&a, &b],
                    &c,
                ),
            ],
            c.clone(),
        );

        g.validate().unwrap();
        assert_eq!(
            g.to_filter_complex(),
            "[0:v]format=pix_fmts=yuv420p[s0];\
             [1:v]scale=96:72:flags=lanczos[s1];\
             [s0][s1]overlay=x=1728:y=54:eof_action=pass[s2]"
        );
    }

    #[test]
    fn test_dangling_reference_is_reported_with_dump() {
        let mut labels = LabelAllocator::new();
        let (a, ghost) = (labels.allocate(), labels.allocate());
        let g = graph(
            vec![node(
                Operation::PassThrough {
                    kind: StreamKind::Video,
                },
                &[&ghost],
                &a,
            )],
            a.clone(),
        );

        match g.validate() {
            Err(DuetError::DanglingReference { label, graph, .. }) => {
                assert_eq!(label, "s1");
                assert!(graph.contains("[s1]null[s0]"));
            }
            other => panic!("expected DanglingReference, got {other:?}"),
        }
    }

    #[test]
    fn test_unbound_raw_input_is_dangling() {
        let a = LabelAllocator::new().allocate();
        let g = graph(
            vec![node(
                Operation::PassThrough {
                    kind: StreamKind::Video,
                },
                &[&StreamLabel::raw(5, StreamKind::Video)],
                &a,
            )],
            a.clone(),
        );
        assert!(matches!(
            g.validate(),
            Err(DuetError::DanglingReference { .. })
        ));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut labels = LabelAllocator::new();
        let (a, b) = (labels.allocate(), labels.allocate());
        let video = |l: &StreamLabel, out: &StreamLabel| {
            node(
                Operation::PassThrough {
                    kind: StreamKind::Video,
                },
                &[l],
                out,
            )
        };
        let g = graph(vec![video(&b, &a), video(&a, &b)], b.clone());
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_duplicate_output_is_rejected() {
        let a = LabelAllocator::new().allocate();
        let raw = StreamLabel::raw(0, StreamKind::Video);
        let pass = node(
            Operation::PassThrough {
                kind: StreamKind::Video,
            },
            &[&raw],
            &a,
        );
        let g = graph(vec![pass.clone(), pass], a.clone());
        assert!(matches!(
            g.validate(),
            Err(DuetError::InvalidComposition { .. })
        ));
    }
}
