//! Placements and compositions.
//!
//! A [`Composition`] is the fully typed description of one render: the
//! canvas, the ordered clip placements (exactly one primary, any number of
//! overlays), and audio cues. It is validated once at construction, so the
//! layout, synchronization and compile stages can assume a sound model.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use duet_common::error::{DuetError, DuetResult};

use crate::clip::{AudioSource, ClipDescriptor};
use crate::geometry::Size;
use crate::time::Rational;
use crate::timing::FillPolicy;

/// Role of a placement within the composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Fills the canvas and defines the output duration.
    Primary,
    /// Painted over the primary in declaration order.
    Overlay,
}

/// Where an overlay box is attached on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    TopLeft,
    TopCenter,
    TopRight,
    Center,
    BottomLeft,
    BottomCenter,
    #[default]
    BottomRight,
    /// Explicit top-left pixel position. Margins are ignored.
    Offset { x: i64, y: i64 },
}

/// How an overlay's box size is derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScalePolicy {
    /// Largest aspect-preserving size within a box given as canvas ratios.
    FitBox { width_ratio: f64, height_ratio: f64 },
    /// Exact pixel size. The source is center-cropped to the box's aspect
    /// ratio first, so the picture is never stretched.
    Fixed { width: u32, height: u32 },
}

impl ScalePolicy {
    /// Box as a ratio of canvas width only (height unconstrained).
    pub fn width_ratio(ratio: f64) -> Self {
        ScalePolicy::FitBox {
            width_ratio: ratio,
            height_ratio: 1.0,
        }
    }
}

impl Default for ScalePolicy {
    fn default() -> Self {
        ScalePolicy::FitBox {
            width_ratio: 0.24,
            height_ratio: 0.24,
        }
    }
}

/// Inward offset from the anchored edges, as canvas ratios.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margin {
    /// Ratio of canvas width applied horizontally.
    pub x_ratio: f64,
    /// Ratio of canvas height applied vertically.
    pub y_ratio: f64,
}

impl Margin {
    pub const NONE: Margin = Margin {
        x_ratio: 0.0,
        y_ratio: 0.0,
    };

    pub fn uniform(ratio: f64) -> Self {
        Self {
            x_ratio: ratio,
            y_ratio: ratio,
        }
    }
}

impl Default for Margin {
    fn default() -> Self {
        Self::uniform(0.03)
    }
}

/// One clip placed on the canvas and timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementSpec {
    pub clip: ClipDescriptor,
    pub role: Role,
    pub anchor: Anchor,
    pub scale_policy: ScalePolicy,
    pub margin: Margin,
    /// Output time at which the clip starts.
    pub start_offset: Rational,
    /// Fill policy override; `None` means hold the last frame.
    pub fill_policy: Option<FillPolicy>,
    /// Linear audio gain.
    pub gain: f64,
    pub opacity: f64,
}

impl PlacementSpec {
    /// The canvas-filling clip.
    pub fn primary(clip: ClipDescriptor) -> Self {
        Self {
            clip,
            role: Role::Primary,
            anchor: Anchor::Center,
            scale_policy: ScalePolicy::FitBox {
                width_ratio: 1.0,
                height_ratio: 1.0,
            },
            margin: Margin::NONE,
            start_offset: Rational::ZERO,
            fill_policy: None,
            gain: 1.0,
            opacity: 1.0,
        }
    }

    /// A picture-in-picture overlay with the default webcam box.
    pub fn overlay(clip: ClipDescriptor) -> Self {
        Self {
            clip,
            role: Role::Overlay,
            anchor: Anchor::default(),
            scale_policy: ScalePolicy::default(),
            margin: Margin::default(),
            start_offset: Rational::ZERO,
            fill_policy: None,
            gain: 1.0,
            opacity: 1.0,
        }
    }

    pub fn anchored(mut self, anchor: Anchor) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn scaled(mut self, scale_policy: ScalePolicy) -> Self {
        self.scale_policy = scale_policy;
        self
    }

    pub fn with_margin(mut self, margin: Margin) -> Self {
        self.margin = margin;
        self
    }

    pub fn starting_at(mut self, offset: Rational) -> Self {
        self.start_offset = offset;
        self
    }

    pub fn with_fill(mut self, policy: FillPolicy) -> Self {
        self.fill_policy = Some(policy);
        self
    }

    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn is_primary(&self) -> bool {
        self.role == Role::Primary
    }

    /// Fill policy after defaults.
    pub fn effective_fill(&self) -> FillPolicy {
        self.fill_policy.unwrap_or_default()
    }

    fn validate(&self, index: usize) -> DuetResult<()> {
        let fail = |what: String| {
            Err(DuetError::invalid_composition(format!(
                "placement {index} ({}): {what}",
                self.clip.source_path().display()
            )))
        };

        if let ScalePolicy::FitBox {
            width_ratio,
            height_ratio,
        } = self.scale_policy
        {
            for ratio in [width_ratio, height_ratio] {
                if !(ratio > 0.0 && ratio <= 1.0) {
                    return fail(format!("scale ratio {ratio} outside (0, 1]"));
                }
            }
        }
        for ratio in [self.margin.x_ratio, self.margin.y_ratio] {
            if !(0.0..0.5).contains(&ratio) {
                return fail(format!("margin ratio {ratio} outside [0, 0.5)"));
            }
        }
        if !self.gain.is_finite() || self.gain < 0.0 {
            return fail(format!("gain {} must be a non-negative number", self.gain));
        }
        if !(self.opacity > 0.0 && self.opacity <= 1.0) {
            return fail(format!("opacity {} outside (0, 1]", self.opacity));
        }
        if self.start_offset.is_negative() {
            return fail(format!("negative start offset {}", self.start_offset));
        }
        if self.is_primary() && !self.start_offset.is_zero() {
            return fail("the primary clip must start at 0".to_string());
        }
        Ok(())
    }
}

/// An audio-only cue mixed into the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioCue {
    pub source: AudioSource,
    pub start_offset: Rational,
    pub gain: f64,
}

impl AudioCue {
    pub fn new(source: AudioSource, start_offset: Rational) -> Self {
        Self {
            source,
            start_offset,
            gain: 1.0,
        }
    }
}

/// What is painted behind the primary where it does not cover the canvas.
///
/// In a project file this is either a color string or an object naming a
/// still image (`{"image": "bg.png"}`) or a video (`{"video": "loop.mp4"}`).
/// Media backdrops loop for the whole output and are scaled to cover the
/// canvas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Background {
    /// `#rrggbb` or an ffmpeg color name.
    Color(String),
    Image { image: PathBuf },
    Video { video: PathBuf },
}

impl Background {
    /// The media file behind an image or video backdrop.
    pub fn source(&self) -> Option<&Path> {
        match self {
            Background::Color(_) => None,
            Background::Image { image } => Some(image),
            Background::Video { video } => Some(video),
        }
    }

    /// Rewrite the media path, keeping the kind.
    pub fn map_source(self, f: impl FnOnce(&Path) -> PathBuf) -> Self {
        match self {
            Background::Color(color) => Background::Color(color),
            Background::Image { image } => Background::Image { image: f(&image) },
            Background::Video { video } => Background::Video { video: f(&video) },
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Background::Color(color) => color.trim().is_empty(),
            Background::Image { image: path } | Background::Video { video: path } => {
                path.as_os_str().is_empty()
            }
        }
    }
}

impl Default for Background {
    fn default() -> Self {
        Background::Color("#1a1a1a".to_string())
    }
}

impl From<&str> for Background {
    fn from(color: &str) -> Self {
        Background::Color(color.to_string())
    }
}

impl From<String> for Background {
    fn from(color: String) -> Self {
        Background::Color(color)
    }
}

/// Output canvas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    /// Shown around letterboxed content.
    #[serde(default)]
    pub background: Background,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            background: Background::default(),
        }
    }

    pub fn with_background(mut self, background: impl Into<Background>) -> Self {
        self.background = background.into();
        self
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// A validated composition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Composition {
    canvas: Canvas,
    placements: Vec<PlacementSpec>,
    duration_override: Option<Rational>,
    audio_cues: Vec<AudioCue>,
}

impl Composition {
    /// Validate and build a composition.
    ///
    /// Fails with `EmptyComposition` for no placements, `CanvasTooSmall` for
    /// a degenerate canvas, and `InvalidComposition` when the primary count is
    /// not exactly one or a placement parameter is out of range.
    pub fn new(canvas: Canvas, placements: Vec<PlacementSpec>) -> DuetResult<Self> {
        if placements.is_empty() {
            return Err(DuetError::EmptyComposition);
        }
        if canvas.width < 2 || canvas.height < 2 {
            return Err(DuetError::canvas_too_small(format!(
                "canvas {}x{} is degenerate",
                canvas.width, canvas.height
            )));
        }
        if canvas.width % 2 != 0 || canvas.height % 2 != 0 {
            return Err(DuetError::invalid_composition(format!(
                "canvas {}x{} must have even dimensions",
                canvas.width, canvas.height
            )));
        }
        if canvas.background.is_blank() {
            return Err(DuetError::invalid_composition("empty background"));
        }

        let primaries = placements.iter().filter(|p| p.is_primary()).count();
        if primaries != 1 {
            return Err(DuetError::invalid_composition(format!(
                "expected exactly one primary placement, found {primaries}"
            )));
        }
        for (index, placement) in placements.iter().enumerate() {
            placement.validate(index)?;
        }

        Ok(Self {
            canvas,
            placements,
            duration_override: None,
            audio_cues: Vec::new(),
        })
    }

    /// Force the output duration instead of following the primary.
    pub fn with_duration_override(mut self, duration: Rational) -> DuetResult<Self> {
        if !duration.is_positive() {
            return Err(DuetError::invalid_composition(format!(
                "duration override {duration} must be positive"
            )));
        }
        self.duration_override = Some(duration);
        Ok(self)
    }

    pub fn with_audio_cue(mut self, cue: AudioCue) -> DuetResult<Self> {
        if cue.start_offset.is_negative() {
            return Err(DuetError::invalid_composition(format!(
                "audio cue {} has a negative start offset",
                cue.source.source_path.display()
            )));
        }
        if !cue.gain.is_finite() || cue.gain < 0.0 {
            return Err(DuetError::invalid_composition(format!(
                "audio cue {} has invalid gain {}",
                cue.source.source_path.display(),
                cue.gain
            )));
        }
        self.audio_cues.push(cue);
        Ok(self)
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn placements(&self) -> &[PlacementSpec] {
        &self.placements
    }

    pub fn audio_cues(&self) -> &[AudioCue] {
        &self.audio_cues
    }

    pub fn duration_override(&self) -> Option<Rational> {
        self.duration_override
    }

    /// The primary placement and its index.
    pub fn primary(&self) -> (usize, &PlacementSpec) {
        self.placements
            .iter()
            .enumerate()
            .find(|(_, p)| p.is_primary())
            .unwrap_or((0, &self.placements[0]))
    }

    /// Output duration: the override, or the primary's trimmed span.
    pub fn output_duration(&self) -> Rational {
        self.duration_override
            .unwrap_or_else(|| self.primary().1.clip.trimmed_duration())
    }

    /// Output frame rate follows the primary clip.
    pub fn frame_rate(&self) -> Rational {
        self.primary().1.clip.frame_rate()
    }
}
