//! Clip descriptors: normalized metadata for input media sources.
//!
//! A descriptor is built once per distinct input file from a metadata probe
//! and never mutated afterwards. Trimming produces a new descriptor.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use duet_common::error::{DuetError, DuetResult};

use crate::time::Rational;

/// Normalized metadata for one audio/video input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawClip")]
pub struct ClipDescriptor {
    source_path: PathBuf,
    duration: Rational,
    frame_rate: Rational,
    natural_width: u32,
    natural_height: u32,
    has_audio: bool,
    trim_start: Option<Rational>,
    trim_end: Option<Rational>,
}

/// Unchecked wire form; deserialized descriptors go through the same
/// validation as probed ones.
#[derive(Deserialize)]
struct RawClip {
    source_path: PathBuf,
    duration: Rational,
    frame_rate: Rational,
    natural_width: u32,
    natural_height: u32,
    has_audio: bool,
    #[serde(default)]
    trim_start: Option<Rational>,
    #[serde(default)]
    trim_end: Option<Rational>,
}

impl TryFrom<RawClip> for ClipDescriptor {
    type Error = DuetError;

    fn try_from(raw: RawClip) -> DuetResult<Self> {
        let clip = Self::new(
            raw.source_path,
            raw.duration,
            raw.frame_rate,
            raw.natural_width,
            raw.natural_height,
            raw.has_audio,
        )?;
        if raw.trim_start.is_some() || raw.trim_end.is_some() {
            clip.with_trim(raw.trim_start, raw.trim_end)
        } else {
            Ok(clip)
        }
    }
}

/// Whether a source names a URL (`scheme://...`) instead of a local file.
///
/// Such sources are handed to ffmpeg and ffprobe untouched.
pub fn is_remote_source(source: &Path) -> bool {
    let Some((scheme, rest)) = source.to_str().and_then(|s| s.split_once("://")) else {
        return false;
    };
    !rest.is_empty()
        && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

impl ClipDescriptor {
    /// Build a descriptor from probed metadata.
    ///
    /// A non-positive duration or a zero dimension means the probe did not
    /// produce usable metadata.
    pub fn new(
        source_path: impl Into<PathBuf>,
        duration: Rational,
        frame_rate: Rational,
        natural_width: u32,
        natural_height: u32,
        has_audio: bool,
    ) -> DuetResult<Self> {
        let source_path = source_path.into();
        if !duration.is_positive() {
            return Err(DuetError::unreadable(
                &source_path,
                format!("non-positive duration {duration}"),
            ));
        }
        if natural_width == 0 || natural_height == 0 {
            return Err(DuetError::unreadable(
                &source_path,
                format!("invalid resolution {natural_width}x{natural_height}"),
            ));
        }
        Ok(Self {
            source_path,
            duration,
            frame_rate,
            natural_width,
            natural_height,
            has_audio,
            trim_start: None,
            trim_end: None,
        })
    }

    /// Return a copy restricted to `[start, end]` of the source.
    ///
    /// Missing bounds default to the start/end of the source. A bound that
    /// overshoots the duration by less than one frame is clamped, since
    /// container durations are frequently rounded; anything beyond that, a
    /// negative bound, or an empty window fails with `InvalidTrimRange`.
    pub fn with_trim(&self, start: Option<Rational>, end: Option<Rational>) -> DuetResult<Self> {
        let tolerance = self.frame_rate.recip().unwrap_or(Rational::ZERO);
        let clamp = |value: Rational| -> Option<Rational> {
            if value.is_negative() || value > self.duration + tolerance {
                None
            } else {
                Some(value.min(self.duration))
            }
        };

        let invalid = || DuetError::InvalidTrimRange {
            start: start.unwrap_or(Rational::ZERO).to_secs_string(),
            end: end.unwrap_or(self.duration).to_secs_string(),
            duration: self.duration.to_secs_string(),
        };

        let trim_start = match start {
            Some(value) => Some(clamp(value).ok_or_else(invalid)?),
            None => None,
        };
        let trim_end = match end {
            Some(value) => Some(clamp(value).ok_or_else(invalid)?),
            None => None,
        };

        if trim_start.unwrap_or(Rational::ZERO) >= trim_end.unwrap_or(self.duration) {
            return Err(invalid());
        }

        Ok(Self {
            trim_start,
            trim_end,
            ..self.clone()
        })
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Full source duration in seconds.
    pub fn duration(&self) -> Rational {
        self.duration
    }

    pub fn frame_rate(&self) -> Rational {
        self.frame_rate
    }

    pub fn natural_width(&self) -> u32 {
        self.natural_width
    }

    pub fn natural_height(&self) -> u32 {
        self.natural_height
    }

    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    /// Effective start within the source.
    pub fn trim_start(&self) -> Rational {
        self.trim_start.unwrap_or(Rational::ZERO)
    }

    /// Effective end within the source.
    pub fn trim_end(&self) -> Rational {
        self.trim_end.unwrap_or(self.duration)
    }

    /// Whether any trim bound was declared.
    pub fn is_trimmed(&self) -> bool {
        self.trim_start.is_some() || self.trim_end.is_some()
    }

    pub fn trimmed_duration(&self) -> Rational {
        self.trim_end() - self.trim_start()
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.natural_width as f64 / self.natural_height as f64
    }
}

/// An audio-only source (sound effect or music sting).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSource {
    pub source_path: PathBuf,
    pub duration: Rational,
}

/// Capability for extracting clip metadata from a media source.
pub trait MediaProbe: Send + Sync {
    /// Probe a source that must contain a video stream.
    ///
    /// Fails with `UnreadableSource` or `NoVideoStream`.
    fn probe(&self, source: &Path) -> DuetResult<ClipDescriptor>;

    /// Probe an audio-only (or any audio-bearing) source.
    fn probe_audio(&self, source: &Path) -> DuetResult<AudioSource>;
}
