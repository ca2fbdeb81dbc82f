//! Project files.
//!
//! A project file (`*.duet.json`) is the on-disk description of one reaction
//! render: the canvas, the clips with their placement and timing, optional
//! audio cues, and the export settings. Source paths are relative to the
//! directory holding the project file; `scheme://` URLs are passed through
//! to the engine untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use duet_common::error::{DuetError, DuetResult};

use crate::clip::{is_remote_source, AudioSource, ClipDescriptor, MediaProbe};
use crate::placement::{
    Anchor, AudioCue, Background, Canvas, Composition, Margin, PlacementSpec, Role, ScalePolicy,
};
use crate::time::Rational;
use crate::timing::FillPolicy;

/// Current project schema version.
pub const PROJECT_VERSION: &str = "1.0";

/// Top-level project file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionProject {
    /// Schema version.
    pub version: String,

    /// Human-readable project name.
    pub name: String,

    /// Output canvas.
    pub canvas: Canvas,

    /// Clips in paint order.
    pub clips: Vec<ClipEntry>,

    /// Audio-only cues mixed into the soundtrack.
    #[serde(default)]
    pub audio_cues: Vec<AudioCueEntry>,

    /// Export configuration.
    pub output: OutputConfig,
}

/// One clip as written in the project file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipEntry {
    /// Path relative to the project file, or a URL.
    pub source: String,

    pub role: Role,

    #[serde(default)]
    pub anchor: Anchor,

    /// Overlay box; ignored for the primary.
    #[serde(default)]
    pub scale: ScalePolicy,

    #[serde(default)]
    pub margin: Margin,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim_start: Option<Rational>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim_end: Option<Rational>,

    #[serde(default)]
    pub start_offset: Rational,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<FillPolicy>,

    #[serde(default = "unity")]
    pub gain: f64,

    #[serde(default = "unity")]
    pub opacity: f64,
}

/// An audio cue as written in the project file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioCueEntry {
    /// Path relative to the project file, or a URL.
    pub source: String,

    #[serde(default)]
    pub start_offset: Rational,

    #[serde(default = "unity")]
    pub gain: f64,
}

fn unity() -> f64 {
    1.0
}

/// Export configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output file, relative to the project file. When absent the output is
    /// `<output_dir>/<project stem>.<ext>` with `output_dir` from the config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Output format.
    #[serde(default)]
    pub format: ExportFormat,

    /// Video bitrate in kbps (0 = encoder default quality).
    #[serde(default)]
    pub video_bitrate_kbps: u32,

    /// Audio bitrate in kbps.
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate_kbps: u32,

    /// Explicit output duration instead of the primary's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Rational>,
}

fn default_audio_bitrate() -> u32 {
    192
}

/// Output video format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    #[serde(rename = "mp4-h264")]
    Mp4H264,
    #[serde(rename = "mp4-h265")]
    Mp4H265,
    Webm,
}

impl ExportFormat {
    /// File extension used for the container.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Mp4H264 | ExportFormat::Mp4H265 => "mp4",
            ExportFormat::Webm => "webm",
        }
    }
}

/// Starter layouts written by `duet init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LayoutTemplate {
    /// 16:9 landscape, webcam in the bottom-right corner.
    #[default]
    Horizontal,
    /// 9:16 portrait, webcam stacked above the screen recording.
    Vertical,
}

impl FromStr for LayoutTemplate {
    type Err = ProjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "horizontal" | "landscape" => Ok(LayoutTemplate::Horizontal),
            "vertical" | "portrait" => Ok(LayoutTemplate::Vertical),
            other => Err(ProjectError::ValidationError {
                message: format!("unknown layout '{other}' (expected horizontal or vertical)"),
            }),
        }
    }
}

impl ReactionProject {
    /// Create a project from one of the starter layouts.
    ///
    /// The screen recording is the primary; the webcam is the overlay.
    pub fn from_template(
        name: impl Into<String>,
        layout: LayoutTemplate,
        screen: impl Into<String>,
        webcam: impl Into<String>,
    ) -> Self {
        let (canvas, webcam_entry) = match layout {
            LayoutTemplate::Horizontal => (
                Canvas::new(1920, 1080),
                ClipEntry::overlay(webcam.into()),
            ),
            LayoutTemplate::Vertical => {
                let mut entry = ClipEntry::overlay(webcam.into());
                entry.anchor = Anchor::TopCenter;
                entry.scale = ScalePolicy::FitBox {
                    width_ratio: 1.0,
                    height_ratio: 0.3,
                };
                entry.margin = Margin {
                    x_ratio: 0.0,
                    y_ratio: 0.04,
                };
                (Canvas::new(1080, 1920), entry)
            }
        };

        Self {
            version: PROJECT_VERSION.to_string(),
            name: name.into(),
            canvas,
            clips: vec![ClipEntry::primary(screen.into()), webcam_entry],
            audio_cues: vec![],
            output: OutputConfig {
                path: Some("reaction.mp4".to_string()),
                format: ExportFormat::Mp4H264,
                video_bitrate_kbps: 8000,
                audio_bitrate_kbps: default_audio_bitrate(),
                duration: None,
            },
        }
    }
}

impl ClipEntry {
    pub fn primary(source: impl Into<String>) -> Self {
        Self {
            role: Role::Primary,
            anchor: Anchor::Center,
            margin: Margin::NONE,
            ..Self::overlay(source)
        }
    }

    pub fn overlay(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            role: Role::Overlay,
            anchor: Anchor::default(),
            scale: ScalePolicy::default(),
            margin: Margin::default(),
            trim_start: None,
            trim_end: None,
            start_offset: Rational::ZERO,
            fill: None,
            gain: 1.0,
            opacity: 1.0,
        }
    }
}

/// A project file together with the directory its paths are relative to.
#[derive(Debug, Clone)]
pub struct LoadedProject {
    /// Directory containing the project file.
    pub root: PathBuf,

    /// Path of the project file itself.
    pub file: PathBuf,

    /// Parsed project.
    pub project: ReactionProject,
}

impl LoadedProject {
    /// Load a project file.
    pub fn load(file: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let file = file.as_ref().to_path_buf();
        let json = std::fs::read_to_string(&file).map_err(|e| ProjectError::IoError {
            path: file.clone(),
            source: e,
        })?;
        let project: ReactionProject =
            serde_json::from_str(&json).map_err(|e| ProjectError::ParseError {
                path: file.clone(),
                source: e,
            })?;

        let root = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            root,
            file,
            project,
        })
    }

    /// Write the project back to its file.
    pub fn save(&self) -> Result<(), ProjectError> {
        if !self.root.as_os_str().is_empty() {
            std::fs::create_dir_all(&self.root).map_err(|e| ProjectError::IoError {
                path: self.root.clone(),
                source: e,
            })?;
        }
        let json =
            serde_json::to_string_pretty(&self.project).map_err(|e| ProjectError::ParseError {
                path: self.file.clone(),
                source: e,
            })?;
        std::fs::write(&self.file, json).map_err(|e| ProjectError::IoError {
            path: self.file.clone(),
            source: e,
        })
    }

    /// Create a starter project file on disk. Refuses to overwrite.
    pub fn create(
        file: impl AsRef<Path>,
        name: impl Into<String>,
        layout: LayoutTemplate,
    ) -> Result<Self, ProjectError> {
        let file = file.as_ref().to_path_buf();
        if file.exists() {
            return Err(ProjectError::ValidationError {
                message: format!("{} already exists", file.display()),
            });
        }
        let root = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let loaded = Self {
            root,
            file,
            project: ReactionProject::from_template(name, layout, "screen.mp4", "webcam.mp4"),
        };
        loaded.save()?;
        Ok(loaded)
    }

    /// Resolve a project-relative path. URLs are returned unchanged.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        let relative = relative.as_ref();
        if is_remote_source(relative) {
            relative.to_path_buf()
        } else {
            self.root.join(relative)
        }
    }

    /// Resolved output path. `output_dir` (relative to the project file
    /// unless absolute) is used when the project names no output path.
    pub fn output_path(&self, output_dir: &Path) -> PathBuf {
        match &self.project.output.path {
            Some(path) => self.resolve(path),
            None => self.resolve(output_dir).join(format!(
                "{}.{}",
                self.stem(),
                self.project.output.format.extension()
            )),
        }
    }

    /// Project file name without its `.duet.json` / `.json` suffix.
    fn stem(&self) -> String {
        let name = self
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = name
            .strip_suffix(".duet.json")
            .or_else(|| name.strip_suffix(".json"))
            .unwrap_or(&name);
        if stem.is_empty() {
            "output".to_string()
        } else {
            stem.to_string()
        }
    }

    /// Validate that all referenced local source files exist.
    pub fn validate_sources(&self) -> Vec<String> {
        let mut errors = vec![];
        let missing = |source: &Path| !is_remote_source(source) && !self.resolve(source).exists();

        for (index, clip) in self.project.clips.iter().enumerate() {
            if missing(Path::new(&clip.source)) {
                errors.push(format!("Clip {index} source missing: {}", clip.source));
            }
        }
        for (index, cue) in self.project.audio_cues.iter().enumerate() {
            if missing(Path::new(&cue.source)) {
                errors.push(format!("Audio cue {index} source missing: {}", cue.source));
            }
        }
        if let Some(source) = self.project.canvas.background.source() {
            if missing(source) {
                errors.push(format!("Background source missing: {}", source.display()));
            }
        }
        if self.project.clips.is_empty() {
            errors.push("Project has no clips".to_string());
        }

        errors
    }

    /// Probe every source and build a validated composition.
    ///
    /// Each distinct source file is probed once.
    pub fn build_composition(&self, probe: &dyn MediaProbe) -> DuetResult<Composition> {
        let mut probed: HashMap<PathBuf, ClipDescriptor> = HashMap::new();
        let mut placements = Vec::with_capacity(self.project.clips.len());

        for entry in &self.project.clips {
            let path = self.resolve(&entry.source);
            let descriptor = match probed.get(&path) {
                Some(descriptor) => descriptor.clone(),
                None => {
                    let descriptor = probe.probe(&path)?;
                    probed.insert(path.clone(), descriptor.clone());
                    descriptor
                }
            };
            let descriptor = if entry.trim_start.is_some() || entry.trim_end.is_some() {
                descriptor.with_trim(entry.trim_start, entry.trim_end)?
            } else {
                descriptor
            };

            let mut placement = match entry.role {
                Role::Primary => PlacementSpec::primary(descriptor),
                Role::Overlay => PlacementSpec::overlay(descriptor)
                    .anchored(entry.anchor)
                    .scaled(entry.scale)
                    .with_margin(entry.margin),
            };
            placement = placement
                .starting_at(entry.start_offset)
                .with_gain(entry.gain)
                .with_opacity(entry.opacity);
            if let Some(fill) = entry.fill {
                placement = placement.with_fill(fill);
            }
            placements.push(placement);
        }

        let mut canvas = self.project.canvas.clone();
        canvas.background = canvas.background.map_source(|path| self.resolve(path));

        let mut composition = Composition::new(canvas, placements)?;
        if let Some(duration) = self.project.output.duration {
            composition = composition.with_duration_override(duration)?;
        }

        let mut audio: HashMap<PathBuf, AudioSource> = HashMap::new();
        for entry in &self.project.audio_cues {
            let path = self.resolve(&entry.source);
            let source = match audio.get(&path) {
                Some(source) => source.clone(),
                None => {
                    let source = probe.probe_audio(&path)?;
                    audio.insert(path.clone(), source.clone());
                    source
                }
            };
            let mut cue = AudioCue::new(source, entry.start_offset);
            cue.gain = entry.gain;
            composition = composition.with_audio_cue(cue)?;
        }

        tracing::debug!(
            project = %self.file.display(),
            placements = composition.placements().len(),
            audio_cues = composition.audio_cues().len(),
            "Built composition"
        );
        Ok(composition)
    }
}

/// Errors that can occur when working with project files.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid project: {message}")]
    ValidationError { message: String },
}

impl From<ProjectError> for DuetError {
    fn from(err: ProjectError) -> Self {
        let text = err.to_string();
        match err {
            ProjectError::IoError { path, source }
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                DuetError::FileNotFound { path }
            }
            ProjectError::IoError { source, .. } => DuetError::Io(source),
            ProjectError::ParseError { .. } => DuetError::config(text),
            ProjectError::ValidationError { message } => DuetError::invalid_composition(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Probe returning fixed metadata and recording every call.
    struct FixedProbe {
        calls: Mutex<Vec<PathBuf>>,
    }

    impl FixedProbe {
        fn new() -> Self {
            Self {
                calls: Mutex::new(vec![]),
            }
        }
    }

    impl MediaProbe for FixedProbe {
        fn probe(&self, source: &Path) -> DuetResult<ClipDescriptor> {
            self.calls.lock().unwrap().push(source.to_path_buf());
            ClipDescriptor::new(
                source,
                Rational::from_int(10),
                Rational::from_int(30),
                1920,
                1080,
                true,
            )
        }

        fn probe_audio(&self, source: &Path) -> DuetResult<AudioSource> {
            Ok(AudioSource {
                source_path: source.to_path_buf(),
                duration: Rational::from_int(2),
            })
        }
    }

    #[test]
    fn test_template_serialization() {
        let project = ReactionProject::from_template(
            "Demo",
            LayoutTemplate::Horizontal,
            "screen.mp4",
            "webcam.mp4",
        );
        let json = serde_json::to_string_pretty(&project).unwrap();
        let parsed: ReactionProject = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name, "Demo");
        assert_eq!(parsed.version, PROJECT_VERSION);
        assert_eq!(parsed.clips.len(), 2);
        assert_eq!(parsed.clips[0].role, Role::Primary);
        assert_eq!(parsed.clips[1].anchor, Anchor::BottomRight);
        assert_eq!(parsed.output.format, ExportFormat::Mp4H264);
    }

    #[test]
    fn test_vertical_template_is_portrait() {
        let project =
            ReactionProject::from_template("V", LayoutTemplate::Vertical, "s.mp4", "w.mp4");
        assert_eq!((project.canvas.width, project.canvas.height), (1080, 1920));
        assert_eq!(project.clips[1].anchor, Anchor::TopCenter);
    }

    #[test]
    fn test_minimal_project_file_uses_defaults() {
        let json = r#"{
            "version": "1.0",
            "name": "minimal",
            "canvas": {"width": 1280, "height": 720},
            "clips": [
                {"source": "main.mp4", "role": "primary"},
                {"source": "cam.mp4", "role": "overlay", "fill": "trim", "trim_end": "4.5"}
            ],
            "output": {"path": "out.webm", "format": "webm", "duration": 8}
        }"#;
        let project: ReactionProject = serde_json::from_str(json).unwrap();
        assert_eq!(project.canvas.background, Background::default());
        assert_eq!(project.output.path.as_deref(), Some("out.webm"));
        assert_eq!(project.clips[1].fill, Some(FillPolicy::Trim));
        assert_eq!(project.clips[1].trim_end, Some("4.5".parse().unwrap()));
        assert!((project.clips[1].gain - 1.0).abs() < 1e-9);
        assert_eq!(project.output.audio_bitrate_kbps, 192);
        assert_eq!(project.output.duration, Some(Rational::from_int(8)));
        assert_eq!(project.output.format.extension(), "webm");
    }

    #[test]
    fn test_layout_from_str() {
        assert_eq!(
            "Vertical".parse::<LayoutTemplate>().unwrap(),
            LayoutTemplate::Vertical
        );
        assert!("diagonal".parse::<LayoutTemplate>().is_err());
    }

    #[test]
    fn test_create_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("demo.duet.json");

        let created = LoadedProject::create(&file, "Demo", LayoutTemplate::Horizontal).unwrap();
        assert_eq!(created.root, dir.path());

        let loaded = LoadedProject::load(&file).unwrap();
        assert_eq!(loaded.project.name, "Demo");
        assert_eq!(
            loaded.output_path(Path::new("output")),
            dir.path().join("reaction.mp4")
        );

        assert!(LoadedProject::create(&file, "Again", LayoutTemplate::Vertical).is_err());
    }

    #[test]
    fn test_validate_sources_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("demo.duet.json");
        let loaded = LoadedProject::create(&file, "Demo", LayoutTemplate::Horizontal).unwrap();
        std::fs::write(dir.path().join("screen.mp4"), b"").unwrap();

        let errors = loaded.validate_sources();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("webcam.mp4"));
    }

    #[test]
    fn test_remote_sources_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("demo.duet.json");
        let mut loaded = LoadedProject::create(&file, "Demo", LayoutTemplate::Horizontal).unwrap();
        let url = "https://cdn.example.org/team42/screen.mp4";

        assert_eq!(loaded.resolve(url), PathBuf::from(url));
        assert_eq!(loaded.resolve("cam.mp4"), dir.path().join("cam.mp4"));

        loaded.project.clips[0].source = url.to_string();
        std::fs::write(dir.path().join("webcam.mp4"), b"").unwrap();
        assert!(loaded.validate_sources().is_empty());

        let probe = FixedProbe::new();
        let composition = loaded.build_composition(&probe).unwrap();
        assert_eq!(
            composition.placements()[0].clip.source_path(),
            Path::new(url)
        );
    }

    #[test]
    fn test_output_falls_back_to_configured_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("launch-day.duet.json");
        let mut loaded = LoadedProject::create(&file, "Launch", LayoutTemplate::Vertical).unwrap();
        loaded.project.output.path = None;

        assert_eq!(
            loaded.output_path(Path::new("renders")),
            dir.path().join("renders").join("launch-day.mp4")
        );
        assert_eq!(
            loaded.output_path(Path::new("/var/duet")),
            PathBuf::from("/var/duet/launch-day.mp4")
        );

        loaded.project.output.format = ExportFormat::Webm;
        loaded.save().unwrap();
        let reloaded = LoadedProject::load(&file).unwrap();
        assert!(reloaded.project.output.path.is_none());
        assert_eq!(
            reloaded.output_path(Path::new("renders")),
            dir.path().join("renders").join("launch-day.webm")
        );
    }

    #[test]
    fn test_background_media_resolves_against_project() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("demo.duet.json");
        let mut loaded = LoadedProject::create(&file, "Demo", LayoutTemplate::Vertical).unwrap();
        loaded.project.canvas.background = Background::Image {
            image: PathBuf::from("backdrops/grid.png"),
        };

        let errors = loaded.validate_sources();
        assert!(errors.iter().any(|e| e.contains("backdrops/grid.png")));

        let composition = loaded.build_composition(&FixedProbe::new()).unwrap();
        assert_eq!(
            composition.canvas().background.source(),
            Some(dir.path().join("backdrops/grid.png").as_path())
        );
    }

    #[test]
    fn test_missing_project_maps_to_file_not_found() {
        let err = LoadedProject::load("/nonexistent/duet/project.json").unwrap_err();
        let err: DuetError = err.into();
        assert!(matches!(err, DuetError::FileNotFound { .. }));
    }

    #[test]
    fn test_build_composition_probes_each_source_once() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("demo.duet.json");
        let mut loaded = LoadedProject::create(&file, "Demo", LayoutTemplate::Horizontal).unwrap();

        let mut second = ClipEntry::overlay("webcam.mp4");
        second.anchor = Anchor::TopLeft;
        second.trim_start = Some(Rational::from_int(1));
        second.start_offset = Rational::from_int(2);
        loaded.project.clips.push(second);
        loaded.project.audio_cues.push(AudioCueEntry {
            source: "sting.wav".to_string(),
            start_offset: Rational::from_int(9),
            gain: 0.5,
        });

        let probe = FixedProbe::new();
        let composition = loaded.build_composition(&probe).unwrap();

        assert_eq!(probe.calls.lock().unwrap().len(), 2);
        assert_eq!(composition.placements().len(), 3);
        assert_eq!(composition.output_duration(), Rational::from_int(10));
        let third = &composition.placements()[2];
        assert_eq!(third.clip.trimmed_duration(), Rational::from_int(9));
        assert_eq!(third.start_offset, Rational::from_int(2));
        assert_eq!(composition.audio_cues().len(), 1);
        assert!((composition.audio_cues()[0].gain - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_build_composition_reports_bad_trim() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("demo.duet.json");
        let mut loaded = LoadedProject::create(&file, "Demo", LayoutTemplate::Horizontal).unwrap();
        loaded.project.clips[1].trim_start = Some(Rational::from_int(12));

        let result = loaded.build_composition(&FixedProbe::new());
        assert!(matches!(result, Err(DuetError::InvalidTrimRange { .. })));
    }
}
