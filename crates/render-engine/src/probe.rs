//! Source metadata via ffprobe.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;

use duet_common::error::{DuetError, DuetResult};
use duet_project_model::{is_remote_source, AudioSource, ClipDescriptor, MediaProbe, Rational};

/// [`MediaProbe`] backed by the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    binary: PathBuf,
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn run(&self, path: &Path) -> DuetResult<String> {
        if !is_remote_source(path) && !path.is_file() {
            return Err(DuetError::unreadable(path, "file does not exist"));
        }

        let output = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
            ])
            .arg(path)
            .output()
            .map_err(|e| {
                DuetError::unavailable(format!("failed to run {}: {e}", self.binary.display()))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DuetError::unreadable(path, stderr.trim().to_string()));
        }

        String::from_utf8(output.stdout)
            .map_err(|_| DuetError::unreadable(path, "ffprobe printed non UTF-8 output"))
    }
}

impl MediaProbe for FfprobeProbe {
    fn probe(&self, path: &Path) -> DuetResult<ClipDescriptor> {
        let json = self.run(path)?;
        let descriptor = parse_clip(path, &json)?;
        tracing::debug!(
            path = %path.display(),
            duration = %descriptor.duration().to_secs_string(),
            frame_rate = %descriptor.frame_rate(),
            width = descriptor.natural_width(),
            height = descriptor.natural_height(),
            has_audio = descriptor.has_audio(),
            "Probed clip"
        );
        Ok(descriptor)
    }

    fn probe_audio(&self, path: &Path) -> DuetResult<AudioSource> {
        let json = self.run(path)?;
        parse_audio(path, &json)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
}

impl ProbeOutput {
    fn parse(path: &Path, json: &str) -> DuetResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| DuetError::unreadable(path, format!("unparseable probe output: {e}")))
    }

    fn first(&self, codec_type: &str) -> Option<&ProbeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some(codec_type))
    }

    /// Stream duration, falling back to the container's.
    fn duration_of(&self, stream: &ProbeStream) -> Option<Rational> {
        stream
            .duration
            .as_deref()
            .and_then(parse_positive)
            .or_else(|| {
                self.format
                    .as_ref()
                    .and_then(|f| f.duration.as_deref())
                    .and_then(parse_positive)
            })
    }
}

fn parse_positive(text: &str) -> Option<Rational> {
    text.parse::<Rational>().ok().filter(Rational::is_positive)
}

/// Build a clip descriptor from `ffprobe -print_format json` output.
pub fn parse_clip(path: &Path, json: &str) -> DuetResult<ClipDescriptor> {
    let output = ProbeOutput::parse(path, json)?;
    let video = output.first("video").ok_or_else(|| DuetError::NoVideoStream {
        path: path.to_path_buf(),
    })?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(DuetError::unreadable(path, "video stream has no dimensions")),
    };

    // avg_frame_rate is 0/0 for some streams; r_frame_rate is the nominal rate.
    let frame_rate = [&video.avg_frame_rate, &video.r_frame_rate]
        .into_iter()
        .filter_map(|rate| rate.as_deref().and_then(parse_positive))
        .next()
        .ok_or_else(|| DuetError::unreadable(path, "video stream has no frame rate"))?;

    let duration = output
        .duration_of(video)
        .ok_or_else(|| DuetError::unreadable(path, "unknown duration"))?;

    ClipDescriptor::new(
        path,
        duration,
        frame_rate,
        width,
        height,
        output.first("audio").is_some(),
    )
}

/// Build an audio source description from probe output.
pub fn parse_audio(path: &Path, json: &str) -> DuetResult<AudioSource> {
    let output = ProbeOutput::parse(path, json)?;
    let audio = output
        .first("audio")
        .ok_or_else(|| DuetError::unreadable(path, "no audio stream"))?;
    let duration = output
        .duration_of(audio)
        .ok_or_else(|| DuetError::unreadable(path, "unknown duration"))?;

    Ok(AudioSource {
        source_path: path.to_path_buf(),
        duration,
    })
}
