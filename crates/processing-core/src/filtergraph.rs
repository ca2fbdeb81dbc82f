//! ffmpeg filter syntax for graph operations.
//!
//! Each [`Operation`] renders to one filter (or a short comma-joined chain
//! when a PTS reset must follow it). Times are written as decimal seconds,
//! frame rates as exact ratios.

use crate::graph::{ExtendMode, Operation, StreamKind};

/// Render one operation as filter text, without stream labels.
pub fn render_operation(operation: &Operation) -> String {
    match operation {
        Operation::Scale { width, height } => format!("scale={width}:{height}:flags=lanczos"),
        Operation::Crop {
            x,
            y,
            width,
            height,
        } => format!("crop={width}:{height}:{x}:{y}"),
        Operation::Cover { width, height } => format!(
            "scale={width}:{height}:force_original_aspect_ratio=increase:flags=lanczos,\
             crop={width}:{height}"
        ),
        Operation::Pad {
            width,
            height,
            x,
            y,
            color,
        } => format!(
            "pad=w={width}:h={height}:x={x}:y={y}:color={}",
            escape_value(color)
        ),
        Operation::Overlay { x, y, pass_on_end } => format!(
            "overlay=x={x}:y={y}:eof_action={}",
            if *pass_on_end { "pass" } else { "repeat" }
        ),
        Operation::Mix { inputs } => {
            format!("amix=inputs={inputs}:duration=longest:dropout_transition=0")
        }
        Operation::Trim { kind, start, end } => {
            let (trim, setpts) = match kind {
                StreamKind::Video => ("trim", "setpts"),
                StreamKind::Audio => ("atrim", "asetpts"),
            };
            format!(
                "{trim}=start={}:end={},{setpts}=PTS-STARTPTS",
                start.to_secs_string(),
                end.to_secs_string()
            )
        }
        Operation::FormatConvert { pixel_format } => format!("format=pix_fmts={pixel_format}"),
        Operation::FrameRate { rate } => format!("fps={rate}"),
        Operation::Extend { mode, duration } => {
            let duration = duration.to_secs_string();
            match mode {
                ExtendMode::Clone => format!("tpad=stop_mode=clone:stop_duration={duration}"),
                ExtendMode::Black => {
                    format!("tpad=stop_mode=add:stop_duration={duration}:color=black")
                }
                ExtendMode::Silence => format!("apad=pad_dur={duration}"),
            }
        }
        Operation::Delay { kind, offset } => match kind {
            StreamKind::Video => format!("setpts=PTS+{}/TB", offset.to_secs_string()),
            StreamKind::Audio => format!("adelay=delays={}:all=1", offset.to_millis_rounded()),
        },
        Operation::Volume { gain } => format!("volume={}", format_float(*gain)),
        // Scales the alpha plane in place; the chain is already yuva420p.
        Operation::Opacity { alpha } => format!("lut=a=val*{}", format_float(*alpha)),
        Operation::PassThrough { kind } => match kind {
            StreamKind::Video => "null".to_string(),
            StreamKind::Audio => "anull".to_string(),
        },
    }
}

/// Escape characters that delimit options, filters or labels.
pub fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ':' | ',' | ';' | '[' | ']' | '\'') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn format_float(value: f64) -> String {
    let text = format!("{value:.4}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text.is_empty() {
        "0".to_string()
    } else {
        text.to_string()
    }
}
