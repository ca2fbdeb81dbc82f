//! Timeline synchronizer.
//!
//! Places every clip's input window on the single output timeline. The
//! output duration is the primary's trimmed span unless the composition
//! overrides it. Overlays start at their declared offset; a short overlay
//! is extended according to its fill policy, a long one loses its tail.

use duet_common::error::{DuetError, DuetResult};
use duet_project_model::{AudioCue, Composition, FillPolicy, Rational, TimeMapping};

/// Map every placement onto the output timeline, in declaration order.
///
/// Fails with `IncompatibleFrameRate` only when the primary frame rate is not
/// a positive rational; every other rate is normalized by the compiler.
pub fn synchronize(composition: &Composition) -> DuetResult<Vec<TimeMapping>> {
    let frame_rate = composition.frame_rate();
    if !frame_rate.is_positive() {
        return Err(DuetError::IncompatibleFrameRate {
            message: format!("primary frame rate {frame_rate} is not positive"),
        });
    }

    let output_end = composition.output_duration();
    let mappings = composition
        .placements()
        .iter()
        .enumerate()
        .map(|(index, placement)| {
            let clip = &placement.clip;
            if placement.is_primary() {
                map_primary(
                    index,
                    clip.trim_start(),
                    clip.trimmed_duration(),
                    output_end,
                    placement.effective_fill(),
                )
            } else {
                map_overlay(
                    index,
                    clip.trim_start(),
                    clip.trimmed_duration(),
                    placement.start_offset,
                    output_end,
                    placement.effective_fill(),
                )
            }
        })
        .collect::<Vec<_>>();

    for mapping in mappings.iter().filter(|m| m.is_empty()) {
        tracing::warn!(
            index = mapping.index,
            output_end = %output_end.to_secs_string(),
            "Overlay starts at or after the end of the output and will be skipped"
        );
    }

    Ok(mappings)
}

/// Map audio cues onto the output timeline. Cues are never extended.
pub fn synchronize_cues(cues: &[AudioCue], output_end: Rational) -> Vec<TimeMapping> {
    cues.iter()
        .enumerate()
        .map(|(index, cue)| {
            map_overlay(
                index,
                Rational::ZERO,
                cue.source.duration,
                cue.start_offset,
                output_end,
                FillPolicy::Trim,
            )
        })
        .collect()
}

/// The primary always covers the whole output. A Trim policy cannot leave a
/// hole under the overlays, so a short primary falls back to black padding.
fn map_primary(
    index: usize,
    input_start: Rational,
    span: Rational,
    output_end: Rational,
    fill: FillPolicy,
) -> TimeMapping {
    let used = span.min(output_end);
    let fill_policy = match fill {
        FillPolicy::Trim if span < output_end => FillPolicy::PadSilenceOrBlack,
        other => other,
    };
    TimeMapping {
        index,
        input_start,
        input_end: input_start + used,
        output_start: Rational::ZERO,
        output_end,
        fill_policy,
    }
}

fn map_overlay(
    index: usize,
    input_start: Rational,
    span: Rational,
    start_offset: Rational,
    output_end: Rational,
    fill_policy: FillPolicy,
) -> TimeMapping {
    if start_offset >= output_end {
        return TimeMapping {
            index,
            input_start,
            input_end: input_start,
            output_start: output_end,
            output_end,
            fill_policy,
        };
    }

    let available = output_end - start_offset;
    let (used, mapped_end) = if span >= available {
        (available, output_end)
    } else if fill_policy.extends() {
        (span, output_end)
    } else {
        (span, start_offset + span)
    };

    TimeMapping {
        index,
        input_start,
        input_end: input_start + used,
        output_start: start_offset,
        output_end: mapped_end,
        fill_policy,
    }
}
