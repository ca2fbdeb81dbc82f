//! Time mappings from clip-local time onto the output timeline.

use serde::{Deserialize, Serialize};

use crate::time::Rational;

/// How a clip that ends before the output covers the remaining time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    /// Stop at the clip's natural end; the overlay disappears.
    Trim,
    /// Black video and silent audio until the output ends.
    #[serde(alias = "pad")]
    PadSilenceOrBlack,
    /// Freeze the last video frame until the output ends.
    #[default]
    #[serde(alias = "hold")]
    HoldLastFrame,
}

impl FillPolicy {
    /// Whether the policy extends a short clip to the output end.
    pub fn extends(&self) -> bool {
        !matches!(self, FillPolicy::Trim)
    }
}

/// Where a clip's input window lands on the output timeline.
///
/// `output_end - output_start == input_end - input_start` unless the fill
/// policy pads or holds, in which case the output span is longer and the
/// difference is covered by the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeMapping {
    /// Index of the placement (or audio cue) this mapping belongs to.
    pub index: usize,
    pub input_start: Rational,
    pub input_end: Rational,
    pub output_start: Rational,
    pub output_end: Rational,
    pub fill_policy: FillPolicy,
}

impl TimeMapping {
    pub fn input_span(&self) -> Rational {
        self.input_end - self.input_start
    }

    pub fn output_span(&self) -> Rational {
        self.output_end - self.output_start
    }

    /// Time covered by padding or a held frame.
    pub fn extension(&self) -> Rational {
        (self.output_span() - self.input_span()).max(Rational::ZERO)
    }

    /// The clip contributes nothing to the output.
    pub fn is_empty(&self) -> bool {
        !self.output_span().is_positive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_policy_serde_names() {
        let parsed: Vec<FillPolicy> =
            serde_json::from_str(r#"["trim", "pad", "hold", "hold_last_frame"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                FillPolicy::Trim,
                FillPolicy::PadSilenceOrBlack,
                FillPolicy::HoldLastFrame,
                FillPolicy::HoldLastFrame
            ]
        );
        assert_eq!(FillPolicy::default(), FillPolicy::HoldLastFrame);
    }

    #[test]
    fn test_extension_of_held_mapping() {
        let mapping = TimeMapping {
            index: 1,
            input_start: Rational::ZERO,
            input_end: Rational::from_int(6),
            output_start: Rational::ZERO,
            output_end: Rational::from_int(10),
            fill_policy: FillPolicy::HoldLastFrame,
        };
        assert_eq!(mapping.extension(), Rational::from_int(4));
        assert!(!mapping.is_empty());
    }
}
