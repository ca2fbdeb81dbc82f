//! Exact rational time.
//!
//! Durations, offsets and frame rates are kept as reduced fractions so that
//! synchronization arithmetic never accumulates floating-point error.
//! ffprobe reports durations as decimal strings (`"10.033333"`) and frame
//! rates as ratios (`"30000/1001"`); both parse exactly.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Denominator used when an exact result does not fit in 64 bits.
const FALLBACK_DENOMINATOR: i64 = 1_000_000;

/// A reduced fraction with a strictly positive denominator.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    num: i64,
    den: i64,
}

impl Rational {
    pub const ZERO: Rational = Rational { num: 0, den: 1 };

    /// Create a reduced fraction. Returns `None` for a zero denominator.
    pub fn new(num: i64, den: i64) -> Option<Self> {
        if den == 0 {
            return None;
        }
        Some(Self::from_i128(num as i128, den as i128))
    }

    /// Whole seconds (or a whole frame rate).
    pub const fn from_int(value: i64) -> Self {
        Self { num: value, den: 1 }
    }

    /// Milliseconds as seconds.
    pub fn from_millis(ms: i64) -> Self {
        Self::from_i128(ms as i128, 1000)
    }

    /// Approximate a float to microsecond precision.
    ///
    /// Non-finite input maps to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() {
            return Self::ZERO;
        }
        Self::from_i128(
            (secs * FALLBACK_DENOMINATOR as f64).round() as i128,
            FALLBACK_DENOMINATOR as i128,
        )
    }

    fn from_i128(num: i128, den: i128) -> Self {
        let (mut num, mut den) = if den < 0 { (-num, -den) } else { (num, den) };
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()) as i128;
        if g > 1 {
            num /= g;
            den /= g;
        }
        match (i64::try_from(num), i64::try_from(den)) {
            (Ok(num), Ok(den)) => Self { num, den },
            _ => {
                // Rescale to a fixed denominator; past that, whole seconds
                // saturating at the i64 range.
                let scaled = rescale(num, den, FALLBACK_DENOMINATOR as i128);
                if i64::try_from(scaled).is_ok() {
                    Self::from_i128(scaled, FALLBACK_DENOMINATOR as i128)
                } else {
                    Self {
                        num: (num / den).clamp(i64::MIN as i128, i64::MAX as i128) as i64,
                        den: 1,
                    }
                }
            }
        }
    }

    pub fn numer(&self) -> i64 {
        self.num
    }

    pub fn denom(&self) -> i64 {
        self.den
    }

    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    pub fn is_positive(&self) -> bool {
        self.num > 0
    }

    pub fn is_negative(&self) -> bool {
        self.num < 0
    }

    pub fn to_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Whole microseconds, rounded toward zero.
    pub fn to_micros(&self) -> i64 {
        (self.num as i128 * 1_000_000 / self.den as i128) as i64
    }

    /// Whole milliseconds, rounded to nearest.
    pub fn to_millis_rounded(&self) -> i64 {
        (self.to_f64() * 1000.0).round() as i64
    }

    /// Multiplicative inverse. `None` for zero.
    pub fn recip(&self) -> Option<Self> {
        Self::new(self.den, self.num)
    }

    /// Multiply two rationals.
    pub fn mul(self, other: Rational) -> Rational {
        Self::from_i128(
            self.num as i128 * other.num as i128,
            self.den as i128 * other.den as i128,
        )
    }

    /// Number of whole frames at `rate` that fit in this duration (ceiling).
    pub fn frames_at(&self, rate: Rational) -> u64 {
        let product = self.mul(rate);
        if product.num <= 0 {
            return 0;
        }
        ((product.num as i128 + product.den as i128 - 1) / product.den as i128) as u64
    }

    pub fn min(self, other: Rational) -> Rational {
        if self <= other {
            self
        } else {
            other
        }
    }

    pub fn max(self, other: Rational) -> Rational {
        if self >= other {
            self
        } else {
            other
        }
    }

    /// Seconds formatted the way ffmpeg filter options expect them.
    pub fn to_secs_string(&self) -> String {
        if self.den == 1 {
            return self.num.to_string();
        }
        let text = format!("{:.6}", self.to_f64());
        let text = text.trim_end_matches('0').trim_end_matches('.');
        if text.is_empty() || text == "-0" {
            "0".to_string()
        } else {
            text.to_string()
        }
    }
}

/// `num * target / den` without intermediate overflow. `den` is positive.
fn rescale(num: i128, den: i128, target: i128) -> i128 {
    let whole = (num / den).saturating_mul(target);
    let rem = num % den;
    let part = match rem.checked_mul(target) {
        Some(product) => product / den,
        // |rem| < den, so den is large enough here for den / target > 0.
        None => rem / (den / target),
    };
    whole.saturating_add(part)
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.max(1)
}

impl Default for Rational {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.num as i128 * other.den as i128).cmp(&(other.num as i128 * self.den as i128))
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add for Rational {
    type Output = Rational;

    fn add(self, rhs: Rational) -> Rational {
        Rational::from_i128(
            self.num as i128 * rhs.den as i128 + rhs.num as i128 * self.den as i128,
            self.den as i128 * rhs.den as i128,
        )
    }
}

impl Sub for Rational {
    type Output = Rational;

    fn sub(self, rhs: Rational) -> Rational {
        Rational::from_i128(
            self.num as i128 * rhs.den as i128 - rhs.num as i128 * self.den as i128,
            self.den as i128 * rhs.den as i128,
        )
    }
}

impl fmt::Debug for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Failure to parse a rational from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid rational value: {0:?}")]
pub struct ParseRationalError(pub String);

impl FromStr for Rational {
    type Err = ParseRationalError;

    /// Accepts `"7"`, `"-1.25"`, `"10.033333"` and `"30000/1001"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseRationalError(s.to_string());
        let s = s.trim();
        if let Some((num, den)) = s.split_once('/') {
            let num: i64 = num.trim().parse().map_err(|_| err())?;
            let den: i64 = den.trim().parse().map_err(|_| err())?;
            return Rational::new(num, den).ok_or_else(err);
        }

        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(err());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(err());
        }
        // Anything past nanoseconds is noise from the probe.
        let frac = &frac[..frac.len().min(9)];
        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| err())?
        };
        let scale = 10i128.pow(frac.len() as u32);
        let frac_value: i128 = if frac.is_empty() {
            0
        } else {
            frac.parse().map_err(|_| err())?
        };
        let num = (whole as i128)
            .checked_mul(scale)
            .and_then(|n| n.checked_add(frac_value))
            .ok_or_else(err)?;
        Ok(Rational::from_i128(if negative { -num } else { num }, scale))
    }
}

impl Serialize for Rational {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.den == 1 {
            serializer.serialize_i64(self.num)
        } else {
            serializer.serialize_str(&self.to_string())
        }
    }
}

impl<'de> Deserialize<'de> for Rational {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Int(i64),
            Float(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Int(value) => Ok(Rational::from_int(value)),
            Repr::Float(value) => value
                .to_string()
                .parse()
                .map_err(serde::de::Error::custom),
            Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}
