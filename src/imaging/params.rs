//! Parameter types for image operations.
//!
//! These types describe *what* to do, not *how*. The
//! [`spec`](super::spec) parser produces them and the
//! [`backend`](super::backend) consumes them, which keeps the pixel work
//! swappable (e.g. a counting wrapper in tests) without touching the parser.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100). Validated on parse, clamped on construction.
//! - [`Filter`]: One step of an ordered filter chain for the `filter` action.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quality(pub u8);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100) as u8)
    }

    /// Strict constructor used by the spec parser: out-of-range is `None`.
    pub fn checked(value: u32) -> Option<Self> {
        (1..=100).contains(&value).then(|| Self(value as u8))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(75)
    }
}

/// A single pixel filter in a `filter` chain.
///
/// The chain is keyed by hashing its JSON serialization, so variant and field
/// names are part of the cache key. Renaming them invalidates persisted
/// artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Grayscale,
    Invert,
    /// Gaussian blur with the given standard deviation.
    GaussianBlur { sigma: f32 },
    /// Brightness change in percent, -100..=100.
    Brightness { percent: f32 },
    /// Contrast change in percent (negative lowers contrast).
    Contrast { percent: f32 },
    /// Hue rotation in degrees.
    Hue { degrees: i32 },
    UnsharpMask { sigma: f32, threshold: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid filter {0:?}")]
pub struct FilterParseError(pub String);

/// Text form used by the CLI: `grayscale`, `invert`, `blur=2.5`,
/// `brightness=20`, `contrast=-10`, `hue=45`, `unsharpen=1.0,2`.
impl FromStr for Filter {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || FilterParseError(s.to_string());
        let lower = s.trim().to_ascii_lowercase();
        let (name, arg) = match lower.split_once('=') {
            Some((n, a)) => (n, Some(a)),
            None => (lower.as_str(), None),
        };
        let float = |a: Option<&str>| -> Result<f32, FilterParseError> {
            a.and_then(|v| v.parse::<f32>().ok())
                .filter(|v| v.is_finite())
                .ok_or_else(err)
        };

        match name {
            "grayscale" | "greyscale" if arg.is_none() => Ok(Filter::Grayscale),
            "invert" if arg.is_none() => Ok(Filter::Invert),
            "blur" => {
                let sigma = float(arg)?;
                if sigma <= 0.0 {
                    return Err(err());
                }
                Ok(Filter::GaussianBlur { sigma })
            }
            "brightness" => {
                let percent = float(arg)?;
                if !(-100.0..=100.0).contains(&percent) {
                    return Err(err());
                }
                Ok(Filter::Brightness { percent })
            }
            "contrast" => Ok(Filter::Contrast {
                percent: float(arg)?,
            }),
            "hue" => arg
                .and_then(|a| a.parse::<i32>().ok())
                .map(|degrees| Filter::Hue { degrees })
                .ok_or_else(err),
            "unsharpen" => {
                let (sigma, threshold) = arg.and_then(|a| a.split_once(',')).ok_or_else(err)?;
                let sigma = float(Some(sigma))?;
                let threshold = threshold.parse::<i32>().map_err(|_| err())?;
                Ok(Filter::UnsharpMask { sigma, threshold })
            }
            _ => Err(err()),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Grayscale => write!(f, "grayscale"),
            Filter::Invert => write!(f, "invert"),
            Filter::GaussianBlur { sigma } => write!(f, "blur={sigma}"),
            Filter::Brightness { percent } => write!(f, "brightness={percent}"),
            Filter::Contrast { percent } => write!(f, "contrast={percent}"),
            Filter::Hue { degrees } => write!(f, "hue={degrees}"),
            Filter::UnsharpMask { sigma, threshold } => write!(f, "unsharpen={sigma},{threshold}"),
        }
    }
}
