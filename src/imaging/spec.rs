//! Transformation config: parsing compact spec strings like `"200x100 bottomLeft q80"`.
//!
//! A spec is a whitespace-delimited, order-independent list of tokens.
//! Keywords are case-insensitive:
//!
//! ```text
//! resize: "<W>x<H> [rNN] [filterName] [qNN]"
//! fit:    "<W>x<H> [filterName] [qNN]"
//! fill:   "<W>x<H> [anchor|smart] [filterName] [qNN]"
//! ```
//!
//! Either side of `WxH` may be `0` or omitted (`x200`, `200x`) to preserve
//! the aspect ratio. Unset filter and anchor fall back to the
//! [`ImagingConfig`] defaults. Quality is left unset here; the orchestrator
//! substitutes the default only when the output is lossy, so the key for
//! other formats never depends on it.
//!
//! ## Keys
//!
//! [`TransformConfig::key`] renders the canonical key used in cache keys and
//! target file names:
//!
//! ```text
//! 300x200_resize_q68_linear
//! 0x200_resize_r90_box
//! 200x100_fill_q68_linear_bottomleft
//! filter_3f5a…
//! ```

use super::backend::PixelFormat;
use super::params::{Filter, Quality};
use crate::config::ImagingConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Bumped when the content-aware crop algorithm changes, so `smart` fills
/// get fresh file names.
const SMART_CROP_VERSION: u32 = 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("malformed dimensions {0:?}")]
    MalformedDimensions(String),
    #[error("quality {0:?} out of range, must be 1-100")]
    QualityOutOfRange(String),
    #[error("unsupported rotation {0:?}, must be a multiple of 90")]
    InvalidRotation(String),
    #[error("unknown image config token {0:?}")]
    UnknownToken(String),
    #[error("anchor {0:?} is only valid for fill")]
    AnchorNotAllowed(String),
    #[error("{action} requires {requirement}")]
    MissingDimensions {
        action: Action,
        requirement: &'static str,
    },
    #[error("unknown action {0:?}")]
    UnknownAction(String),
    #[error("the filter action takes a filter chain, not a spec string")]
    FilterChainRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Resize,
    Fit,
    Fill,
    Filter,
    /// Vector tracing. Named like the others but rendered as `.svg`.
    Trace,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::Resize => "resize",
            Action::Fit => "fit",
            Action::Fill => "fill",
            Action::Filter => "filter",
            Action::Trace => "trace",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Action {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resize" => Ok(Action::Resize),
            "fit" => Ok(Action::Fit),
            "fill" => Ok(Action::Fill),
            "filter" => Ok(Action::Filter),
            "trace" => Ok(Action::Trace),
            _ => Err(SpecError::UnknownAction(s.to_string())),
        }
    }
}

/// Crop anchor for `fill`. `Smart` picks the most detailed region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    Center,
    TopLeft,
    Top,
    TopRight,
    Left,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
    Smart,
}

impl Anchor {
    pub const ALL: [Anchor; 10] = [
        Anchor::Center,
        Anchor::TopLeft,
        Anchor::Top,
        Anchor::TopRight,
        Anchor::Left,
        Anchor::Right,
        Anchor::BottomLeft,
        Anchor::Bottom,
        Anchor::BottomRight,
        Anchor::Smart,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            Anchor::Center => "center",
            Anchor::TopLeft => "topleft",
            Anchor::Top => "top",
            Anchor::TopRight => "topright",
            Anchor::Left => "left",
            Anchor::Right => "right",
            Anchor::BottomLeft => "bottomleft",
            Anchor::Bottom => "bottom",
            Anchor::BottomRight => "bottomright",
            Anchor::Smart => "smart",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.keyword().eq_ignore_ascii_case(word))
    }
}

/// Resampling filter keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleFilter {
    NearestNeighbor,
    Box,
    Linear,
    CatmullRom,
    Gaussian,
    Lanczos,
}

impl ResampleFilter {
    pub const ALL: [ResampleFilter; 6] = [
        ResampleFilter::NearestNeighbor,
        ResampleFilter::Box,
        ResampleFilter::Linear,
        ResampleFilter::CatmullRom,
        ResampleFilter::Gaussian,
        ResampleFilter::Lanczos,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            ResampleFilter::NearestNeighbor => "nearestneighbor",
            ResampleFilter::Box => "box",
            ResampleFilter::Linear => "linear",
            ResampleFilter::CatmullRom => "catmullrom",
            ResampleFilter::Gaussian => "gaussian",
            ResampleFilter::Lanczos => "lanczos",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.keyword().eq_ignore_ascii_case(word))
    }
}

/// Normalized parameters of one transformation request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformConfig {
    pub action: Action,
    /// Target width; 0 means "derive from height".
    pub width: u32,
    /// Target height; 0 means "derive from width".
    pub height: u32,
    pub anchor: Anchor,
    pub filter: ResampleFilter,
    /// Clockwise rotation in degrees: 0, 90, 180 or 270.
    pub rotate: u16,
    pub quality: Option<Quality>,
    /// Ordered chain for [`Action::Filter`]; empty otherwise.
    pub filters: Vec<Filter>,
    chain_key: Option<String>,
}

impl TransformConfig {
    /// Parse a spec string for `resize`, `fit`, `fill` or `trace`.
    pub fn parse(action: Action, spec: &str, defaults: &ImagingConfig) -> Result<Self, SpecError> {
        if action == Action::Filter {
            return Err(SpecError::FilterChainRequired);
        }

        let mut config = Self::base(action, defaults);

        for token in spec.split_whitespace() {
            let part = token.to_ascii_lowercase();

            if let Some(anchor) = Anchor::from_keyword(&part) {
                if action != Action::Fill {
                    return Err(SpecError::AnchorNotAllowed(token.to_string()));
                }
                config.anchor = anchor;
            } else if let Some(filter) = ResampleFilter::from_keyword(&part) {
                config.filter = filter;
            } else if let Some(q) = part.strip_prefix('q') {
                let quality = q
                    .parse::<u32>()
                    .ok()
                    .and_then(Quality::checked)
                    .ok_or_else(|| SpecError::QualityOutOfRange(token.to_string()))?;
                config.quality = Some(quality);
            } else if let Some(r) = part.strip_prefix('r') {
                config.rotate = parse_rotation(r)
                    .ok_or_else(|| SpecError::InvalidRotation(token.to_string()))?;
            } else if part.contains('x') {
                let (w, h) = parse_dimensions(&part)
                    .ok_or_else(|| SpecError::MalformedDimensions(token.to_string()))?;
                config.width = w;
                config.height = h;
            } else {
                return Err(SpecError::UnknownToken(token.to_string()));
            }
        }

        match action {
            Action::Resize if config.width == 0 && config.height == 0 => {
                Err(SpecError::MissingDimensions {
                    action,
                    requirement: "a width or a height",
                })
            }
            Action::Fit | Action::Fill if config.width == 0 || config.height == 0 => {
                Err(SpecError::MissingDimensions {
                    action,
                    requirement: "both width and height",
                })
            }
            _ => Ok(config),
        }
    }

    /// Build a `filter` config from an ordered chain.
    ///
    /// The key hashes the serialized chain, so reordering the same filters
    /// yields a different key.
    pub fn from_filters(filters: Vec<Filter>, defaults: &ImagingConfig) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"filters\0");
        // Serializing plain enums with finite floats cannot fail.
        hasher.update(serde_json::to_vec(&filters).unwrap_or_default());
        let digest = format!("{:x}", hasher.finalize());

        let mut config = Self::base(Action::Filter, defaults);
        config.filters = filters;
        config.chain_key = Some(digest[..32].to_string());
        config
    }

    fn base(action: Action, defaults: &ImagingConfig) -> Self {
        Self {
            action,
            width: 0,
            height: 0,
            anchor: defaults.anchor,
            filter: defaults.resample_filter,
            rotate: 0,
            quality: None,
            filters: Vec::new(),
            chain_key: None,
        }
    }

    /// Substitute `default` when no quality was requested and the output is lossy.
    pub fn with_default_quality(mut self, format: PixelFormat, default: Quality) -> Self {
        if self.quality.is_none() && format.is_lossy() {
            self.quality = Some(default);
        }
        self
    }

    /// Canonical key for this config when rendered to `format`.
    pub fn key(&self, format: PixelFormat) -> String {
        if let Some(chain) = &self.chain_key {
            return format!("{}_{}", self.action, chain);
        }

        let mut key = format!("{}x{}_{}", self.width, self.height, self.action);
        if let Some(q) = self.quality
            && format.is_lossy()
        {
            key.push_str(&format!("_q{}", q.value()));
        }
        if self.rotate != 0 {
            key.push_str(&format!("_r{}", self.rotate));
        }
        key.push('_');
        key.push_str(self.filter.keyword());
        if self.action == Action::Fill {
            key.push('_');
            key.push_str(self.anchor.keyword());
            if self.anchor == Anchor::Smart {
                key.push_str(&SMART_CROP_VERSION.to_string());
            }
        }
        key
    }
}

/// `"300x200"`, `"x200"`, `"200x"`, `"0x200"`.
fn parse_dimensions(part: &str) -> Option<(u32, u32)> {
    let (w, h) = part.split_once('x')?;
    let side = |s: &str| -> Option<u32> {
        if s.is_empty() {
            Some(0)
        } else {
            s.parse::<u32>().ok()
        }
    };
    Some((side(w)?, side(h)?))
}

/// Multiples of 90, normalized into `0..360`.
fn parse_rotation(r: &str) -> Option<u16> {
    let degrees = r.parse::<i32>().ok()?;
    if degrees % 90 != 0 {
        return None;
    }
    Some(degrees.rem_euclid(360) as u16)
}
