//! High-level image operations.
//!
//! Turns a [`TransformConfig`] plus the current pixel size into a
//! [`TransformPlan`]: the ordered geometry steps a backend executes. Planning
//! is pure, so every action's size semantics are unit tested here without
//! touching pixels.
//!
//! Step order is fixed: rotate, resample, crop, then the filter chain.

use super::calculations::{
    calculate_fill_dimensions, calculate_fit_dimensions, calculate_resize_dimensions,
    rotated_dimensions,
};
use super::params::Filter;
use super::spec::{Action, Anchor, ResampleFilter, TransformConfig};

/// Final crop window for `fill`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropPlan {
    pub width: u32,
    pub height: u32,
    pub anchor: Anchor,
}

/// Geometry and filter steps for one transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformPlan {
    pub rotate: u16,
    /// Resample to this size; `None` keeps the (rotated) size.
    pub resample: Option<(u32, u32)>,
    pub filter: ResampleFilter,
    pub crop: Option<CropPlan>,
    pub filters: Vec<Filter>,
    output: (u32, u32),
}

impl TransformPlan {
    /// Pixel size the plan produces.
    pub fn output_dimensions(&self) -> (u32, u32) {
        self.output
    }
}

/// Plan `config` against an image of size `source`.
pub fn plan_transform(config: &TransformConfig, source: (u32, u32)) -> TransformPlan {
    let rotated = rotated_dimensions(source, config.rotate);
    let target = (config.width, config.height);

    let (resample, crop) = match config.action {
        Action::Resize => (Some(calculate_resize_dimensions(rotated, target)), None),
        Action::Fit => {
            let fitted = calculate_fit_dimensions(rotated, target);
            ((fitted != rotated).then_some(fitted), None)
        }
        Action::Fill => (
            Some(calculate_fill_dimensions(rotated, target)),
            Some(CropPlan {
                width: config.width,
                height: config.height,
                anchor: config.anchor,
            }),
        ),
        Action::Filter | Action::Trace => (None, None),
    };

    let output = match (crop, resample) {
        (Some(c), _) => (c.width, c.height),
        (None, Some(size)) => size,
        (None, None) => rotated,
    };

    TransformPlan {
        rotate: config.rotate,
        resample,
        filter: config.filter,
        crop,
        filters: config.filters.clone(),
        output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImagingConfig;

    fn plan(action: Action, spec: &str, source: (u32, u32)) -> TransformPlan {
        let config = TransformConfig::parse(action, spec, &ImagingConfig::default()).unwrap();
        plan_transform(&config, source)
    }

    #[test]
    fn resize_examples() {
        let src = (900, 562);
        assert_eq!(plan(Action::Resize, "300x200", src).output_dimensions(), (300, 200));
        assert_eq!(plan(Action::Resize, "x200", src).output_dimensions(), (320, 200));
        assert_eq!(plan(Action::Resize, "200x", src).output_dimensions(), (200, 125));
    }

    #[test]
    fn resize_rotates_first() {
        let p = plan(Action::Resize, "x200 r90", (900, 562));
        assert_eq!(p.rotate, 90);
        assert_eq!(p.resample, Some((125, 200)));
        assert_eq!(p.output_dimensions(), (125, 200));
    }

    #[test]
    fn fit_skips_resample_when_already_inside() {
        let p = plan(Action::Fit, "1000x1000", (900, 562));
        assert_eq!(p.resample, None);
        assert_eq!(p.output_dimensions(), (900, 562));
    }

    #[test]
    fn fit_scales_down() {
        let p = plan(Action::Fit, "50x50", (300, 200));
        assert_eq!(p.resample, Some((50, 33)));
    }

    #[test]
    fn fill_covers_then_crops() {
        let p = plan(Action::Fill, "200x100 bottomLeft", (900, 562));
        assert_eq!(p.resample, Some((200, 125)));
        assert_eq!(
            p.crop,
            Some(CropPlan {
                width: 200,
                height: 100,
                anchor: Anchor::BottomLeft
            })
        );
        assert_eq!(p.output_dimensions(), (200, 100));
    }

    #[test]
    fn filter_keeps_geometry() {
        let config = TransformConfig::from_filters(
            vec![Filter::Grayscale],
            &ImagingConfig::default(),
        );
        let p = plan_transform(&config, (640, 480));
        assert_eq!(p.resample, None);
        assert_eq!(p.crop, None);
        assert_eq!(p.filters, vec![Filter::Grayscale]);
        assert_eq!(p.output_dimensions(), (640, 480));
    }
}
