//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.
//! Rounding is always to nearest, so a given source and spec produce the same
//! size on every run.

use super::spec::Anchor;

fn round(v: f64) -> u32 {
    (v.round() as u32).max(1)
}

/// Output size for `resize`.
///
/// If one of `target` is 0 the other side is derived from the source aspect
/// ratio; otherwise the target is used as-is (the image may be distorted).
///
/// # Examples
/// ```
/// # use derivo::imaging::calculations::calculate_resize_dimensions;
/// assert_eq!(calculate_resize_dimensions((900, 562), (0, 200)), (320, 200));
/// assert_eq!(calculate_resize_dimensions((900, 562), (200, 0)), (200, 125));
/// assert_eq!(calculate_resize_dimensions((900, 562), (300, 200)), (300, 200));
/// ```
pub fn calculate_resize_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    match target {
        (0, h) => (round(src_w as f64 * h as f64 / src_h as f64), h),
        (w, 0) => (w, round(src_h as f64 * w as f64 / src_w as f64)),
        (w, h) => (w, h),
    }
}

/// Output size for `fit`: the largest size inside `bounds` that keeps the
/// source aspect ratio. Never upscales; a source already inside the bounds
/// keeps its own size.
pub fn calculate_fit_dimensions(source: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (max_w, max_h) = bounds;

    if src_w <= max_w && src_h <= max_h {
        return source;
    }

    let src_aspect = src_w as f64 / src_h as f64;
    let max_aspect = max_w as f64 / max_h as f64;

    if src_aspect > max_aspect {
        (max_w, round(max_w as f64 / src_aspect))
    } else {
        (round(max_h as f64 * src_aspect), max_h)
    }
}

/// Calculate dimensions needed to fill a target area (resize before crop).
///
/// Returns dimensions that completely cover the target area while maintaining
/// the source aspect ratio. One dimension will match exactly, the other may exceed.
pub fn calculate_fill_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let src_aspect = src_w as f64 / src_h as f64;
    let tgt_aspect = tgt_w as f64 / tgt_h as f64;

    if src_aspect > tgt_aspect {
        // Source is wider: height will match, width will exceed
        (round(tgt_h as f64 * src_aspect).max(tgt_w), tgt_h)
    } else {
        // Source is taller: width will match, height will exceed
        (tgt_w, round(tgt_w as f64 / src_aspect).max(tgt_h))
    }
}

/// Top-left corner of a `crop`-sized window inside `image` for a fixed anchor.
///
/// `Anchor::Smart` has no fixed position; it is treated as center here and
/// resolved by the backend with [`best_window_offset`].
pub fn anchor_offset(anchor: Anchor, image: (u32, u32), crop: (u32, u32)) -> (u32, u32) {
    let spare_w = image.0.saturating_sub(crop.0);
    let spare_h = image.1.saturating_sub(crop.1);

    let x = match anchor {
        Anchor::TopLeft | Anchor::Left | Anchor::BottomLeft => 0,
        Anchor::TopRight | Anchor::Right | Anchor::BottomRight => spare_w,
        Anchor::Center | Anchor::Top | Anchor::Bottom | Anchor::Smart => spare_w / 2,
    };
    let y = match anchor {
        Anchor::TopLeft | Anchor::Top | Anchor::TopRight => 0,
        Anchor::BottomLeft | Anchor::Bottom | Anchor::BottomRight => spare_h,
        Anchor::Center | Anchor::Left | Anchor::Right | Anchor::Smart => spare_h / 2,
    };
    (x, y)
}

/// Start of the `window`-long run of `energy` with the largest sum.
///
/// Ties go to the run closest to the center, so flat images crop like
/// `Anchor::Center`.
pub fn best_window_offset(energy: &[u64], window: usize) -> usize {
    if window == 0 || window >= energy.len() {
        return 0;
    }

    let center = (energy.len() - window) / 2;
    let mut sum: u64 = energy[..window].iter().sum();
    let mut best = (sum, 0usize);

    for start in 1..=energy.len() - window {
        sum = sum - energy[start - 1] + energy[start + window - 1];
        let closer = start.abs_diff(center) < best.1.abs_diff(center);
        if sum > best.0 || (sum == best.0 && closer) {
            best = (sum, start);
        }
    }

    best.1
}

/// Size after a clockwise rotation by `degrees` (0, 90, 180, 270).
pub fn rotated_dimensions(size: (u32, u32), degrees: u16) -> (u32, u32) {
    if degrees % 180 == 90 {
        (size.1, size.0)
    } else {
        size
    }
}
