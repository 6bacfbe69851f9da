//! Pure Rust image processing backend built on the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `image::ImageReader::into_dimensions` (header only) |
//! | Decode (JPEG, PNG, GIF, TIFF, WebP, BMP) | `image::load_from_memory_with_format` |
//! | Rotate | `DynamicImage::rotate90` / `rotate180` / `rotate270` |
//! | Resample (`box`, downscale) | `DynamicImage::thumbnail_exact` (area averaging) |
//! | Resample (other filters) | `DynamicImage::resize_exact` with the matching `FilterType` |
//! | Crop | `DynamicImage::crop_imm`, smart anchor via luma gradient energy |
//! | Filters | `grayscale`, `invert`, `blur`, `brighten`, `adjust_contrast`, `huerotate`, `unsharpen` |
//! | Encode → JPEG | `JpegEncoder::new_with_quality` |
//! | Encode → others | `DynamicImage::write_to` |
//! | IPTC metadata | [`iptc`](super::iptc) (JPEG APP13 + TIFF IFD) |

use super::backend::{BackendError, Dimensions, ImageBackend, ImageMetadata, PixelFormat};
use super::calculations::{anchor_offset, best_window_offset};
use super::operations::{CropPlan, plan_transform};
use super::params::{Filter, Quality};
use super::spec::{Action, Anchor, ResampleFilter, TransformConfig};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use std::io::Cursor;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

fn filter_type(filter: ResampleFilter) -> FilterType {
    match filter {
        ResampleFilter::NearestNeighbor => FilterType::Nearest,
        ResampleFilter::Box | ResampleFilter::Linear => FilterType::Triangle,
        ResampleFilter::CatmullRom => FilterType::CatmullRom,
        ResampleFilter::Gaussian => FilterType::Gaussian,
        ResampleFilter::Lanczos => FilterType::Lanczos3,
    }
}

fn resample(img: DynamicImage, size: (u32, u32), filter: ResampleFilter) -> DynamicImage {
    let (w, h) = size;
    if (w, h) == img.dimensions() {
        return img;
    }
    // Area averaging only makes sense when shrinking.
    if filter == ResampleFilter::Box && w <= img.width() && h <= img.height() {
        return img.thumbnail_exact(w, h);
    }
    img.resize_exact(w, h, filter_type(filter))
}

/// Sum of absolute luma gradients per column and per row.
fn gradient_energy(img: &DynamicImage) -> (Vec<u64>, Vec<u64>) {
    let luma = img.to_luma8();
    let (w, h) = luma.dimensions();
    let mut cols = vec![0u64; w as usize];
    let mut rows = vec![0u64; h as usize];

    for y in 0..h {
        for x in 0..w {
            let here = luma.get_pixel(x, y).0[0] as i32;
            let mut e = 0;
            if x + 1 < w {
                e += (luma.get_pixel(x + 1, y).0[0] as i32 - here).unsigned_abs();
            }
            if y + 1 < h {
                e += (luma.get_pixel(x, y + 1).0[0] as i32 - here).unsigned_abs();
            }
            cols[x as usize] += e as u64;
            rows[y as usize] += e as u64;
        }
    }

    (cols, rows)
}

fn crop(img: DynamicImage, plan: CropPlan) -> DynamicImage {
    let image = img.dimensions();
    let window = (plan.width.min(image.0), plan.height.min(image.1));

    let (x, y) = if plan.anchor == Anchor::Smart {
        let (cols, rows) = gradient_energy(&img);
        (
            best_window_offset(&cols, window.0 as usize) as u32,
            best_window_offset(&rows, window.1 as usize) as u32,
        )
    } else {
        anchor_offset(plan.anchor, image, window)
    };

    img.crop_imm(x, y, window.0, window.1)
}

fn apply_filter(img: DynamicImage, filter: &Filter) -> DynamicImage {
    match *filter {
        Filter::Grayscale => img.grayscale(),
        Filter::Invert => {
            let mut img = img;
            img.invert();
            img
        }
        Filter::GaussianBlur { sigma } => img.blur(sigma),
        Filter::Brightness { percent } => img.brighten((percent * 2.55).round() as i32),
        Filter::Contrast { percent } => img.adjust_contrast(percent),
        Filter::Hue { degrees } => img.huerotate(degrees),
        Filter::UnsharpMask { sigma, threshold } => img.unsharpen(sigma, threshold),
    }
}

impl ImageBackend for RustBackend {
    fn identify(&self, bytes: &[u8], format: PixelFormat) -> Result<Dimensions, BackendError> {
        let (width, height) = ImageReader::with_format(Cursor::new(bytes), format.image_format())
            .into_dimensions()
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(Dimensions { width, height })
    }

    fn decode(&self, bytes: &[u8], format: PixelFormat) -> Result<DynamicImage, BackendError> {
        image::load_from_memory_with_format(bytes, format.image_format())
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    fn transform(
        &self,
        img: DynamicImage,
        config: &TransformConfig,
    ) -> Result<DynamicImage, BackendError> {
        if config.action == Action::Trace {
            return Err(BackendError::Unsupported(
                "trace needs a vector tracer; the raster backend has none".into(),
            ));
        }

        let plan = plan_transform(config, img.dimensions());

        let mut img = match plan.rotate {
            90 => img.rotate90(),
            180 => img.rotate180(),
            270 => img.rotate270(),
            _ => img,
        };
        if let Some(size) = plan.resample {
            img = resample(img, size, plan.filter);
        }
        if let Some(window) = plan.crop {
            img = crop(img, window);
        }
        for filter in &plan.filters {
            img = apply_filter(img, filter);
        }

        if img.dimensions() != plan.output_dimensions() {
            return Err(BackendError::Transform(format!(
                "produced {:?}, planned {:?}",
                img.dimensions(),
                plan.output_dimensions()
            )));
        }
        Ok(img)
    }

    fn encode(
        &self,
        img: &DynamicImage,
        format: PixelFormat,
        quality: Option<Quality>,
    ) -> Result<Vec<u8>, BackendError> {
        let encode_err = |e: image::ImageError| BackendError::Encode(e.to_string());

        match format {
            PixelFormat::Jpeg => {
                let mut buf = Vec::new();
                let q = quality.unwrap_or_default().value();
                let encoder = JpegEncoder::new_with_quality(&mut buf, q);
                DynamicImage::ImageRgb8(img.to_rgb8())
                    .write_with_encoder(encoder)
                    .map_err(encode_err)?;
                Ok(buf)
            }
            PixelFormat::Gif | PixelFormat::WebP => {
                let mut buf = Cursor::new(Vec::new());
                DynamicImage::ImageRgba8(img.to_rgba8())
                    .write_to(&mut buf, format.image_format())
                    .map_err(encode_err)?;
                Ok(buf.into_inner())
            }
            PixelFormat::Png | PixelFormat::Tiff | PixelFormat::Bmp => {
                let mut buf = Cursor::new(Vec::new());
                img.write_to(&mut buf, format.image_format())
                    .map_err(encode_err)?;
                Ok(buf.into_inner())
            }
        }
    }

    fn read_metadata(
        &self,
        bytes: &[u8],
        format: PixelFormat,
    ) -> Result<ImageMetadata, BackendError> {
        super::iptc::read_iptc(bytes, format).map_err(|e| BackendError::Metadata(e.to_string()))
    }
}
