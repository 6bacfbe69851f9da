//! Shared test utilities for the derivo test suite.
//!
//! Synthetic images are generated in memory so no binary fixtures are needed:
//!
//! ```rust,ignore
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let file = write_file(tmp.path(), "sunset.jpg", &jpeg_bytes(900, 562));
//! let processor = Processor::new(test_config(tmp.path()));
//! let img = processor.open(&file, "/a/sunset.jpg").unwrap();
//! ```

use crate::config::ImagingConfig;
use crate::imaging::iptc::tests::{dataset, with_app13};
use crate::imaging::ResampleFilter;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};

// =========================================================================
// Config
// =========================================================================

/// Config with quality 68, linear resampling and a cache under `dir/cache`.
pub fn test_config(dir: &Path) -> ImagingConfig {
    ImagingConfig {
        quality: 68,
        resample_filter: ResampleFilter::Linear,
        cache_dir: dir.join("cache"),
        ..ImagingConfig::default()
    }
}

// =========================================================================
// Synthetic images
// =========================================================================

fn gradient(width: u32, height: u32) -> DynamicImage {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    });
    DynamicImage::ImageRgb8(img)
}

fn encode(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

/// A gradient JPEG of the given size.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(&gradient(width, height), ImageFormat::Jpeg)
}

/// A gradient RGB PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(&gradient(width, height), ImageFormat::Png)
}

/// A gradient JPEG carrying an IPTC title and keywords.
pub fn iptc_jpeg_bytes(width: u32, height: u32, title: &str, keywords: &[&str]) -> Vec<u8> {
    let mut iim = dataset(5, title);
    for keyword in keywords {
        iim.extend(dataset(25, keyword));
    }
    with_app13(&jpeg_bytes(width, height), &iim)
}

/// An 8-bit indexed PNG. `index(x, y)` picks the palette entry per pixel.
///
/// The `image` crate only writes truecolor PNGs, so the file is assembled by
/// hand with a stored (uncompressed) zlib stream.
pub fn indexed_png_bytes(
    width: u32,
    height: u32,
    palette: &[[u8; 3]],
    index: impl Fn(u32, u32) -> u8,
) -> Vec<u8> {
    let mut raw = Vec::new();
    for y in 0..height {
        raw.push(0); // filter: none
        raw.extend((0..width).map(|x| index(x, y)));
    }
    assert!(raw.len() <= u16::MAX as usize, "image too large for one stored block");

    let mut zlib = vec![0x78, 0x01, 0x01];
    let len = raw.len() as u16;
    zlib.extend_from_slice(&len.to_le_bytes());
    zlib.extend_from_slice(&(!len).to_le_bytes());
    zlib.extend_from_slice(&raw);
    zlib.extend_from_slice(&adler32(&raw).to_be_bytes());

    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.extend_from_slice(&[8, 3, 0, 0, 0]);

    let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
    png.extend(png_chunk(b"IHDR", &ihdr));
    png.extend(png_chunk(b"PLTE", &palette.concat()));
    png.extend(png_chunk(b"IDAT", &zlib));
    png.extend(png_chunk(b"IEND", &[]));
    png
}

/// A single-frame GIF with a global color table.
///
/// Every pixel is coded right after an LZW clear code, so the code width
/// never grows and no dictionary is needed.
pub fn indexed_gif_bytes(
    width: u32,
    height: u32,
    palette: &[[u8; 3]],
    index: impl Fn(u32, u32) -> u8,
) -> Vec<u8> {
    assert!((1..=256).contains(&palette.len()));
    let bits = (palette.len().next_power_of_two().trailing_zeros() as u8).max(2);
    let (w, h) = (width as u16, height as u16);

    let mut gif = b"GIF89a".to_vec();
    gif.extend_from_slice(&w.to_le_bytes());
    gif.extend_from_slice(&h.to_le_bytes());
    gif.extend_from_slice(&[0x80 | (bits - 1), 0, 0]);
    for i in 0..1usize << bits {
        gif.extend_from_slice(palette.get(i).unwrap_or(&[0, 0, 0]));
    }

    gif.push(0x2C);
    gif.extend_from_slice(&[0, 0, 0, 0]);
    gif.extend_from_slice(&w.to_le_bytes());
    gif.extend_from_slice(&h.to_le_bytes());
    gif.push(0);

    let clear = 1u32 << bits;
    let code_width = bits as u32 + 1;
    let (mut data, mut acc, mut filled) = (Vec::new(), 0u32, 0u32);
    let mut emit = |code: u32| {
        acc |= code << filled;
        filled += code_width;
        while filled >= 8 {
            data.push(acc as u8);
            acc >>= 8;
            filled -= 8;
        }
    };
    for y in 0..height {
        for x in 0..width {
            emit(clear);
            emit(index(x, y) as u32);
        }
    }
    emit(clear + 1);
    if filled > 0 {
        data.push(acc as u8);
    }

    gif.push(bits);
    for block in data.chunks(255) {
        gif.push(block.len() as u8);
        gif.extend_from_slice(block);
    }
    gif.push(0);
    gif.push(0x3B);
    gif
}

fn png_chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = (data.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    let crc = crc32(kind.iter().chain(data));
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

fn crc32<'a>(bytes: impl Iterator<Item = &'a u8>) -> u32 {
    let mut crc = 0xffff_ffffu32;
    for &b in bytes {
        crc ^= b as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xedb8_8320 & mask);
        }
    }
    !crc
}

fn adler32(bytes: &[u8]) -> u32 {
    let (mut a, mut b) = (1u32, 0u32);
    for &byte in bytes {
        a = (a + byte as u32) % 65521;
        b = (b + a) % 65521;
    }
    (b << 16) | a
}

// =========================================================================
// Filesystem
// =========================================================================

/// Write `bytes` to `dir/name`, creating parent directories.
pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn indexed_png_decodes_with_its_palette() {
    let bytes = indexed_png_bytes(4, 2, &[[255, 0, 0], [0, 0, 255]], |x, _| (x % 2) as u8);
    let img = image::load_from_memory_with_format(&bytes, ImageFormat::Png)
        .unwrap()
        .to_rgb8();
    assert_eq!(img.dimensions(), (4, 2));
    assert_eq!(img.get_pixel(0, 0).0, [255, 0, 0]);
    assert_eq!(img.get_pixel(1, 1).0, [0, 0, 255]);

    let palette = crate::imaging::palette::read_png_palette(&bytes).unwrap();
    assert_eq!(palette.len(), 2);
}

#[test]
fn indexed_gif_decodes_with_its_palette() {
    let bytes = indexed_gif_bytes(5, 3, &[[255, 0, 0], [0, 0, 255], [0, 255, 0]], |x, y| {
        ((x + y) % 3) as u8
    });
    let img = image::load_from_memory_with_format(&bytes, ImageFormat::Gif)
        .unwrap()
        .to_rgb8();
    assert_eq!(img.dimensions(), (5, 3));
    assert_eq!(img.get_pixel(0, 0).0, [255, 0, 0]);
    assert_eq!(img.get_pixel(1, 0).0, [0, 0, 255]);
    assert_eq!(img.get_pixel(1, 1).0, [0, 255, 0]);

    let palette = crate::imaging::palette::read_gif_palette(&bytes).unwrap();
    assert_eq!(palette.len(), 4);
}
