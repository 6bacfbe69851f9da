//! Palette preservation for indexed sources (indexed PNG, GIF).
//!
//! The `image` decoders expand indexed images to RGB(A), dropping the
//! palette. We read it straight from the source bytes (PNG `PLTE`/`tRNS`
//! chunks, GIF color tables) and, after a transform, map the new pixels back
//! onto that palette with Floyd–Steinberg error diffusion
//! (`image::imageops::dither`).

use super::backend::PixelFormat;
use image::imageops::{self, ColorMap};
use image::{DynamicImage, Rgba};

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";
const COLOR_TYPE_INDEXED: u8 = 3;

const GIF_EXTENSION: u8 = 0x21;
const GIF_IMAGE: u8 = 0x2C;
const GIF_GRAPHIC_CONTROL: u8 = 0xF9;

/// Colors of an indexed image, in index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<Rgba<u8>>,
}

impl Palette {
    pub fn new(colors: Vec<Rgba<u8>>) -> Option<Self> {
        (!colors.is_empty()).then_some(Self { colors })
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn contains(&self, color: &Rgba<u8>) -> bool {
        self.colors.contains(color)
    }
}

impl ColorMap for Palette {
    type Color = Rgba<u8>;

    fn index_of(&self, color: &Rgba<u8>) -> usize {
        let distance = |p: &Rgba<u8>| -> u32 {
            p.0.iter()
                .zip(color.0.iter())
                .map(|(a, b)| (*a as i32 - *b as i32).pow(2) as u32)
                .sum()
        };
        self.colors
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| distance(p))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    fn lookup(&self, index: usize) -> Option<Rgba<u8>> {
        self.colors.get(index).copied()
    }

    fn has_lookup(&self) -> bool {
        true
    }

    fn map_color(&self, color: &mut Rgba<u8>) {
        if let Some(mapped) = self.lookup(self.index_of(color)) {
            *color = mapped;
        }
    }
}

/// The palette of an indexed PNG, or `None` for any other image.
///
/// Walks the chunk list up to the first `IDAT`; CRCs are not verified since
/// the decoder has already accepted the file.
pub fn read_png_palette(bytes: &[u8]) -> Option<Palette> {
    let mut rest = bytes.strip_prefix(PNG_SIGNATURE)?;
    let mut indexed = false;
    let mut colors: Vec<Rgba<u8>> = Vec::new();

    while rest.len() >= 12 {
        let len = u32::from_be_bytes(rest[0..4].try_into().ok()?) as usize;
        let kind = &rest[4..8];
        let data = rest.get(8..8 + len)?;

        match kind {
            b"IHDR" => indexed = data.get(9) == Some(&COLOR_TYPE_INDEXED),
            b"PLTE" => {
                colors = data
                    .chunks_exact(3)
                    .map(|c| Rgba([c[0], c[1], c[2], 255]))
                    .collect();
            }
            b"tRNS" => {
                for (color, alpha) in colors.iter_mut().zip(data) {
                    color.0[3] = *alpha;
                }
            }
            b"IDAT" | b"IEND" => break,
            _ => {}
        }

        rest = rest.get(12 + len..)?;
    }

    if indexed { Palette::new(colors) } else { None }
}

/// Palette of a source in `format`, if it is an indexed image.
pub fn source_palette(format: PixelFormat, bytes: &[u8]) -> Option<Palette> {
    match format {
        PixelFormat::Png => read_png_palette(bytes),
        PixelFormat::Gif => read_gif_palette(bytes),
        _ => None,
    }
}

/// `2^(n+1)` RGB triples starting at `at`, when the table flag is set.
fn gif_color_table(bytes: &[u8], at: usize, packed: u8) -> Option<(Vec<Rgba<u8>>, usize)> {
    if packed & 0x80 == 0 {
        return Some((Vec::new(), at));
    }
    let len = 3 * (1usize << ((packed & 0x07) + 1));
    let table = bytes.get(at..at + len)?;
    let colors = table
        .chunks_exact(3)
        .map(|c| Rgba([c[0], c[1], c[2], 255]))
        .collect();
    Some((colors, at + len))
}

/// Offset just past a chain of data sub-blocks starting at `at`.
fn skip_sub_blocks(bytes: &[u8], mut at: usize) -> Option<usize> {
    loop {
        let len = *bytes.get(at)? as usize;
        at += 1 + len;
        if len == 0 {
            return Some(at);
        }
    }
}

/// The palette of the first GIF frame: its local color table if present,
/// else the global one. A transparent index from the frame's graphic
/// control extension gets alpha 0.
pub fn read_gif_palette(bytes: &[u8]) -> Option<Palette> {
    let header = bytes.get(..6)?;
    if header != b"GIF87a" && header != b"GIF89a" {
        return None;
    }
    let screen_packed = *bytes.get(10)?;
    let (global, mut at) = gif_color_table(bytes, 13, screen_packed)?;
    let mut transparent: Option<usize> = None;

    loop {
        match *bytes.get(at)? {
            GIF_EXTENSION => {
                let label = *bytes.get(at + 1)?;
                if label == GIF_GRAPHIC_CONTROL {
                    let flags = *bytes.get(at + 3)?;
                    if flags & 0x01 != 0 {
                        transparent = Some(*bytes.get(at + 6)? as usize);
                    }
                }
                at = skip_sub_blocks(bytes, at + 2)?;
            }
            GIF_IMAGE => {
                let frame_packed = *bytes.get(at + 9)?;
                let (local, _) = gif_color_table(bytes, at + 10, frame_packed)?;
                let mut colors = if local.is_empty() { global } else { local };
                if let Some(color) = transparent.and_then(|i| colors.get_mut(i)) {
                    color.0[3] = 0;
                }
                return Palette::new(colors);
            }
            // Trailer or garbage before the first frame.
            _ => return None,
        }
    }
}

/// Map `image` onto `palette` with error diffusion.
pub fn requantize(image: DynamicImage, palette: &Palette) -> DynamicImage {
    let mut rgba = image.to_rgba8();
    imageops::dither(&mut rgba, palette);
    DynamicImage::ImageRgba8(rgba)
}
