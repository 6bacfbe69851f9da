//! IPTC-IIM metadata extraction from JPEG and TIFF bytes.
//!
//! - JPEG: APP13 segment → Photoshop `8BIM` resource `0x0404` → IIM datasets.
//! - TIFF: IFD tag 33723 (raw IIM) or tag 34377 (`8BIM` resources).
//!
//! A container that is not what its extension claims is an error; a valid
//! container without IPTC data yields empty metadata.

use super::backend::{ImageMetadata, PixelFormat};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IptcError {
    #[error("not a JPEG stream (missing SOI marker)")]
    NotJpeg,
    #[error("not a TIFF stream (bad byte order or magic)")]
    NotTiff,
}

/// Decode IPTC metadata from the bytes of a `format` image.
pub fn read_iptc(bytes: &[u8], format: PixelFormat) -> Result<ImageMetadata, IptcError> {
    let iim = match format {
        PixelFormat::Jpeg => jpeg_iim(bytes)?,
        PixelFormat::Tiff => tiff_iim(bytes)?,
        _ => None,
    };
    Ok(iim.map(parse_iim).unwrap_or_default())
}

// ---------------------------------------------------------------------------
// IIM datasets
// ---------------------------------------------------------------------------

/// Iterates `(record, dataset, value)` triples of an IIM block.
///
/// Each dataset is `0x1C record dataset len_hi len_lo value...`; stray bytes
/// between datasets are skipped.
struct Datasets<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Datasets<'a> {
    type Item = (u8, u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let header = self.data.get(self.pos..self.pos + 5)?;
            if header[0] != 0x1C {
                self.pos += 1;
                continue;
            }
            let len = u16::from_be_bytes([header[3], header[4]]) as usize;
            let start = self.pos + 5;
            let value = self.data.get(start..start + len)?;
            self.pos = start + len;
            return Some((header[1], header[2], value));
        }
    }
}

fn parse_iim(data: &[u8]) -> ImageMetadata {
    let mut meta = ImageMetadata::default();

    for (record, dataset, raw) in (Datasets { data, pos: 0 }) {
        if record != 2 {
            continue;
        }
        let value = String::from_utf8_lossy(raw).trim().to_string();
        if value.is_empty() {
            continue;
        }
        match dataset {
            5 => meta.title = Some(value),
            25 => meta.keywords.push(value),
            55 => meta.date_created = Some(value),
            80 => meta.byline = Some(value),
            90 => meta.city = Some(value),
            116 => meta.copyright = Some(value),
            120 => meta.caption = Some(value),
            _ => {}
        }
    }

    meta
}

// ---------------------------------------------------------------------------
// Photoshop resource blocks
// ---------------------------------------------------------------------------

const PHOTOSHOP_HEADER: &[u8] = b"Photoshop 3.0\0";
const IPTC_RESOURCE_ID: u16 = 0x0404;

/// Find resource `0x0404` in a run of `8BIM` blocks.
///
/// Block: `8BIM` id(2) pascal-name(padded to even) size(4) data(padded to even).
fn iim_from_8bim(block: &[u8]) -> Option<&[u8]> {
    let data = block.strip_prefix(PHOTOSHOP_HEADER).unwrap_or(block);
    let mut pos = 0;

    while let Some(sig) = data.get(pos..pos + 4) {
        if sig != b"8BIM" {
            pos += 1;
            continue;
        }
        let id = u16::from_be_bytes(data.get(pos + 4..pos + 6)?.try_into().ok()?);
        let name_len = *data.get(pos + 6)? as usize;
        let name_total = (1 + name_len).next_multiple_of(2);
        let size_at = pos + 6 + name_total;
        let size = u32::from_be_bytes(data.get(size_at..size_at + 4)?.try_into().ok()?) as usize;
        let body_at = size_at + 4;
        let body = data.get(body_at..body_at + size)?;

        if id == IPTC_RESOURCE_ID {
            return Some(body);
        }
        pos = body_at + size.next_multiple_of(2);
    }

    None
}

// ---------------------------------------------------------------------------
// JPEG
// ---------------------------------------------------------------------------

const APP13: u8 = 0xED;
const SOS: u8 = 0xDA;

fn jpeg_iim(bytes: &[u8]) -> Result<Option<&[u8]>, IptcError> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return Err(IptcError::NotJpeg);
    }

    let mut pos = 2;
    while let Some(&[0xFF, marker]) = bytes.get(pos..pos + 2) {
        match marker {
            // Fill bytes before a marker.
            0xFF => {
                pos += 1;
                continue;
            }
            SOS | 0xD9 => break,
            0xD0..=0xD7 | 0x01 => {
                pos += 2;
                continue;
            }
            _ => {}
        }

        let Some(len) = bytes.get(pos + 2..pos + 4) else {
            break;
        };
        let len = u16::from_be_bytes([len[0], len[1]]) as usize;
        let end = (pos + 2 + len).min(bytes.len());

        if marker == APP13
            && let Some(iim) = bytes.get(pos + 4..end).and_then(iim_from_8bim)
        {
            return Ok(Some(iim));
        }
        pos = pos + 2 + len;
    }

    Ok(None)
}

// ---------------------------------------------------------------------------
// TIFF
// ---------------------------------------------------------------------------

const TAG_IPTC_NAA: u16 = 33723;
const TAG_PHOTOSHOP: u16 = 34377;

#[derive(Clone, Copy)]
struct Tiff<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl<'a> Tiff<'a> {
    fn u16_at(self, at: usize) -> Option<u16> {
        let b: [u8; 2] = self.data.get(at..at + 2)?.try_into().ok()?;
        Some(if self.big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        })
    }

    fn u32_at(self, at: usize) -> Option<u32> {
        let b: [u8; 4] = self.data.get(at..at + 4)?.try_into().ok()?;
        Some(if self.big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    }

    /// Value bytes of an IFD entry whose data lives at an offset.
    fn entry_value(self, entry: usize) -> Option<&'a [u8]> {
        let unit = match self.u16_at(entry + 2)? {
            3 | 8 => 2,
            4 | 9 | 11 => 4,
            5 | 10 | 12 => 8,
            _ => 1,
        };
        let len = self.u32_at(entry + 4)? as usize * unit;
        let offset = self.u32_at(entry + 8)? as usize;
        self.data.get(offset..offset + len)
    }
}

fn tiff_iim(bytes: &[u8]) -> Result<Option<&[u8]>, IptcError> {
    let big_endian = match bytes.get(0..2) {
        Some(b"MM") => true,
        Some(b"II") => false,
        _ => return Err(IptcError::NotTiff),
    };
    let tiff = Tiff {
        data: bytes,
        big_endian,
    };
    if tiff.u16_at(2) != Some(42) {
        return Err(IptcError::NotTiff);
    }

    let mut ifd = tiff.u32_at(4).unwrap_or(0) as usize;
    // Bounded so a looping IFD chain cannot spin forever.
    for _ in 0..64 {
        if ifd == 0 {
            break;
        }
        let Some(count) = tiff.u16_at(ifd) else {
            break;
        };
        for i in 0..count as usize {
            let entry = ifd + 2 + i * 12;
            let found = match tiff.u16_at(entry) {
                Some(TAG_IPTC_NAA) => tiff.entry_value(entry),
                Some(TAG_PHOTOSHOP) => tiff.entry_value(entry).and_then(iim_from_8bim),
                Some(_) => None,
                None => break,
            };
            if let Some(iim) = found {
                return Ok(Some(iim));
            }
        }
        ifd = tiff.u32_at(ifd + 2 + count as usize * 12).unwrap_or(0) as usize;
    }

    Ok(None)
}
