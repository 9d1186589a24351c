//! Minimal EXIF orientation reader for JPEG files.
//!
//! Extracts a single field: Orientation (tag `0x0112`) from IFD0 of the
//! APP1 `Exif\0\0` segment. Only the first [`SCAN_LIMIT`] bytes are looked
//! at, so callers can hand over a whole file or just its prefix.
//!
//! Every offset is bounds-checked before it is read. Anything malformed,
//! truncated or unexpected resolves to `None`; the reader never panics.

use serde::{Deserialize, Serialize};

/// Only this many leading bytes are scanned for the EXIF segment.
pub const SCAN_LIMIT: usize = 64 * 1024;

const EXIF_HEADER: &[u8] = b"Exif\0\0";
const ORIENTATION_TAG: u16 = 0x0112;
const TYPE_SHORT: u16 = 3;

/// The eight EXIF orientations, normalized.
///
/// Names describe the transform needed to display the stored pixels upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrientationTag {
    #[default]
    Normal,
    FlipHorizontal,
    Rotate180,
    FlipVertical,
    /// Mirror horizontally, then rotate 270° clockwise (EXIF 5).
    Transpose,
    Rotate90Cw,
    /// Mirror horizontally, then rotate 90° clockwise (EXIF 7).
    Transverse,
    Rotate270Cw,
}

impl OrientationTag {
    pub fn from_exif(code: u16) -> Option<Self> {
        Some(match code {
            1 => OrientationTag::Normal,
            2 => OrientationTag::FlipHorizontal,
            3 => OrientationTag::Rotate180,
            4 => OrientationTag::FlipVertical,
            5 => OrientationTag::Transpose,
            6 => OrientationTag::Rotate90Cw,
            7 => OrientationTag::Transverse,
            8 => OrientationTag::Rotate270Cw,
            _ => return None,
        })
    }

    pub fn exif_code(self) -> u8 {
        match self {
            OrientationTag::Normal => 1,
            OrientationTag::FlipHorizontal => 2,
            OrientationTag::Rotate180 => 3,
            OrientationTag::FlipVertical => 4,
            OrientationTag::Transpose => 5,
            OrientationTag::Rotate90Cw => 6,
            OrientationTag::Transverse => 7,
            OrientationTag::Rotate270Cw => 8,
        }
    }

    /// True for the four orientations that turn the image on its side.
    pub fn swaps_dimensions(self) -> bool {
        matches!(
            self,
            OrientationTag::Transpose
                | OrientationTag::Rotate90Cw
                | OrientationTag::Transverse
                | OrientationTag::Rotate270Cw
        )
    }

    pub fn is_identity(self) -> bool {
        self == OrientationTag::Normal
    }

    /// The matching transform in the `image` crate.
    pub fn to_image_orientation(self) -> image::metadata::Orientation {
        use image::metadata::Orientation;
        match self {
            OrientationTag::Normal => Orientation::NoTransforms,
            OrientationTag::FlipHorizontal => Orientation::FlipHorizontal,
            OrientationTag::Rotate180 => Orientation::Rotate180,
            OrientationTag::FlipVertical => Orientation::FlipVertical,
            OrientationTag::Transpose => Orientation::Rotate90FlipH,
            OrientationTag::Rotate90Cw => Orientation::Rotate90,
            OrientationTag::Transverse => Orientation::Rotate270FlipH,
            OrientationTag::Rotate270Cw => Orientation::Rotate270,
        }
    }
}

/// Read the EXIF orientation from the start of a JPEG byte stream.
///
/// Returns `None` when the input is not a JPEG, carries no EXIF block, has
/// no orientation entry, or any structure on the way is malformed.
pub fn read_orientation(bytes: &[u8]) -> Option<OrientationTag> {
    let data = &bytes[..bytes.len().min(SCAN_LIMIT)];
    let tiff = find_exif_payload(data)?;
    let code = read_orientation_from_tiff(tiff)?;
    OrientationTag::from_exif(code)
}

// ---------------------------------------------------------------------------
// JPEG: locate APP1 / Exif
// ---------------------------------------------------------------------------

/// Walk JPEG segment markers until the APP1 segment holding EXIF data.
///
/// Returns the TIFF structure that follows the `Exif\0\0` header.
fn find_exif_payload(data: &[u8]) -> Option<&[u8]> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != 0xD8 {
        return None;
    }

    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];

        // Fill bytes between segments
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        // SOS starts entropy-coded data, EOI ends the image: no EXIF past here
        if marker == 0xDA || marker == 0xD9 {
            return None;
        }
        // Markers without a length field
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }

        if pos + 4 > data.len() {
            return None;
        }
        let seg_len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if seg_len < 2 {
            return None;
        }
        let seg_start = pos + 4;
        let seg_end = pos + 2 + seg_len;

        if marker == 0xE1 {
            // A segment cut off by the scan limit still gets a chance: the
            // orientation entry usually sits in the first few hundred bytes.
            let segment = &data[seg_start.min(data.len())..seg_end.min(data.len())];
            if let Some(tiff) = segment.strip_prefix(EXIF_HEADER) {
                return Some(tiff);
            }
        }

        pos = seg_end;
    }
    None
}

// ---------------------------------------------------------------------------
// TIFF: walk IFD0 for the orientation entry
// ---------------------------------------------------------------------------

/// Byte-order aware reads over the TIFF payload. All reads are checked.
struct TiffReader<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl<'a> TiffReader<'a> {
    fn new(data: &'a [u8]) -> Option<Self> {
        let big_endian = match data.get(0..2)? {
            b"MM" => true,
            b"II" => false,
            _ => return None,
        };
        let reader = Self { data, big_endian };
        if reader.u16_at(2)? != 42 {
            return None;
        }
        Some(reader)
    }

    fn u16_at(&self, offset: usize) -> Option<u16> {
        let b = self.data.get(offset..offset.checked_add(2)?)?;
        Some(if self.big_endian {
            u16::from_be_bytes([b[0], b[1]])
        } else {
            u16::from_le_bytes([b[0], b[1]])
        })
    }

    fn u32_at(&self, offset: usize) -> Option<u32> {
        let b = self.data.get(offset..offset.checked_add(4)?)?;
        Some(if self.big_endian {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        })
    }
}

/// IFD entry layout (12 bytes):
///   Bytes 0-1:  tag
///   Bytes 2-3:  field type (3 = SHORT)
///   Bytes 4-7:  value count
///   Bytes 8-11: value, left-justified when it fits in 4 bytes
fn read_orientation_from_tiff(tiff: &[u8]) -> Option<u16> {
    let reader = TiffReader::new(tiff)?;
    let ifd_offset = reader.u32_at(4)? as usize;
    let entry_count = reader.u16_at(ifd_offset)? as usize;
    let entries_start = ifd_offset.checked_add(2)?;

    for i in 0..entry_count {
        let entry = entries_start.checked_add(i.checked_mul(12)?)?;
        let tag = reader.u16_at(entry)?;
        if tag != ORIENTATION_TAG {
            continue;
        }
        let typ = reader.u16_at(entry + 2)?;
        let count = reader.u32_at(entry + 4)?;
        if typ != TYPE_SHORT || count < 1 {
            return None;
        }
        return reader.u16_at(entry + 8);
    }
    None
}
