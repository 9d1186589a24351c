//! Caller-facing input types.
//!
//! An [`ImageAsset`] is the in-memory equivalent of a file picked in an upload
//! form: raw bytes plus the name, declared MIME type, size and (optionally)
//! last-modified time the browser reported. Assets are immutable once built;
//! every operation that produces new bytes returns a fresh asset.
//!
//! [`ImageType`] is the closed set of input encodings the engine recognises,
//! together with their magic byte signatures.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Input encodings recognised by signature sniffing and the type allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Jpeg,
    Png,
    WebP,
    Avif,
    Gif,
}

impl ImageType {
    pub const ALL: [ImageType; 5] = [
        ImageType::Jpeg,
        ImageType::Png,
        ImageType::WebP,
        ImageType::Avif,
        ImageType::Gif,
    ];

    pub fn mime(self) -> &'static str {
        match self {
            ImageType::Jpeg => "image/jpeg",
            ImageType::Png => "image/png",
            ImageType::WebP => "image/webp",
            ImageType::Avif => "image/avif",
            ImageType::Gif => "image/gif",
        }
    }

    /// Parse a MIME type. Accepts the common `image/jpg` alias and ignores
    /// parameters and case.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageType::Jpeg),
            "image/png" => Some(ImageType::Png),
            "image/webp" => Some(ImageType::WebP),
            "image/avif" => Some(ImageType::Avif),
            "image/gif" => Some(ImageType::Gif),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageType::Jpeg),
            "png" => Some(ImageType::Png),
            "webp" => Some(ImageType::WebP),
            "avif" => Some(ImageType::Avif),
            "gif" => Some(ImageType::Gif),
            _ => None,
        }
    }

    /// Identify the encoding from the leading bytes.
    ///
    /// | Type | Signature |
    /// |---|---|
    /// | JPEG | `FF D8 FF` |
    /// | PNG | `89 50 4E 47 0D 0A 1A 0A` |
    /// | WebP | `RIFF` ....`WEBP` |
    /// | AVIF | ....`ftypavif` / `ftypavis` |
    /// | GIF | `GIF87a` / `GIF89a` |
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(ImageType::Jpeg);
        }
        if bytes.starts_with(PNG) {
            return Some(ImageType::Png);
        }
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            return Some(ImageType::WebP);
        }
        if bytes.len() >= 12
            && &bytes[4..8] == b"ftyp"
            && (&bytes[8..12] == b"avif" || &bytes[8..12] == b"avis")
        {
            return Some(ImageType::Avif);
        }
        if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            return Some(ImageType::Gif);
        }
        None
    }
}

impl std::fmt::Display for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime())
    }
}

/// An immutable image payload supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    bytes: Vec<u8>,
    name: String,
    declared_type: String,
    size: u64,
    last_modified: Option<SystemTime>,
}

impl ImageAsset {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        let size = bytes.len() as u64;
        Self {
            bytes,
            name: name.into(),
            declared_type: declared_type.into(),
            size,
            last_modified: None,
        }
    }

    pub fn with_last_modified(mut self, modified: SystemTime) -> Self {
        self.last_modified = Some(modified);
        self
    }

    /// Read a file from disk, deriving the declared type from its extension
    /// the way a browser file picker would.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let declared = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ImageType::from_extension)
            .map(|t| t.mime())
            .unwrap_or("application/octet-stream");
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();

        let asset = Self::new(name, declared, bytes);
        Ok(match modified {
            Some(m) => asset.with_last_modified(m),
            None => asset,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_type(&self) -> &str {
        &self.declared_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        self.last_modified
    }

    /// Milliseconds since the epoch, `0` when unknown.
    pub fn last_modified_millis(&self) -> u64 {
        self.last_modified
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// The declared type parsed into a known [`ImageType`].
    pub fn declared_image_type(&self) -> Option<ImageType> {
        ImageType::from_mime(&self.declared_type)
    }

    /// The type indicated by the byte signature.
    pub fn sniffed_type(&self) -> Option<ImageType> {
        ImageType::sniff(&self.bytes)
    }

    /// File stem without extension, used when renaming converted outputs.
    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(0) | None => &self.name,
            Some(idx) => &self.name[..idx],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_known_signatures() {
        assert_eq!(ImageType::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageType::Jpeg));
        assert_eq!(
            ImageType::sniff(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0]),
            Some(ImageType::Png)
        );
        assert_eq!(ImageType::sniff(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageType::WebP));
        assert_eq!(ImageType::sniff(b"\0\0\0\x1cftypavif\0\0"), Some(ImageType::Avif));
        assert_eq!(ImageType::sniff(b"GIF89a......"), Some(ImageType::Gif));
    }

    #[test]
    fn sniff_rejects_short_or_unknown() {
        assert_eq!(ImageType::sniff(&[]), None);
        assert_eq!(ImageType::sniff(&[0xFF, 0xD8]), None);
        assert_eq!(ImageType::sniff(b"RIFF\0\0\0\0WAVE"), None);
        assert_eq!(ImageType::sniff(b"hello world!"), None);
    }

    #[test]
    fn mime_parsing_is_lenient() {
        assert_eq!(ImageType::from_mime("IMAGE/JPEG"), Some(ImageType::Jpeg));
        assert_eq!(ImageType::from_mime("image/jpg"), Some(ImageType::Jpeg));
        assert_eq!(ImageType::from_mime("image/png; charset=binary"), Some(ImageType::Png));
        assert_eq!(ImageType::from_mime("text/plain"), None);
    }

    #[test]
    fn asset_size_tracks_bytes() {
        let asset = ImageAsset::new("a.jpg", "image/jpeg", vec![1, 2, 3]);
        assert_eq!(asset.size(), 3);
        assert_eq!(asset.stem(), "a");
        assert_eq!(asset.last_modified_millis(), 0);
    }

    #[test]
    fn stem_handles_dotfiles_and_no_extension() {
        assert_eq!(ImageAsset::new(".hidden", "", vec![]).stem(), ".hidden");
        assert_eq!(ImageAsset::new("photo", "", vec![]).stem(), "photo");
        assert_eq!(ImageAsset::new("a.b.png", "", vec![]).stem(), "a.b");
    }

    #[test]
    fn from_path_uses_extension_for_declared_type() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("shot.PNG");
        std::fs::write(&path, b"not really a png").unwrap();

        let asset = ImageAsset::from_path(&path).unwrap();
        assert_eq!(asset.name(), "shot.PNG");
        assert_eq!(asset.declared_type(), "image/png");
        assert!(asset.last_modified().is_some());
    }
}
