//! Filename-based media type guessing.
//!
//! ComfyUI and the host storage both want a MIME type alongside raw
//! bytes; neither side sniffs content, so the extension decides.

/// Fallback MIME type for uploads to ComfyUI's image endpoint.
pub const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Fallback MIME type when nothing better is known.
pub const DEFAULT_MIME: &str = "application/octet-stream";

const MIME_BY_EXTENSION: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("webp", "image/webp"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("mp4", "video/mp4"),
    ("avi", "video/x-msvideo"),
    ("mov", "video/quicktime"),
    ("mkv", "video/x-matroska"),
    ("webm", "video/webm"),
];

/// Broad media category, which selects the ComfyUI upload endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify a filename. Anything that is not a known video
    /// extension is treated as an image.
    pub fn from_filename(filename: &str) -> Self {
        match mime_for_extension(filename) {
            Some(mime) if mime.starts_with("video/") => Self::Video,
            _ => Self::Image,
        }
    }

    /// Multipart field name and endpoint suffix ComfyUI expects.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

/// Guess the MIME type of `filename`, falling back to `default`.
pub fn guess_mime_type<'a>(filename: &str, default: &'a str) -> &'a str {
    match mime_for_extension(filename) {
        Some(mime) => mime,
        None => default,
    }
}

fn mime_for_extension(filename: &str) -> Option<&'static str> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    MIME_BY_EXTENSION
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
}
