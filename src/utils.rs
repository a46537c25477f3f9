use std::path::Path;

/// Capture backend implied by a source identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `http(s)://` multipart or raw MJPEG stream
    MjpegHttp,
    /// Local `.mjpeg`/`.mjpg` file of concatenated JPEGs
    MjpegFile,
    /// Directory of still images
    ImageSequence,
    /// `/dev/videoN`
    Device,
    /// Anything else: RTSP, container files
    Uri,
}

impl SourceKind {
    pub fn classify(identifier: &str) -> Self {
        let lower = identifier.to_ascii_lowercase();

        if lower.starts_with("http://") || lower.starts_with("https://") {
            SourceKind::MjpegHttp
        } else if lower.starts_with("/dev/video") {
            SourceKind::Device
        } else if lower.contains("://") {
            SourceKind::Uri
        } else if Path::new(identifier).is_dir() {
            SourceKind::ImageSequence
        } else if lower.ends_with(".mjpeg") || lower.ends_with(".mjpg") {
            SourceKind::MjpegFile
        } else {
            SourceKind::Uri
        }
    }
}

/// Cut `text` to at most `max_chars` characters, on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
