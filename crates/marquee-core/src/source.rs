//! Source type resolution
//!
//! Maps a source URL plus an optional caller hint to the delivery protocol
//! the session should attach. The hint always wins; otherwise the file
//! extension decides, and anything unrecognized falls back to
//! [`StreamType::Other`].

use crate::types::{StreamHint, StreamType};
use url::Url;

/// Resolve the stream type for a source
///
/// Extension matching is case-insensitive and ignores query string and
/// fragment. Relative or schemeless sources are handled the same way as
/// absolute URLs.
pub fn resolve_stream_type(hint: Option<StreamHint>, src: &str) -> StreamType {
    if let Some(hint) = hint {
        return match hint {
            StreamHint::Hls => StreamType::Hls,
            StreamHint::Dash => StreamType::Dash,
            StreamHint::Mp4 => StreamType::Mp4,
            // Embedded players manage their own delivery
            StreamHint::Youtube | StreamHint::Other => StreamType::Other,
        };
    }

    match extension_of(src).as_deref() {
        Some("m3u8") | Some("m3u") => StreamType::Hls,
        Some("mpd") => StreamType::Dash,
        Some("mp4") | Some("m4v") => StreamType::Mp4,
        _ => StreamType::Other,
    }
}

/// Lowercased file extension of a source, with query and fragment stripped
fn extension_of(src: &str) -> Option<String> {
    // Absolute URLs get the robust treatment; bare paths are trimmed by hand.
    let path = match Url::parse(src) {
        Ok(url) => url.path().to_string(),
        Err(_) => {
            let trimmed = src.split(|c| c == '?' || c == '#').next().unwrap_or(src);
            trimmed.to_string()
        }
    };

    let file = path.rsplit('/').next().unwrap_or(&path);
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
