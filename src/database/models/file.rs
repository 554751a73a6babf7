//! File database model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::storage::Zone;

/// Output artifacts expire this long after creation.
pub const OUTPUT_TTL_HOURS: i64 = 24;

/// Coarse media classification derived from the file extension.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
    Image,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Image => "image",
        }
    }
}

/// File database model.
#[derive(Debug, Clone, FromRow)]
pub struct FileDbModel {
    pub id: String,
    /// NULL for anonymous-owned files.
    pub owner_id: Option<String>,
    pub original_name: String,
    pub storage_path: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub zone: String,
    pub media_type: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl FileDbModel {
    /// Create an output-zone artifact row with the default 24h expiry.
    pub fn new_output(
        id: impl Into<String>,
        owner_id: Option<String>,
        original_name: impl Into<String>,
        storage_path: impl Into<String>,
        size_bytes: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let original_name = original_name.into();
        let (mime_type, media_type) = detect_mime_type(&original_name);
        Self {
            id: id.into(),
            owner_id,
            original_name,
            storage_path: storage_path.into(),
            mime_type: mime_type.to_string(),
            size_bytes,
            zone: Zone::Output.as_str().to_string(),
            media_type: Some(media_type.as_str().to_string()),
            expires_at: Some(now + Duration::hours(OUTPUT_TTL_HOURS)),
            created_at: now,
        }
    }
}

/// Map a filename extension to (mime type, media type).
pub fn detect_mime_type(name: &str) -> (&'static str, MediaType) {
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        // Video formats
        "mp4" => ("video/mp4", MediaType::Video),
        "mov" => ("video/quicktime", MediaType::Video),
        "avi" => ("video/x-msvideo", MediaType::Video),
        "mkv" => ("video/x-matroska", MediaType::Video),
        "webm" => ("video/webm", MediaType::Video),
        "flv" => ("video/x-flv", MediaType::Video),
        "wmv" => ("video/x-ms-wmv", MediaType::Video),
        "m4v" => ("video/x-m4v", MediaType::Video),
        "mpg" | "mpeg" => ("video/mpeg", MediaType::Video),
        "3gp" => ("video/3gpp", MediaType::Video),
        "ogv" => ("video/ogg", MediaType::Video),

        // Audio formats
        "mp3" => ("audio/mpeg", MediaType::Audio),
        "wav" => ("audio/wav", MediaType::Audio),
        "aac" => ("audio/aac", MediaType::Audio),
        "ogg" | "oga" => ("audio/ogg", MediaType::Audio),
        "flac" => ("audio/flac", MediaType::Audio),
        "m4a" => ("audio/mp4", MediaType::Audio),
        "wma" => ("audio/x-ms-wma", MediaType::Audio),
        "opus" => ("audio/opus", MediaType::Audio),
        "amr" => ("audio/amr", MediaType::Audio),
        "aiff" | "aif" => ("audio/aiff", MediaType::Audio),

        // Image formats (thumbnails, GIFs)
        "gif" => ("image/gif", MediaType::Image),
        "jpg" | "jpeg" => ("image/jpeg", MediaType::Image),
        "png" => ("image/png", MediaType::Image),
        "webp" => ("image/webp", MediaType::Image),
        "bmp" => ("image/bmp", MediaType::Image),

        _ => ("application/octet-stream", MediaType::Video),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_mime_type() {
        assert_eq!(detect_mime_type("a.mp4"), ("video/mp4", MediaType::Video));
        assert_eq!(detect_mime_type("a.MP3"), ("audio/mpeg", MediaType::Audio));
        assert_eq!(detect_mime_type("a.gif"), ("image/gif", MediaType::Image));
        assert_eq!(
            detect_mime_type("no-extension"),
            ("application/octet-stream", MediaType::Video)
        );
    }

    #[test]
    fn test_output_file_gets_expiry() {
        let now = Utc::now();
        let file = FileDbModel::new_output("job-1", None, "job-1.mp4", "/out/job-1.mp4", 1024, now);
        assert_eq!(file.zone, "output");
        assert_eq!(file.expires_at, Some(now + Duration::hours(24)));
        assert_eq!(file.media_type.as_deref(), Some("video"));
    }
}
