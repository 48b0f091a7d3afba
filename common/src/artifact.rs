use serde::{Deserialize, Serialize};

use crate::state::{CaptureMode, FilterKind};

/// Kind of file a capture produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Photo,
    Collage,
    Animation,
}

impl ArtifactKind {
    pub fn for_mode(mode: CaptureMode) -> Self {
        match mode {
            CaptureMode::Single => ArtifactKind::Photo,
            CaptureMode::Burst => ArtifactKind::Collage,
            CaptureMode::Gif => ArtifactKind::Animation,
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            ArtifactKind::Photo => "photo",
            ArtifactKind::Collage => "burst",
            ArtifactKind::Animation => "gif",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Photo | ArtifactKind::Collage => "jpg",
            ArtifactKind::Animation => "gif",
        }
    }

    /// `<prefix>_<unix-seconds>_<8-hex-id>.<ext>`
    pub fn filename(self, unix_secs: i64) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}_{}.{}",
            self.prefix(),
            unix_secs,
            &id[..8],
            self.extension()
        )
    }
}

/// Metadata stored next to every uploaded artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub mode: CaptureMode,
    pub filter: FilterKind,
}

/// Capture time encoded in an artifact filename, in Unix seconds.
///
/// Accepts any `<prefix>_<digits>_...` name so objects written by older
/// booth revisions are recognised too.
pub fn timestamp_from_filename(name: &str) -> Option<i64> {
    let base = name.rsplit('/').next()?;
    let mut parts = base.split('_');
    parts.next()?;
    let digits = parts.next()?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// MIME type chosen from the file extension. Unknown extensions are sent as
/// JPEG, which is what the booth produces by default.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}

/// Whether a filename looks like a booth image.
pub fn is_image_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    [".jpg", ".jpeg", ".png", ".gif"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_shape() {
        let name = ArtifactKind::Photo.filename(1708300000);
        assert!(name.starts_with("photo_1708300000_"));
        assert!(name.ends_with(".jpg"));
        let id = name
            .trim_start_matches("photo_1708300000_")
            .trim_end_matches(".jpg");
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn filenames_are_unique_within_a_second() {
        let a = ArtifactKind::Collage.filename(10);
        let b = ArtifactKind::Collage.filename(10);
        assert_ne!(a, b);
    }

    #[test]
    fn gif_mode_uses_gif_extension() {
        let kind = ArtifactKind::for_mode(CaptureMode::Gif);
        assert!(kind.filename(1).ends_with(".gif"));
        assert_eq!(ArtifactKind::for_mode(CaptureMode::Burst).prefix(), "burst");
    }

    #[test]
    fn timestamp_parsed_from_name() {
        assert_eq!(timestamp_from_filename("photo_1708300000_ab12cd34.jpg"), Some(1708300000));
        assert_eq!(timestamp_from_filename("gif_42_deadbeef.gif"), Some(42));
        assert_eq!(timestamp_from_filename("uploads/burst_7_x.jpg"), Some(7));
        assert_eq!(timestamp_from_filename("snapshot.jpg"), None);
        assert_eq!(timestamp_from_filename("photo_abc_1.jpg"), None);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("a.jpg"), "image/jpeg");
        assert_eq!(content_type_for("a.JPEG"), "image/jpeg");
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("a.gif"), "image/gif");
        assert_eq!(content_type_for("noext"), "image/jpeg");
    }

    #[test]
    fn image_names() {
        assert!(is_image_name("x.GIF"));
        assert!(!is_image_name("notes.txt"));
    }
}
