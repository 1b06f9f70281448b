//! Maps declared image MIME types to canonical file extensions.

use crate::errors::{IngestError, IngestResult};

/// Extension used for image types outside the recognized table.
pub const UNKNOWN_EXTENSION: &str = "unknown";

/// Image formats with a canonical extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
    Tiff,
    Svg,
}

const KINDS: [(&str, ImageKind); 7] = [
    ("image/jpeg", ImageKind::Jpeg),
    ("image/png", ImageKind::Png),
    ("image/gif", ImageKind::Gif),
    ("image/webp", ImageKind::Webp),
    ("image/bmp", ImageKind::Bmp),
    ("image/tiff", ImageKind::Tiff),
    ("image/svg+xml", ImageKind::Svg),
];

impl ImageKind {
    /// Look up a MIME type, ignoring parameters and case.
    pub fn from_mime(content_type: &str) -> Option<Self> {
        let essence = mime_essence(content_type);
        KINDS
            .iter()
            .find(|(mime, _)| mime.eq_ignore_ascii_case(essence))
            .map(|(_, kind)| *kind)
    }

    /// Reverse lookup from a stored object's extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        KINDS
            .iter()
            .map(|(_, kind)| *kind)
            .find(|kind| kind.extension().eq_ignore_ascii_case(ext))
    }

    pub fn mime(self) -> &'static str {
        KINDS
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(mime, _)| *mime)
            .unwrap_or("application/octet-stream")
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
            ImageKind::Webp => "webp",
            ImageKind::Bmp => "bmp",
            ImageKind::Tiff => "tiff",
            ImageKind::Svg => "svg",
        }
    }
}

/// Extension for a declared content type.
///
/// A missing type is an input error. Present but unrecognized types map to
/// [`UNKNOWN_EXTENSION`]; whether the type is an image at all is checked
/// before this is called.
pub fn extension_for(content_type: Option<&str>) -> IngestResult<&'static str> {
    let content_type = content_type
        .ok_or_else(|| IngestError::InvalidInput("Missing content type".into()))?;
    Ok(ImageKind::from_mime(content_type)
        .map(ImageKind::extension)
        .unwrap_or(UNKNOWN_EXTENSION))
}

/// True when the MIME type is in the `image/` top-level type.
pub fn is_image(content_type: &str) -> bool {
    let essence = mime_essence(content_type);
    essence.len() > "image/".len()
        && essence
            .get(.."image/".len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
}

/// `type/subtype` with any `; param=value` suffix and whitespace removed.
fn mime_essence(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_recognized_types() {
        assert_eq!(extension_for(Some("image/png")).unwrap(), "png");
        assert_eq!(extension_for(Some("image/jpeg")).unwrap(), "jpg");
        assert_eq!(extension_for(Some("image/svg+xml")).unwrap(), "svg");
        assert_eq!(extension_for(Some("image/tiff")).unwrap(), "tiff");
    }

    #[test]
    fn ignores_parameters_and_case() {
        assert_eq!(extension_for(Some("Image/PNG; charset=binary")).unwrap(), "png");
    }

    #[test]
    fn unknown_image_type_degrades_to_sentinel() {
        assert_eq!(extension_for(Some("image/xyz")).unwrap(), UNKNOWN_EXTENSION);
    }

    #[test]
    fn missing_type_is_invalid_input() {
        assert!(matches!(
            extension_for(None),
            Err(IngestError::InvalidInput(_))
        ));
    }

    #[test]
    fn extension_round_trips_to_mime() {
        assert_eq!(ImageKind::from_extension("jpg").map(ImageKind::mime), Some("image/jpeg"));
        assert_eq!(ImageKind::from_extension("SVG").map(ImageKind::mime), Some("image/svg+xml"));
        assert_eq!(ImageKind::from_extension(UNKNOWN_EXTENSION), None);
    }

    #[test]
    fn image_prefix_check() {
        assert!(is_image("image/png"));
        assert!(is_image("IMAGE/webp; q=1"));
        assert!(!is_image("text/html"));
        assert!(!is_image("image/"));
        assert!(!is_image(""));
    }
}
