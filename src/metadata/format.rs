use std::fmt;

use super::MetadataChannel;
use super::gif::GifComment;
use super::jpeg::JpegUserComment;
use super::png::PngText;

/// Container format of an image file, detected from its leading bytes.
///
/// The file extension is never consulted: a PNG saved as `foo.jpg` is
/// still handled as PNG.
///
/// # Example
///
/// ```rust
/// use pixiv_download_helper::metadata::ImageFormat;
///
/// let format = ImageFormat::detect(b"GIF89a\x01\x00\x01\x00\x00\x00\x00;");
/// assert_eq!(format, ImageFormat::Gif);
/// assert!(format.is_supported());
///
/// let format = ImageFormat::detect(b"plain text");
/// assert!(!format.is_supported());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageFormat {
    /// PNG: metadata in an `iTXt` text chunk
    Png,
    /// JPEG: metadata in the EXIF UserComment field
    Jpeg,
    /// GIF: metadata in a comment extension block
    Gif,
    /// Anything else (WebP, BMP, unrecognized bytes, ...): no metadata channel
    Other(String),
}

impl ImageFormat {
    /// Detect the container format from the file contents.
    pub fn detect(bytes: &[u8]) -> Self {
        match image::guess_format(bytes) {
            Ok(image::ImageFormat::Png) => Self::Png,
            Ok(image::ImageFormat::Jpeg) => Self::Jpeg,
            Ok(image::ImageFormat::Gif) => Self::Gif,
            Ok(other) => Self::Other(format!("{other:?}").to_uppercase()),
            Err(_) => Self::Other("unknown".to_string()),
        }
    }

    /// Whether metadata can be embedded into and read from this format.
    pub fn is_supported(&self) -> bool {
        self.channel().is_some()
    }

    /// The metadata channel used for this format, if there is one.
    pub(crate) fn channel(&self) -> Option<&'static dyn MetadataChannel> {
        match self {
            Self::Png => Some(&PngText),
            Self::Jpeg => Some(&JpegUserComment),
            Self::Gif => Some(&GifComment),
            Self::Other(_) => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Png => f.write_str("PNG"),
            Self::Jpeg => f.write_str("JPEG"),
            Self::Gif => f.write_str("GIF"),
            Self::Other(name) => f.write_str(name),
        }
    }
}
