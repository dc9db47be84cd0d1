//! Embedding illustration metadata into image files, and reading it back.
//!
//! Each supported container has its own channel for the payload:
//!
//! | Format | Channel |
//! |--------|---------|
//! | PNG | `iTXt` chunk with keyword `metadata` (UTF-8) |
//! | JPEG | EXIF UserComment (`0x9286`), `UNICODE` character code, UTF-16BE |
//! | GIF | Comment extension (`0x21 0xFE`), UTF-8 |
//!
//! The payload is always the canonical JSON form of an
//! [`IllustrationRecord`]. Embedding replaces any previous payload, it never
//! appends. Other formats are reported as [`EmbedOutcome::Unsupported`] and
//! left untouched.

mod format;
mod gif;
mod jpeg;
mod png;

use anyhow::{Context, Result};
use std::path::Path;

use crate::record::IllustrationRecord;

pub use format::ImageFormat;

/// Keyword of the PNG text chunk holding the payload.
pub const METADATA_KEY: &str = "metadata";

/// A format-specific place to store the canonical payload inside an image.
///
/// Implementations work on whole-file byte buffers: `embed` returns the
/// complete rewritten file, `extract` returns `Ok(None)` when the channel is
/// simply absent and `Err` when it is present but undecodable.
pub(crate) trait MetadataChannel: Sync {
    fn embed(&self, image: &[u8], payload: &str) -> Result<Vec<u8>>;
    fn extract(&self, image: &[u8]) -> Result<Option<String>>;
}

/// What [`embed_metadata`] did with a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedOutcome {
    /// The payload was written through the format's channel.
    Embedded(ImageFormat),
    /// The format has no metadata channel; the file was not modified.
    Unsupported(ImageFormat),
}

/// Embed `record` into the image at `path`, overwriting the file in place.
///
/// The write is not atomic. Unsupported formats are logged and skipped;
/// errors are returned only for I/O failures or a container that claims a
/// supported format but cannot be parsed.
///
/// # Example
///
/// ```rust,no_run
/// use pixiv_download_helper::metadata::{embed_metadata, read_record};
/// use pixiv_download_helper::record::IllustrationRecord;
/// use std::path::Path;
///
/// # fn example(record: &IllustrationRecord) -> anyhow::Result<()> {
/// let path = Path::new("data/images/12345_p0.png");
/// embed_metadata(path, record)?;
/// assert_eq!(read_record(path).as_ref(), Some(record));
/// # Ok(())
/// # }
/// ```
pub fn embed_metadata(path: &Path, record: &IllustrationRecord) -> Result<EmbedOutcome> {
    let name = display_name(path);
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read image file {}", path.display()))?;

    let format = ImageFormat::detect(&bytes);
    let Some(channel) = format.channel() else {
        log::info!("Metadata embedding not supported for format {format}: {name}");
        return Ok(EmbedOutcome::Unsupported(format));
    };

    let payload = record.to_canonical()?;
    let output = channel
        .embed(&bytes, &payload)
        .with_context(|| format!("Failed to embed metadata into {format} file {name}"))?;

    std::fs::write(path, &output)
        .with_context(|| format!("Failed to write image file {}", path.display()))?;

    log::info!("Embedded metadata into {format}: {name}");
    Ok(EmbedOutcome::Embedded(format))
}

/// Read the embedded payload from `path` as loosely-typed JSON.
///
/// Best effort: a missing file, unsupported format, absent channel, or
/// undecodable payload all yield `None` (with a log line), never an error.
pub fn read_metadata(path: &Path) -> Option<serde_json::Value> {
    if !path.exists() {
        log::warn!("Image file not found at {}", path.display());
        return None;
    }

    let name = display_name(path);
    match try_read_metadata(path) {
        Ok(Some(value)) => Some(value),
        Ok(None) => {
            log::info!("No '{METADATA_KEY}' found in {name}");
            None
        }
        Err(e) => {
            log::warn!("Failed to read metadata from {name}: {e:#}");
            None
        }
    }
}

/// Read the embedded payload from `path` as an [`IllustrationRecord`].
///
/// Like [`read_metadata`], but also `None` when the payload is valid JSON of
/// some other shape.
pub fn read_record(path: &Path) -> Option<IllustrationRecord> {
    let value = read_metadata(path)?;
    match IllustrationRecord::from_value(value) {
        Ok(record) => Some(record),
        Err(e) => {
            log::warn!("{}: {e:#}", display_name(path));
            None
        }
    }
}

fn try_read_metadata(path: &Path) -> Result<Option<serde_json::Value>> {
    let bytes = std::fs::read(path).context("Failed to read image file")?;
    let format = ImageFormat::detect(&bytes);
    let Some(channel) = format.channel() else {
        log::debug!("No metadata channel for format {format}");
        return Ok(None);
    };

    match channel.extract(&bytes)? {
        Some(text) if !text.is_empty() => {
            let value = serde_json::from_str(&text).context("Embedded metadata is not valid JSON")?;
            Ok(Some(value))
        }
        _ => Ok(None),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
