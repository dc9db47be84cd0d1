use anyhow::{Context, Result};
use img_parts::jpeg::Jpeg;
use img_parts::{Bytes, ImageEXIF};
use little_exif::exif_tag::ExifTag;
use little_exif::filetype::FileExtension;
use little_exif::metadata::Metadata;
use std::io::Write;
use std::sync::Mutex;
use tempfile::NamedTempFile;

use super::MetadataChannel;

const TAG_EXIF_IFD_POINTER: u16 = 0x8769;
const TAG_USER_COMMENT: u16 = 0x9286;

// UserComment character-code prefixes (8 bytes each)
const CODE_UNICODE: &[u8; 8] = b"UNICODE\0";
const CODE_ASCII: &[u8; 8] = b"ASCII\0\0\0";
const CODE_JIS: &[u8; 8] = b"JIS\0\0\0\0\0";
const CODE_UNDEFINED: &[u8; 8] = &[0; 8];

// little_exif as_u8_vec(JPEG) returns: [APP1 marker 2B][length 2B][Exif\0\0 6B][TIFF data]
// img-parts set_exif() expects just the TIFF data (after Exif\0\0)
const JPEG_EXIF_OVERHEAD: usize = 10;

/// EXIF UserComment channel.
///
/// Existing EXIF tags are carried over when `little_exif` can parse them;
/// otherwise the block is rebuilt from an empty skeleton.
pub(crate) struct JpegUserComment;

impl MetadataChannel for JpegUserComment {
    fn embed(&self, image: &[u8], payload: &str) -> Result<Vec<u8>> {
        let mut jpeg = parse(image)?;

        let mut metadata = match jpeg.exif() {
            Some(_) => load_existing_metadata(image).unwrap_or_else(|| {
                log::debug!("Existing EXIF is unreadable, starting from an empty block");
                Metadata::new()
            }),
            None => Metadata::new(),
        };
        metadata.set_tag(ExifTag::UserComment(encode_user_comment(payload)));

        let exif_bytes = metadata.as_u8_vec(FileExtension::JPEG);
        if exif_bytes.len() > JPEG_EXIF_OVERHEAD {
            jpeg.set_exif(Some(Bytes::copy_from_slice(&exif_bytes[JPEG_EXIF_OVERHEAD..])));
        } else {
            log::warn!("EXIF encoding came out empty, saving without an EXIF block");
            jpeg.set_exif(None);
        }

        Ok(jpeg.encoder().bytes().to_vec())
    }

    fn extract(&self, image: &[u8]) -> Result<Option<String>> {
        let jpeg = parse(image)?;
        let Some(tiff) = jpeg.exif() else {
            return Ok(None);
        };

        match find_user_comment(&tiff)? {
            Some(raw) => decode_user_comment(raw).map(Some),
            None => Ok(None),
        }
    }
}

fn parse(image: &[u8]) -> Result<Jpeg> {
    Jpeg::from_bytes(Bytes::copy_from_slice(image))
        .map_err(|e| anyhow::anyhow!("Failed to parse JPEG: {e}"))
}

/// Serializes panic-hook swaps; the hook is process-wide.
static PANIC_HOOK_LOCK: Mutex<()> = Mutex::new(());

/// Load the existing EXIF block with little_exif.
/// Returns None if it is missing, empty, or can't be parsed.
///
/// little_exif only loads from a path and picks the container from the
/// extension, so the bytes are staged in a scratch `.jpg` file first.
fn load_existing_metadata(image: &[u8]) -> Option<Metadata> {
    let scratch = match stage_scratch_copy(image) {
        Ok(file) => file,
        Err(e) => {
            log::debug!("Could not stage JPEG for EXIF parsing: {e:#}");
            return None;
        }
    };
    let path_owned = scratch.path().to_path_buf();

    let result = {
        let _guard = PANIC_HOOK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // Suppress panics from little_exif on malformed blocks
        let prev_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        let result = std::panic::catch_unwind(move || Metadata::new_from_path(&path_owned));
        std::panic::set_hook(prev_hook);
        result
    };

    match result {
        Ok(Ok(m)) => {
            if m.data().is_empty() {
                log::debug!("little_exif loaded empty metadata");
                None
            } else {
                log::debug!("little_exif loaded {} existing EXIF tags", m.data().len());
                Some(m)
            }
        }
        Ok(Err(e)) => {
            log::debug!("little_exif could not parse EXIF: {e}");
            None
        }
        Err(_) => {
            log::debug!("little_exif panicked parsing EXIF");
            None
        }
    }
}

fn stage_scratch_copy(image: &[u8]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("pixiv-exif-")
        .suffix(".jpg")
        .tempfile()
        .context("Failed to create scratch file")?;
    file.write_all(image).context("Failed to write scratch file")?;
    file.flush().context("Failed to flush scratch file")?;
    Ok(file)
}

/// Encode text as a `UNICODE` UserComment: 8-byte code followed by UTF-16BE.
fn encode_user_comment(text: &str) -> Vec<u8> {
    let mut bytes = CODE_UNICODE.to_vec();
    bytes.extend(text.encode_utf16().flat_map(|unit| unit.to_be_bytes()));
    bytes
}

fn decode_user_comment(raw: &[u8]) -> Result<String> {
    if raw.len() < 8 {
        anyhow::bail!("UserComment is shorter than its character code");
    }
    let (code, body) = raw.split_at(8);

    let text = if code == CODE_UNICODE {
        decode_utf16(body)?
    } else if code == CODE_ASCII || code == CODE_UNDEFINED {
        String::from_utf8(body.to_vec()).context("UserComment is not valid UTF-8")?
    } else if code == CODE_JIS {
        anyhow::bail!("JIS-encoded UserComment is not supported");
    } else {
        anyhow::bail!("Unknown UserComment character code {code:02X?}");
    };

    Ok(text.trim_end_matches('\0').to_string())
}

/// UTF-16, big-endian unless a byte order mark says otherwise.
fn decode_utf16(body: &[u8]) -> Result<String> {
    if body.len() % 2 != 0 {
        anyhow::bail!("UNICODE UserComment has an odd byte length");
    }

    let (little_endian, body) = match body {
        [0xFF, 0xFE, rest @ ..] => (true, rest),
        [0xFE, 0xFF, rest @ ..] => (false, rest),
        _ => (false, body),
    };

    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| {
            let pair = [pair[0], pair[1]];
            if little_endian { u16::from_le_bytes(pair) } else { u16::from_be_bytes(pair) }
        })
        .collect();

    String::from_utf16(&units).context("UserComment is not valid UTF-16")
}

/// Bounds-checked reads from a TIFF block in its declared byte order.
struct TiffReader<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl<'a> TiffReader<'a> {
    fn new(data: &'a [u8]) -> Result<Self> {
        let big_endian = match data.get(0..2) {
            Some(b"MM") => true,
            Some(b"II") => false,
            _ => anyhow::bail!("Invalid TIFF byte order"),
        };
        Ok(Self { data, big_endian })
    }

    fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .with_context(|| format!("TIFF read of {len} bytes at {offset} is out of bounds"))
    }

    fn u16(&self, offset: usize) -> Result<u16> {
        let b = self.bytes(offset, 2)?;
        let b = [b[0], b[1]];
        Ok(if self.big_endian { u16::from_be_bytes(b) } else { u16::from_le_bytes(b) })
    }

    fn u32(&self, offset: usize) -> Result<u32> {
        let b = self.bytes(offset, 4)?;
        let b = [b[0], b[1], b[2], b[3]];
        Ok(if self.big_endian { u32::from_be_bytes(b) } else { u32::from_le_bytes(b) })
    }

    /// Find the 12-byte entry for `tag` in the IFD at `ifd_offset`.
    fn find_entry(&self, ifd_offset: usize, tag: u16) -> Result<Option<usize>> {
        let count = self.u16(ifd_offset)? as usize;
        let start = ifd_offset + 2;
        for i in 0..count {
            let entry = start + i * 12;
            if self.u16(entry)? == tag {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

/// Walk IFD0 → ExifIFD → UserComment and return the raw field bytes.
fn find_user_comment(tiff: &[u8]) -> Result<Option<&[u8]>> {
    let reader = TiffReader::new(tiff)?;

    let ifd0 = reader.u32(4)? as usize;
    let Some(pointer) = reader.find_entry(ifd0, TAG_EXIF_IFD_POINTER)? else {
        return Ok(None);
    };
    let exif_ifd = reader.u32(pointer + 8)? as usize;

    let Some(entry) = reader.find_entry(exif_ifd, TAG_USER_COMMENT)? else {
        return Ok(None);
    };

    // UNDEFINED/BYTE/ASCII: one byte per component
    let count = reader.u32(entry + 4)? as usize;
    let value = if count <= 4 {
        reader.bytes(entry + 8, count)?
    } else {
        reader.bytes(reader.u32(entry + 8)? as usize, count)?
    };

    Ok(Some(value))
}
