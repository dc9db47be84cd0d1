use anyhow::{Context, Result};
use std::ops::Range;

use super::MetadataChannel;

const EXTENSION_INTRODUCER: u8 = 0x21;
const IMAGE_SEPARATOR: u8 = 0x2C;
const TRAILER: u8 = 0x3B;
const LABEL_COMMENT: u8 = 0xFE;
const LABEL_APPLICATION: u8 = 0xFF;

const MAX_SUB_BLOCK: usize = 255;

/// GIF comment extension channel.
///
/// The file is rewritten block by block: image data and every non-comment
/// extension are copied verbatim, so animation frames, delays, and loop
/// settings survive untouched. Existing comments are dropped and a single
/// new one is placed ahead of the first frame.
pub(crate) struct GifComment;

impl MetadataChannel for GifComment {
    fn embed(&self, image: &[u8], payload: &str) -> Result<Vec<u8>> {
        let layout = GifLayout::parse(image)?;

        let mut out = Vec::with_capacity(image.len() + payload.len() + 16);
        out.extend_from_slice(&image[..layout.header_end]);
        // Comment extensions only exist in GIF89a
        out[3..6].copy_from_slice(b"89a");

        let insert_at = layout
            .blocks
            .iter()
            .position(|b| b.kind != BlockKind::Extension(LABEL_APPLICATION))
            .unwrap_or(layout.blocks.len());

        for (i, block) in layout.blocks.iter().enumerate() {
            if i == insert_at {
                out.extend_from_slice(&comment_extension(payload.as_bytes()));
            }
            if block.kind != BlockKind::Extension(LABEL_COMMENT) {
                out.extend_from_slice(&image[block.range.clone()]);
            }
        }
        if insert_at == layout.blocks.len() {
            out.extend_from_slice(&comment_extension(payload.as_bytes()));
        }

        out.extend_from_slice(&image[layout.tail_start..]);
        if layout.tail_start == image.len() {
            out.push(TRAILER);
        }

        Ok(out)
    }

    fn extract(&self, image: &[u8]) -> Result<Option<String>> {
        let layout = GifLayout::parse(image)?;

        let Some(comment) = layout
            .blocks
            .iter()
            .find(|b| b.kind == BlockKind::Extension(LABEL_COMMENT))
        else {
            return Ok(None);
        };

        // Skip the introducer and label
        let data = collect_sub_blocks(image, comment.range.start + 2)?;
        let text = String::from_utf8(data).context("GIF comment is not valid UTF-8")?;
        Ok(Some(text))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Extension(u8),
    Image,
}

#[derive(Debug)]
struct Block {
    kind: BlockKind,
    range: Range<usize>,
}

/// Byte layout of a GIF stream: header (with global colour table), the
/// blocks that follow it, and where the trailer begins.
#[derive(Debug)]
struct GifLayout {
    header_end: usize,
    blocks: Vec<Block>,
    tail_start: usize,
}

impl GifLayout {
    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 13 || !(data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a")) {
            anyhow::bail!("Not a GIF stream");
        }

        // Logical screen descriptor packed field
        let packed = data[10];
        let mut pos = 13;
        if packed & 0x80 != 0 {
            pos += color_table_len(packed);
        }
        if pos > data.len() {
            anyhow::bail!("GIF global colour table is truncated");
        }
        let header_end = pos;

        let mut blocks = Vec::new();
        loop {
            match data.get(pos) {
                Some(&EXTENSION_INTRODUCER) => {
                    let label = *data.get(pos + 1).context("GIF extension label is truncated")?;
                    let end = skip_sub_blocks(data, pos + 2)?;
                    blocks.push(Block { kind: BlockKind::Extension(label), range: pos..end });
                    pos = end;
                }
                Some(&IMAGE_SEPARATOR) => {
                    // Image descriptor is 10 bytes, packed field last
                    let packed = *data.get(pos + 9).context("GIF image descriptor is truncated")?;
                    let mut data_start = pos + 10;
                    if packed & 0x80 != 0 {
                        data_start += color_table_len(packed);
                    }
                    // LZW minimum code size precedes the sub-blocks
                    let end = skip_sub_blocks(data, data_start + 1)?;
                    blocks.push(Block { kind: BlockKind::Image, range: pos..end });
                    pos = end;
                }
                Some(&TRAILER) | None => break,
                Some(other) => anyhow::bail!("Unexpected GIF block 0x{other:02X} at offset {pos}"),
            }
        }

        Ok(Self { header_end, blocks, tail_start: pos })
    }
}

/// Size in bytes of a colour table described by a packed field.
fn color_table_len(packed: u8) -> usize {
    3 * (1 << ((packed & 0x07) + 1))
}

/// Return the offset just past the zero-length terminator of a sub-block chain.
fn skip_sub_blocks(data: &[u8], mut pos: usize) -> Result<usize> {
    loop {
        let len = *data.get(pos).context("GIF sub-block chain is truncated")? as usize;
        pos += 1;
        if len == 0 {
            return Ok(pos);
        }
        pos += len;
        if pos > data.len() {
            anyhow::bail!("GIF sub-block runs past end of file");
        }
    }
}

fn collect_sub_blocks(data: &[u8], mut pos: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let len = *data.get(pos).context("GIF sub-block chain is truncated")? as usize;
        pos += 1;
        if len == 0 {
            return Ok(out);
        }
        let chunk = data.get(pos..pos + len).context("GIF sub-block runs past end of file")?;
        out.extend_from_slice(chunk);
        pos += len;
    }
}

fn comment_extension(text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + text.len() / MAX_SUB_BLOCK + 4);
    out.push(EXTENSION_INTRODUCER);
    out.push(LABEL_COMMENT);
    for chunk in text.chunks(MAX_SUB_BLOCK) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
    out.push(0);
    out
}
