use anyhow::{Context, Result};
use img_parts::Bytes;
use img_parts::png::{Png, PngChunk};

use super::{METADATA_KEY, MetadataChannel};

const CHUNK_TEXT: [u8; 4] = *b"tEXt";
const CHUNK_ITXT: [u8; 4] = *b"iTXt";
const CHUNK_ZTXT: [u8; 4] = *b"zTXt";
const CHUNK_IEND: [u8; 4] = *b"IEND";

/// PNG text chunk channel.
///
/// Writes an uncompressed `iTXt` chunk (UTF-8, no language tag) just before
/// `IEND`. Reads `tEXt` (Latin-1) or uncompressed `iTXt`.
pub(crate) struct PngText;

impl MetadataChannel for PngText {
    fn embed(&self, image: &[u8], payload: &str) -> Result<Vec<u8>> {
        let mut png = parse(image)?;

        let chunks = png.chunks_mut();
        chunks.retain(|chunk| !is_metadata_chunk(chunk));

        let iend_pos = chunks
            .iter()
            .position(|chunk| chunk.kind() == CHUNK_IEND)
            .unwrap_or(chunks.len());
        chunks.insert(
            iend_pos,
            PngChunk::new(CHUNK_ITXT, Bytes::from(build_itxt(METADATA_KEY, payload))),
        );

        Ok(png.encoder().bytes().to_vec())
    }

    fn extract(&self, image: &[u8]) -> Result<Option<String>> {
        let png = parse(image)?;

        let Some(chunk) = png.chunks().iter().find(|chunk| is_metadata_chunk(chunk)) else {
            return Ok(None);
        };

        let text = match chunk.kind() {
            CHUNK_TEXT => parse_text(chunk.contents()),
            CHUNK_ITXT => parse_itxt(chunk.contents())?,
            _ => anyhow::bail!("Compressed zTXt '{METADATA_KEY}' chunk is not supported"),
        };

        Ok(Some(text))
    }
}

fn parse(image: &[u8]) -> Result<Png> {
    Png::from_bytes(Bytes::copy_from_slice(image))
        .map_err(|e| anyhow::anyhow!("Failed to parse PNG: {e}"))
}

/// Whether a chunk is a text chunk (any flavour) carrying our keyword.
fn is_metadata_chunk(chunk: &PngChunk) -> bool {
    matches!(chunk.kind(), CHUNK_TEXT | CHUNK_ITXT | CHUNK_ZTXT)
        && keyword(chunk.contents()) == Some(METADATA_KEY.as_bytes())
}

/// The null-terminated keyword that starts every text chunk.
fn keyword(contents: &[u8]) -> Option<&[u8]> {
    let end = contents.iter().position(|&b| b == 0)?;
    Some(&contents[..end])
}

/// keyword \0 compression-flag compression-method language \0 translated-keyword \0 text
fn build_itxt(keyword: &str, text: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(keyword.len() + text.len() + 5);
    data.extend_from_slice(keyword.as_bytes());
    data.push(0);
    data.push(0); // uncompressed
    data.push(0); // compression method
    data.push(0); // empty language tag
    data.push(0); // empty translated keyword
    data.extend_from_slice(text.as_bytes());
    data
}

fn parse_text(contents: &[u8]) -> String {
    let start = contents.iter().position(|&b| b == 0).map_or(contents.len(), |p| p + 1);
    // Latin-1 maps byte-for-byte onto the first 256 code points
    contents[start..].iter().map(|&b| char::from(b)).collect()
}

fn parse_itxt(contents: &[u8]) -> Result<String> {
    let mut rest = split_nul(contents).context("iTXt chunk has no keyword terminator")?;

    let [flag, _method, tail @ ..] = rest else {
        anyhow::bail!("iTXt chunk is truncated");
    };
    if *flag != 0 {
        anyhow::bail!("Compressed iTXt '{METADATA_KEY}' chunk is not supported");
    }
    rest = tail;

    rest = split_nul(rest).context("iTXt chunk has no language tag terminator")?;
    rest = split_nul(rest).context("iTXt chunk has no translated keyword terminator")?;

    String::from_utf8(rest.to_vec()).context("iTXt text is not valid UTF-8")
}

/// Skip past the next null byte.
fn split_nul(data: &[u8]) -> Option<&[u8]> {
    let pos = data.iter().position(|&b| b == 0)?;
    Some(&data[pos + 1..])
}
