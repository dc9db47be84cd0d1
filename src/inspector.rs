//! Read-only metadata viewer.
//!
//! Used by the CLI both interactively (prompt for one path at a time) and in
//! batch mode over files and directories. Nothing here modifies an image.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::metadata::read_metadata;

/// Typing this (any case) at the prompt ends the interactive loop.
pub const EXIT_SENTINEL: &str = "exit";

pub const PROMPT: &str = "Please enter the path to the image file (or type 'exit' to quit): ";
pub const HEADER: &str = "--- Embedded Metadata ---";
pub const NOT_FOUND: &str = "Could not read or find metadata.";

/// Extensions picked up when walking a directory.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];

/// Clean a path as typed or pasted by a user.
///
/// Trims surrounding whitespace and one pair of matching quotes, which some
/// "copy as path" features add.
///
/// ```rust
/// use pixiv_download_helper::inspector::clean_path;
/// use std::path::Path;
///
/// assert_eq!(clean_path("  \"C:\\pics\\a b.png\"\n"), Path::new("C:\\pics\\a b.png"));
/// assert_eq!(clean_path("'img.gif'"), Path::new("img.gif"));
/// ```
pub fn clean_path(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|&q| {
            trimmed
                .strip_prefix(q)
                .and_then(|rest| rest.strip_suffix(q))
        })
        .unwrap_or(trimmed);
    PathBuf::from(unquoted)
}

/// Pretty-print a metadata value with four-space indentation.
///
/// Non-ASCII characters are written as-is.
pub fn render(value: &serde_json::Value) -> Result<String> {
    let mut buf = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    value
        .serialize(&mut serializer)
        .context("Failed to format metadata")?;
    String::from_utf8(buf).context("Formatted metadata is not UTF-8")
}

/// Full report text for one image: header plus metadata, or the not-found line.
pub fn describe(path: &Path) -> Result<String> {
    match read_metadata(path) {
        Some(value) => Ok(format!("{HEADER}\n{}", render(&value)?)),
        None => Ok(NOT_FOUND.to_string()),
    }
}

/// Prompt for paths on `input` and print their metadata to `output` until
/// the exit sentinel or end of input.
pub fn run_interactive<R: BufRead, W: Write>(mut input: R, mut output: W) -> Result<()> {
    loop {
        writeln!(output, "\n{}", "-".repeat(50))?;
        write!(output, "{PROMPT}")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line).context("Failed to read input")? == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case(EXIT_SENTINEL) {
            break;
        }
        if trimmed.is_empty() {
            continue;
        }

        let path = clean_path(trimmed);
        writeln!(output, "\n{}", describe(&path)?)?;
    }

    Ok(())
}

/// Collect image files from a list of paths (files and/or directories).
///
/// Files given directly are always included, whatever their extension,
/// since the format is detected from content. Directories are walked
/// recursively and filtered by extension.
pub fn collect_images(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut images = Vec::new();

    for path in paths {
        if path.is_file() {
            images.push(path.clone());
        } else if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                if p.is_file() && has_image_extension(p) {
                    images.push(p.to_path_buf());
                }
            }
        } else {
            log::warn!("Path does not exist: {}", path.display());
        }
    }

    images
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
