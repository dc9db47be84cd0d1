use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Illustration metadata received from the browser extension.
///
/// Field order is the canonical order: the serialized form written into
/// image files lists fields exactly as they are declared here.
///
/// # Example
///
/// ```rust
/// use pixiv_download_helper::record::IllustrationRecord;
///
/// let record: IllustrationRecord = serde_json::from_str(
///     r#"{"illust_id": "12345", "tags": ["a", "猫"], "image_urls": ["https://i.example/img1.png"]}"#,
/// ).unwrap();
///
/// assert_eq!(record.user_name, "");
/// assert!(record.to_canonical().unwrap().contains("猫"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IllustrationRecord {
    /// Artwork ID, interpolated into the Referer header.
    pub illust_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Download order. Duplicates are fetched once per occurrence.
    pub image_urls: Vec<String>,
}

impl IllustrationRecord {
    /// Check the rules the request boundary enforces before any download.
    pub fn validate(&self) -> Result<()> {
        if self.illust_id.trim().is_empty() {
            anyhow::bail!("illust_id must not be empty");
        }
        // Sent verbatim in the Referer header
        if !self.illust_id.chars().all(|c| c.is_ascii_graphic()) {
            anyhow::bail!("illust_id must be printable ASCII without spaces: {:?}", self.illust_id);
        }

        for url in &self.image_urls {
            let parsed = Url::parse(url).with_context(|| format!("Invalid image URL: {url}"))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("Unsupported URL scheme in {url}");
            }
        }

        Ok(())
    }

    /// Serialize to the canonical text form embedded in image files.
    ///
    /// Compact JSON; non-ASCII text is written as-is, never `\u`-escaped.
    pub fn to_canonical(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize illustration record")
    }

    /// Parse a canonical payload back into a record.
    pub fn from_canonical(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Embedded metadata is not a valid illustration record")
    }

    /// Parse a loosely-typed value (as returned by metadata extraction) into a record.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).context("Embedded metadata is not a valid illustration record")
    }
}
