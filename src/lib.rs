//! # pixiv-download-helper
//!
//! Download pixiv illustrations and keep their metadata with the files: the
//! artwork ID, artist, title, description, tags, and source URLs are embedded
//! into every saved PNG, JPEG, and GIF, and can be read back later.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pixiv_download_helper::config::Config;
//! use pixiv_download_helper::fetcher::ImageFetcher;
//! use pixiv_download_helper::metadata::read_record;
//! use pixiv_download_helper::record::IllustrationRecord;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // DOWNLOAD_DIR in the environment overrides the storage root
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!     let fetcher = ImageFetcher::new(&config)?;
//!
//!     let record: IllustrationRecord = serde_json::from_str(r#"{
//!         "illust_id": "12345",
//!         "tags": ["a", "猫"],
//!         "image_urls": ["https://i.pximg.net/img-original/img/2024/01/01/00/00/00/12345_p0.png"]
//!     }"#)?;
//!     record.validate()?;
//!
//!     let report = fetcher.fetch_all(&record).await?;
//!     println!("{} saved, {} failed", report.saved(), report.failed());
//!
//!     let saved = read_record(&fetcher.image_dir().join("12345_p0.png"));
//!     println!("{saved:?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Formats
//!
//! | Format | Metadata channel |
//! |--------|------------------|
//! | PNG | `iTXt` chunk, keyword `metadata` |
//! | JPEG | EXIF UserComment (Unicode) |
//! | GIF | Comment extension, all frames kept |
//!
//! Formats are detected from file contents. Anything else is downloaded but
//! left without metadata.
//!
//! ## Modules
//!
//! - [`record`]: The illustration record and its canonical text form
//! - [`metadata`]: Format detection, embedding, and extraction
//! - [`fetcher`]: Paced, sequential image downloads
//! - [`inspector`]: Read-only metadata viewer used by the CLI
//! - [`config`]: Configuration types and loading/saving
//! - `api`: HTTP endpoint for the browser extension (feature `server`)

#[cfg(feature = "server")]
pub mod api;
pub mod config;
pub mod fetcher;
pub mod inspector;
pub mod metadata;
pub mod record;
