use anyhow::{Context, Result};
use reqwest::header::{HeaderValue, REFERER, USER_AGENT};
use reqwest::{Client, Url};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::metadata::{self, EmbedOutcome};
use crate::record::IllustrationRecord;

/// What happened to one URL of a batch.
#[derive(Debug)]
pub enum UrlOutcome {
    /// The image was written to `path`. `embed` is `None` when embedding failed
    /// (the file is kept as downloaded).
    Saved {
        url: String,
        path: PathBuf,
        embed: Option<EmbedOutcome>,
    },
    /// The request failed or the host answered with a non-success status.
    Failed { url: String, error: String },
}

/// Summary of [`ImageFetcher::fetch_all`], in URL order.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub outcomes: Vec<UrlOutcome>,
    /// Number of inter-request pauses taken.
    pub pauses: usize,
}

impl FetchReport {
    pub fn saved(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, UrlOutcome::Saved { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, UrlOutcome::Failed { .. }))
            .count()
    }
}

/// Downloads the images of an [`IllustrationRecord`] and embeds the record
/// into each saved file.
///
/// Downloads run strictly one after another with a fixed pause in between,
/// so the image host does not see a burst of requests.
///
/// # Example
///
/// ```rust,no_run
/// use pixiv_download_helper::config::Config;
/// use pixiv_download_helper::fetcher::ImageFetcher;
/// use pixiv_download_helper::record::IllustrationRecord;
///
/// # async fn example(record: IllustrationRecord) -> anyhow::Result<()> {
/// let fetcher = ImageFetcher::new(&Config::load(None)?)?;
/// let report = fetcher.fetch_all(&record).await?;
/// println!("{} saved, {} failed", report.saved(), report.failed());
/// # Ok(())
/// # }
/// ```
pub struct ImageFetcher {
    client: Client,
    image_dir: PathBuf,
    user_agent: String,
    referer_base: String,
    delay: Duration,
}

impl ImageFetcher {
    /// Build a fetcher from configuration, creating the image directory if needed.
    pub fn new(config: &Config) -> Result<Self> {
        let image_dir = config.prepare_storage()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            image_dir,
            user_agent: config.http.user_agent.clone(),
            referer_base: config.http.referer_base.clone(),
            delay: Duration::from_millis(config.http.request_delay_ms),
        })
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    /// Referer header value for an artwork.
    pub fn referer_for(&self, illust_id: &str) -> String {
        format!("{}{}", self.referer_base, illust_id)
    }

    /// Download every URL of `record` in order, embedding `record` into each file.
    ///
    /// A failed download or embed is logged and the batch moves on. Between
    /// consecutive URLs the configured pause is always taken, whatever the
    /// previous URL's outcome. Only local write failures, or an artwork ID
    /// that cannot be sent as a Referer header, abort the batch.
    pub async fn fetch_all(&self, record: &IllustrationRecord) -> Result<FetchReport> {
        let total = record.image_urls.len();
        let referer = HeaderValue::from_str(&self.referer_for(&record.illust_id)).with_context(|| {
            format!("Artwork ID {:?} is not usable in a Referer header", record.illust_id)
        })?;
        let mut report = FetchReport::default();

        for (i, url) in record.image_urls.iter().enumerate() {
            log::debug!("[{}/{}] Fetching {url}", i + 1, total);
            let outcome = self.fetch_one(url, &referer, record).await;

            // Paced whatever this URL's outcome was
            if i + 1 < total {
                tokio::time::sleep(self.delay).await;
                report.pauses += 1;
            }

            report.outcomes.push(outcome?);
        }

        log::info!(
            "Illustration {}: {} of {} image(s) saved",
            record.illust_id,
            report.saved(),
            total
        );
        Ok(report)
    }

    async fn fetch_one(
        &self,
        url: &str,
        referer: &HeaderValue,
        record: &IllustrationRecord,
    ) -> Result<UrlOutcome> {
        let file_name = match file_name_for(url) {
            Ok(name) => name,
            Err(e) => {
                log::error!("Failed to download {url}: {e:#}");
                return Ok(UrlOutcome::Failed { url: url.to_string(), error: format!("{e:#}") });
            }
        };

        let bytes = match self.download(url, referer).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Failed to download {url}: {e:#}");
                return Ok(UrlOutcome::Failed { url: url.to_string(), error: format!("{e:#}") });
            }
        };

        // Same final segment from different URLs overwrites the earlier file
        let path = self.image_dir.join(file_name);
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!("Image downloaded: {}", path.display());

        // File I/O and EXIF parsing stay off the async workers
        let embed_path = path.clone();
        let embed_record = record.clone();
        let embedded =
            tokio::task::spawn_blocking(move || metadata::embed_metadata(&embed_path, &embed_record))
                .await;
        let embed = match embedded {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                log::error!("Failed to embed metadata into {}: {e:#}", path.display());
                None
            }
            Err(e) => {
                log::error!("Metadata embedding task for {} failed: {e}", path.display());
                None
            }
        };

        Ok(UrlOutcome::Saved { url: url.to_string(), path, embed })
    }

    async fn download(&self, url: &str, referer: &HeaderValue) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(REFERER, referer.clone())
            .send()
            .await
            .context("Request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("HTTP error ({status})");
        }

        let bytes = resp.bytes().await.context("Failed to read response body")?;
        Ok(bytes.to_vec())
    }
}

/// Local file name for an image URL: the last segment of its path.
///
/// Query string and fragment are ignored; no other sanitization is applied.
pub fn file_name_for(url: &str) -> Result<String> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid image URL: {url}"))?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .with_context(|| format!("Image URL has no file name: {url}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ImageFormat, fixtures, read_record};
    use std::time::Instant;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(dir: &TempDir, delay_ms: u64) -> Config {
        let mut config = Config::default();
        config.storage.download_dir = Some(dir.path().to_path_buf());
        config.http.request_delay_ms = delay_ms;
        config.http.timeout_secs = 5;
        config
    }

    fn bare_record(image_urls: Vec<String>) -> IllustrationRecord {
        IllustrationRecord {
            illust_id: "12345".to_string(),
            user_id: "42".to_string(),
            user_name: "作者".to_string(),
            title: "テスト".to_string(),
            description: String::new(),
            tags: vec!["a".to_string(), "猫".to_string()],
            image_urls,
        }
    }

    fn record_for(server: &MockServer, files: &[&str]) -> IllustrationRecord {
        bare_record(
            files
                .iter()
                .map(|f| format!("{}/img-original/{f}", server.uri()))
                .collect(),
        )
    }

    async fn serve(server: &MockServer, file: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(format!("/img-original/{file}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(server)
            .await;
    }

    // ── file_name_for ────────────────────────────────────────────────

    #[test]
    fn file_name_is_last_segment() {
        assert_eq!(
            file_name_for("https://i.pximg.net/img-original/img/2024/01/01/00/00/00/12345_p0.png")
                .unwrap(),
            "12345_p0.png"
        );
    }

    #[test]
    fn file_name_ignores_query() {
        assert_eq!(file_name_for("https://i.example/a/b.jpg?size=large#x").unwrap(), "b.jpg");
    }

    #[test]
    fn file_name_requires_a_segment() {
        assert!(file_name_for("https://i.example/").is_err());
        assert!(file_name_for("https://i.example/dir/").is_err());
        assert!(file_name_for("not a url").is_err());
    }

    // ── fetch_all ────────────────────────────────────────────────────

    #[tokio::test]
    async fn downloads_and_embeds_each_format() {
        let server = MockServer::start().await;
        serve(&server, "img1.png", fixtures::png_bytes()).await;
        serve(&server, "img2.jpg", fixtures::jpeg_bytes()).await;
        serve(&server, "img3.gif", fixtures::gif_bytes(2)).await;

        let dir = TempDir::new().unwrap();
        let fetcher = ImageFetcher::new(&test_config(&dir, 0)).unwrap();
        let record = record_for(&server, &["img1.png", "img2.jpg", "img3.gif"]);

        let report = fetcher.fetch_all(&record).await.unwrap();
        assert_eq!(report.saved(), 3);
        assert_eq!(report.failed(), 0);

        for name in ["img1.png", "img2.jpg", "img3.gif"] {
            let path = fetcher.image_dir().join(name);
            let read = read_record(&path).unwrap();
            assert_eq!(read.illust_id, "12345");
            assert_eq!(read.tags, vec!["a", "猫"]);
            assert_eq!(read, record);
        }
    }

    #[tokio::test]
    async fn sends_browser_headers() {
        let server = MockServer::start().await;
        serve(&server, "p0.png", fixtures::png_bytes()).await;

        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, 0);
        let fetcher = ImageFetcher::new(&config).unwrap();
        let report = fetcher.fetch_all(&record_for(&server, &["p0.png"])).await.unwrap();
        assert_eq!(report.saved(), 1);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let headers = &requests[0].headers;
        assert_eq!(
            headers.get("referer").unwrap().to_str().unwrap(),
            "https://www.pixiv.net/artworks/12345"
        );
        assert_eq!(
            headers.get("user-agent").unwrap().to_str().unwrap(),
            config.http.user_agent
        );
    }

    #[tokio::test]
    async fn failure_does_not_stop_the_batch_or_the_pacing() {
        let server = MockServer::start().await;
        serve(&server, "a.png", fixtures::png_bytes()).await;
        Mock::given(method("GET"))
            .and(path("/img-original/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        serve(&server, "c.jpg", fixtures::jpeg_bytes()).await;
        serve(&server, "d.gif", fixtures::gif_bytes(1)).await;

        let dir = TempDir::new().unwrap();
        let fetcher = ImageFetcher::new(&test_config(&dir, 20)).unwrap();
        let record = record_for(&server, &["a.png", "missing.png", "c.jpg", "d.gif"]);

        let started = Instant::now();
        let report = fetcher.fetch_all(&record).await.unwrap();

        assert_eq!(report.saved(), 3);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.pauses, 3);
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert!(matches!(&report.outcomes[1], UrlOutcome::Failed { error, .. } if error.contains("404")));
        assert!(!fetcher.image_dir().join("missing.png").exists());
        assert!(read_record(&fetcher.image_dir().join("d.gif")).is_some());
    }

    #[tokio::test]
    async fn failing_last_url_takes_no_trailing_pause() {
        let server = MockServer::start().await;
        serve(&server, "a.png", fixtures::png_bytes()).await;

        let dir = TempDir::new().unwrap();
        let fetcher = ImageFetcher::new(&test_config(&dir, 0)).unwrap();
        let record = record_for(&server, &["a.png", "gone.png"]);

        let report = fetcher.fetch_all(&record).await.unwrap();
        assert_eq!(report.pauses, 1);
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test]
    async fn single_url_is_not_paced() {
        let server = MockServer::start().await;
        serve(&server, "only.png", fixtures::png_bytes()).await;

        let dir = TempDir::new().unwrap();
        let fetcher = ImageFetcher::new(&test_config(&dir, 5_000)).unwrap();

        let started = Instant::now();
        let report = fetcher.fetch_all(&record_for(&server, &["only.png"])).await.unwrap();
        assert_eq!(report.pauses, 0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn empty_batch_does_nothing() {
        let dir = TempDir::new().unwrap();
        let fetcher = ImageFetcher::new(&test_config(&dir, 0)).unwrap();
        let report = fetcher.fetch_all(&bare_record(Vec::new())).await.unwrap();
        assert!(report.outcomes.is_empty());
        assert_eq!(report.pauses, 0);
    }

    #[tokio::test]
    async fn duplicate_urls_are_each_fetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img-original/same.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(fixtures::png_bytes()))
            .expect(2)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let fetcher = ImageFetcher::new(&test_config(&dir, 0)).unwrap();
        let report = fetcher
            .fetch_all(&record_for(&server, &["same.png", "same.png"]))
            .await
            .unwrap();
        assert_eq!(report.saved(), 2);
    }

    #[tokio::test]
    async fn non_image_body_is_kept_unembedded() {
        let server = MockServer::start().await;
        serve(&server, "page.html", b"<html>blocked</html>".to_vec()).await;
        serve(&server, "broken.png", fixtures::png_bytes()[..30].to_vec()).await;

        let dir = TempDir::new().unwrap();
        let fetcher = ImageFetcher::new(&test_config(&dir, 0)).unwrap();
        let report = fetcher
            .fetch_all(&record_for(&server, &["page.html", "broken.png"]))
            .await
            .unwrap();

        assert!(matches!(
            &report.outcomes[0],
            UrlOutcome::Saved { embed: Some(EmbedOutcome::Unsupported(ImageFormat::Other(_))), .. }
        ));
        assert!(matches!(&report.outcomes[1], UrlOutcome::Saved { embed: None, .. }));
        assert!(fetcher.image_dir().join("broken.png").exists());
    }

    #[tokio::test]
    async fn unsendable_illust_id_aborts_before_any_request() {
        let server = MockServer::start().await;
        serve(&server, "a.png", fixtures::png_bytes()).await;

        let dir = TempDir::new().unwrap();
        let fetcher = ImageFetcher::new(&test_config(&dir, 0)).unwrap();
        let mut record = record_for(&server, &["a.png"]);
        record.illust_id = "123\n45".to_string();

        let err = fetcher.fetch_all(&record).await.unwrap_err();
        assert!(format!("{err:#}").contains("Referer"));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn embeds_on_a_multi_threaded_runtime() {
        let server = MockServer::start().await;
        serve(&server, "m.jpg", fixtures::jpeg_bytes()).await;
        serve(&server, "m.gif", fixtures::gif_bytes(2)).await;

        let dir = TempDir::new().unwrap();
        let fetcher = ImageFetcher::new(&test_config(&dir, 0)).unwrap();
        let record = record_for(&server, &["m.jpg", "m.gif"]);

        let report = fetcher.fetch_all(&record).await.unwrap();
        assert!(report.outcomes.iter().all(|o| matches!(
            o,
            UrlOutcome::Saved { embed: Some(EmbedOutcome::Embedded(_)), .. }
        )));
        assert_eq!(read_record(&fetcher.image_dir().join("m.jpg")), Some(record));
    }

    #[tokio::test]
    async fn connection_refused_is_a_per_url_failure() {
        let dir = TempDir::new().unwrap();
        let fetcher = ImageFetcher::new(&test_config(&dir, 0)).unwrap();
        let record = bare_record(vec!["http://127.0.0.1:1/nothing.png".to_string()]);

        let report = fetcher.fetch_all(&record).await.unwrap();
        assert_eq!(report.failed(), 1);
    }
}
