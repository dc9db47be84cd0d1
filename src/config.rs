use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that overrides [`StorageConfig::download_dir`].
pub const DOWNLOAD_DIR_ENV: &str = "DOWNLOAD_DIR";

/// Dotenv file consulted by [`Config::load`], relative to the working directory.
pub const ENV_FILE: &str = ".env";

/// Top-level configuration for the downloader.
///
/// Controls where images are stored, how the image host is contacted,
/// and where the HTTP endpoint listens.
///
/// # Loading
///
/// ```rust,no_run
/// use pixiv_download_helper::config::Config;
///
/// // From a JSON file (DOWNLOAD_DIR from .env or the environment still wins)
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.http.request_delay_ms = 2000;
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local image storage layout.
    pub storage: StorageConfig,
    /// Outbound requests to the image host.
    pub http: HttpConfig,
    /// Inbound endpoint used by the browser extension.
    pub server: ServerConfig,
}

/// Where downloaded images are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage root. `None` means the current working directory.
    pub download_dir: Option<PathBuf>,
    /// Subpath under the root that holds the images.
    pub image_subdir: PathBuf,
}

/// Request headers and pacing for image downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Desktop browser User-Agent; the host refuses obvious bots.
    pub user_agent: String,
    /// Artwork page prefix; the illustration ID is appended to form the Referer.
    pub referer_base: String,
    /// Pause between consecutive downloads of one batch.
    pub request_delay_ms: u64,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

/// Listen address and route for the download endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub route: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_dir: None,
            image_subdir: PathBuf::from("data").join("images"),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                         AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/130.0.0.0 Safari/537.36"
                .to_string(),
            referer_base: "https://www.pixiv.net/artworks/".to_string(),
            request_delay_ms: 1100,
            timeout_secs: 30,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            route: "/download-image".to_string(),
        }
    }
}

impl Config {
    /// Resolve the config file path, in the same directory as the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location,
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let mut config = if config_path.exists() {
            let contents =
                std::fs::read_to_string(&config_path).context("Failed to read config file")?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            Self::default()
        };

        config.apply_env(Path::new(ENV_FILE))?;
        Ok(config)
    }

    /// Apply environment overrides.
    ///
    /// A `DOWNLOAD_DIR` entry in `env_file` wins over the process
    /// environment. A missing file is not an error.
    pub fn apply_env(&mut self, env_file: &Path) -> Result<()> {
        let dir = match read_env_file_var(env_file, DOWNLOAD_DIR_ENV)? {
            Some(value) => Some(PathBuf::from(value)),
            None => std::env::var_os(DOWNLOAD_DIR_ENV).map(PathBuf::from),
        };
        self.apply_download_dir(dir);
        Ok(())
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Override the storage root (used for the `DOWNLOAD_DIR` variable).
    /// Empty values are ignored.
    pub fn apply_download_dir(&mut self, dir: Option<PathBuf>) {
        if let Some(dir) = dir.filter(|d| !d.as_os_str().is_empty()) {
            log::debug!("Storage root overridden to {}", dir.display());
            self.storage.download_dir = Some(dir);
        }
    }

    /// Directory that downloaded images are written to.
    pub fn image_dir(&self) -> Result<PathBuf> {
        let root = match &self.storage.download_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Failed to resolve current directory")?,
        };
        Ok(root.join(&self.storage.image_subdir))
    }

    /// Create the image directory (and parents) if it is missing.
    ///
    /// Safe to call more than once.
    pub fn prepare_storage(&self) -> Result<PathBuf> {
        let dir = self.image_dir()?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create image directory {}", dir.display()))?;
        log::debug!("Image directory ready: {}", dir.display());
        Ok(dir)
    }
}

/// Last value of `key` in a dotenv file, if the file exists and sets it.
fn read_env_file_var(path: &Path, key: &str) -> Result<Option<String>> {
    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(e) if e.not_found() => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    let mut value = None;
    for entry in entries {
        let (name, v) = entry.with_context(|| format!("Failed to parse {}", path.display()))?;
        if name == key {
            value = Some(v);
        }
    }
    if value.is_some() {
        log::debug!("{key} read from {}", path.display());
    }
    Ok(value)
}
