use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::colormap::{Colormap, Scale};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub insitu: InsituConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub plot: PlotConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: default_catalog_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CatalogConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_catalog_url() -> String {
    "http://127.0.0.1:8080/catalog".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    #[serde(default = "default_download_dir")]
    pub dir: PathBuf,
    /// Re-download files that are already present and verified.
    #[serde(default)]
    pub overwrite: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            dir: default_download_dir(),
            overwrite: false,
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./data/raw")
}

#[derive(Debug, Deserialize, Clone)]
pub struct InsituConfig {
    #[serde(default = "default_insitu_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for InsituConfig {
    fn default() -> Self {
        Self {
            url: default_insitu_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl InsituConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_insitu_url() -> String {
    "http://127.0.0.1:8080/insitu".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    #[serde(default = "default_colormap")]
    pub colormap: String,
    #[serde(default = "default_scale")]
    pub scale: String,
    #[serde(default = "default_clip_low")]
    pub clip_low: f64,
    #[serde(default = "default_clip_high")]
    pub clip_high: f64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            colormap: default_colormap(),
            scale: default_scale(),
            clip_low: default_clip_low(),
            clip_high: default_clip_high(),
        }
    }
}

fn default_colormap() -> String {
    "sdoaia193".to_string()
}
fn default_scale() -> String {
    "log".to_string()
}
fn default_clip_low() -> f64 {
    0.5
}
fn default_clip_high() -> f64 {
    99.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlotConfig {
    #[serde(default = "default_plot_width")]
    pub width: u32,
    #[serde(default = "default_plot_height")]
    pub height: u32,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            width: default_plot_width(),
            height: default_plot_height(),
        }
    }
}

fn default_plot_width() -> u32 {
    1200
}
fn default_plot_height() -> u32 {
    800
}

impl Config {
    /// All-defaults configuration, used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to [`Config::minimal`].
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.catalog.timeout_secs == 0 {
        anyhow::bail!("catalog.timeout_secs must be > 0");
    }
    if config.insitu.timeout_secs == 0 {
        anyhow::bail!("insitu.timeout_secs must be > 0");
    }

    let r = &config.render;
    if !(0.0..100.0).contains(&r.clip_low) || r.clip_high > 100.0 || r.clip_low >= r.clip_high {
        anyhow::bail!("render.clip_low/clip_high must satisfy 0 <= low < high <= 100");
    }
    Colormap::by_name(&r.colormap).with_context(|| "Invalid render.colormap")?;
    Scale::by_name(&r.scale).with_context(|| "Invalid render.scale")?;

    if config.plot.width < 100 || config.plot.height < 100 {
        anyhow::bail!("plot.width and plot.height must be >= 100");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.catalog.timeout_secs, 60);
        assert_eq!(config.download.dir, PathBuf::from("./data/raw"));
        assert!(!config.download.overwrite);
        assert_eq!(config.render.colormap, "sdoaia193");
        validate(&config).unwrap();
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let config: Config = toml::from_str(
            r#"
[catalog]
url = "file:///srv/index.json"

[render]
scale = "sqrt"
"#,
        )
        .unwrap();
        assert_eq!(config.catalog.url, "file:///srv/index.json");
        assert_eq!(config.catalog.timeout_secs, 60);
        assert_eq!(config.render.scale, "sqrt");
        assert_eq!(config.render.clip_high, 99.5);
    }

    #[test]
    fn example_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/helio.example.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config.plot.width, 1200);
        assert_eq!(config.download.dir, PathBuf::from("./data/raw"));
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = Config::minimal();
        config.catalog.timeout_secs = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::minimal();
        config.render.clip_low = 90.0;
        config.render.clip_high = 10.0;
        assert!(validate(&config).is_err());

        let mut config = Config::minimal();
        config.render.colormap = "rainbow".into();
        assert!(validate(&config).is_err());

        let mut config = Config::minimal();
        config.plot.width = 10;
        assert!(validate(&config).is_err());
    }
}
