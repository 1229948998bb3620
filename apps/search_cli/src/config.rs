use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, bail, Context};
use search_core::{ProviderOptions, QueryConfig};
use serde::Deserialize;
use shared::domain::{Filter, GeoPoint};
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "search.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub endpoint: Option<Url>,
    pub page_size: u32,
    pub beverage_page_size: u32,
    pub request_timeout_secs: u64,
    pub geo_lat: Option<f64>,
    pub geo_lon: Option<f64>,
    pub default_filters: Vec<Filter>,
    pub auto_reset: bool,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        let query = QueryConfig::default();
        Self {
            endpoint: None,
            page_size: query.page_size,
            beverage_page_size: query.beverage_page_size,
            request_timeout_secs: 10,
            geo_lat: None,
            geo_lon: None,
            default_filters: Vec::new(),
            auto_reset: ProviderOptions::default().auto_reset,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn geo_point(&self) -> Option<GeoPoint> {
        match (self.geo_lat, self.geo_lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
            _ => None,
        }
    }

    pub fn query_config(&self) -> QueryConfig {
        QueryConfig {
            page_size: self.page_size,
            beverage_page_size: self.beverage_page_size,
            default_filters: self.default_filters.clone(),
            geo_point: self.geo_point(),
            ..QueryConfig::default()
        }
    }

    pub fn provider_options(&self) -> ProviderOptions {
        ProviderOptions {
            auto_reset: self.auto_reset,
            ..ProviderOptions::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    endpoint: Option<String>,
    page_size: Option<u32>,
    beverage_page_size: Option<u32>,
    request_timeout_secs: Option<u64>,
    geo_lat: Option<f64>,
    geo_lon: Option<f64>,
    auto_reset: Option<bool>,
    log: Option<String>,
    #[serde(default)]
    default_filters: Vec<Filter>,
}

/// Defaults, then the settings file, then the environment.
///
/// An explicit `path` must exist; the implicit `search.toml` is optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    match fs::read_to_string(&path) {
        Ok(raw) => apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))?,
        Err(err) if !required && err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read settings file '{}'", path.display()))
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok())?;
    validate(&settings)?;
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw)?;

    if let Some(v) = file_cfg.endpoint {
        settings.endpoint = Some(parse_endpoint(&v)?);
    }
    if let Some(v) = file_cfg.page_size {
        settings.page_size = v;
    }
    if let Some(v) = file_cfg.beverage_page_size {
        settings.beverage_page_size = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = file_cfg.geo_lat {
        settings.geo_lat = Some(v);
    }
    if let Some(v) = file_cfg.geo_lon {
        settings.geo_lon = Some(v);
    }
    if let Some(v) = file_cfg.auto_reset {
        settings.auto_reset = v;
    }
    if let Some(v) = file_cfg.log {
        settings.log_filter = v;
    }
    if !file_cfg.default_filters.is_empty() {
        settings.default_filters = file_cfg.default_filters;
    }

    Ok(())
}

pub(crate) fn apply_env(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = lookup("SEARCH_ENDPOINT") {
        settings.endpoint = Some(parse_endpoint(&v)?);
    }
    if let Some(v) = lookup("APP__ENDPOINT") {
        settings.endpoint = Some(parse_endpoint(&v)?);
    }

    if let Some(v) = lookup("APP__PAGE_SIZE") {
        settings.page_size = parse_env("APP__PAGE_SIZE", &v)?;
    }
    if let Some(v) = lookup("APP__BEVERAGE_PAGE_SIZE") {
        settings.beverage_page_size = parse_env("APP__BEVERAGE_PAGE_SIZE", &v)?;
    }
    if let Some(v) = lookup("APP__REQUEST_TIMEOUT_SECS") {
        settings.request_timeout_secs = parse_env("APP__REQUEST_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = lookup("APP__GEO_LAT") {
        settings.geo_lat = Some(parse_env("APP__GEO_LAT", &v)?);
    }
    if let Some(v) = lookup("APP__GEO_LON") {
        settings.geo_lon = Some(parse_env("APP__GEO_LON", &v)?);
    }
    if let Some(v) = lookup("APP__AUTO_RESET") {
        settings.auto_reset = parse_env("APP__AUTO_RESET", &v)?;
    }
    if let Some(v) = lookup("APP__LOG") {
        settings.log_filter = v;
    }

    Ok(())
}

fn parse_env<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|err| anyhow!("{key}='{raw}' is invalid: {err}"))
}

pub fn parse_endpoint(raw: &str) -> anyhow::Result<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        bail!("search endpoint must not be empty");
    }
    let url = Url::parse(trimmed).with_context(|| format!("invalid search endpoint '{raw}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("search endpoint must start with http:// or https://, got '{raw}'");
    }
    Ok(url)
}

pub(crate) fn validate(settings: &Settings) -> anyhow::Result<()> {
    if settings.page_size == 0 || settings.beverage_page_size == 0 {
        bail!("page sizes must be positive");
    }
    if let Some(lat) = settings.geo_lat {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            bail!("geo latitude {lat} is out of range");
        }
    }
    if let Some(lon) = settings.geo_lon {
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            bail!("geo longitude {lon} is out of range");
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
