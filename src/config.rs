use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::{Error, Result};

/// Settings for one scraping session. Loaded and handed in by the caller;
/// the library only validates and reads it.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP proxy as `host:port` or a full URL.
    pub proxy: Option<String>,
    pub user_agent: String,
    /// Per-request timeout in seconds.
    pub timeout_seconds: f64,
    /// Pause between two pages of the same query, in seconds.
    pub page_delay_seconds: f64,
    /// Safety cap on pages fetched for one query.
    pub max_pages: usize,
    /// Most recent bookmarks kept per query; 0 keeps all of them.
    pub max_bookmarks: usize,
    /// How many independent queries may run at once.
    pub concurrency_limit: usize,
    /// Root of the HTML site.
    pub site_base: String,
    /// Root of the JSON feeds.
    pub feeds_base: String,
    /// Root of the authenticated posts API. Always contacted over https.
    pub api_base: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy: None,
            user_agent: concat!(
                "deliscrape/",
                env!("CARGO_PKG_VERSION"),
                " (bookmark history scraper)"
            )
            .to_string(),
            timeout_seconds: 30.0,
            page_delay_seconds: 1.0,
            max_pages: 100,
            max_bookmarks: 50,
            concurrency_limit: 4,
            site_base: "http://delicious.com".to_string(),
            feeds_base: "http://feeds.delicious.com".to_string(),
            api_base: "https://api.del.icio.us".to_string(),
        }
    }
}

impl Config {
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_max_bookmarks(mut self, max_bookmarks: usize) -> Self {
        self.max_bookmarks = max_bookmarks;
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_page_delay(mut self, seconds: f64) -> Self {
        self.page_delay_seconds = seconds;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_bases(mut self, site_base: impl Into<String>, feeds_base: impl Into<String>) -> Self {
        self.site_base = site_base.into();
        self.feeds_base = feeds_base.into();
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Saturates instead of panicking on values `validate()` would reject.
    pub fn timeout(&self) -> Duration {
        saturating_secs(self.timeout_seconds)
    }

    pub fn page_delay(&self) -> Duration {
        saturating_secs(self.page_delay_seconds)
    }

    /// `None` when every bookmark is wanted.
    pub fn bookmark_limit(&self) -> Option<usize> {
        (self.max_bookmarks > 0).then_some(self.max_bookmarks)
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_agent.trim().is_empty() {
            return Err(Error::Config("user_agent must not be empty".into()));
        }
        if checked_secs("timeout_seconds", self.timeout_seconds)?.is_zero() {
            return Err(Error::Config(format!(
                "timeout_seconds must be positive, got {}",
                self.timeout_seconds
            )));
        }
        checked_secs("page_delay_seconds", self.page_delay_seconds)?;
        if self.max_pages == 0 {
            return Err(Error::Config("max_pages must be at least 1".into()));
        }
        if self.concurrency_limit == 0 {
            return Err(Error::Config("concurrency_limit must be at least 1".into()));
        }
        self.site_url()?;
        self.feeds_url()?;
        self.api_url()?;
        if let Some(proxy) = &self.proxy {
            if proxy.trim().is_empty() {
                return Err(Error::Config("proxy must not be blank when set".into()));
            }
        }
        Ok(())
    }

    pub(crate) fn site_url(&self) -> Result<Url> {
        parse_base("site_base", &self.site_base)
    }

    pub(crate) fn feeds_url(&self) -> Result<Url> {
        parse_base("feeds_base", &self.feeds_base)
    }

    pub(crate) fn api_url(&self) -> Result<Url> {
        parse_base("api_base", &self.api_base)
    }

    /// `host:port` proxies get an `http://` scheme.
    pub(crate) fn proxy_url(&self) -> Option<String> {
        self.proxy.as_ref().map(|p| {
            let p = p.trim();
            if p.contains("://") {
                p.to_string()
            } else {
                format!("http://{p}")
            }
        })
    }
}

fn checked_secs(field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        Error::Config(format!(
            "{field} must be a non-negative number of seconds that fits a duration, got {value}"
        ))
    })
}

fn saturating_secs(value: f64) -> Duration {
    // `f64::max` maps NaN to 0.
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

fn parse_base(field: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value.trim_end_matches('/'))
        .map_err(|e| Error::Config(format!("{field} '{value}' is not a URL: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(Error::Config(format!("{field} '{value}' cannot be a base URL")));
    }
    Ok(url)
}
