//! Canned pages and a fetcher that serves them, for offline tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::model::Query;
use crate::paginate::page_request;
use crate::request::{PageFetcher, PageRequest, RawPage};
use crate::Config;

pub(crate) fn page(status: u16, body: &str) -> RawPage {
    RawPage {
        body: body.as_bytes().to_vec(),
        status,
        final_url: "http://site.test/".into(),
    }
}

pub(crate) fn test_config() -> Config {
    Config::default()
        .with_page_delay(0.0)
        .with_bases("http://site.test", "http://feeds.test")
        .with_api_base("https://api.test")
}

#[derive(Debug, Clone, Default)]
pub(crate) struct BookmarkFixture {
    user: Option<String>,
    href: Option<String>,
    title: Option<String>,
    tags: Vec<String>,
    date: Option<String>,
    comment: Option<String>,
    private: bool,
}

impl BookmarkFixture {
    /// Entry of a URL history page.
    pub(crate) fn new(user: &str, tags: &[&str]) -> Self {
        Self {
            user: Some(user.into()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Entry of a user page.
    pub(crate) fn link(href: &str, title: &str, tags: &[&str]) -> Self {
        Self {
            href: Some(href.into()),
            title: Some(title.into()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    pub(crate) fn dated(mut self, date: &str) -> Self {
        self.date = Some(date.into());
        self
    }

    pub(crate) fn comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub(crate) fn private(mut self) -> Self {
        self.private = true;
        self
    }

    fn html(&self) -> String {
        let class = if self.private {
            "bookmark private"
        } else {
            "bookmark"
        };
        let date = self
            .date
            .as_ref()
            .map(|d| format!(r#"<div class="dateGroup"><span>{d}</span></div>"#))
            .unwrap_or_default();
        let link = match (&self.href, &self.title) {
            (Some(href), Some(title)) => {
                format!(r#"<h4><a class="taggedlink" href="{href}">{title}</a></h4>"#)
            }
            _ => String::new(),
        };
        let comment = self
            .comment
            .as_ref()
            .map(|c| format!(r#"<div class="description">{c}</div>"#))
            .unwrap_or_default();
        let user = self
            .user
            .as_ref()
            .map(|u| {
                format!(
                    r#"<div class="meta"><a class="user user-tag" href="/{u}"><span>{u}</span></a></div>"#
                )
            })
            .unwrap_or_default();
        let tags: String = self
            .tags
            .iter()
            .map(|t| format!(r#"<li><a><span class="tag-chain-item-span">{t}</span></a></li>"#))
            .collect();
        format!(
            r#"<li><div class="{class}">{date}<div class="data">{link}{comment}</div>{user}<div class="tagdisplay"><ul>{tags}</ul></div></div></li>"#
        )
    }
}

fn bookmark_list(entries: &[BookmarkFixture]) -> String {
    let items: String = entries.iter().map(BookmarkFixture::html).collect();
    format!(r#"<ul id="bookmarklist">{items}</ul>"#)
}

pub(crate) fn history_page(entries: &[BookmarkFixture]) -> RawPage {
    let body = format!(
        r#"<!DOCTYPE html><html><head><title>History</title></head><body><div id="content">{}</div></body></html>"#,
        bookmark_list(entries)
    );
    page(200, &body)
}

pub(crate) fn user_page(
    entries: &[BookmarkFixture],
    total: Option<&str>,
    top_tags: &[(&str, u64)],
) -> RawPage {
    let total = total
        .map(|t| format!(r#"<p><span id="total-bookmarks">{t}</span></p>"#))
        .unwrap_or_default();
    let top: String = top_tags
        .iter()
        .map(|(tag, count)| {
            format!(r#"<li><a class="tag" href="/t/{tag}">{tag}</a> <span class="count">{count}</span></li>"#)
        })
        .collect();
    let sidebar = if top_tags.is_empty() {
        String::new()
    } else {
        format!(r#"<div id="sidebar"><ul id="top-tags">{top}</ul></div>"#)
    };
    let body = format!(
        r#"<!DOCTYPE html><html><body>{total}<div id="content">{}</div>{sidebar}</body></html>"#,
        bookmark_list(entries)
    );
    page(200, &body)
}

pub(crate) fn throttle_page() -> RawPage {
    page(
        200,
        r#"<!DOCTYPE html><html><body><div id="throttle-warning"><h2>Whoa there!</h2>
        <p>Your requests look automated. Please wait a while.</p></div></body></html>"#,
    )
}

/// `count` history entries with distinct users `{prefix}0..`.
pub(crate) fn users(prefix: &str, count: usize) -> Vec<BookmarkFixture> {
    (0..count)
        .map(|i| BookmarkFixture::new(&format!("{prefix}{i}"), &["rust"]))
        .collect()
}

/// Serves canned pages keyed by request URL and records every request.
/// Unknown URLs answer with a 404.
#[derive(Debug, Default)]
pub(crate) struct FixtureFetcher {
    pages: HashMap<String, RawPage>,
    requests: Mutex<Vec<PageRequest>>,
}

impl FixtureFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers the page `index` of `query` as the config would address it.
    pub(crate) fn serve(mut self, query: &Query, index: usize, page: RawPage) -> Self {
        let request = page_request(query, &test_config(), index).unwrap();
        self.pages.insert(request.url.to_string(), page);
        self
    }

    pub(crate) fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for FixtureFetcher {
    async fn fetch(&self, request: &PageRequest) -> Result<RawPage, FetchError> {
        self.requests.lock().unwrap().push(request.clone());
        self.pages
            .get(request.url.as_str())
            .cloned()
            .ok_or(FetchError::Status(404))
    }
}
