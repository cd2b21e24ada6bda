use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use md5::{Digest, Md5};
use reqwest::Url;
use serde::Serialize;

use crate::{Error, Result};

/// One of the fixed page layouts the site serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    /// JSON feed with a URL's title, total post count and top tags.
    UrlSummary,
    /// HTML history of everyone who bookmarked a URL.
    BookmarkHistory,
    /// HTML listing of one user's public bookmarks.
    UserBookmarks,
    /// Authenticated XML dump of all of a user's posts, private ones included.
    UserPosts,
    /// JSON feed of a user's tag vocabulary.
    UserTags,
    /// JSON feed of a user's network members or fans.
    UserNetwork,
}

impl PageKind {
    /// Whether the site splits this kind over several numbered pages.
    pub fn is_paged(self) -> bool {
        matches!(self, PageKind::BookmarkHistory | PageKind::UserBookmarks)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PageKind::UrlSummary => "url summary",
            PageKind::BookmarkHistory => "bookmark history",
            PageKind::UserBookmarks => "user bookmarks",
            PageKind::UserPosts => "user posts",
            PageKind::UserTags => "user tags",
            PageKind::UserNetwork => "user network",
        }
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single bookmark. Identity is the `(user, url)` pair; everything else is payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookmarkRecord {
    user: String,
    url: String,
    tags: BTreeSet<String>,
    saved_on: Option<NaiveDate>,
    is_private: bool,
    title: Option<String>,
    comment: Option<String>,
}

impl BookmarkRecord {
    /// Returns `None` when either half of the identity is blank.
    pub fn new(user: impl Into<String>, url: impl Into<String>) -> Option<Self> {
        let user = user.into().trim().to_string();
        let url = url.into().trim().to_string();
        if user.is_empty() || url.is_empty() {
            return None;
        }
        Some(Self {
            user,
            url,
            tags: BTreeSet::new(),
            saved_on: None,
            is_private: false,
            title: None,
            comment: None,
        })
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags
            .into_iter()
            .map(Into::into)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    pub fn with_saved_on(mut self, saved_on: Option<NaiveDate>) -> Self {
        self.saved_on = saved_on;
        self
    }

    pub fn with_private(mut self, is_private: bool) -> Self {
        self.is_private = is_private;
        self
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = non_blank(title);
        self
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = non_blank(comment);
        self
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn saved_on(&self) -> Option<NaiveDate> {
        self.saved_on
    }

    pub fn is_private(&self) -> bool {
        self.is_private
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.user, &self.url)
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: u64,
}

impl TagCount {
    pub fn new(tag: impl Into<String>, count: u64) -> Option<Self> {
        let tag = tag.into().trim().to_string();
        (!tag.is_empty()).then_some(Self { tag, count })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// Someone the user added to their network.
    Member,
    /// Someone who added the user to their network.
    Fan,
}

impl Relation {
    pub(crate) fn feed(self) -> &'static str {
        match self {
            Relation::Member => "networkmembers",
            Relation::Fan => "networkfans",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkMember {
    pub user: String,
    pub relation: Relation,
}

impl NetworkMember {
    pub fn new(user: impl Into<String>, relation: Relation) -> Option<Self> {
        let user = user.into().trim().to_string();
        (!user.is_empty()).then_some(Self { user, relation })
    }
}

/// The typed records a single page yields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Records {
    Bookmarks(Vec<BookmarkRecord>),
    Tags(Vec<TagCount>),
    Members(Vec<NetworkMember>),
}

impl Records {
    pub fn len(&self) -> usize {
        match self {
            Records::Bookmarks(v) => v.len(),
            Records::Tags(v) => v.len(),
            Records::Members(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Figures a page states about the whole query, as opposed to the records it lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSummary {
    pub title: Option<String>,
    pub reported_total: Option<u64>,
    pub top_tags: Vec<TagCount>,
}

/// A fetched page after it passed the throttle check and its template.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    pub kind: PageKind,
    pub index: usize,
    pub final_url: String,
    pub records: Records,
    pub summary: PageSummary,
}

/// Source-reported total that disagrees with what was actually extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub reported: u64,
    pub extracted: usize,
}

/// Aggregated outcome of a URL history or user bookmarks query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub kind: PageKind,
    pub subject: String,
    pub title: Option<String>,
    /// Distinct bookmarks actually extracted.
    pub bookmark_count: usize,
    /// Distinct users among the extracted bookmarks.
    pub user_count: usize,
    /// Total the site claims, kept verbatim next to `bookmark_count`.
    pub reported_bookmark_count: Option<u64>,
    pub discrepancy: Option<Discrepancy>,
    pub top_tags: Vec<TagCount>,
    /// How many of the returned bookmarks carry each tag, in order of first use.
    pub tags: Vec<TagCount>,
    pub bookmarks: Vec<BookmarkRecord>,
    pub pages_fetched: usize,
    /// Pagination hit `max_pages` before the site signalled exhaustion.
    pub page_limit_reached: bool,
    /// Collection stopped at `max_bookmarks`; `bookmarks` holds the most recent ones.
    pub bookmark_limit_reached: bool,
    pub duplicates_dropped: usize,
}

/// A validated request for one query. Construction fails fast on bad input,
/// before anything touches the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    UrlSummary { url: String },
    UrlHistory { url: String },
    UserBookmarks { username: String },
    UserPosts { username: String, password: String },
    UserTags { username: String },
    UserNetwork { username: String, relation: Relation },
}

impl Query {
    pub fn url_summary(url: &str) -> Result<Self> {
        Ok(Query::UrlSummary {
            url: validate_url(url)?,
        })
    }

    pub fn url_history(url: &str) -> Result<Self> {
        Ok(Query::UrlHistory {
            url: validate_url(url)?,
        })
    }

    /// With a password the authenticated posts API is asked instead of the
    /// public pages, which also yields private bookmarks.
    pub fn user_bookmarks(username: &str, password: Option<&str>) -> Result<Self> {
        let username = validate_username(username)?;
        Ok(match password.filter(|p| !p.is_empty()) {
            Some(password) => Query::UserPosts {
                username,
                password: password.to_string(),
            },
            None => Query::UserBookmarks { username },
        })
    }

    pub fn user_tags(username: &str) -> Result<Self> {
        Ok(Query::UserTags {
            username: validate_username(username)?,
        })
    }

    pub fn user_network(username: &str, relation: Relation) -> Result<Self> {
        Ok(Query::UserNetwork {
            username: validate_username(username)?,
            relation,
        })
    }

    pub fn kind(&self) -> PageKind {
        match self {
            Query::UrlSummary { .. } => PageKind::UrlSummary,
            Query::UrlHistory { .. } => PageKind::BookmarkHistory,
            Query::UserBookmarks { .. } => PageKind::UserBookmarks,
            Query::UserPosts { .. } => PageKind::UserPosts,
            Query::UserTags { .. } => PageKind::UserTags,
            Query::UserNetwork { .. } => PageKind::UserNetwork,
        }
    }

    /// The URL or username the query is about.
    pub fn subject(&self) -> &str {
        match self {
            Query::UrlSummary { url } | Query::UrlHistory { url } => url,
            Query::UserBookmarks { username }
            | Query::UserPosts { username, .. }
            | Query::UserTags { username }
            | Query::UserNetwork { username, .. } => username,
        }
    }
}

/// The site keys URLs by the hex MD5 digest of the URL string.
pub fn url_hash(url: &str) -> String {
    hex::encode(Md5::digest(url.as_bytes()))
}

fn validate_url(url: &str) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::Config("URL must not be empty".into()));
    }
    let parsed = Url::parse(url).map_err(|e| Error::Config(format!("malformed URL '{url}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "URL '{url}' must use http or https, not '{}'",
            parsed.scheme()
        )));
    }
    // Hash the URL as given; normalising it would change its identity on the site.
    Ok(url.to_string())
}

fn validate_username(username: &str) -> Result<String> {
    let username = username.trim();
    if username.is_empty() {
        return Err(Error::Config("username must not be empty".into()));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(Error::Config(format!(
            "username '{username}' contains characters the site does not allow"
        )));
    }
    Ok(username.to_string())
}
