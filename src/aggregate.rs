use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::error::Partial;
use crate::model::{
    BookmarkRecord, Discrepancy, ExtractedPage, NetworkMember, PageKind, PageSummary, QueryResult,
    Records, Relation, TagCount,
};
use crate::template::TOP_TAG_LIMIT;

/// Merges extracted pages, in fetch order, into one result.
///
/// The first occurrence of a record wins. Summary figures are taken from the
/// first page that states them and are kept apart from the extracted counts.
#[derive(Debug)]
pub struct Aggregator {
    kind: PageKind,
    subject: String,
    bookmarks: Vec<BookmarkRecord>,
    seen_bookmarks: HashSet<(String, String)>,
    tags: Vec<TagCount>,
    seen_tags: HashSet<String>,
    members: Vec<NetworkMember>,
    seen_members: HashSet<(String, Relation)>,
    title: Option<String>,
    reported_total: Option<u64>,
    top_tags: Vec<TagCount>,
    pages: usize,
    duplicates_dropped: usize,
    page_limit_reached: bool,
    bookmark_limit: Option<usize>,
    bookmark_limit_reached: bool,
}

impl Aggregator {
    pub fn new(kind: PageKind, subject: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            bookmarks: Vec::new(),
            seen_bookmarks: HashSet::new(),
            tags: Vec::new(),
            seen_tags: HashSet::new(),
            members: Vec::new(),
            seen_members: HashSet::new(),
            title: None,
            reported_total: None,
            top_tags: Vec::new(),
            pages: 0,
            duplicates_dropped: 0,
            page_limit_reached: false,
            bookmark_limit: None,
            bookmark_limit_reached: false,
        }
    }

    /// Keeps only the first `limit` distinct bookmarks; `None` keeps all.
    pub fn with_bookmark_limit(mut self, limit: Option<usize>) -> Self {
        self.bookmark_limit = limit;
        self
    }

    /// Whether enough bookmarks are in that fetching more pages is pointless.
    pub fn bookmarks_full(&self) -> bool {
        self.bookmark_limit
            .is_some_and(|limit| self.bookmarks.len() >= limit)
    }

    pub fn push(&mut self, page: ExtractedPage) {
        self.pages += 1;
        self.push_summary(page.summary);
        match page.records {
            Records::Bookmarks(batch) => {
                for record in batch {
                    let key = (record.user().to_string(), record.url().to_string());
                    if self.seen_bookmarks.insert(key) {
                        self.bookmarks.push(record);
                    } else {
                        self.duplicates_dropped += 1;
                    }
                }
            }
            // The summary feed lists its top tags as records; they already went in with the summary.
            Records::Tags(_) if page.kind == PageKind::UrlSummary => {}
            Records::Tags(batch) => {
                for tag in batch {
                    if self.seen_tags.insert(tag.tag.clone()) {
                        self.tags.push(tag);
                    } else {
                        self.duplicates_dropped += 1;
                    }
                }
            }
            Records::Members(batch) => {
                for member in batch {
                    if self.seen_members.insert((member.user.clone(), member.relation)) {
                        self.members.push(member);
                    } else {
                        self.duplicates_dropped += 1;
                    }
                }
            }
        }
    }

    fn push_summary(&mut self, summary: PageSummary) {
        if self.title.is_none() {
            self.title = summary.title;
        }
        if self.reported_total.is_none() {
            self.reported_total = summary.reported_total;
        }
        if self.top_tags.is_empty() {
            self.top_tags = summary.top_tags;
        }
    }

    pub fn set_page_limit_reached(&mut self, reached: bool) {
        self.page_limit_reached |= reached;
    }

    /// Records that collection stopped at the bookmark limit.
    pub fn set_bookmark_limit_reached(&mut self) {
        self.bookmark_limit_reached = true;
    }

    /// What has been merged so far, for attaching to a failure.
    pub fn partial(&self) -> Partial {
        let records = match self.kind {
            PageKind::BookmarkHistory | PageKind::UserBookmarks | PageKind::UserPosts => {
                Records::Bookmarks(self.bookmarks.clone())
            }
            PageKind::UrlSummary | PageKind::UserTags => Records::Tags(self.tags.clone()),
            PageKind::UserNetwork => Records::Members(self.members.clone()),
        };
        Partial {
            pages: self.pages,
            records,
        }
    }

    pub fn finish(mut self) -> QueryResult {
        self.log_duplicates();
        if let Some(limit) = self.bookmark_limit {
            if self.bookmarks.len() > limit {
                self.bookmarks.truncate(limit);
                self.bookmark_limit_reached = true;
            }
        }
        let bookmark_count = self.bookmarks.len();
        let user_count = self
            .bookmarks
            .iter()
            .map(BookmarkRecord::user)
            .collect::<HashSet<_>>()
            .len();
        // A capped result is short of the site's total on purpose.
        let discrepancy = self
            .reported_total
            .filter(|_| !self.bookmark_limit_reached)
            .filter(|&reported| reported != bookmark_count as u64)
            .map(|reported| Discrepancy {
                reported,
                extracted: bookmark_count,
            });
        if let Some(d) = discrepancy {
            warn!(
                kind = %self.kind,
                subject = %self.subject,
                reported = d.reported,
                extracted = d.extracted,
                "site-reported bookmark total differs from extracted bookmarks"
            );
        }

        QueryResult {
            kind: self.kind,
            subject: self.subject,
            title: self.title,
            bookmark_count,
            user_count,
            reported_bookmark_count: self.reported_total,
            discrepancy,
            top_tags: rank_top_tags(self.top_tags),
            tags: tag_usage(&self.bookmarks),
            bookmarks: self.bookmarks,
            pages_fetched: self.pages,
            page_limit_reached: self.page_limit_reached,
            bookmark_limit_reached: self.bookmark_limit_reached,
            duplicates_dropped: self.duplicates_dropped,
        }
    }

    /// A tag vocabulary, in the order the site lists it.
    pub fn into_tags(self) -> Vec<TagCount> {
        self.log_duplicates();
        self.tags
    }

    pub fn into_members(self) -> Vec<NetworkMember> {
        self.log_duplicates();
        self.members
    }

    fn log_duplicates(&self) {
        if self.duplicates_dropped > 0 {
            warn!(
                kind = %self.kind,
                subject = %self.subject,
                dropped = self.duplicates_dropped,
                "pages overlapped, dropped duplicate records"
            );
        }
    }
}

/// Merges `pages` into the result of a `kind` query about `subject`.
pub fn aggregate<I>(kind: PageKind, subject: &str, pages: I) -> QueryResult
where
    I: IntoIterator<Item = ExtractedPage>,
{
    let mut aggregator = Aggregator::new(kind, subject);
    for page in pages {
        aggregator.push(page);
    }
    aggregator.finish()
}

/// Number of bookmarks carrying each tag. Tags are listed in the order they
/// first appear; within one bookmark that is alphabetical.
pub fn tag_usage(bookmarks: &[BookmarkRecord]) -> Vec<TagCount> {
    let mut tags: Vec<TagCount> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for tag in bookmarks.iter().flat_map(BookmarkRecord::tags) {
        match index.get(tag.as_str()) {
            Some(&i) => tags[i].count += 1,
            None => {
                index.insert(tag.as_str(), tags.len());
                tags.push(TagCount {
                    tag: tag.clone(),
                    count: 1,
                });
            }
        }
    }
    tags
}

/// Highest count first, source order among equal counts, at most ten.
pub fn rank_top_tags(tags: Vec<TagCount>) -> Vec<TagCount> {
    let mut seen = HashSet::new();
    let mut tags: Vec<_> = tags
        .into_iter()
        .filter(|t| seen.insert(t.tag.clone()))
        .collect();
    // `sort_by` is stable, which keeps ties in source order.
    tags.sort_by(|a, b| b.count.cmp(&a.count));
    tags.truncate(TOP_TAG_LIMIT);
    tags
}
