//! Structural templates for every page kind the site serves.
//!
//! A template pins the markers that must be present for a page to count as
//! "the layout we know". When the site changes a layout the marker stops
//! matching and extraction reports the template by name, instead of quietly
//! producing an empty or wrong record list.

/// Layout revision the selectors below were written against.
pub const LAYOUT_VERSION: &str = "v2-2008.08";

/// Selectors for the HTML bookmark listings (URL history and user pages).
#[derive(Debug, Clone, Copy)]
pub struct BookmarkListTemplate {
    pub name: &'static str,
    /// Must exist on every page of this kind, even an empty one.
    pub container: &'static str,
    /// One match per bookmark, searched inside `container`.
    pub record: &'static str,
    /// Date header; applies to following records until the next one.
    pub date: &'static str,
    pub tag: &'static str,
    pub comment: &'static str,
    /// Username of the bookmark owner (history pages).
    pub user: Option<&'static str>,
    /// Anchor carrying href and title (user pages).
    pub link: Option<&'static str>,
    /// Class on the record element that marks a private bookmark.
    pub private_class: &'static str,
    pub reported_total: Option<&'static str>,
    pub top_tag: Option<TopTagTemplate>,
}

#[derive(Debug, Clone, Copy)]
pub struct TopTagTemplate {
    pub item: &'static str,
    pub name: &'static str,
    pub count: &'static str,
}

pub const BOOKMARK_HISTORY: BookmarkListTemplate = BookmarkListTemplate {
    name: "bookmark-history/v2-2008.08",
    container: "ul#bookmarklist",
    record: "div.bookmark",
    date: "div.dateGroup span",
    tag: "div.tagdisplay span.tag-chain-item-span",
    comment: "div.data div.description",
    user: Some("div.meta a.user span"),
    link: None,
    private_class: "private",
    reported_total: None,
    top_tag: None,
};

pub const USER_BOOKMARKS: BookmarkListTemplate = BookmarkListTemplate {
    name: "user-bookmarks/v2-2008.08",
    container: "ul#bookmarklist",
    record: "div.bookmark",
    date: "div.dateGroup span",
    tag: "div.tagdisplay span.tag-chain-item-span",
    comment: "div.data div.description",
    user: None,
    link: Some("div.data a.taggedlink"),
    private_class: "private",
    reported_total: Some("#total-bookmarks"),
    top_tag: Some(TopTagTemplate {
        item: "ul#top-tags li",
        name: "a.tag",
        count: "span.count",
    }),
};

/// Date format of the history date headers, e.g. `18 Oct 08`.
pub const DATE_HEADER_FORMAT: &str = "%d %b %y";

/// Attribute names of the authenticated posts dump, one `<post>` per bookmark.
#[derive(Debug, Clone, Copy)]
pub struct PostsTemplate {
    pub name: &'static str,
    /// Root element; present even when the user has no posts.
    pub container: &'static str,
    pub record: &'static str,
    pub href: &'static str,
    pub title: &'static str,
    pub comment: &'static str,
    /// Space separated tag list.
    pub tags: &'static str,
    pub time: &'static str,
    /// `shared="no"` marks a private post.
    pub shared: &'static str,
}

pub const USER_POSTS: PostsTemplate = PostsTemplate {
    name: "posts-api/v1",
    container: "posts",
    record: "posts post",
    href: "href",
    title: "description",
    comment: "extended",
    tags: "tag",
    time: "time",
    shared: "shared",
};

/// Timestamp format of the posts dump, e.g. `2008-10-18T14:33:00Z`.
pub const POST_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Shape a JSON feed must have at its top level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    Array,
    Object,
}

#[derive(Debug, Clone, Copy)]
pub struct FeedTemplate {
    pub name: &'static str,
    pub shape: JsonShape,
}

pub const URL_SUMMARY: FeedTemplate = FeedTemplate {
    name: "urlinfo-feed/v2",
    shape: JsonShape::Array,
};

pub const USER_TAGS: FeedTemplate = FeedTemplate {
    name: "tags-feed/v2",
    shape: JsonShape::Object,
};

pub const USER_NETWORK: FeedTemplate = FeedTemplate {
    name: "network-feed/v2",
    shape: JsonShape::Array,
};

/// The site's "you look like a robot" notice.
pub const THROTTLE_MARKER: &str = "div#throttle-warning";

/// Upper bound the site applies to any top-tag list.
pub const TOP_TAG_LIMIT: usize = 10;
