use chrono::{NaiveDate, NaiveDateTime};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::task::spawn_blocking;

use crate::error::ExtractError;
use crate::model::{BookmarkRecord, NetworkMember, PageSummary, Query, Records, TagCount};
use crate::request::RawPage;
use crate::template::{
    BookmarkListTemplate, FeedTemplate, JsonShape, BOOKMARK_HISTORY, DATE_HEADER_FORMAT,
    POST_TIME_FORMAT, URL_SUMMARY, USER_BOOKMARKS, USER_NETWORK, USER_POSTS, USER_TAGS,
};
use crate::Result;

type ExtractResult<T> = core::result::Result<T, ExtractError>;

/// Records and summary figures read from one page.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub records: Records,
    pub summary: PageSummary,
}

/// Reads one page according to the template of the query's page kind.
///
/// An empty but well-formed listing yields empty records. A page on which the
/// template's markers are missing altogether is an error, because that means
/// the layout moved and nothing can be said about the records.
pub fn extract(page: &RawPage, query: &Query) -> ExtractResult<Extraction> {
    let body = page.text();
    match query {
        Query::UrlSummary { .. } => extract_url_summary(&body),
        Query::UrlHistory { url } => extract_bookmark_list(&body, &BOOKMARK_HISTORY, url),
        Query::UserBookmarks { username } => {
            extract_bookmark_list(&body, &USER_BOOKMARKS, username)
        }
        Query::UserPosts { username, .. } => extract_posts(&body, username),
        Query::UserTags { .. } => extract_user_tags(&body),
        Query::UserNetwork { relation, .. } => {
            let items: Vec<NetworkItem> = feed_body(&body, &USER_NETWORK)?;
            let members = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    NetworkMember::new(item.user, *relation).ok_or_else(|| {
                        ExtractError::new(USER_NETWORK.name, format!("entry {i} has a blank user"))
                    })
                })
                .collect::<ExtractResult<Vec<_>>>()?;
            Ok(Extraction {
                records: Records::Members(members),
                summary: PageSummary::default(),
            })
        }
    }
}

/// Runs `extract` on the blocking pool; HTML parsing is CPU bound and
/// `scraper::Html` cannot be held across an await point.
pub(crate) async fn extract_blocking(
    page: RawPage,
    query: Query,
) -> Result<(RawPage, ExtractResult<Extraction>)> {
    let res = spawn_blocking(move || {
        let extraction = extract(&page, &query);
        (page, extraction)
    })
    .await?;
    Ok(res)
}

fn extract_bookmark_list(
    html: &str,
    t: &BookmarkListTemplate,
    subject: &str,
) -> ExtractResult<Extraction> {
    let doc = Html::parse_document(html);

    // Create selectors.
    let container_selector = create_selector(t.name, t.container)?;
    let record_selector = create_selector(t.name, t.record)?;
    let date_selector = create_selector(t.name, t.date)?;
    let tag_selector = create_selector(t.name, t.tag)?;
    let comment_selector = create_selector(t.name, t.comment)?;
    let user_selector = t.user.map(|s| create_selector(t.name, s)).transpose()?;
    let link_selector = t.link.map(|s| create_selector(t.name, s)).transpose()?;

    let container = doc.select(&container_selector).next().ok_or_else(|| {
        ExtractError::new(t.name, format!("container '{}' is missing", t.container))
    })?;

    // The site prints the date once per day, above the first bookmark of that day.
    let mut saved_on = None;
    let mut bookmarks = Vec::new();
    for (i, entry) in container.select(&record_selector).enumerate() {
        if let Some(date) = entry.select(&date_selector).next() {
            let date_text = element_text(&date);
            saved_on = Some(parse_day(&date_text, DATE_HEADER_FORMAT).ok_or_else(|| {
                ExtractError::new(t.name, format!("entry {i} has an unreadable date '{date_text}'"))
            })?);
        }

        let tags = entry.select(&tag_selector).map(|tag| element_text(&tag));
        let comment = entry
            .select(&comment_selector)
            .next()
            .map(|c| element_text(&c));
        let is_private = entry.value().classes().any(|c| c == t.private_class);

        let record = if let Some(user_selector) = &user_selector {
            let user = entry
                .select(user_selector)
                .next()
                .map(|u| element_text(&u))
                .unwrap_or_default();
            BookmarkRecord::new(user, subject)
        } else if let Some(link_selector) = &link_selector {
            let link = entry.select(link_selector).next();
            let href = link
                .and_then(|a| a.value().attr("href"))
                .unwrap_or_default();
            BookmarkRecord::new(subject, href).map(|r| r.with_title(link.map(|a| element_text(&a))))
        } else {
            None
        };
        let record = record.ok_or_else(|| {
            ExtractError::new(t.name, format!("entry {i} has no owner or no link"))
        })?;

        bookmarks.push(
            record
                .with_tags(tags)
                .with_saved_on(saved_on)
                .with_private(is_private)
                .with_comment(comment),
        );
    }

    let summary = PageSummary {
        title: None,
        reported_total: reported_total(&doc, t)?,
        top_tags: top_tags(&doc, t)?,
    };
    Ok(Extraction {
        records: Records::Bookmarks(bookmarks),
        summary,
    })
}

/// The posts dump is XML; the HTML parser keeps unknown elements and their
/// attributes, which is all that is read from it.
fn extract_posts(xml: &str, user: &str) -> ExtractResult<Extraction> {
    let t = &USER_POSTS;
    let doc = Html::parse_document(xml);
    let container_selector = create_selector(t.name, t.container)?;
    let record_selector = create_selector(t.name, t.record)?;

    if doc.select(&container_selector).next().is_none() {
        return Err(ExtractError::new(
            t.name,
            format!("container '{}' is missing", t.container),
        ));
    }

    let bookmarks = doc
        .select(&record_selector)
        .enumerate()
        .map(|(i, post)| -> ExtractResult<BookmarkRecord> {
            let el = post.value();
            let time = el.attr(t.time).unwrap_or_default();
            let saved_on = NaiveDateTime::parse_from_str(time, POST_TIME_FORMAT)
                .map(|dt| dt.date())
                .map_err(|_| {
                    ExtractError::new(t.name, format!("post {i} has an unreadable time '{time}'"))
                })?;
            let record = BookmarkRecord::new(user, el.attr(t.href).unwrap_or_default())
                .ok_or_else(|| ExtractError::new(t.name, format!("post {i} has no href")))?;
            Ok(record
                .with_tags(el.attr(t.tags).unwrap_or_default().split_whitespace())
                .with_title(el.attr(t.title).map(str::to_string))
                .with_comment(el.attr(t.comment).map(str::to_string))
                .with_saved_on(Some(saved_on))
                .with_private(el.attr(t.shared) == Some("no")))
        })
        .collect::<ExtractResult<Vec<_>>>()?;

    Ok(Extraction {
        records: Records::Bookmarks(bookmarks),
        summary: PageSummary::default(),
    })
}

fn reported_total(doc: &Html, t: &BookmarkListTemplate) -> ExtractResult<Option<u64>> {
    let Some(selector) = t.reported_total else {
        return Ok(None);
    };
    let selector = create_selector(t.name, selector)?;
    doc.select(&selector)
        .next()
        .map(|el| {
            let text = element_text(&el);
            parse_count(&text).ok_or_else(|| {
                ExtractError::new(t.name, format!("bookmark total '{text}' is not a number"))
            })
        })
        .transpose()
}

fn top_tags(doc: &Html, t: &BookmarkListTemplate) -> ExtractResult<Vec<TagCount>> {
    let Some(top) = t.top_tag else {
        return Ok(Vec::new());
    };
    let item_selector = create_selector(t.name, top.item)?;
    let name_selector = create_selector(t.name, top.name)?;
    let count_selector = create_selector(t.name, top.count)?;

    doc.select(&item_selector)
        .enumerate()
        .map(|(i, item)| {
            let name = item.select(&name_selector).next().map(|n| element_text(&n));
            let count = item
                .select(&count_selector)
                .next()
                .and_then(|c| parse_count(&element_text(&c)));
            name.zip(count)
                .and_then(|(name, count)| TagCount::new(name, count))
                .ok_or_else(|| ExtractError::new(t.name, format!("top tag {i} is incomplete")))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct UrlInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    total_posts: Option<Count>,
    #[serde(default)]
    top_tags: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct NetworkItem {
    user: String,
}

/// Feeds are inconsistent about quoting numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Count {
    Number(u64),
    Text(String),
}

impl Count {
    fn value(&self) -> Option<u64> {
        match self {
            Count::Number(n) => Some(*n),
            Count::Text(s) => parse_count(s),
        }
    }
}

fn extract_url_summary(body: &str) -> ExtractResult<Extraction> {
    let infos: Vec<UrlInfo> = feed_body(body, &URL_SUMMARY)?;
    // An unknown URL comes back as an empty array.
    let Some(info) = infos.into_iter().next() else {
        return Ok(Extraction {
            records: Records::Tags(Vec::new()),
            summary: PageSummary::default(),
        });
    };

    let reported_total = info
        .total_posts
        .map(|c| {
            c.value().ok_or_else(|| {
                ExtractError::new(URL_SUMMARY.name, format!("total_posts {c:?} is not a count"))
            })
        })
        .transpose()?;
    let top_tags = tag_counts(info.top_tags.unwrap_or_default(), URL_SUMMARY.name)?;

    Ok(Extraction {
        records: Records::Tags(top_tags.clone()),
        summary: PageSummary {
            title: info.title.filter(|t| !t.trim().is_empty()),
            reported_total,
            top_tags,
        },
    })
}

fn extract_user_tags(body: &str) -> ExtractResult<Extraction> {
    let tags: Map<String, Value> = feed_body(body, &USER_TAGS)?;
    Ok(Extraction {
        records: Records::Tags(tag_counts(tags, USER_TAGS.name)?),
        summary: PageSummary::default(),
    })
}

/// `{tag: count}` in the order the feed lists them.
fn tag_counts(map: Map<String, Value>, template: &'static str) -> ExtractResult<Vec<TagCount>> {
    map.into_iter()
        .map(|(tag, count)| {
            let n = match &count {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => parse_count(s),
                _ => None,
            };
            n.and_then(|n| TagCount::new(tag.as_str(), n)).ok_or_else(|| {
                ExtractError::new(template, format!("tag '{tag}' has an invalid count {count}"))
            })
        })
        .collect()
}

/// Checks the top-level JSON shape before decoding, so that a reshaped feed is
/// reported as such rather than as a generic decode failure.
fn feed_body<T: serde::de::DeserializeOwned>(body: &str, t: &FeedTemplate) -> ExtractResult<T> {
    let value: Value = serde_json::from_str(body.trim_start_matches('\u{feff}'))
        .map_err(|e| ExtractError::new(t.name, format!("body is not JSON: {e}")))?;
    let shape_ok = match t.shape {
        JsonShape::Array => value.is_array(),
        JsonShape::Object => value.is_object(),
    };
    if !shape_ok {
        return Err(ExtractError::new(
            t.name,
            format!("expected a top-level JSON {:?}", t.shape).to_lowercase(),
        ));
    }
    serde_json::from_value(value).map_err(|e| ExtractError::new(t.name, e.to_string()))
}

#[inline]
fn create_selector(template: &'static str, sel_str: &str) -> ExtractResult<Selector> {
    Selector::parse(sel_str)
        .map_err(|_| ExtractError::new(template, format!("invalid selector '{sel_str}'")))
}

/// Text content with runs of whitespace collapsed.
fn element_text(el: &ElementRef) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reads the date at the start of `text` and drops whatever follows it,
/// so a time of day is truncated away.
fn parse_day(text: &str, format: &str) -> Option<NaiveDate> {
    NaiveDate::parse_and_remainder(text.trim(), format)
        .ok()
        .map(|(date, _)| date)
}

/// `"1,234 bookmarks"` -> 1234.
fn parse_count(text: &str) -> Option<u64> {
    let digits: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Relation;
    use crate::testing::{history_page, page, user_page, BookmarkFixture};
    use pretty_assertions::assert_eq;

    fn history_query() -> Query {
        Query::url_history("http://example.com/").unwrap()
    }

    fn bookmarks(extraction: Extraction) -> Vec<BookmarkRecord> {
        match extraction.records {
            Records::Bookmarks(b) => b,
            other => panic!("expected bookmarks, got {other:?}"),
        }
    }

    #[test]
    fn history_entries_become_records() {
        let p = history_page(&[
            BookmarkFixture::new("alice", &["rust", "web"]).dated("18 Oct 08"),
            BookmarkFixture::new("bob", &["rust"]).comment("good read"),
            BookmarkFixture::new("carol", &[]).dated("17 Oct 08"),
        ]);
        let records = bookmarks(extract(&p, &history_query()).unwrap());

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].key(), ("alice", "http://example.com/"));
        assert_eq!(records[0].tags().iter().collect::<Vec<_>>(), ["rust", "web"]);
        assert_eq!(records[1].comment(), Some("good read"));
        // bob inherits alice's date header
        assert_eq!(records[1].saved_on(), NaiveDate::from_ymd_opt(2008, 10, 18));
        assert_eq!(records[2].saved_on(), NaiveDate::from_ymd_opt(2008, 10, 17));
        assert!(records.iter().all(|r| !r.is_private()));
    }

    #[test]
    fn time_of_day_is_truncated() {
        let p = history_page(&[BookmarkFixture::new("alice", &[]).dated("18 Oct 08 23:59")]);
        let records = bookmarks(extract(&p, &history_query()).unwrap());
        assert_eq!(records[0].saved_on(), NaiveDate::from_ymd_opt(2008, 10, 18));
    }

    #[test]
    fn empty_listing_is_a_valid_empty_result() {
        let extraction = extract(&history_page(&[]), &history_query()).unwrap();
        assert!(extraction.records.is_empty());
    }

    #[test]
    fn missing_container_is_layout_drift() {
        let p = page(200, "<html><body><p>We moved things around</p></body></html>");
        let err = extract(&p, &history_query()).unwrap_err();
        assert_eq!(err.template, BOOKMARK_HISTORY.name);
    }

    #[test]
    fn entry_without_owner_is_layout_drift() {
        let body = r#"<html><body><ul id="bookmarklist">
            <li><div class="bookmark"><div class="meta"></div></div></li>
            </ul></body></html>"#;
        assert!(extract(&page(200, body), &history_query()).is_err());
    }

    #[test]
    fn unreadable_date_is_layout_drift() {
        let p = history_page(&[BookmarkFixture::new("alice", &[]).dated("yesterday")]);
        assert!(extract(&p, &history_query()).is_err());
    }

    #[test]
    fn user_page_reads_links_privacy_and_summary() {
        let p = user_page(
            &[
                BookmarkFixture::link("http://a.example/", "A site", &["one"]).dated("01 Jan 09"),
                BookmarkFixture::link("http://b.example/", "B site", &[]).private(),
            ],
            Some("1,234 bookmarks"),
            &[("one", 12), ("two", 12), ("three", 3)],
        );
        let query = Query::user_bookmarks("alice", None).unwrap();
        let extraction = extract(&p, &query).unwrap();

        assert_eq!(extraction.summary.reported_total, Some(1234));
        assert_eq!(
            extraction.summary.top_tags,
            vec![
                TagCount::new("one", 12).unwrap(),
                TagCount::new("two", 12).unwrap(),
                TagCount::new("three", 3).unwrap(),
            ]
        );
        let records = bookmarks(extraction);
        assert_eq!(records[0].key(), ("alice", "http://a.example/"));
        assert_eq!(records[0].title(), Some("A site"));
        assert!(!records[0].is_private());
        assert!(records[1].is_private());
        assert_eq!(records[1].saved_on(), NaiveDate::from_ymd_opt(2009, 1, 1));
    }

    #[test]
    fn posts_dump_includes_private_posts() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<posts user="alice" update="2008-10-18T14:33:00Z">
  <post href="http://a.example/" description="A &amp; B" extended="worth it" tag="rust web"
        time="2008-10-18T23:59:59Z" shared="no" />
  <post href="http://b.example/" description="B" extended="" tag="" time="2008-10-17T01:00:00Z" />
</posts>"#;
        let query = Query::user_bookmarks("alice", Some("secret")).unwrap();
        let records = bookmarks(extract(&page(200, body), &query).unwrap());

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key(), ("alice", "http://a.example/"));
        assert_eq!(records[0].title(), Some("A & B"));
        assert_eq!(records[0].comment(), Some("worth it"));
        assert_eq!(records[0].tags().iter().collect::<Vec<_>>(), ["rust", "web"]);
        // the time of day is dropped
        assert_eq!(records[0].saved_on(), NaiveDate::from_ymd_opt(2008, 10, 18));
        assert!(records[0].is_private());
        assert!(!records[1].is_private());
        assert!(records[1].tags().is_empty());
        assert_eq!(records[1].comment(), None);
    }

    #[test]
    fn posts_dump_layout_drift() {
        let query = Query::user_bookmarks("alice", Some("secret")).unwrap();
        let empty = r#"<?xml version="1.0"?><posts user="alice"></posts>"#;
        assert!(extract(&page(200, empty), &query).unwrap().records.is_empty());

        let err = extract(&page(200, "<html><body>login</body></html>"), &query).unwrap_err();
        assert_eq!(err.template, USER_POSTS.name);
        let no_time = r#"<posts><post href="http://a.example/" tag="x" /></posts>"#;
        assert!(extract(&page(200, no_time), &query).is_err());
    }

    #[test]
    fn url_summary_keeps_feed_order() {
        let body = r#"[{"hash": "x", "title": "Example", "total_posts": "42",
            "top_tags": {"web": 5, "rust": 9, "code": 5}}]"#;
        let query = Query::url_summary("http://example.com/").unwrap();
        let extraction = extract(&page(200, body), &query).unwrap();

        assert_eq!(extraction.summary.title.as_deref(), Some("Example"));
        assert_eq!(extraction.summary.reported_total, Some(42));
        let tags: Vec<_> = extraction
            .summary
            .top_tags
            .iter()
            .map(|t| (t.tag.as_str(), t.count))
            .collect();
        assert_eq!(tags, [("web", 5), ("rust", 9), ("code", 5)]);
    }

    #[test]
    fn unknown_url_summary_is_empty() {
        let query = Query::url_summary("http://example.com/").unwrap();
        let extraction = extract(&page(200, "[]"), &query).unwrap();
        assert!(extraction.records.is_empty());
        assert_eq!(extraction.summary, PageSummary::default());
    }

    #[test]
    fn user_tags_feed() {
        let query = Query::user_tags("alice").unwrap();
        let extraction = extract(&page(200, r#"{"rust": 3, "web": "1"}"#), &query).unwrap();
        assert_eq!(
            extraction.records,
            Records::Tags(vec![
                TagCount::new("rust", 3).unwrap(),
                TagCount::new("web", 1).unwrap()
            ])
        );
        assert!(extract(&page(200, "{}"), &query).unwrap().records.is_empty());
    }

    #[test]
    fn reshaped_feed_is_layout_drift() {
        let query = Query::user_tags("alice").unwrap();
        let err = extract(&page(200, "[]"), &query).unwrap_err();
        assert_eq!(err.template, USER_TAGS.name);
        assert!(extract(&page(200, "<html></html>"), &query).is_err());
        assert!(extract(&page(200, r#"{"rust": -1}"#), &query).is_err());
    }

    #[test]
    fn network_feed_tags_relation() {
        let query = Query::user_network("alice", Relation::Fan).unwrap();
        let body = r#"[{"user": "bob", "dt": "2008-10-18T14:33:00Z"}, {"user": "carol"}]"#;
        assert_eq!(
            extract(&page(200, body), &query).unwrap().records,
            Records::Members(vec![
                NetworkMember::new("bob", Relation::Fan).unwrap(),
                NetworkMember::new("carol", Relation::Fan).unwrap(),
            ])
        );
    }

    #[test]
    fn counts_and_days() {
        assert_eq!(parse_count("1,234 bookmarks"), Some(1234));
        assert_eq!(parse_count(" 7 "), Some(7));
        assert_eq!(parse_count("none"), None);
        assert_eq!(parse_day("02 Mar 09", DATE_HEADER_FORMAT), NaiveDate::from_ymd_opt(2009, 3, 2));
    }
}
