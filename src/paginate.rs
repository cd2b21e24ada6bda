use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{QueryContext, ThrottleSignal};
use crate::model::{url_hash, ExtractedPage, Query};
use crate::parse::extract_blocking;
use crate::process::Session;
use crate::request::PageRequest;
use crate::throttle::{self, Verdict};
use crate::{Config, Error, Result, START_PAGE, USER_PAGE_SIZE};

/// Builds the request for page `index` of `query`.
pub fn page_request(query: &Query, config: &Config, index: usize) -> Result<PageRequest> {
    let page = index.to_string();
    let request = match query {
        Query::UrlSummary { url } => {
            let mut target = config.feeds_url()?;
            push_segments(&mut target, &["v2", "json", "urlinfo", url_hash(url).as_str()])?;
            PageRequest::new(target)
        }
        Query::UrlHistory { url } => {
            let mut target = config.site_url()?;
            push_segments(&mut target, &["url", url_hash(url).as_str()])?;
            target
                .query_pairs_mut()
                .append_pair("show", "all")
                .append_pair("page", &page);
            PageRequest::new(target)
        }
        Query::UserBookmarks { username } => {
            let mut target = config.site_url()?;
            push_segments(&mut target, &[username.as_str()])?;
            target
                .query_pairs_mut()
                .append_pair("setcount", USER_PAGE_SIZE)
                .append_pair("page", &page);
            PageRequest::new(target)
        }
        Query::UserPosts { username, password } => {
            let mut target = config.api_url()?;
            push_segments(&mut target, &["v1", "posts", "all"])?;
            // Credentials never travel in clear text.
            target
                .set_scheme("https")
                .map_err(|_| Error::Config("api_base cannot be switched to https".into()))?;
            let mut request = PageRequest::new(target);
            request.credentials = Some((username.clone(), password.clone()));
            request
        }
        Query::UserTags { username } => {
            let mut target = config.feeds_url()?;
            push_segments(&mut target, &["v2", "json", "tags", username.as_str()])?;
            PageRequest::new(target)
        }
        Query::UserNetwork { username, relation } => {
            let mut target = config.feeds_url()?;
            push_segments(&mut target, &["v2", "json", relation.feed(), username.as_str()])?;
            PageRequest::new(target)
        }
    };
    Ok(request)
}

fn push_segments(url: &mut reqwest::Url, segments: &[&str]) -> Result<()> {
    url.path_segments_mut()
        .map_err(|_| Error::Config("base URL cannot take path segments".into()))?
        .pop_if_empty()
        .extend(segments);
    Ok(())
}

/// Walks the pages of one query, strictly one after another.
///
/// Each call to [`Paginator::next_page`] fetches one page, checks it for
/// throttling and extracts it. The walk ends when the site runs out of
/// records, after the single page of an unpaged kind, on the page cap, or on
/// the first error. It cannot be resumed; a new query starts from page one.
pub struct Paginator<'a> {
    session: &'a Session,
    query: Query,
    ctx: QueryContext,
    next_index: usize,
    pages_fetched: usize,
    finished: bool,
    page_limit_reached: bool,
}

impl<'a> Paginator<'a> {
    pub fn new(session: &'a Session, query: Query) -> Self {
        let ctx = QueryContext::new(query.kind(), query.subject());
        Self {
            session,
            query,
            ctx,
            next_index: START_PAGE,
            pages_fetched: 0,
            finished: false,
            page_limit_reached: false,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// The cap stopped the walk while the site still had pages to give.
    pub fn page_limit_reached(&self) -> bool {
        self.page_limit_reached
    }

    /// Next page, `Ok(None)` once the walk is over.
    pub async fn next_page(&mut self) -> Result<Option<ExtractedPage>> {
        if self.finished {
            return Ok(None);
        }
        let index = self.next_index;
        let session = self.session;
        let config = session.config();

        if index >= START_PAGE + config.max_pages {
            self.finished = true;
            self.page_limit_reached = true;
            warn!(
                kind = %self.ctx.kind,
                subject = %self.ctx.subject,
                max_pages = config.max_pages,
                "page limit reached before the site ran out of pages"
            );
            return Ok(None);
        }

        // Cooperative checkpoint, also the short-circuit for a throttled session.
        self.checkpoint(index)?;
        if index > START_PAGE && !config.page_delay().is_zero() {
            let cancel = session.cancellation();
            tokio::select! {
                _ = cancel.cancelled() => return Err(self.fail(Error::Cancelled { ctx: self.ctx.clone(), page: index })),
                _ = sleep(config.page_delay()) => {}
            }
        }

        let request = page_request(&self.query, config, index).map_err(|e| self.fail(e))?;
        debug!(kind = %self.ctx.kind, page = index, url = %request.url, "requesting page");
        let raw = match session.fetcher().fetch(&request).await {
            Ok(raw) => raw,
            Err(source) => {
                return Err(self.fail(Error::Network {
                    ctx: self.ctx.clone(),
                    page: index,
                    source,
                }))
            }
        };

        if let Verdict::Throttled(signal) = throttle::check(&raw) {
            session.mark_throttled();
            warn!(
                kind = %self.ctx.kind,
                subject = %self.ctx.subject,
                page = index,
                ?signal,
                "site is throttling us, abandoning query"
            );
            return Err(self.fail(Error::Throttled {
                ctx: self.ctx.clone(),
                page: index,
                signal,
                partial: None,
            }));
        }

        let (raw, extraction) = extract_blocking(raw, self.query.clone())
            .await
            .map_err(|e| self.fail(e))?;
        let extraction = match extraction {
            Ok(extraction) => extraction,
            Err(e) => {
                return Err(self.fail(Error::Parse {
                    ctx: self.ctx.clone(),
                    page: index,
                    template: e.template,
                    reason: e.reason,
                }))
            }
        };

        self.next_index += 1;
        if extraction.records.is_empty() {
            self.finished = true;
            if index > START_PAGE {
                debug!(kind = %self.ctx.kind, page = index, "empty page, pagination exhausted");
                return Ok(None);
            }
        }
        if !self.ctx.kind.is_paged() {
            self.finished = true;
        }

        self.pages_fetched += 1;
        debug!(
            kind = %self.ctx.kind,
            page = index,
            records = extraction.records.len(),
            "extracted page"
        );
        Ok(Some(ExtractedPage {
            kind: self.ctx.kind,
            index,
            final_url: raw.final_url,
            records: extraction.records,
            summary: extraction.summary,
        }))
    }

    fn checkpoint(&mut self, index: usize) -> Result<()> {
        if self.session.cancellation().is_cancelled() {
            return Err(self.fail(Error::Cancelled {
                ctx: self.ctx.clone(),
                page: index,
            }));
        }
        if self.session.is_throttled() {
            return Err(self.fail(Error::Throttled {
                ctx: self.ctx.clone(),
                page: index,
                signal: ThrottleSignal::KnownThrottled,
                partial: None,
            }));
        }
        Ok(())
    }

    fn fail(&mut self, err: Error) -> Error {
        self.finished = true;
        err
    }
}
