use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::aggregate::Aggregator;
use crate::model::{NetworkMember, PageKind, Query, QueryResult, Relation, TagCount};
use crate::paginate::Paginator;
use crate::request::{HttpFetcher, PageFetcher};
use crate::{info_time, Config, Result};

/// Handle to everything queries share: configuration, the fetcher, the
/// throttle flag and the cancellation token. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    fetcher: Arc<dyn PageFetcher>,
    // Set by the first page found throttled, never cleared.
    throttled: AtomicBool,
    cancel: CancellationToken,
    limiter: Semaphore,
}

impl Session {
    /// Session over a `reqwest` client configured from `config`.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let fetcher = HttpFetcher::new(&config)?;
        Self::with_fetcher(config, Arc::new(fetcher))
    }

    pub fn with_fetcher(config: Config, fetcher: Arc<dyn PageFetcher>) -> Result<Self> {
        config.validate()?;
        let limiter = Semaphore::new(config.concurrency_limit);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                fetcher,
                throttled: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                limiter,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Cancelling the token stops every query of this session at its next page.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Whether the site has throttled any query of this session.
    pub fn is_throttled(&self) -> bool {
        self.inner.throttled.load(Ordering::Acquire)
    }

    pub(crate) fn mark_throttled(&self) {
        self.inner.throttled.store(true, Ordering::Release);
    }

    pub(crate) fn fetcher(&self) -> &dyn PageFetcher {
        self.inner.fetcher.as_ref()
    }

    /// Public bookmarks of `url` with their tags and dates, plus the title,
    /// total and top tags the site reports for it.
    pub async fn get_url_history(&self, url: &str) -> Result<QueryResult> {
        let summary = Query::url_summary(url)?;
        let history = Query::url_history(url)?;
        let _permit = self.inner.limiter.acquire().await.ok();

        let start_time = Local::now();
        let mut aggregator = Aggregator::new(PageKind::BookmarkHistory, history.subject())
            .with_bookmark_limit(self.config().bookmark_limit());
        self.drive(summary, &mut aggregator).await?;
        self.drive(history, &mut aggregator).await?;
        let result = aggregator.finish();
        info_time!(
            start_time,
            "Fetched history of {url}: {} bookmarks over {} pages",
            result.bookmark_count,
            result.pages_fetched
        );
        Ok(result)
    }

    /// Bookmarks of `username`. With the password all of them are read from the
    /// authenticated posts API, private bookmarks included.
    pub async fn get_user_bookmarks(
        &self,
        username: &str,
        password: Option<&str>,
    ) -> Result<QueryResult> {
        let query = Query::user_bookmarks(username, password)?;
        let _permit = self.inner.limiter.acquire().await.ok();

        let start_time = Local::now();
        let mut aggregator = Aggregator::new(query.kind(), query.subject())
            .with_bookmark_limit(self.config().bookmark_limit());
        self.drive(query, &mut aggregator).await?;
        let result = aggregator.finish();
        info_time!(
            start_time,
            "Fetched bookmarks of {username}: {} bookmarks over {} pages",
            result.bookmark_count,
            result.pages_fetched
        );
        Ok(result)
    }

    /// The full public tag vocabulary of `username`, in the order the site lists it.
    pub async fn get_user_tags(&self, username: &str) -> Result<Vec<TagCount>> {
        let query = Query::user_tags(username)?;
        let _permit = self.inner.limiter.acquire().await.ok();

        let mut aggregator = Aggregator::new(query.kind(), query.subject());
        self.drive(query, &mut aggregator).await?;
        let tags = aggregator.into_tags();
        info_time!("Fetched {} tags of {username}", tags.len());
        Ok(tags)
    }

    /// Members of the network of `username`, followed by their fans.
    pub async fn get_user_network(&self, username: &str) -> Result<Vec<NetworkMember>> {
        let members = Query::user_network(username, Relation::Member)?;
        let fans = Query::user_network(username, Relation::Fan)?;
        let _permit = self.inner.limiter.acquire().await.ok();

        let mut aggregator = Aggregator::new(PageKind::UserNetwork, members.subject());
        self.drive(members, &mut aggregator).await?;
        self.drive(fans, &mut aggregator).await?;
        let network = aggregator.into_members();
        info_time!("Fetched {} network entries of {username}", network.len());
        Ok(network)
    }

    /// Histories of several URLs, at most `concurrency_limit` at a time.
    /// Results come back in input order; one URL failing does not stop the others.
    pub async fn get_url_histories<I, S>(&self, urls: I) -> Result<Vec<(String, Result<QueryResult>)>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut task_set = JoinSet::new();
        for (i, url) in urls.into_iter().map(Into::into).enumerate() {
            task_set.spawn({
                // Session is an Arc, clones are cheap
                let session = self.clone();
                async move {
                    let res = session.get_url_history(&url).await;
                    (i, url, res)
                }
            });
        }

        let mut results = Vec::with_capacity(task_set.len());
        while let Some(task) = task_set.join_next().await {
            results.push(task?);
        }
        results.sort_unstable_by_key(|(i, _, _)| *i);
        Ok(results.into_iter().map(|(_, url, res)| (url, res)).collect())
    }

    /// Feeds the pages of `query` into `aggregator` until the walk ends or the
    /// aggregator holds enough bookmarks. A throttle failure takes along
    /// whatever the aggregator already holds.
    async fn drive(&self, query: Query, aggregator: &mut Aggregator) -> Result<()> {
        let mut paginator = Paginator::new(self, query);
        loop {
            match paginator.next_page().await {
                Ok(Some(page)) => {
                    aggregator.push(page);
                    if aggregator.bookmarks_full() {
                        aggregator.set_bookmark_limit_reached();
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    let partial = aggregator.partial();
                    return Err(if partial.is_empty() {
                        err
                    } else {
                        err.with_partial(partial)
                    });
                }
            }
        }
        aggregator.set_page_limit_reached(paginator.page_limit_reached());
        Ok(())
    }
}
