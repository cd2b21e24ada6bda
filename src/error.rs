use std::fmt;

use thiserror::Error;

use crate::model::{PageKind, Records};

pub type Result<T> = core::result::Result<T, Error>;

/// Identifies the query a failure belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    pub kind: PageKind,
    pub subject: String,
}

impl QueryContext {
    pub fn new(kind: PageKind, subject: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
        }
    }
}

impl fmt::Display for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} query for '{}'", self.kind, self.subject)
    }
}

/// What made the throttle detector fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleSignal {
    /// The warning container was rendered into the page.
    Marker,
    /// The site answered with one of its blocking status codes.
    Status(u16),
    /// An earlier query of this session was already throttled; nothing was fetched.
    KnownThrottled,
}

/// Records gathered from the pages completed before a query failed.
/// Only ever attached to an error, never handed out as a result.
#[derive(Debug, Clone, PartialEq)]
pub struct Partial {
    pub pages: usize,
    pub records: Records,
}

impl Partial {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid query or configuration: {0}")]
    Config(String),

    #[error("Network error on page {page} of the {ctx}: {source}")]
    Network {
        ctx: QueryContext,
        page: usize,
        #[source]
        source: FetchError,
    },

    #[error("Throttled by the site on page {page} of the {ctx} ({signal:?})")]
    Throttled {
        ctx: QueryContext,
        page: usize,
        signal: ThrottleSignal,
        partial: Option<Box<Partial>>,
    },

    #[error("Page {page} of the {ctx} does not match template '{template}': {reason}")]
    Parse {
        ctx: QueryContext,
        page: usize,
        template: &'static str,
        reason: String,
    },

    #[error("The {ctx} was cancelled before page {page}")]
    Cancelled { ctx: QueryContext, page: usize },

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl Error {
    /// Attaches the records of completed pages to a throttle failure.
    /// Other errors are returned untouched.
    pub fn with_partial(self, partial: Partial) -> Self {
        match self {
            Error::Throttled {
                ctx, page, signal, ..
            } => Error::Throttled {
                ctx,
                page,
                signal,
                partial: Some(Box::new(partial)),
            },
            other => other,
        }
    }

    pub fn partial(&self) -> Option<&Partial> {
        match self {
            Error::Throttled { partial, .. } => partial.as_deref(),
            _ => None,
        }
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, Error::Throttled { .. })
    }
}

/// Transport level failure of a single page request.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("site rejected the credentials (status 401)")]
    Unauthorized,

    #[error("unexpected status {0}")]
    Status(u16),
}

/// Structural mismatch between a page body and its template.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct ExtractError {
    pub template: &'static str,
    pub reason: String,
}

impl ExtractError {
    pub fn new(template: &'static str, reason: impl Into<String>) -> Self {
        Self {
            template,
            reason: reason.into(),
        }
    }
}
