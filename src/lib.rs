//! Scraper for the bookmark histories, tag vocabularies and networks of a
//! social bookmarking site that only publishes most of this in HTML meant for browsers.
//!
//! Pages are walked one at a time per query ([`paginate::Paginator`]), checked for
//! the site's throttling notice ([`throttle`]), read against a pinned layout
//! ([`parse`], [`template`]) and merged into a result ([`aggregate`]).
//! [`Session`] ties the steps together and holds the state queries share.

mod macros;

pub mod aggregate;
pub mod config;
pub mod error;
pub mod model;
pub mod paginate;
pub mod parse;
pub mod process;
pub mod request;
pub mod template;
pub mod throttle;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use model::{BookmarkRecord, NetworkMember, QueryResult, Relation, TagCount};
pub use process::Session;

/// The site counts pages from one.
const START_PAGE: usize = 1;
/// Bookmarks per user page; the largest page size the site accepts.
const USER_PAGE_SIZE: &str = "100";
