use scraper::{ElementRef, Html, Selector};

use crate::error::ThrottleSignal;
use crate::request::RawPage;
use crate::template::{BOOKMARK_HISTORY, THROTTLE_MARKER};

/// Statuses the site answers with when it blocks a client outright.
pub const THROTTLE_STATUSES: [u16; 2] = [503, 999];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    Throttled(ThrottleSignal),
}

/// Classifies a fetched page. The marker wins over the status code because
/// the site renders its warning with a 200 as often as not.
pub fn check(page: &RawPage) -> Verdict {
    if has_marker(&page.body) {
        return Verdict::Throttled(ThrottleSignal::Marker);
    }
    if THROTTLE_STATUSES.contains(&page.status) {
        return Verdict::Throttled(ThrottleSignal::Status(page.status));
    }
    Verdict::Ok
}

/// True when the warning container is a real element of the document and
/// not part of the bookmark list, where users control the content.
fn has_marker(body: &[u8]) -> bool {
    let text = String::from_utf8_lossy(body);
    let text = text.trim_start_matches('\u{feff}').trim_start();
    // Feeds are JSON; markup quoted inside a JSON string is not a page element.
    if !text.starts_with('<') {
        return false;
    }
    if !text.contains("throttle-warning") {
        return false;
    }

    let (Ok(marker), Ok(container)) = (
        Selector::parse(THROTTLE_MARKER),
        Selector::parse(BOOKMARK_HISTORY.container),
    ) else {
        return false;
    };
    let doc = Html::parse_document(text);
    let found = doc.select(&marker).any(|el| {
        !el.ancestors()
            .filter_map(ElementRef::wrap)
            .any(|ancestor| container.matches(&ancestor))
    });
    found
}
