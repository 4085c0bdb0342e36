//! "Next page" discovery for paginated listing pages.
//!
//! Only the single successor is reported; walking the remaining pages is
//! the caller's job, one crawl per page.

use scraper::Html;
use shelfwatch_core::PaginationSelectors;

use crate::selector::{first_attr, select_first_where};
use crate::urls::{query_param, resolve_url};

/// Resolves the next-page link on `doc`, if any, together with its 1-based
/// page number.
///
/// The page number comes from the link's own page parameter when present,
/// otherwise from the source URL's page parameter plus one (a missing
/// parameter means page 1). A link pointing back at the source page is
/// ignored.
#[must_use]
pub fn find_next_page(
    doc: &Html,
    source_url: &str,
    pagination: &PaginationSelectors,
) -> Option<(String, u32)> {
    let href = select_first_where(doc, &pagination.next, |el| {
        first_attr(*el, &["href"]).is_some()
    })
    .and_then(|el| first_attr(el, &["href"]))?;

    let next_url = resolve_url(source_url, &href)?;
    if next_url == source_url {
        return None;
    }

    let page = next_page_number(&next_url, source_url, &pagination.page_param);
    Some((next_url, page))
}

/// Page number of `next_url`: explicit parameter first, else current + 1.
#[must_use]
pub fn next_page_number(next_url: &str, source_url: &str, page_param: &str) -> u32 {
    query_param(next_url, page_param)
        .and_then(|p| p.parse::<u32>().ok())
        .filter(|p| *p > 0)
        .unwrap_or_else(|| current_page(source_url, page_param).saturating_add(1))
}

/// Page number encoded in `url`, defaulting to 1.
#[must_use]
pub fn current_page(url: &str, page_param: &str) -> u32 {
    query_param(url, page_param)
        .and_then(|p| p.parse::<u32>().ok())
        .filter(|p| *p > 0)
        .unwrap_or(1)
}
