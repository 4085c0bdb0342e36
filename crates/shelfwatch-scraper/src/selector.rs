//! Ordered, self-healing CSS selector resolution.
//!
//! Each retailer lists the selectors it wants tried for a field, most
//! preferred first. The first selector that matches an acceptable element
//! wins, so a markup change only breaks extraction once every historical
//! selector has stopped matching.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};

/// Parses a selector, logging and discarding invalid ones.
pub(crate) fn parse_selector(raw: &str) -> Option<Selector> {
    match Selector::parse(raw) {
        Ok(selector) => Some(selector),
        Err(e) => {
            tracing::debug!(selector = raw, error = ?e, "skipping invalid CSS selector");
            None
        }
    }
}

/// Returns the first element matched by any of `selectors`, in priority order.
#[must_use]
pub fn select_first<'a, S>(doc: &'a Html, selectors: &[S]) -> Option<ElementRef<'a>>
where
    S: AsRef<str>,
{
    select_first_where(doc, selectors, |_| true)
}

/// Returns the first element, in selector priority order, that `accept`
/// approves. Selectors are tried one at a time; within a selector, matches
/// are visited in document order.
pub fn select_first_where<'a, S, P>(
    doc: &'a Html,
    selectors: &[S],
    accept: P,
) -> Option<ElementRef<'a>>
where
    S: AsRef<str>,
    P: Fn(&ElementRef<'a>) -> bool,
{
    selectors
        .iter()
        .filter_map(|raw| parse_selector(raw.as_ref()))
        .find_map(|selector| doc.select(&selector).find(|el| accept(el)))
}

/// Returns every element matched by `selectors`, selector by selector, with
/// elements matched by more than one selector reported once.
#[must_use]
pub fn select_all<'a, S>(doc: &'a Html, selectors: &[S]) -> Vec<ElementRef<'a>>
where
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for selector in selectors.iter().filter_map(|raw| parse_selector(raw.as_ref())) {
        for element in doc.select(&selector) {
            if seen.insert(element.id()) {
                out.push(element);
            }
        }
    }
    out
}

/// Returns `true` when any of `selectors` matches at least one element.
#[must_use]
pub fn any_matches<S>(doc: &Html, selectors: &[S]) -> bool
where
    S: AsRef<str>,
{
    select_first(doc, selectors).is_some()
}

/// Text of the first element with non-blank text, whitespace-collapsed.
#[must_use]
pub fn select_text<S>(doc: &Html, selectors: &[S]) -> Option<String>
where
    S: AsRef<str>,
{
    select_first_where(doc, selectors, |el| !element_text(*el).is_empty()).map(element_text)
}

/// First non-blank value of any of `attrs` on an element matched by
/// `selectors`. Attributes are tried in order on each element.
#[must_use]
pub fn select_attr<S>(doc: &Html, selectors: &[S], attrs: &[&str]) -> Option<String>
where
    S: AsRef<str>,
{
    select_first_where(doc, selectors, |el| first_attr(*el, attrs).is_some())
        .and_then(|el| first_attr(el, attrs))
}

/// Collapses an element's descendant text into single-spaced, trimmed text.
#[must_use]
pub fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

pub(crate) fn first_attr(element: ElementRef<'_>, attrs: &[&str]) -> Option<String> {
    attrs.iter().find_map(|attr| {
        element
            .value()
            .attr(attr)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    })
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
