//! URL resolution and canonicalization for discovered links.

use reqwest::Url;

/// Schemes that never point at a crawlable page.
const IGNORED_PREFIXES: [&str; 5] = ["javascript:", "mailto:", "tel:", "data:", "#"];

/// Resolves `href` against the page it was found on.
///
/// Handles absolute (`https://…`), protocol-relative (`//host/…`),
/// root-relative (`/p/1`) and document-relative (`p/1`, `../p/1`) forms.
/// Returns `None` for anchors, non-http schemes and unparseable input.
#[must_use]
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || IGNORED_PREFIXES
            .iter()
            .any(|p| href.get(..p.len()).is_some_and(|h| h.eq_ignore_ascii_case(p)))
    {
        return None;
    }

    let resolved = match Url::parse(href) {
        Ok(url) => url,
        Err(_) => Url::parse(base).ok()?.join(href).ok()?,
    };

    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// Canonical form of a product URL: fragment removed, trailing slash trimmed
/// from non-root paths and, when `strip_query` is set, the query removed.
///
/// Unparseable input is returned trimmed but otherwise unchanged.
#[must_use]
pub fn canonicalize_url(url: &str, strip_query: bool) -> String {
    let Ok(mut parsed) = Url::parse(url.trim()) else {
        return url.trim().to_owned();
    };
    parsed.set_fragment(None);
    if strip_query || parsed.query() == Some("") {
        parsed.set_query(None);
    }
    let path = parsed.path().to_owned();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
    }
    parsed.to_string()
}

/// Value of query parameter `name`, if present and non-empty.
#[must_use]
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// Host name of `url`, falling back to the input when it does not parse.
#[must_use]
pub fn extract_domain(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_else(|| url.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://www.petshop.example/dog/dry-food/?sort=price";

    #[test]
    fn resolves_absolute_href_unchanged() {
        assert_eq!(
            resolve_url(PAGE, "https://www.petshop.example/p/123").as_deref(),
            Some("https://www.petshop.example/p/123")
        );
    }

    #[test]
    fn resolves_protocol_relative_href() {
        assert_eq!(
            resolve_url(PAGE, "//cdn.petshop.example/img/1.jpg").as_deref(),
            Some("https://cdn.petshop.example/img/1.jpg")
        );
    }

    #[test]
    fn resolves_root_relative_href() {
        assert_eq!(
            resolve_url(PAGE, "/p/123").as_deref(),
            Some("https://www.petshop.example/p/123")
        );
    }

    #[test]
    fn resolves_document_relative_href() {
        assert_eq!(
            resolve_url(PAGE, "royal-canin-2kg").as_deref(),
            Some("https://www.petshop.example/dog/dry-food/royal-canin-2kg")
        );
        assert_eq!(
            resolve_url(PAGE, "../wet-food/").as_deref(),
            Some("https://www.petshop.example/dog/wet-food/")
        );
    }

    #[test]
    fn ignores_non_page_links() {
        for href in ["", "   ", "#reviews", "javascript:void(0)", "mailto:a@b.c", "TEL:0123"] {
            assert!(resolve_url(PAGE, href).is_none(), "{href} should be ignored");
        }
        assert!(resolve_url(PAGE, "ftp://files.example/x").is_none());
    }

    #[test]
    fn canonicalize_strips_fragment_query_and_trailing_slash() {
        assert_eq!(
            canonicalize_url("https://shop.example/p/123/?ref=grid#reviews", true),
            "https://shop.example/p/123"
        );
    }

    #[test]
    fn canonicalize_can_keep_query() {
        assert_eq!(
            canonicalize_url("https://shop.example/p?id=123#x", false),
            "https://shop.example/p?id=123"
        );
    }

    #[test]
    fn canonicalize_keeps_root_path() {
        assert_eq!(
            canonicalize_url("https://shop.example/", true),
            "https://shop.example/"
        );
    }

    #[test]
    fn query_param_reads_value() {
        assert_eq!(
            query_param("https://shop.example/c/dog?page=3&sort=a", "page").as_deref(),
            Some("3")
        );
        assert!(query_param("https://shop.example/c/dog?page=", "page").is_none());
    }

    #[test]
    fn extract_domain_strips_scheme_and_path() {
        assert_eq!(extract_domain("https://www.zooplus.co.uk/shop"), "www.zooplus.co.uk");
        assert_eq!(extract_domain("not a url"), "not a url");
    }
}
