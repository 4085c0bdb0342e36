use serde_json::Value;
use shelfwatch_core::PaginationSelectors;

use super::*;

const LISTING_URL: &str = "https://www.petshop.example/c/dog-food?page=2";

fn make_selectors() -> ListingSelectors {
    ListingSelectors {
        url_patterns: vec![r"/c/".to_owned()],
        block_selectors: vec!["#captcha-form".to_owned()],
        link: vec!["a.product-link".to_owned(), ".tile a".to_owned()],
        product_url_pattern: Some(r"/p/[a-z0-9-]+/\d+$".to_owned()),
        product_id_pattern: Some(r"/(\d+)$".to_owned()),
        category_pattern: Some(r"/c/([^/?#]+)".to_owned()),
        category_from_product_url: false,
        strip_query: true,
        pagination: Some(PaginationSelectors::default()),
        script_url_pattern: None,
    }
}

fn make_extractor(selectors: ListingSelectors) -> ListingUrlExtractor {
    ListingUrlExtractor::new("petshop", selectors).expect("valid patterns")
}

fn listing_urls(records: &[CrawlRecord]) -> Vec<&str> {
    records
        .iter()
        .filter_map(|r| match r {
            CrawlRecord::Listing(l) => Some(l.url.as_str()),
            _ => None,
        })
        .collect()
}

#[test]
fn relative_and_absolute_forms_of_same_href_yield_one_url() {
    let html = r#"<html><body>
      <a class="product-link" href="/p/bakers-adult-5kg/101">Bakers</a>
      <a class="product-link" href="https://www.petshop.example/p/bakers-adult-5kg/101">Bakers</a>
    </body></html>"#;
    let records: Vec<CrawlRecord> = make_extractor(make_selectors())
        .extract(html, LISTING_URL)
        .collect();
    assert_eq!(
        listing_urls(&records),
        vec!["https://www.petshop.example/p/bakers-adult-5kg/101"]
    );
}

#[test]
fn identity_key_deduplicates_different_urls_for_same_product() {
    let html = r#"<html><body>
      <a class="product-link" href="/p/bakers-adult-5kg/101">Bakers</a>
      <a class="product-link" href="/p/bakers-adult-dry-5kg/101">Bakers again</a>
      <a class="product-link" href="/p/pedigree-vital/202?ref=grid#top">Pedigree</a>
    </body></html>"#;
    let records: Vec<CrawlRecord> = make_extractor(make_selectors())
        .extract(html, LISTING_URL)
        .collect();
    assert_eq!(
        listing_urls(&records),
        vec![
            "https://www.petshop.example/p/bakers-adult-5kg/101",
            "https://www.petshop.example/p/pedigree-vital/202",
        ]
    );
}

#[test]
fn non_product_links_are_rejected() {
    let html = r#"<html><body>
      <a class="product-link" href="/c/cat-food">Cats</a>
      <a class="product-link" href="/help">Help</a>
      <a class="product-link" href="javascript:void(0)">Quick view</a>
      <div class="tile"><a href="/p/harringtons-2kg/303">Harringtons</a></div>
    </body></html>"#;
    let records: Vec<CrawlRecord> = make_extractor(make_selectors())
        .extract(html, LISTING_URL)
        .collect();
    assert_eq!(
        listing_urls(&records),
        vec!["https://www.petshop.example/p/harringtons-2kg/303"]
    );
}

#[test]
fn category_and_provenance_come_from_listing_page() {
    let html = r#"<a class="product-link" href="/p/bakers-adult-5kg/101">Bakers</a>"#;
    let records: Vec<CrawlRecord> = make_extractor(make_selectors())
        .extract(html, LISTING_URL)
        .collect();
    let CrawlRecord::Listing(listing) = &records[0] else {
        panic!("expected listing record first, got {:?}", records[0]);
    };
    assert_eq!(listing.retailer, "petshop");
    assert_eq!(listing.category.as_deref(), Some("dog-food"));
    assert_eq!(
        listing.metadata.get("source_url").and_then(Value::as_str),
        Some(LISTING_URL)
    );
    assert!(listing.metadata.contains_key("discovered_at"));
}

#[test]
fn category_from_product_url_when_configured() {
    let mut selectors = make_selectors();
    selectors.product_url_pattern = Some(r"/p/".to_owned());
    selectors.category_pattern = Some(r"/(?:c|p)/([^/?#]+)/".to_owned());
    selectors.category_from_product_url = true;
    let html = r#"<a class="product-link" href="/p/puppy/bakers-puppy-1kg">Bakers</a>"#;
    let records: Vec<CrawlRecord> = make_extractor(selectors)
        .extract(html, "https://www.petshop.example/c/offers/")
        .collect();
    let CrawlRecord::Listing(listing) = &records[0] else {
        panic!("expected listing record");
    };
    assert_eq!(listing.category.as_deref(), Some("puppy"));
}

#[test]
fn pagination_record_is_emitted_last_and_once() {
    let html = r#"<html><body>
      <a rel="next" href="?page=3">Next</a>
      <a class="product-link" href="/p/bakers-adult-5kg/101">Bakers</a>
      <a class="product-link" href="/p/pedigree-vital/202">Pedigree</a>
      <a rel="next" href="?page=3">Next</a>
    </body></html>"#;
    let records: Vec<CrawlRecord> = make_extractor(make_selectors())
        .extract(html, LISTING_URL)
        .collect();
    assert_eq!(records.len(), 3);
    let CrawlRecord::NextPage(next) = records.last().unwrap() else {
        panic!("expected pagination record last");
    };
    assert_eq!(next.url, "https://www.petshop.example/c/dog-food?page=3");
    assert_eq!(next.page, 3);
    assert_eq!(next.category.as_deref(), Some("dog-food"));
    assert_eq!(next.discovered_from, LISTING_URL);
}

#[test]
fn no_pagination_without_config() {
    let mut selectors = make_selectors();
    selectors.pagination = None;
    let html = r#"<a rel="next" href="?page=3">Next</a>"#;
    let records: Vec<CrawlRecord> = make_extractor(selectors).extract(html, LISTING_URL).collect();
    assert!(records.is_empty());
}

#[test]
fn script_embedded_urls_follow_dom_links() {
    let mut selectors = make_selectors();
    selectors.script_url_pattern = Some(r#""url"\s*:\s*"([^"]+)""#.to_owned());
    let html = r#"<html><body>
      <a class="product-link" href="/p/bakers-adult-5kg/101">Bakers</a>
      <script>window.__STATE__ = {"items": [
        {"url": "\/p\/bakers-adult-5kg\/101"},
        {"url": "\/p\/lilys-kitchen-casserole\/404"}
      ]};</script>
    </body></html>"#;
    let records: Vec<CrawlRecord> = make_extractor(selectors).extract(html, LISTING_URL).collect();
    assert_eq!(
        listing_urls(&records),
        vec![
            "https://www.petshop.example/p/bakers-adult-5kg/101",
            "https://www.petshop.example/p/lilys-kitchen-casserole/404",
        ]
    );
}

#[test]
fn block_page_yields_nothing() {
    let html = r#"<form id="captcha-form"></form><a class="product-link" href="/p/x/1">X</a>"#;
    assert_eq!(
        make_extractor(make_selectors())
            .extract(html, LISTING_URL)
            .count(),
        0
    );
}

struct OnlyEvenIds;

impl ListingHooks for OnlyEvenIds {
    fn is_product_url(&self, rules: &ListingRules, url: &str) -> bool {
        rules.is_product_url(url)
            && url
                .rsplit('/')
                .next()
                .and_then(|id| id.parse::<u32>().ok())
                .is_some_and(|id| id % 2 == 0)
    }
}

#[test]
fn hook_can_narrow_product_validation() {
    let html = r#"
      <a class="product-link" href="/p/a/101">A</a>
      <a class="product-link" href="/p/b/202">B</a>"#;
    let records: Vec<CrawlRecord> = make_extractor(make_selectors())
        .with_hooks(OnlyEvenIds)
        .extract(html, LISTING_URL)
        .collect();
    assert_eq!(
        listing_urls(&records),
        vec!["https://www.petshop.example/p/b/202"]
    );
}

#[test]
fn extraction_is_lazy_and_single_pass() {
    let html = r#"
      <a class="product-link" href="/p/a/101">A</a>
      <a class="product-link" href="/p/b/202">B</a>"#;
    let extractor = make_extractor(make_selectors());
    let mut iter = extractor.extract(html, LISTING_URL);
    assert!(matches!(iter.next(), Some(CrawlRecord::Listing(_))));
    assert!(matches!(iter.next(), Some(CrawlRecord::Listing(_))));
    assert!(iter.next().is_none());
    assert!(iter.next().is_none());
}

#[test]
fn can_handle_uses_url_patterns() {
    let extractor = make_extractor(make_selectors());
    assert!(extractor.can_handle(LISTING_URL));
    assert!(!extractor.can_handle("https://www.petshop.example/p/a/101"));
}
