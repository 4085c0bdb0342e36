use super::*;

fn retailer(name: &str) -> RetailerConfig {
    RetailerConfig {
        name: name.to_string(),
        slug: None,
        base_url: "https://shop.example".to_string(),
        enabled: true,
        request_delay_ms: None,
        currency: None,
        details: None,
        listing: None,
        notes: None,
    }
}

#[test]
fn slug_simple_name() {
    assert_eq!(retailer("Pets at Home").slug(), "pets-at-home");
}

#[test]
fn slug_strips_ampersand() {
    assert_eq!(retailer("B&M").slug(), "bm");
}

#[test]
fn slug_apostrophe() {
    assert_eq!(retailer("Sainsbury's").slug(), "sainsburys");
}

#[test]
fn slug_collapses_repeated_spaces() {
    assert_eq!(retailer("Jollyes  The Pet People").slug(), "jollyes-the-pet-people");
}

#[test]
fn slug_override_is_normalized() {
    let mut r = retailer("Pets at Home");
    r.slug = Some("PAH".to_string());
    assert_eq!(r.slug(), "pah");
}

#[test]
fn validate_rejects_empty_name() {
    let file = RetailersFile {
        retailers: vec![retailer("   ")],
    };
    let err = validate_retailers(&file).unwrap_err();
    assert!(err.to_string().contains("non-empty"));
}

#[test]
fn validate_rejects_duplicate_slug() {
    let file = RetailersFile {
        retailers: vec![retailer("B&M"), retailer("BM")],
    };
    let err = validate_retailers(&file).unwrap_err();
    assert!(err.to_string().contains("duplicate retailer slug: 'bm'"));
}

#[test]
fn validate_rejects_relative_base_url() {
    let mut r = retailer("Zooplus");
    r.base_url = "zooplus.co.uk".to_string();
    let err = validate_retailers(&RetailersFile { retailers: vec![r] }).unwrap_err();
    assert!(err.to_string().contains("base_url"));
}

#[test]
fn validate_rejects_lowercase_currency() {
    let mut r = retailer("Zooplus");
    r.currency = Some("gbp".to_string());
    let err = validate_retailers(&RetailersFile { retailers: vec![r] }).unwrap_err();
    assert!(err.to_string().contains("invalid currency"));
}

#[test]
fn validate_rejects_bad_listing_regex() {
    let mut r = retailer("Zooplus");
    r.listing = Some(ListingSelectors {
        product_url_pattern: Some("/product/(".to_string()),
        ..ListingSelectors::default()
    });
    let err = validate_retailers(&RetailersFile { retailers: vec![r] }).unwrap_err();
    assert!(err.to_string().contains("invalid pattern"));
}

#[test]
fn validate_rejects_empty_link_selectors() {
    let mut r = retailer("Zooplus");
    r.listing = Some(ListingSelectors {
        link: vec![],
        ..ListingSelectors::default()
    });
    let err = validate_retailers(&RetailersFile { retailers: vec![r] }).unwrap_err();
    assert!(err.to_string().contains("link selector"));
}

#[test]
fn parse_retailers_applies_defaults() {
    let yaml = r#"
retailers:
  - name: Pets at Home
    base_url: https://www.petsathome.com
    listing:
      product_url_pattern: "/product/"
      pagination: {}
    details:
      title: ["h1.product-title"]
"#;
    let file = parse_retailers(yaml).expect("valid yaml");
    let r = file.find("pets-at-home").expect("retailer present");
    assert!(r.enabled);
    let listing = r.listing.as_ref().unwrap();
    assert_eq!(listing.link, vec!["a[href]".to_string()]);
    assert!(listing.strip_query);
    let pagination = listing.pagination.as_ref().unwrap();
    assert_eq!(pagination.page_param, "page");
    assert_eq!(pagination.next, vec!["a[rel=next]".to_string()]);
    let details = r.details.as_ref().unwrap();
    assert_eq!(details.brand_heuristic.min_length, 2);
    assert!(!details.brand_heuristic.combine_two_words);
}

#[test]
fn enabled_filters_disabled_retailers() {
    let mut off = retailer("Zooplus");
    off.enabled = false;
    let file = RetailersFile {
        retailers: vec![retailer("Pets at Home"), off],
    };
    let slugs: Vec<String> = file.enabled().map(RetailerConfig::slug).collect();
    assert_eq!(slugs, vec!["pets-at-home".to_string()]);
}

#[test]
fn load_retailers_reports_missing_file() {
    let err = load_retailers(Path::new("/nonexistent/retailers.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::RetailersFileIo { .. }));
}

#[test]
fn load_retailers_from_shipped_file() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("config")
        .join("retailers.yaml");
    assert!(path.exists(), "retailers.yaml missing at {path:?}");
    let file = load_retailers(&path).expect("failed to load retailers.yaml");
    assert!(!file.retailers.is_empty());
    assert!(file.find("bm").is_some());
    for retailer in &file.retailers {
        assert!(
            retailer.details.is_some() || retailer.listing.is_some(),
            "retailer '{}' has no selector tables",
            retailer.name
        );
    }
}
