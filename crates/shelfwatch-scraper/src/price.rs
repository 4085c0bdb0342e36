//! Free-text price parsing into integer pence.
//!
//! Retailers print prices as `"£12.99"`, `"99p"`, `"12,99"`, `"£1,234.56"`
//! or a bare `"12"`. Everything is normalized to pence so downstream
//! comparisons never touch floating point.

use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

static PENCE_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+)\s*p$").expect("valid pence regex"));

static POUNDS_AND_PENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)[.,](\d{1,2})$").expect("valid decimal price regex"));

static BARE_INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("valid integer regex"));

/// First money-looking token inside longer text such as `"Now £12.99 each"`.
static MONEY_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[£$€]\s*\d[\d,]*(?:\.\d{1,2})?|\d[\d,]*\.\d{1,2}|\b\d+p\b")
        .expect("valid money token regex")
});

/// Attributes that carry a machine-readable price, in preference order.
const PRICE_ATTRIBUTES: [&str; 3] = ["data-price", "content", "data-original-price"];

/// Parses a price string into pence.
///
/// Rules, first match wins:
/// 1. Empty after trimming → `None`.
/// 2. `"<digits>p"` → already pence.
/// 3. Currency symbols, whitespace and thousands commas are stripped.
/// 4. `"<int>.<1-2 digits>"` or `"<int>,<1-2 digits>"` → pounds and pence,
///    with a single fractional digit read as tenths (`"1.9"` → 190).
/// 5. Bare integer: below 100 is pounds, 100 and above is already pence.
///    `"150"` is therefore 150p, not £150; this is a known limitation of
///    the heuristic.
/// 6. Anything else → `None`.
#[must_use]
pub fn parse_price_to_pence(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(caps) = PENCE_ONLY.captures(trimmed) {
        return caps[1].parse::<i64>().ok();
    }

    let cleaned = strip_thousands_commas(
        &trimmed
            .chars()
            .filter(|c| !matches!(c, '£' | '$' | '€') && !c.is_whitespace())
            .collect::<String>(),
    );

    if let Some(caps) = POUNDS_AND_PENCE.captures(&cleaned) {
        let pounds = caps[1].parse::<i64>().ok()?;
        let fraction = format!("{:0<2}", &caps[2]);
        let pence = fraction.parse::<i64>().ok()?;
        return pounds.checked_mul(100)?.checked_add(pence);
    }

    if BARE_INTEGER.is_match(&cleaned) {
        let value = cleaned.parse::<i64>().ok()?;
        return if value < 100 {
            value.checked_mul(100)
        } else {
            Some(value)
        };
    }

    None
}

/// Parses a major-unit decimal such as a JSON-LD `offers.price` (`"12.99"`,
/// `"5"`) into pence. Unlike [`parse_price_to_pence`] a bare integer is always
/// pounds, because structured data never expresses prices in minor units.
#[must_use]
pub fn parse_decimal_pounds(text: &str) -> Option<i64> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !matches!(c, '£' | '$' | '€' | ',') && !c.is_whitespace())
        .collect();
    let value = cleaned.parse::<f64>().ok()?;
    pounds_to_pence(value)
}

/// Converts a pound amount to pence, rejecting negative and non-finite values.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn pounds_to_pence(value: f64) -> Option<i64> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * 100.0).round() as i64)
}

/// Finds the first money-looking token in longer text and parses it.
#[must_use]
pub fn find_price_in_text(text: &str) -> Option<i64> {
    parse_price_to_pence(text).or_else(|| {
        MONEY_TOKEN
            .find_iter(text)
            .find_map(|m| parse_price_to_pence(m.as_str()))
    })
}

/// Reads a price from an element, preferring machine-readable attributes over
/// visible text. A zero or unparseable price counts as "not found".
#[must_use]
pub fn price_from_element(element: ElementRef<'_>) -> Option<i64> {
    let from_attr = PRICE_ATTRIBUTES.iter().find_map(|attr| {
        element
            .value()
            .attr(attr)
            .and_then(|raw| parse_decimal_pounds(raw).or_else(|| parse_price_to_pence(raw)))
    });

    let price = from_attr.or_else(|| {
        let text = element.text().collect::<String>();
        find_price_in_text(&text)
    })?;

    (price > 0).then_some(price)
}

/// Removes commas that separate thousands (a comma followed by exactly three
/// digits), leaving decimal commas such as `"12,99"` alone.
fn strip_thousands_commas(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    for (i, ch) in s.char_indices() {
        if ch == ',' {
            let digits_follow = bytes.len() >= i + 4
                && bytes[i + 1..i + 4].iter().all(u8::is_ascii_digit)
                && bytes.get(i + 4).is_none_or(|b| !b.is_ascii_digit());
            if digits_follow {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
#[path = "price_test.rs"]
mod tests;
