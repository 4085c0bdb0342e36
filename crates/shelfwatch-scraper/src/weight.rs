//! Weight and pack-count parsing.
//!
//! Weights normalize to grams; millilitres count as grams and imperial
//! pounds and ounces are converted. Pack formats such as `"12 x 400g"` yield
//! the per-unit weight, and the multiplier is reported separately by
//! [`parse_quantity`].

use std::sync::LazyLock;

use regex::Regex;

static WEIGHT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d+(?:[.,]\d+)?)\s*(kilograms?|kgs?|grams?|millilitres?|milliliters?|ml|pounds?|lbs?|ounces?|oz|litres?|liters?|ltr|g|l)\b",
    )
    .expect("valid weight regex")
});

static DEFAULT_QUANTITY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(\d+)\s*[x×]\s*\d+(?:[.,]\d+)?\s*(?:kg|g|ml|l|ltr|litres?)\b",
        r"(?i)\bpack\s+of\s+(\d+)\b",
        r"(?i)\b(\d+)\s*-?\s*pack\b",
        r"(?i)\b(\d+)\s*(?:pcs|pieces)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid default quantity regex"))
    .collect()
});

/// Parses the first weight in `text` into grams.
///
/// Recognizes kg, g, ml, lb, oz and l/litre/litres/ltr in any case, with or without a
/// space before the unit, and with `.` or `,` as decimal separator.
#[must_use]
pub fn parse_weight_grams(text: &str) -> Option<u32> {
    WEIGHT.captures_iter(text).find_map(|caps| {
        let amount = parse_amount(&caps[1])?;
        let multiplier = unit_multiplier(&caps[2])?;
        to_grams(amount * multiplier)
    })
}

/// Returns the first weight found across `candidates`, in order.
///
/// Used to cascade from offer text to weight field to the full title.
pub fn first_weight<'a, I>(candidates: I) -> Option<u32>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates.into_iter().find_map(parse_weight_grams)
}

/// Extracts a pack count from a product title.
///
/// `patterns` are tried first, in order; each must capture the count in its
/// first group. The built-in fallbacks cover `"N x 400g"`, `"pack of N"`,
/// `"N pack"`/`"N-pack"` and `"N pcs"`.
#[must_use]
pub fn parse_quantity(title: &str, patterns: &[Regex]) -> Option<u32> {
    patterns
        .iter()
        .chain(DEFAULT_QUANTITY_PATTERNS.iter())
        .find_map(|re| {
            re.captures(title)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .filter(|n| *n > 0)
        })
}

fn parse_amount(raw: &str) -> Option<f64> {
    // "1,500" is a thousands separator, "1,5" a decimal comma.
    let normalized = match raw.split_once(',') {
        Some((whole, frac)) if frac.len() == 3 => format!("{whole}{frac}"),
        Some((whole, frac)) => format!("{whole}.{frac}"),
        None => raw.to_owned(),
    };
    normalized.parse::<f64>().ok()
}

const GRAMS_PER_POUND: f64 = 453.592;
const GRAMS_PER_OUNCE: f64 = 28.3495;

fn unit_multiplier(unit: &str) -> Option<f64> {
    let unit = unit.to_ascii_lowercase();
    match unit.as_str() {
        "kg" | "kgs" | "kilogram" | "kilograms" | "l" | "ltr" | "litre" | "litres" | "liter"
        | "liters" => Some(1000.0),
        "g" | "gram" | "grams" | "ml" | "millilitre" | "millilitres" | "milliliter"
        | "milliliters" => Some(1.0),
        "lb" | "lbs" | "pound" | "pounds" => Some(GRAMS_PER_POUND),
        "oz" | "ounce" | "ounces" => Some(GRAMS_PER_OUNCE),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_grams(value: f64) -> Option<u32> {
    let rounded = value.round();
    if (1.0..=f64::from(u32::MAX)).contains(&rounded) {
        Some(rounded as u32)
    } else {
        None
    }
}
