//! Last-resort brand inference from a product title.

use shelfwatch_core::BrandHeuristicConfig;

/// Generic leading words that are never brands.
const DEFAULT_STOP_WORDS: &[&str] = &[
    "the", "a", "an", "new", "premium", "adult", "puppy", "kitten", "senior", "junior", "dog",
    "dogs", "cat", "cats", "small", "medium", "large", "mini", "maxi", "complete", "natural",
    "organic", "grain", "free", "fresh", "dry", "wet", "original", "classic", "best", "value",
    "chicken", "beef", "lamb", "salmon", "turkey", "fish", "pack", "multipack", "bundle",
    "light", "super", "extra", "assorted", "mixed", "selection", "large-breed", "bird", "rabbit",
];

/// Guesses a brand from the leading word(s) of `title`.
///
/// The first word is a brand candidate when it starts with an uppercase
/// letter, is longer than `config.min_length` and is not a stop word. With
/// `combine_two_words` set, a second word that passes the same test is
/// appended (`"Royal Canin"`).
#[must_use]
pub fn brand_from_title(title: &str, config: &BrandHeuristicConfig) -> Option<String> {
    let mut words = title.split_whitespace().map(trim_punctuation);

    let first = words.next().filter(|w| looks_like_brand(w, config))?;

    if config.combine_two_words {
        if let Some(second) = words.next().filter(|w| looks_like_brand(w, config)) {
            return Some(format!("{first} {second}"));
        }
    }

    Some(first.to_owned())
}

fn looks_like_brand(word: &str, config: &BrandHeuristicConfig) -> bool {
    let starts_upper = word.chars().next().is_some_and(char::is_uppercase);
    if !starts_upper || word.chars().count() <= config.min_length {
        return false;
    }
    if word.chars().all(|c| c.is_ascii_digit() || !c.is_alphanumeric()) {
        return false;
    }
    let lower = word.to_lowercase();
    !DEFAULT_STOP_WORDS.contains(&lower.as_str())
        && !config
            .stop_words
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&lower))
}

fn trim_punctuation(word: &str) -> &str {
    word.trim_matches(|c: char| matches!(c, ',' | ':' | ';' | '-' | '|' | '(' | ')' | '"'))
}
