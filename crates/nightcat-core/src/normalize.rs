//! Comparison-key normalization for titles, venues and artist names.
//!
//! Every caller that compares strings across sources goes through these
//! functions so that dedup keys and similarity scoring agree on one form.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static ARTIST_QUALIFIERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s*\((?:live|dj set|dj|hybrid|hybrid live|live set|all night long|all night|extended set|closing set|opening set|b2b[^)]*)\)\s*",
    )
    .expect("artist qualifier pattern")
});

static ARTIST_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*&\s*(?:friends|guests|more|special guests?)\s*$")
        .expect("artist suffix pattern")
});

static PRESENTS_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^.*?\bpresents\s*:?\s*").expect("presents prefix pattern"));

static B2B_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+[Bb]2[Bb]\s+").expect("b2b split pattern"));

static VENUE_ROOM_QUALIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*[-–—]\s*(?:zone\s+\w+|room\s+\w+|hall|studio|stage)\b.*$")
        .expect("venue room pattern")
});

static VENUE_LEADING_THE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^the\s+").expect("venue article pattern"));

static VENUE_TRAILING_AREA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s+(?:ny|nyc|brooklyn|bk|manhattan|queens|bushwick|williamsburg|ridgewood)$")
        .expect("venue area pattern")
});

/// Lowercase, strip accents and punctuation, collapse whitespace.
pub fn normalize(s: &str) -> String {
    // NFKD can yield uppercase ("℃" -> "°C"), so decompose before folding case.
    let folded = s
        .nfkd()
        .collect::<String>()
        .to_lowercase()
        .nfkd()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect::<String>();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Venue form: "&" -> "and", room/zone qualifiers, a leading "the" and a
/// trailing borough or neighborhood token are all removed.
pub fn normalize_venue(s: &str) -> String {
    let s = s.replace('&', "and");
    let s = VENUE_ROOM_QUALIFIER.replace(&s, "");
    let s = normalize(&s);
    let s = VENUE_LEADING_THE.replace(&s, "");
    let s = VENUE_TRAILING_AREA.replace(&s, "");
    s.trim().to_string()
}

/// Artist form: performance qualifiers, "& friends" suffixes and
/// "<promoter> presents:" prefixes are removed before the base pass.
pub fn normalize_artist(s: &str) -> String {
    let s = ARTIST_QUALIFIERS.replace_all(s, " ");
    let s = ARTIST_SUFFIX.replace(&s, "");
    let s = PRESENTS_PREFIX.replace(&s, "");
    normalize(&s)
}

/// Split a compound "A b2b B" entry into normalized artist names.
pub fn split_artist_entry(s: &str) -> Vec<String> {
    let parts = B2B_SPLIT.split(s).collect::<Vec<_>>();
    if parts.len() > 1 {
        return parts
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .map(normalize_artist)
            .collect();
    }
    vec![normalize_artist(s)]
}

/// Flatten a display lineup into the set of unique normalized names.
pub fn normalize_artist_list<S: AsRef<str>>(artists: &[S]) -> BTreeSet<String> {
    artists
        .iter()
        .flat_map(|entry| split_artist_entry(entry.as_ref()))
        .filter(|name| !name.is_empty())
        .collect()
}
