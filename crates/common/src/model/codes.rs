//! Normalization of classification, country and language codes.
//!
//! Every code is normalized before it is compared or stored, so that
//! `45233000-6`, `45233000` and ` 45233000 ` all land on the same value.

use std::collections::BTreeSet;

/// `45233000-6` -> `45233000`. The check digit after the hyphen is dropped.
pub fn normalize_cpv(code: &str) -> Option<String> {
    let trimmed = code.trim();
    let head = trimmed.split('-').next().unwrap_or(trimmed);
    let normalized: String = head
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();
    (!normalized.is_empty()).then_some(normalized)
}

/// `be-100` -> `BE100`
pub fn normalize_nuts(code: &str) -> Option<String> {
    let normalized: String = code
        .trim()
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();
    (!normalized.is_empty()).then_some(normalized)
}

pub fn normalize_country(code: &str) -> Option<String> {
    let normalized = code.trim().to_uppercase();
    (!normalized.is_empty()).then_some(normalized)
}

/// Lowercase ISO 639-1. EU feeds publish ISO 639-2 (`FRA`, `NLD`), which is
/// folded for the languages the translation cache knows about.
pub fn normalize_language(code: &str) -> Option<String> {
    let lower = code.trim().to_lowercase();
    let folded = match lower.as_str() {
        "fra" | "fre" => "fr",
        "nld" | "dut" => "nl",
        "eng" => "en",
        "deu" | "ger" => "de",
        "" => return None,
        other => other,
    };
    Some(folded.to_string())
}

/// Digits of a CPV prefix, used to decide whether a match was precise.
pub fn cpv_prefix_depth(prefix: &str) -> usize {
    prefix.chars().take_while(|c| c.is_ascii_digit()).count()
}

pub fn normalize_set<'a, I, F>(codes: I, normalize: F) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
    F: Fn(&str) -> Option<String>,
{
    codes.into_iter().filter_map(|c| normalize(c)).collect()
}

/// Order-preserving normalization with duplicates removed.
pub fn normalize_list<'a, I, F>(codes: I, normalize: F) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
    F: Fn(&str) -> Option<String>,
{
    let mut out: Vec<String> = Vec::new();
    for code in codes.into_iter().filter_map(|c| normalize(c)) {
        if !out.contains(&code) {
            out.push(code);
        }
    }
    out
}

pub fn clean_text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
