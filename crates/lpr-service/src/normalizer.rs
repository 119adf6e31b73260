//! Plate text clean-up and national formatting.
//!
//! Pure string-to-string; never fails. Output is either a formatted plate
//! (`61A-123.45`, `59C1-123.45`, `30E-123.456`, `29A-1234`) or the cleaned
//! alphanumeric input when no plate structure is found.

use once_cell::sync::Lazy;
use regex::Regex;

/// Car series: two digits, one letter; body of 4-6 digits
static CAR_PLATE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(\d{2}[A-Z])(\d{4,6})").ok());
/// Motorbike series: two digits, letter, digit; body of 4-5 digits
static BIKE_PLATE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(\d{2}[A-Z]\d)(\d{4,5})").ok());
static ANY_PLATE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(\d{2}[A-Z]\d?)(\d{4,6})").ok());

/// Common OCR confusions, applied after upper-casing
fn correct_confusion(c: char) -> char {
    match c {
        'O' | 'Q' => '0',
        'I' | 'L' => '1',
        'S' => '5',
        'B' => '8',
        'G' => '6',
        other => other,
    }
}

/// Body length once a dropped separator is accounted for: six digits whose
/// fourth is '0' are really a five-digit body.
fn effective_len(body: &str) -> usize {
    if has_dropped_separator(body) {
        5
    } else {
        body.len()
    }
}

fn has_dropped_separator(body: &str) -> bool {
    body.len() == 6 && body.as_bytes()[3] == b'0'
}

fn format_plate(series: &str, body: &str) -> String {
    let body = if has_dropped_separator(body) {
        format!("{}{}", &body[..3], &body[4..])
    } else {
        body.to_string()
    };

    match body.len() {
        5 | 6 => format!("{}-{}.{}", series, &body[..3], &body[3..]),
        _ => format!("{}-{}", series, body),
    }
}

fn split(re: &Lazy<Option<Regex>>, text: &str) -> Option<(String, String)> {
    let caps = re.as_ref()?.captures(text)?;
    Some((caps.get(1)?.as_str().to_string(), caps.get(2)?.as_str().to_string()))
}

/// Upper-case only, substitute confusions, keep ASCII alphanumerics.
pub fn clean(text: &str) -> String {
    text.chars()
        .flat_map(char::to_uppercase)
        .map(correct_confusion)
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Normalize raw OCR text into plate format where possible.
pub fn normalize(text: &str) -> String {
    let cleaned = clean(text);
    if cleaned.is_empty() {
        return cleaned;
    }

    let mut candidates: Vec<(String, String)> = [&CAR_PLATE, &BIKE_PLATE]
        .into_iter()
        .filter_map(|re| split(re, &cleaned))
        .collect();

    // Prefer a five-digit body, then the shorter (car) series.
    candidates.sort_by_key(|(series, body)| (effective_len(body) != 5, series.len()));
    if let Some((series, body)) = candidates.first() {
        return format_plate(series, body);
    }

    match split(&ANY_PLATE, &cleaned) {
        Some((series, body)) => format_plate(&series, &body),
        None => cleaned,
    }
}
