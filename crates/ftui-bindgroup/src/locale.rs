#![forbid(unsafe_code)]

//! Culture used when evaluating validation rules.
//!
//! A group's culture is a normalized locale tag (`"en"`, `"fr-FR"`). When the
//! configuration does not name one, the group detects it from the
//! environment once at construction.

use std::env;

/// Locale identifier (e.g., `"en"`, `"en-US"`, `"ru"`).
pub type Locale = String;

/// Detect the system locale from environment variables.
///
/// Preference order: `LC_ALL`, then `LANG`. Falls back to `"en"` when unknown.
#[must_use]
pub fn detect_system_locale() -> Locale {
    let lc_all = env::var("LC_ALL").ok();
    let lang = env::var("LANG").ok();
    detect_locale_from(lc_all.as_deref(), lang.as_deref())
}

/// Normalize a user-supplied culture tag, falling back to `"en"`.
#[must_use]
pub fn normalize_locale(raw: &str) -> Locale {
    normalize_locale_raw(raw).unwrap_or_else(|| "en".to_string())
}

fn detect_locale_from(lc_all: Option<&str>, lang: Option<&str>) -> Locale {
    lc_all
        .and_then(normalize_locale_raw)
        .or_else(|| lang.and_then(normalize_locale_raw))
        .unwrap_or_else(|| "en".to_string())
}

fn normalize_locale_raw(raw: &str) -> Option<Locale> {
    let raw = raw.trim();
    let raw = raw.split('@').next().unwrap_or(raw);
    let raw = raw.split('.').next().unwrap_or(raw).trim();
    if raw.is_empty() {
        return None;
    }
    if raw.eq_ignore_ascii_case("c") || raw.eq_ignore_ascii_case("posix") {
        return Some("en".to_string());
    }
    Some(raw.replace('_', "-"))
}
