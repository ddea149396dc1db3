//! Slug normalization helpers for users, organizations, projects and groups,
//! plus the looser title slug used to group billing plans.
//!
//! Resource slugs are normalized to lowercase `a-z0-9-` with collapsing
//! separators and length bounds enforced by callers.

pub const SLUG_MIN: usize = 3;
pub const SLUG_MAX: usize = 63;

/// Normalizes user input into a URL-safe slug (`a-z0-9-`) within the provided length bounds.
/// Returns `None` when the normalized result is empty or outside `min..=max`.
/// Caller must still enforce uniqueness.
#[must_use]
pub fn normalize_slug(input: &str, min: usize, max: usize) -> Option<String> {
    let mut slug = String::new();
    let mut prev_dash = false;
    for ch in input.trim().to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            prev_dash = false;
        } else if !prev_dash {
            slug.push('-');
            prev_dash = true;
        }
    }
    let trimmed = slug.trim_matches('-').to_string();
    if trimmed.is_empty() {
        return None;
    }
    let truncated: String = trimmed.chars().take(max).collect();
    let normalized = truncated.trim_matches('-').to_string();
    if normalized.len() < min || normalized.len() > max {
        return None;
    }
    Some(normalized)
}

/// Punctuation a title slug keeps as is, next to ASCII letters and digits.
const TITLE_SLUG_KEPT: &str = "_*+~.()'\"!:@";

/// Title slug used for plan grouping, with the rules of the npm `slugify`
/// package the pricing pages use: a few symbols are spelled out, `-` counts
/// as whitespace, other characters are dropped, whitespace runs become `-`.
/// Non-ASCII letters are dropped rather than transliterated.
#[must_use]
pub fn slugify(input: &str) -> String {
    let mut spaced = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '-' => spaced.push(' '),
            '$' => spaced.push_str("dollar"),
            '%' => spaced.push_str("percent"),
            '&' => spaced.push_str("and"),
            '<' => spaced.push_str("less"),
            '>' => spaced.push_str("greater"),
            '|' => spaced.push_str("or"),
            ch if ch.is_ascii_alphanumeric()
                || ch.is_whitespace()
                || TITLE_SLUG_KEPT.contains(ch) =>
            {
                spaced.push(ch);
            }
            _ => {}
        }
    }
    spaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_separators() {
        assert_eq!(
            normalize_slug("  Acme -- Corp!! ", SLUG_MIN, SLUG_MAX).as_deref(),
            Some("acme-corp")
        );
    }

    #[test]
    fn normalize_enforces_bounds() {
        assert_eq!(normalize_slug("ab", SLUG_MIN, SLUG_MAX), None);
        assert_eq!(normalize_slug("!!!", SLUG_MIN, SLUG_MAX), None);
        let long = "a".repeat(80);
        assert_eq!(
            normalize_slug(&long, SLUG_MIN, SLUG_MAX).map(|slug| slug.len()),
            Some(SLUG_MAX)
        );
    }

    #[test]
    fn slugify_titles() {
        assert_eq!(slugify("Starter Plan"), "starter-plan");
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("  Pro+ (Annual) v2.0 "), "pro+-(annual)-v2.0");
        assert_eq!(slugify("R&D - Team"), "randd-team");
        assert_eq!(slugify("50% Off, Café"), "50percent-off-caf");
    }
}
