//! Wildcard matching and path string helpers shared by the archive, tree and
//! backup modules.
//!
//! Patterns only know one metacharacter: `*` matches any run of characters,
//! separators included. Matching is anchored at both ends and case-sensitive.

use std::path::is_separator;

/// Whether `path` matches `pattern`.
#[must_use]
pub fn is_match(path: &str, pattern: &str) -> bool {
    if path == pattern {
        return true;
    }
    if !pattern.contains('*') {
        return false;
    }

    let text: Vec<char> = path.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    wildcard_match(&text, &pattern)
}

/// Whether `path` matches at least one of `patterns`.
#[must_use]
pub fn matches_any<S: AsRef<str>>(path: &str, patterns: &[S]) -> bool {
    patterns.iter().any(|pattern| is_match(path, pattern.as_ref()))
}

fn wildcard_match(text: &[char], pattern: &[char]) -> bool {
    let mut t = 0;
    let mut p = 0;
    // Position of the last `*` seen and the text index it is currently
    // assumed to have consumed up to.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => {
                let Some((star, consumed)) = backtrack else {
                    return false;
                };
                p = star + 1;
                t = consumed + 1;
                backtrack = Some((star, t));
            }
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Resolve `path` against `base_path` unless it already lives under it.
#[must_use]
pub fn to_absolute(path: &str, base_path: &str) -> String {
    if path.starts_with(base_path) {
        return path.to_string();
    }

    format!(
        "{}{}{}",
        base_path.trim_end_matches(is_separator),
        std::path::MAIN_SEPARATOR,
        path.trim_matches(is_separator)
    )
}

/// Strip `base_path` from the front of `path` along with surrounding
/// separators.
#[must_use]
pub fn to_relative(path: &str, base_path: &str) -> String {
    path.strip_prefix(base_path)
        .unwrap_or(path)
        .trim_matches(is_separator)
        .to_string()
}

/// Replace every `/` and `\` in `path` with `separator`.
#[must_use]
pub fn to_separator(path: &str, separator: char) -> String {
    path.chars()
        .map(|c| if c == '/' || c == '\\' { separator } else { c })
        .collect()
}

/// Unify separators to `separator` and drop trailing ones.
#[must_use]
pub fn normalize(path: &str, separator: char) -> String {
    to_separator(path, separator)
        .trim_end_matches(separator)
        .to_string()
}

/// [`normalize`] with the platform separator, applied to each path in order.
#[must_use]
pub fn normalize_all<S: AsRef<str>>(paths: &[S]) -> Vec<String> {
    paths
        .iter()
        .map(|path| normalize(path.as_ref(), std::path::MAIN_SEPARATOR))
        .collect()
}
