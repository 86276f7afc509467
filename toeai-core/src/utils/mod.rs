//! Utility functions and helpers

use std::path::{Path, PathBuf};

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of the random fragment in generated identifiers
const RANDOM_FRAGMENT_LEN: usize = 8;

/// Generate a unique identifier of the form `<prefix>_<random>_<time>`.
///
/// Both fragments are base-36: eight characters drawn from a v4 UUID and
/// the current Unix time in milliseconds. The result is unique for any
/// practical session but is not suitable as a secret.
pub fn new_id(prefix: &str) -> String {
    let random = to_base36(uuid::Uuid::new_v4().as_u128());
    let random = &random[..random.len().min(RANDOM_FRAGMENT_LEN)];
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u128;
    format!("{}_{}_{}", prefix, random, to_base36(millis))
}

/// Render a number in lowercase base-36
pub fn to_base36(mut value: u128) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Create a safe filename from a string
pub fn safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

/// Take at most `max_chars` characters of `s`, never splitting a character
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_tilde<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_shape() {
        let id = new_id("chat");
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "chat");
        assert!(!parts[1].is_empty() && parts[1].len() <= 8);
        assert!(parts[1..]
            .iter()
            .all(|p| p.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())));
    }

    #[test]
    fn test_new_id_is_unique() {
        let ids: std::collections::HashSet<String> = (0..1000).map(|_| new_id("msg")).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_to_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_700_000_000_000), "loyw3v28");
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("toeai_state_v1"), "toeai_state_v1");
        assert_eq!(safe_filename("user/name:1"), "user_name_1");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hello");
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
    }
}
