//! Character-budget helpers.
//!
//! All lengths here are counted in `char`s, never bytes, so Turkish text is
//! never split inside a code point.

use std::sync::LazyLock;

use regex::Regex;

use crate::keywords::fold_case;

/// Appended whenever text is shortened.
pub const ELLIPSIS: &str = "...";

/// Share of the budget before which a sentence boundary is not accepted.
const MIN_CUT_RATIO: f64 = 0.7;

/// Length of `text` in characters.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// The longest prefix of `text` holding at most `max_chars` characters.
pub fn prefix_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Shorten `text` to `max_chars` (ellipsis included) without sentence logic.
pub fn preview(text: &str, max_chars: usize) -> String {
    if char_len(text) <= max_chars {
        return text.to_string();
    }
    let room = max_chars.saturating_sub(ELLIPSIS.len());
    format!("{}{ELLIPSIS}", prefix_chars(text, room).trim_end())
}

/// Fit `text` into `budget` characters, preferring a sentence boundary.
///
/// A cut is made after the last `.`, `!`, `?` or before the last blank line
/// that lies past 70% of the available room; without one the text is cut
/// at the room limit. The result always ends with [`ELLIPSIS`] when
/// shortened and never exceeds `budget`. Budgets too small to hold anything
/// beyond the ellipsis yield an empty string.
pub fn truncate_at_sentence(text: &str, budget: usize) -> String {
    if char_len(text) <= budget {
        return text.to_string();
    }
    if budget <= ELLIPSIS.len() {
        return String::new();
    }

    let room = budget - ELLIPSIS.len();
    let window = prefix_chars(text, room);
    let min_cut = (room as f64 * MIN_CUT_RATIO).ceil() as usize;

    let mut cut: Option<usize> = None;
    let mut chars_seen = 0usize;
    let mut prev_newline = false;
    for (byte_idx, ch) in window.char_indices() {
        chars_seen += 1;
        match ch {
            '.' | '!' | '?' if chars_seen >= min_cut => {
                cut = Some(byte_idx + ch.len_utf8());
            }
            '\n' if prev_newline && chars_seen - 1 >= min_cut => {
                // Cut before the first newline of the blank line.
                cut = Some(byte_idx - 1);
            }
            _ => {}
        }
        prev_newline = ch == '\n';
    }

    let kept = match cut {
        Some(end) => &window[..end],
        None => window,
    };
    format!("{}{ELLIPSIS}", kept.trim_end())
}

/// First sentence of `text` mentioning `keyword`, shortened to `max_chars`.
pub fn first_sentence_containing(text: &str, keyword: &str, max_chars: usize) -> Option<String> {
    static SENTENCE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^.!?\n]+[.!?]?").expect("valid regex"));

    let needle = fold_case(keyword);
    SENTENCE_RE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .find(|sentence| fold_case(sentence).contains(&needle))
        .map(|sentence| preview(sentence, max_chars))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_at_sentence("Kısa metin.", 100), "Kısa metin.");
    }

    #[test]
    fn cuts_at_late_sentence_boundary() {
        let text = "Birinci cümle burada bitiyor. İkinci cümle de uzun sayılır. Üçüncü cümle taşacak kadar uzun bir cümledir.";
        let out = truncate_at_sentence(text, 70);
        assert_eq!(out, "Birinci cümle burada bitiyor. İkinci cümle de uzun sayılır....");
        assert!(char_len(&out) <= 70);
    }

    #[test]
    fn early_boundary_is_ignored() {
        let text = format!("Kısa. {}", "a".repeat(200));
        let out = truncate_at_sentence(&text, 50);
        assert_eq!(char_len(&out), 50);
        assert!(out.ends_with("a..."));
    }

    #[test]
    fn blank_line_counts_as_boundary() {
        let text = format!("{}\n\n{}", "b".repeat(80), "c".repeat(80));
        let out = truncate_at_sentence(&text, 100);
        assert_eq!(out, format!("{}...", "b".repeat(80)));
    }

    #[test]
    fn tiny_budget_yields_nothing() {
        assert_eq!(truncate_at_sentence("Uzun bir metin.", 3), "");
    }

    #[test]
    fn multibyte_text_stays_within_budget() {
        let text = "ğüşiöç".repeat(100);
        let out = truncate_at_sentence(&text, 40);
        assert_eq!(char_len(&out), 40);
    }

    #[test]
    fn preview_marks_truncation() {
        assert_eq!(preview("abcdefghij", 8), "abcde...");
        assert_eq!(preview("abc", 8), "abc");
    }

    #[test]
    fn finds_first_sentence_with_keyword() {
        let text = "Giriş bölümü. Algoritma adım adım çözümdür. Algoritma tekrar.";
        assert_eq!(
            first_sentence_containing(text, "algoritma", 95).as_deref(),
            Some("Algoritma adım adım çözümdür.")
        );
        assert_eq!(first_sentence_containing(text, "veritabanı", 95), None);
    }
}
