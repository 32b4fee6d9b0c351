//! Frequency-based keyword extraction.
//!
//! [`KeywordExtractor`] is the seam callers depend on; the default
//! [`FrequencyKeywordExtractor`] counts non-stopword tokens longer than three
//! characters and ranks them by frequency, then by first appearance.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

/// Pluggable keyword extraction.
pub trait KeywordExtractor: Send + Sync {
    /// Return at most `limit` keywords, most significant first, lowercased.
    fn extract(&self, text: &str, limit: usize) -> Vec<String>;
}

/// Turkish function words (plus a few English ones that leak into textbooks).
pub const TURKISH_STOPWORDS: &[&str] = &[
    "acaba", "ama", "ancak", "aslında", "bazı", "belki", "ben", "benim", "beri", "biri",
    "birkaç", "birçok", "bir", "bize", "bizim", "böyle", "böylece", "bu", "buna", "bunda",
    "bundan", "bunlar", "bunları", "bunların", "bunu", "bunun", "burada", "çok", "çünkü",
    "da", "daha", "dahi", "de", "defa", "değil", "diğer", "diye", "dolayı", "elbette", "en",
    "fakat", "gibi", "göre", "hangi", "hatta", "hem", "henüz", "hep", "hepsi", "her",
    "herhangi", "hiç", "için", "ile", "ilgili", "ise", "işte", "kadar", "karşın", "kendi",
    "kendine", "kendisi", "kez", "ki", "kim", "kimse", "mı", "mi", "mu", "mü", "nasıl",
    "ne", "neden", "nerede", "nereye", "niçin", "niye", "olan", "olarak", "oldu", "olduğu",
    "olduğunu", "olmak", "olması", "olmayan", "olup", "olur", "onlar", "onları", "onların",
    "onu", "onun", "orada", "öyle", "pek", "rağmen", "sadece", "sanki", "şey", "şekilde",
    "şöyle", "şu", "şunlar", "şunu", "tarafından", "tüm", "üzere", "var", "vardır", "ve",
    "veya", "ya", "yani", "yapılan", "yapmak", "yine", "yoksa", "zaten", "zira", "about",
    "also", "because", "from", "have", "into", "that", "their", "there", "these", "this",
    "those", "what", "when", "where", "which", "while", "with", "would",
];

/// Word tokens: a letter followed by letters or digits.
static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\p{L}[\p{L}\p{N}]*").expect("valid regex"));

/// Lowercase with Turkish dotted capital `İ` folded to plain `i`.
///
/// `str::to_lowercase` maps `İ` to `i` + U+0307, which would split
/// "İşlem" and "işlem" into different keywords.
pub fn fold_case(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            'İ' => folded.push('i'),
            _ => folded.extend(c.to_lowercase()),
        }
    }
    folded
}

/// Case-folded word tokens of `text`, in order.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    WORD_RE.find_iter(text).map(|m| fold_case(m.as_str()))
}

/// Number of tokens in `text` equal to `term` (case-insensitive).
pub fn count_occurrences(text: &str, term: &str) -> usize {
    let term = fold_case(term);
    tokenize(text).filter(|t| *t == term).count()
}

/// Whether `text` mentions `term` anywhere (case-insensitive substring).
pub fn contains_term(text: &str, term: &str) -> bool {
    fold_case(text).contains(&fold_case(term))
}

/// Default keyword extractor.
#[derive(Debug, Clone)]
pub struct FrequencyKeywordExtractor {
    min_len: usize,
    stopwords: HashSet<&'static str>,
}

impl FrequencyKeywordExtractor {
    /// Build an extractor keeping tokens with more than `min_len - 1` chars.
    pub fn new(min_len: usize, stopwords: &[&'static str]) -> Self {
        Self {
            min_len,
            stopwords: stopwords.iter().copied().collect(),
        }
    }
}

impl Default for FrequencyKeywordExtractor {
    fn default() -> Self {
        Self::new(4, TURKISH_STOPWORDS)
    }
}

impl KeywordExtractor for FrequencyKeywordExtractor {
    fn extract(&self, text: &str, limit: usize) -> Vec<String> {
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();

        for (position, token) in tokenize(text).enumerate() {
            if token.chars().count() < self.min_len || self.stopwords.contains(token.as_str()) {
                continue;
            }
            counts.entry(token).or_insert((0, position)).0 += 1;
        }

        let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.1.1.cmp(&b.1.1)));
        ranked.into_iter().take(limit).map(|(word, _)| word).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_by_frequency_then_first_appearance() {
        let text = "Değişken bir kutudur. Fonksiyon değişken alır. Döngü fonksiyon çağırır. Değişken tekrar.";
        let keywords = FrequencyKeywordExtractor::default().extract(text, 3);
        assert_eq!(keywords, vec!["değişken", "fonksiyon", "kutudur"]);
    }

    #[test]
    fn drops_short_tokens_and_stopwords() {
        let text = "ve ile için bu şu kod kod kod algoritma";
        let keywords = FrequencyKeywordExtractor::default().extract(text, 10);
        assert_eq!(keywords, vec!["algoritma"]);
    }

    #[test]
    fn limit_is_respected() {
        let text = "alpha bravo charlie delta echoes foxtrot";
        let keywords = FrequencyKeywordExtractor::default().extract(text, 2);
        assert_eq!(keywords.len(), 2);
    }

    #[test]
    fn occurrence_counting_is_case_insensitive() {
        assert_eq!(count_occurrences("Veri veri VERİTABANI veri.", "veri"), 3);
        assert!(contains_term("Nesne Yönelimli Programlama", "yönelimli"));
    }

    #[test]
    fn dotted_capital_i_folds_to_the_lowercase_word() {
        let text = "İşlem sırası önemlidir. Her işlem kayıt edilir. İçin bunu yaz. İşlem biter.";
        let keywords = FrequencyKeywordExtractor::default().extract(text, 5);
        assert_eq!(keywords[0], "işlem");
        assert!(keywords.iter().all(|k| !k.contains('\u{307}')));
        assert!(!keywords.contains(&"için".to_string()));
        assert_eq!(count_occurrences(text, "işlem"), 3);
        assert_eq!(count_occurrences(text, "İŞLEM"), 3);
        assert!(contains_term("İleri Konular", "ileri"));
        assert_eq!(fold_case("İSTANBUL"), "istanbul");
    }
}
