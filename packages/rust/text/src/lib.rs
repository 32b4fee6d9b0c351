//! Text utilities shared by the generation pipeline.
//!
//! - [`keywords`]: pluggable keyword extraction with a Turkish stopword list
//! - [`decode`]: structured response decoder for model output
//! - [`truncate`]: character-budget and sentence-aware truncation
//! - [`tables`]: table rendering and heuristic table detection

pub mod decode;
pub mod keywords;
pub mod tables;
pub mod truncate;

pub use decode::{Decoded, decode_json, strip_code_fences};
pub use keywords::{
    FrequencyKeywordExtractor, KeywordExtractor, TURKISH_STOPWORDS, contains_term,
    count_occurrences, fold_case, tokenize,
};
pub use truncate::{
    ELLIPSIS, char_len, first_sentence_containing, prefix_chars, preview, truncate_at_sentence,
};
