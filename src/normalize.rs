use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use std::sync::LazyLock;

const ENGLISH_STOPWORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "your", "yours",
    "yourself", "yourselves", "he", "him", "his", "himself", "she", "her", "hers", "herself",
    "it", "its", "itself", "they", "them", "their", "theirs", "themselves", "what", "which",
    "who", "whom", "this", "that", "these", "those", "am", "is", "are", "was", "were", "be",
    "been", "being", "have", "has", "had", "having", "do", "does", "did", "doing", "a", "an",
    "the", "and", "but", "if", "or", "because", "as", "until", "while", "of", "at", "by",
    "for", "with", "about", "against", "between", "into", "through", "during", "before",
    "after", "above", "below", "to", "from", "up", "down", "in", "out", "on", "off", "over",
    "under", "again", "further", "then", "once", "here", "there", "when", "where", "why",
    "how", "all", "any", "both", "each", "few", "more", "most", "other", "some", "such", "no",
    "nor", "not", "only", "own", "same", "so", "than", "too", "very", "s", "t", "can", "will",
    "just", "don", "should", "now",
];

static STOPWORDS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| ENGLISH_STOPWORDS.iter().copied().collect());

static STEMMER: LazyLock<Stemmer> = LazyLock::new(|| Stemmer::create(Algorithm::English));

/// Anything that is not a letter, digit, apostrophe or whitespace.
static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}'\s]+").unwrap());

/// Strip punctuation and collapse whitespace.
pub fn clean(raw: &str) -> String {
    PUNCTUATION
        .replace_all(raw, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize a phrase into a single token: lowercase, drop English
/// stopwords, stem every remaining word, join with `_`.
///
/// Returns an empty string when nothing survives.
pub fn normalize(phrase: &str) -> String {
    let lowered = clean(phrase).to_lowercase();
    lowered
        .split(' ')
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(w))
        .map(|w| STEMMER.stem(w).into_owned())
        .collect::<Vec<_>>()
        .join("_")
}

/// Normalize every raw term from an upstream source, dropping terms that
/// normalize to nothing.
pub fn normalize_terms<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|t| normalize(t.as_ref()))
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_stopwords_and_stems() {
        assert_eq!(normalize("The Cats"), "cat");
        assert_eq!(normalize("running of the dogs"), "run_dog");
    }

    #[test]
    fn stopword_only_phrase_is_empty() {
        assert_eq!(normalize("of the"), "");
    }

    #[test]
    fn punctuation_is_stripped() {
        assert_eq!(clean("Hello,   world!"), "Hello world");
        assert_eq!(normalize("dogs!!"), "dog");
    }

    #[test]
    fn normalize_terms_filters_empty() {
        let terms = normalize_terms(["the", "Dogs", "", "cats"]);
        assert_eq!(terms, vec!["dog", "cat"]);
    }
}
