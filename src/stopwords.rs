//! Statistical stopword removal.
//!
//! Every token gets two scores over its per-document normalized frequency
//! (zero-padded to corpus size):
//!
//! - statistical value: mean / population variance (`+inf` when the variance
//!   is zero, which puts the token at the top of that ranking)
//! - entropy: `Σ p·ln(1/p)` over the non-zero frequencies
//!
//! Tokens are ranked ascending on each score, the two 0-based ranks are
//! summed Borda-style, and the `K` lowest combined scores are dropped. All
//! sorts are stable, so ties keep ascending token-id order.

use crate::LdaError;
use crate::corpus::{BowCorpus, Corpus, Dictionary, bow_corpus};
use serde::Serialize;
use std::collections::HashSet;

pub const DEFAULT_STOPWORD_COUNT: usize = 300;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenScore {
    pub id: u32,
    pub mean: f64,
    pub variance: f64,
    pub statistical_value: f64,
    pub entropy: f64,
    pub value_rank: usize,
    pub entropy_rank: usize,
}

impl TokenScore {
    pub fn combined(&self) -> usize {
        self.value_rank + self.entropy_rank
    }
}

/// Score and rank every token of `dct`, most stopword-like first.
pub fn rank_stopwords(corpus: &Corpus, dct: &Dictionary) -> Result<Vec<TokenScore>, LdaError> {
    let n_docs = corpus.len();
    if n_docs == 0 {
        return Err(LdaError::Corpus("corpus has no documents".into()));
    }

    let mut freqs: Vec<Vec<f64>> = vec![Vec::new(); dct.len()];
    for (name, terms) in corpus {
        let bow = dct.doc2bow(terms);
        let total: u32 = bow.iter().map(|&(_, c)| c).sum();
        if total == 0 {
            return Err(LdaError::Corpus(format!("document {name} is empty")));
        }
        for (id, count) in bow {
            freqs[id as usize].push(count as f64 / total as f64);
        }
    }

    let n = n_docs as f64;
    let mut scores: Vec<TokenScore> = freqs
        .iter()
        .enumerate()
        .map(|(id, present)| {
            let mean = present.iter().sum::<f64>() / n;
            let absent = n_docs - present.len();
            let sq: f64 = present.iter().map(|p| (p - mean).powi(2)).sum::<f64>()
                + absent as f64 * mean * mean;
            let variance = sq / n;
            let statistical_value = if variance > 0.0 {
                mean / variance
            } else {
                f64::INFINITY
            };
            let entropy = present
                .iter()
                .filter(|&&p| p > 0.0)
                .map(|&p| p * (1.0 / p).ln())
                .sum();
            TokenScore {
                id: id as u32,
                mean,
                variance,
                statistical_value,
                entropy,
                value_rank: 0,
                entropy_rank: 0,
            }
        })
        .collect();

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .statistical_value
            .total_cmp(&scores[b].statistical_value)
    });
    for (rank, &i) in order.iter().enumerate() {
        scores[i].value_rank = rank;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].entropy.total_cmp(&scores[b].entropy));
    for (rank, &i) in order.iter().enumerate() {
        scores[i].entropy_rank = rank;
    }

    scores.sort_by_key(TokenScore::combined);
    Ok(scores)
}

/// Vocabulary filter: raw dictionary → drop `count` statistical stopwords →
/// bag-of-words corpus against the compacted dictionary.
#[derive(Debug, Clone)]
pub struct VocabularyFilter {
    pub count: usize,
}

impl Default for VocabularyFilter {
    fn default() -> Self {
        Self {
            count: DEFAULT_STOPWORD_COUNT,
        }
    }
}

impl VocabularyFilter {
    pub fn new(count: usize) -> Self {
        Self { count }
    }

    pub fn build(&self, corpus: &Corpus) -> Result<(Dictionary, BowCorpus), LdaError> {
        let raw = Dictionary::from_documents(corpus.values());
        if self.count >= raw.len() {
            return Err(LdaError::Corpus(format!(
                "cannot remove {} stopwords from a vocabulary of {}",
                self.count,
                raw.len()
            )));
        }

        let ranking = rank_stopwords(corpus, &raw)?;
        let removed: HashSet<u32> = ranking[..self.count].iter().map(|s| s.id).collect();
        log::info!(
            "stopwords: keeping {} tokens, removing {} stopwords",
            raw.len() - self.count,
            self.count
        );

        let dct = raw.without(&removed);
        log::debug!("stopwords: resulting dictionary has {} tokens", dct.len());
        let bow = bow_corpus(corpus, &dct);
        Ok((dct, bow))
    }
}
