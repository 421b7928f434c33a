use std::collections::{BTreeMap, HashMap, HashSet};

/// Document id → ordered normalized terms. Iteration order is the sorted
/// order of document ids.
pub type Corpus = BTreeMap<String, Vec<String>>;

/// Sparse `(token id, count)` vector; ids strictly ascending, counts > 0.
pub type BowDocument = Vec<(u32, u32)>;

/// Document id → bag-of-words vector, same key order as the `Corpus`.
pub type BowCorpus = BTreeMap<String, BowDocument>;

/// Token ↔ dense id mapping with document frequencies.
///
/// Ids are always contiguous from 0. Filtering builds a new dictionary
/// instead of mutating this one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    id2token: Vec<String>,
    token2id: HashMap<String, u32>,
    dfs: Vec<u32>,
}

impl Dictionary {
    /// Assign ids in order of first appearance, walking documents in order.
    pub fn from_documents<'a, I>(documents: I) -> Self
    where
        I: IntoIterator<Item = &'a Vec<String>>,
    {
        let mut dct = Dictionary::default();
        for doc in documents {
            let mut seen: HashSet<u32> = HashSet::new();
            for token in doc {
                let id = match dct.token2id.get(token) {
                    Some(&id) => id,
                    None => {
                        let id = dct.id2token.len() as u32;
                        dct.id2token.push(token.clone());
                        dct.token2id.insert(token.clone(), id);
                        dct.dfs.push(0);
                        id
                    }
                };
                if seen.insert(id) {
                    dct.dfs[id as usize] += 1;
                }
            }
        }
        dct
    }

    pub fn len(&self) -> usize {
        self.id2token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id2token.is_empty()
    }

    pub fn id(&self, token: &str) -> Option<u32> {
        self.token2id.get(token).copied()
    }

    pub fn token(&self, id: u32) -> Option<&str> {
        self.id2token.get(id as usize).map(String::as_str)
    }

    /// Number of documents containing the token.
    pub fn doc_freq(&self, id: u32) -> Option<u32> {
        self.dfs.get(id as usize).copied()
    }

    /// Tokens indexed by id.
    pub fn id2token(&self) -> &[String] {
        &self.id2token
    }

    /// Count known tokens of `document`. Unknown tokens are ignored.
    pub fn doc2bow(&self, document: &[String]) -> BowDocument {
        let mut counts: BTreeMap<u32, u32> = BTreeMap::new();
        for token in document {
            if let Some(&id) = self.token2id.get(token) {
                *counts.entry(id).or_insert(0) += 1;
            }
        }
        counts.into_iter().collect()
    }

    /// New dictionary without `removed`, surviving tokens renumbered from 0
    /// in ascending order of their old ids.
    pub fn without(&self, removed: &HashSet<u32>) -> Dictionary {
        let mut out = Dictionary::default();
        for (old, token) in self.id2token.iter().enumerate() {
            if removed.contains(&(old as u32)) {
                continue;
            }
            let id = out.id2token.len() as u32;
            out.id2token.push(token.clone());
            out.token2id.insert(token.clone(), id);
            out.dfs.push(self.dfs[old]);
        }
        out
    }
}

/// Vectorize every document against `dct`.
pub fn bow_corpus(corpus: &Corpus, dct: &Dictionary) -> BowCorpus {
    corpus
        .iter()
        .map(|(name, terms)| (name.clone(), dct.doc2bow(terms)))
        .collect()
}
