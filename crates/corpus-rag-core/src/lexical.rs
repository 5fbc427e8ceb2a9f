//! Lexical tokenization and BM25 scoring.
//!
//! The SQLite backend delegates BM25 to FTS5; this module supplies the
//! shared query-term extraction and a small in-process [`Bm25Index`] for
//! the in-memory store. Both tokenize identically: lowercase runs of
//! alphanumeric characters.

use std::collections::{HashMap, HashSet};

/// Term-frequency saturation.
pub const BM25_K1: f64 = 1.2;
/// Length normalization.
pub const BM25_B: f64 = 0.75;

/// Boolean operators the query builder emits; never searched for.
const OPERATORS: [&str; 3] = ["or", "and", "not"];

/// Split text into lowercase alphanumeric terms.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Distinct search terms of an (enhanced) query, in first-seen order.
///
/// ```rust
/// use corpus_rag_core::lexical::query_terms;
///
/// let terms = query_terms("lightfield displays OR Leia Inc OR lightfield");
/// assert_eq!(terms, vec!["lightfield", "displays", "leia", "inc"]);
/// ```
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| !OPERATORS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

struct IndexedDoc {
    key: String,
    len: usize,
    tf: HashMap<String, usize>,
}

/// An append-only BM25 index over short documents (chunks).
#[derive(Default)]
pub struct Bm25Index {
    docs: Vec<IndexedDoc>,
    df: HashMap<String, usize>,
    total_len: usize,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Index `text` under `key`. Keys are not deduplicated.
    pub fn add(&mut self, key: impl Into<String>, text: &str) {
        let terms = tokenize(text);
        let mut tf: HashMap<String, usize> = HashMap::new();
        for t in &terms {
            *tf.entry(t.clone()).or_insert(0) += 1;
        }
        for t in tf.keys() {
            *self.df.entry(t.clone()).or_insert(0) += 1;
        }
        self.total_len += terms.len();
        self.docs.push(IndexedDoc {
            key: key.into(),
            len: terms.len(),
            tf,
        });
    }

    /// Non-negative idf (the `1 +` variant), so rare and common terms both
    /// contribute positively.
    fn idf(&self, term: &str) -> f64 {
        let n = self.docs.len() as f64;
        let df = self.df.get(term).copied().unwrap_or(0) as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Score every document containing at least one of `terms`.
    ///
    /// Returns `(key, score)` pairs in insertion order; all scores are
    /// strictly positive. Ranking is left to the caller.
    pub fn score(&self, terms: &[String]) -> Vec<(String, f64)> {
        if self.docs.is_empty() || terms.is_empty() {
            return Vec::new();
        }
        let avgdl = (self.total_len as f64 / self.docs.len() as f64).max(1.0);
        let idfs: Vec<(&String, f64)> = terms.iter().map(|t| (t, self.idf(t))).collect();

        self.docs
            .iter()
            .filter_map(|doc| {
                let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * doc.len as f64 / avgdl);
                let score: f64 = idfs
                    .iter()
                    .filter_map(|(t, idf)| {
                        let f = *doc.tf.get(*t)? as f64;
                        Some(idf * f * (BM25_K1 + 1.0) / (f + norm))
                    })
                    .sum();
                (score > 0.0).then(|| (doc.key.clone(), score))
            })
            .collect()
    }
}
