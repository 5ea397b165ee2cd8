use crate::models::{Chunk, ChunkFilter, RetrievalSource, SearchCandidate};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

const BM25_K1: f64 = 1.5;
const BM25_B: f64 = 0.75;

/// In-memory BM25 keyword index, complementary to semantic search for
/// acronyms and rare identifiers that embed poorly.
///
/// Rebuilds are swap-not-mutate: statistics are computed outside the write
/// lock and installed in one assignment, so concurrent searches see either
/// the old index or the new one, never a half-built state. A search against
/// a stale index rebuilds it first (lazy init); an empty corpus yields empty
/// results, not an error.
pub struct LexicalIndex {
    state: RwLock<IndexState>,
}

#[derive(Default)]
struct IndexState {
    corpus: Vec<Chunk>,
    stats: Option<Bm25Stats>,
}

struct Bm25Stats {
    docs: Vec<DocTerms>,
    doc_freq: HashMap<String, usize>,
    avg_len: f64,
}

struct DocTerms {
    term_freq: HashMap<String, usize>,
    len: usize,
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn build_stats(corpus: &[Chunk]) -> Bm25Stats {
    let mut docs = Vec::with_capacity(corpus.len());
    let mut doc_freq: HashMap<String, usize> = HashMap::new();
    let mut total_len = 0usize;

    for chunk in corpus {
        let tokens = tokenize(&chunk.content);
        let mut term_freq: HashMap<String, usize> = HashMap::new();
        for token in &tokens {
            *term_freq.entry(token.clone()).or_default() += 1;
        }
        for term in term_freq.keys() {
            *doc_freq.entry(term.clone()).or_default() += 1;
        }
        total_len += tokens.len();
        docs.push(DocTerms {
            term_freq,
            len: tokens.len(),
        });
    }

    let avg_len = if docs.is_empty() {
        0.0
    } else {
        total_len as f64 / docs.len() as f64
    };

    Bm25Stats {
        docs,
        doc_freq,
        avg_len,
    }
}

impl Bm25Stats {
    fn score(&self, doc: &DocTerms, query_tokens: &[String]) -> f64 {
        let doc_count = self.docs.len() as f64;
        let mut score = 0.0;

        for token in query_tokens {
            let Some(&tf) = doc.term_freq.get(token) else {
                continue;
            };
            let df = self.doc_freq.get(token).copied().unwrap_or(0) as f64;
            let idf = ((doc_count - df + 0.5) / (df + 0.5) + 1.0).ln();
            let tf = tf as f64;
            let norm = 1.0 - BM25_B + BM25_B * doc.len as f64 / self.avg_len.max(1.0);
            score += idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * norm);
        }

        score
    }
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
        }
    }

    /// Replace the corpus and rebuild term statistics atomically.
    pub fn build(&self, corpus: Vec<Chunk>) {
        let stats = build_stats(&corpus);
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        info!(documents = corpus.len(), "lexical index rebuilt");
        *state = IndexState {
            corpus,
            stats: Some(stats),
        };
    }

    /// Append newly ingested chunks. Statistics go stale and are rebuilt on
    /// the next search.
    pub fn extend(&self, chunks: Vec<Chunk>) {
        if chunks.is_empty() {
            return;
        }
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.corpus.extend(chunks);
        state.stats = None;
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.corpus.is_empty()
    }

    /// Top-`k` BM25 matches with score > 0, scoped by `filter`. Ties break
    /// by corpus order.
    pub fn search(&self, query: &str, filter: &ChunkFilter, k: usize) -> Vec<SearchCandidate> {
        self.ensure_built();

        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || k == 0 {
            return Vec::new();
        }

        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let Some(stats) = &state.stats else {
            return Vec::new();
        };

        let mut scored: Vec<(usize, f64)> = Vec::new();
        for (index, chunk) in state.corpus.iter().enumerate() {
            if !filter.matches(chunk) {
                continue;
            }
            let score = stats.score(&stats.docs[index], &query_tokens);
            if score > 0.0 {
                scored.push((index, score));
            }
        }

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored
            .into_iter()
            .take(k)
            .map(|(index, score)| {
                SearchCandidate::new(
                    state.corpus[index].clone(),
                    score,
                    RetrievalSource::Lexical,
                )
            })
            .collect()
    }

    fn ensure_built(&self) {
        {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            if state.stats.is_some() || state.corpus.is_empty() {
                return;
            }
        }
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.stats.is_none() && !state.corpus.is_empty() {
            let stats = build_stats(&state.corpus);
            info!(documents = state.corpus.len(), "lexical index built lazily");
            state.stats = Some(stats);
        }
    }
}
