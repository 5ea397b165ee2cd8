use serde::{Deserialize, Serialize};

/// How load-bearing a chunk is for the document it came from, assigned
/// during ingestion from section and content heuristics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    CoreContribution,
    Methodology,
    Experiment,
    Background,
    General,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::CoreContribution => "core_contribution",
            Importance::Methodology => "methodology",
            Importance::Experiment => "experiment",
            Importance::Background => "background",
            Importance::General => "general",
        }
    }
}

/// A unit of indexed text. Every chunk carries its owning tenant; retrieval
/// must filter on `user_id` at every call, never only at the end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Globally unique, stable id. Fusion dedupes strictly on this.
    pub id: String,
    pub content: String,
    pub file_id: String,
    pub user_id: i64,
    pub section: String,
    pub importance: Importance,
    pub page_start: Option<u32>,
    pub page_end: Option<u32>,
    pub is_child: bool,
    /// Full parent passage, present only when `is_child` is true.
    pub parent_content: Option<String>,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// Parser/chunker output before ids and ownership are stamped on.
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub text: String,
    pub section: String,
    pub importance: Importance,
    pub page_start: Option<u32>,
    pub page_end: Option<u32>,
    pub is_child: bool,
    pub parent_content: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    Vector,
    Lexical,
}

impl RetrievalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalSource::Vector => "vector",
            RetrievalSource::Lexical => "lexical",
        }
    }
}

/// A scored reference to a chunk during a single query. `score` is on the
/// retriever's native scale and not comparable across sources; `fused_score`
/// is on the RRF scale and is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub chunk: Chunk,
    pub score: f64,
    pub source: RetrievalSource,
    pub fused_score: f64,
}

impl SearchCandidate {
    pub fn new(chunk: Chunk, score: f64, source: RetrievalSource) -> Self {
        Self {
            chunk,
            score,
            source,
            fused_score: 0.0,
        }
    }
}

/// Tenant scope for a retrieval call. `user_id` is mandatory by
/// construction; `file_ids` and `sections` narrow further.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChunkFilter {
    pub user_id: i64,
    pub file_ids: Option<Vec<String>>,
    pub sections: Option<Vec<String>>,
}

impl ChunkFilter {
    pub fn for_user(user_id: i64) -> Self {
        Self {
            user_id,
            file_ids: None,
            sections: None,
        }
    }

    pub fn with_file_ids(mut self, file_ids: Vec<String>) -> Self {
        if !file_ids.is_empty() {
            self.file_ids = Some(file_ids);
        }
        self
    }

    pub fn with_sections(mut self, sections: Vec<String>) -> Self {
        if !sections.is_empty() {
            self.sections = Some(sections);
        }
        self
    }

    /// Section match is a case-insensitive substring test, so a target of
    /// "Method" also accepts "Methodology".
    pub fn matches(&self, chunk: &Chunk) -> bool {
        if chunk.user_id != self.user_id {
            return false;
        }
        if let Some(file_ids) = &self.file_ids {
            if !file_ids.iter().any(|id| *id == chunk.file_id) {
                return false;
            }
        }
        if let Some(sections) = &self.sections {
            let chunk_section = chunk.section.to_lowercase();
            if !sections
                .iter()
                .any(|section| chunk_section.contains(&section.to_lowercase()))
            {
                return false;
            }
        }
        true
    }
}

/// A query as an external caller poses it.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub text: String,
    pub user_id: i64,
    pub file_ids: Option<Vec<String>>,
    pub top_k: usize,
}

impl RetrievalRequest {
    pub fn new(text: impl Into<String>, user_id: i64, top_k: usize) -> Self {
        Self {
            text: text.into(),
            user_id,
            file_ids: None,
            top_k,
        }
    }

    pub fn filter(&self) -> ChunkFilter {
        ChunkFilter::for_user(self.user_id)
            .with_file_ids(self.file_ids.clone().unwrap_or_default())
    }
}

#[cfg(test)]
pub(crate) fn test_chunk(id: &str, user_id: i64, content: &str) -> Chunk {
    Chunk {
        id: id.to_string(),
        content: content.to_string(),
        file_id: "file-1".to_string(),
        user_id,
        section: "General".to_string(),
        importance: Importance::General,
        page_start: None,
        page_end: None,
        is_child: false,
        parent_content: None,
        chunk_index: 0,
        total_chunks: 1,
    }
}
