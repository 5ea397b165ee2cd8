//! Document ingestion: a per-file job driven through a fixed status
//! machine, persisted in SQLite so progress survives the process.
//!
//! PENDING -> PARSING -> CHUNKING -> EMBEDDING -> INDEXING -> COMPLETE,
//! with CHUNKING skipped for PDFs (the layout-aware parser emits
//! chunk-ready output) and FAILED reachable from any non-terminal state.
//! `submit` records the failure on the job and still returns the job id;
//! callers poll `status` for the outcome.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunking::ParentChildChunker;
use crate::error::IngestError;
use crate::lexical::LexicalIndex;
use crate::models::{Chunk, RawChunk};
use crate::traits::{DocumentParser, EmbeddingProvider, VectorStore};

/// Texts embedded per provider call.
pub const EMBED_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStatus {
    Pending,
    Parsing,
    Chunking,
    Embedding,
    Indexing,
    Complete,
    Failed,
}

impl IngestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IngestionStatus::Pending => "pending",
            IngestionStatus::Parsing => "parsing",
            IngestionStatus::Chunking => "chunking",
            IngestionStatus::Embedding => "embedding",
            IngestionStatus::Indexing => "indexing",
            IngestionStatus::Complete => "complete",
            IngestionStatus::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(IngestionStatus::Pending),
            "parsing" => Some(IngestionStatus::Parsing),
            "chunking" => Some(IngestionStatus::Chunking),
            "embedding" => Some(IngestionStatus::Embedding),
            "indexing" => Some(IngestionStatus::Indexing),
            "complete" => Some(IngestionStatus::Complete),
            "failed" => Some(IngestionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, IngestionStatus::Complete | IngestionStatus::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct IngestionJob {
    pub job_id: Uuid,
    pub file_id: String,
    pub path: PathBuf,
    pub user_id: i64,
    pub status: IngestionStatus,
    pub error: Option<String>,
    /// Caller-supplied key/value blob, carried through every stage.
    pub metadata: Option<serde_json::Value>,
}

/// Durable record of ingestion jobs.
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, IngestError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, IngestError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ingestion_jobs (
                job_id     TEXT PRIMARY KEY,
                file_id    TEXT NOT NULL,
                path       TEXT NOT NULL,
                user_id    INTEGER NOT NULL,
                status     TEXT NOT NULL,
                error      TEXT,
                metadata   TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, job: &IngestionJob) -> Result<(), IngestError> {
        let now = Utc::now().timestamp_millis();
        self.lock().execute(
            "INSERT INTO ingestion_jobs
                (job_id, file_id, path, user_id, status, error, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                job.job_id.to_string(),
                job.file_id,
                job.path.display().to_string(),
                job.user_id,
                job.status.as_str(),
                job.error,
                job.metadata.as_ref().map(|m| m.to_string()),
                now
            ],
        )?;
        Ok(())
    }

    /// Move a job to `status` in a single statement, stamping `updated_at`.
    pub fn update_status(
        &self,
        job_id: Uuid,
        status: IngestionStatus,
        error: Option<&str>,
    ) -> Result<(), IngestError> {
        let changed = self.lock().execute(
            "UPDATE ingestion_jobs
                SET status = ?2, error = ?3, updated_at = ?4
              WHERE job_id = ?1",
            params![
                job_id.to_string(),
                status.as_str(),
                error,
                Utc::now().timestamp_millis()
            ],
        )?;
        if changed == 0 {
            return Err(IngestError::UnknownJob(job_id));
        }
        Ok(())
    }

    pub fn load(&self, job_id: Uuid) -> Result<IngestionJob, IngestError> {
        let row = self
            .lock()
            .query_row(
                "SELECT file_id, path, user_id, status, error, metadata
                   FROM ingestion_jobs WHERE job_id = ?1",
                params![job_id.to_string()],
                |row| {
                    let file_id: String = row.get(0)?;
                    let path: String = row.get(1)?;
                    let user_id: i64 = row.get(2)?;
                    let status: String = row.get(3)?;
                    let error: Option<String> = row.get(4)?;
                    let metadata: Option<String> = row.get(5)?;
                    Ok((file_id, path, user_id, status, error, metadata))
                },
            )
            .optional()?;

        let (file_id, path, user_id, status, error, metadata) =
            row.ok_or(IngestError::UnknownJob(job_id))?;
        let status = IngestionStatus::from_str(&status)
            .ok_or_else(|| IngestError::InvalidArgument(format!("bad stored status: {status}")))?;
        let metadata = metadata
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?;
        Ok(IngestionJob {
            job_id,
            file_id,
            path: PathBuf::from(path),
            user_id,
            status,
            error,
            metadata,
        })
    }
}

/// Derive a stable chunk id from its identity, so re-ingesting the same
/// file overwrites rather than duplicates. The owner is part of the
/// identity: two users indexing the same document must get distinct
/// points, not overwrite each other's. UUID-shaped for stores that
/// require UUID point ids.
fn chunk_id(user_id: i64, file_id: &str, index: usize, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.to_le_bytes());
    hasher.update(file_id.as_bytes());
    hasher.update((index as u64).to_le_bytes());
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// `file_id` comes from caller metadata when supplied, else from the path.
fn resolve_file_id(path: &Path, metadata: Option<&serde_json::Value>) -> String {
    if let Some(file_id) = metadata
        .and_then(|m| m.get("file_id"))
        .and_then(|v| v.as_str())
    {
        return file_id.to_string();
    }
    let digest = Sha256::digest(path.display().to_string().as_bytes());
    format!("{digest:x}")
}

pub struct IngestionCoordinator<E, V> {
    jobs: Arc<JobStore>,
    embedder: E,
    vector: V,
    lexical: Arc<LexicalIndex>,
    pdf_parser: Arc<dyn DocumentParser>,
    chunker: ParentChildChunker,
}

impl<E, V> IngestionCoordinator<E, V>
where
    E: EmbeddingProvider,
    V: VectorStore,
{
    pub fn new(
        jobs: Arc<JobStore>,
        embedder: E,
        vector: V,
        lexical: Arc<LexicalIndex>,
        pdf_parser: Arc<dyn DocumentParser>,
    ) -> Self {
        Self {
            jobs,
            embedder,
            vector,
            lexical,
            pdf_parser,
            chunker: ParentChildChunker::default(),
        }
    }

    /// Register and process one document. Always returns the job id when the
    /// job record could be written; processing failures land on the job.
    pub async fn submit(
        &self,
        path: &Path,
        user_id: i64,
        metadata: Option<&serde_json::Value>,
    ) -> Result<Uuid, IngestError> {
        let job = IngestionJob {
            job_id: Uuid::new_v4(),
            file_id: resolve_file_id(path, metadata),
            path: path.to_path_buf(),
            user_id,
            status: IngestionStatus::Pending,
            error: None,
            metadata: metadata.cloned(),
        };
        self.jobs.insert(&job)?;

        if let Err(err) = self.process(&job).await {
            warn!(job_id = %job.job_id, path = %path.display(), error = %err, "ingestion failed");
            self.jobs
                .update_status(job.job_id, IngestionStatus::Failed, Some(&err.to_string()))?;
        }
        Ok(job.job_id)
    }

    pub fn status(&self, job_id: Uuid) -> Result<IngestionJob, IngestError> {
        self.jobs.load(job_id)
    }

    async fn process(&self, job: &IngestionJob) -> Result<(), IngestError> {
        self.jobs
            .update_status(job.job_id, IngestionStatus::Parsing, None)?;

        let is_pdf = job
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);

        let raw = if is_pdf {
            // Layout-aware parsing emits chunk-ready output.
            self.pdf_parser.parse(&job.path)?
        } else {
            let text = tokio::fs::read_to_string(&job.path).await?;
            self.jobs
                .update_status(job.job_id, IngestionStatus::Chunking, None)?;
            self.chunker.chunk(&text, "General", None, None)
        };

        if raw.is_empty() {
            info!(job_id = %job.job_id, "document produced no chunks");
            self.jobs
                .update_status(job.job_id, IngestionStatus::Complete, None)?;
            return Ok(());
        }

        let chunks = assemble_chunks(&job.file_id, job.user_id, raw);

        self.jobs
            .update_status(job.job_id, IngestionStatus::Embedding, None)?;
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            vectors.extend(self.embedder.embed(&texts).await?);
        }

        self.jobs
            .update_status(job.job_id, IngestionStatus::Indexing, None)?;
        self.vector.add(&chunks, &vectors).await?;
        self.lexical.extend(chunks.clone());

        info!(job_id = %job.job_id, chunks = chunks.len(), "document indexed");
        self.jobs
            .update_status(job.job_id, IngestionStatus::Complete, None)?;
        Ok(())
    }
}

fn assemble_chunks(file_id: &str, user_id: i64, raw: Vec<RawChunk>) -> Vec<Chunk> {
    let total = raw.len();
    raw.into_iter()
        .enumerate()
        .map(|(index, raw)| Chunk {
            id: chunk_id(user_id, file_id, index, &raw.text),
            content: raw.text,
            file_id: file_id.to_string(),
            user_id,
            section: raw.section,
            importance: raw.importance,
            page_start: raw.page_start,
            page_end: raw.page_end,
            is_child: raw.is_child,
            parent_content: raw.parent_content,
            chunk_index: index,
            total_chunks: total,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetrievalError;
    use crate::models::{ChunkFilter, SearchCandidate};
    use crate::parser::AcademicPdfParser;
    use async_trait::async_trait;
    use std::io::Write;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            Ok(texts.iter().map(|_| vec![0.0, 1.0, 0.0]).collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            Err(RetrievalError::BackendResponse {
                backend: "embedder".into(),
                details: "offline".into(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingVectorStore {
        chunks: Mutex<Vec<Chunk>>,
    }

    #[async_trait]
    impl VectorStore for RecordingVectorStore {
        async fn add(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), RetrievalError> {
            assert_eq!(chunks.len(), vectors.len());
            self.chunks.lock().unwrap().extend(chunks.iter().cloned());
            Ok(())
        }

        async fn query(
            &self,
            _: &[f32],
            _: &ChunkFilter,
            _: usize,
        ) -> Result<Vec<SearchCandidate>, RetrievalError> {
            Ok(Vec::new())
        }

        async fn list(&self, filter: &ChunkFilter) -> Result<Vec<Chunk>, RetrievalError> {
            Ok(self
                .chunks
                .lock()
                .unwrap()
                .iter()
                .filter(|c| filter.matches(c))
                .cloned()
                .collect())
        }
    }

    fn coordinator<E: EmbeddingProvider>(
        embedder: E,
    ) -> IngestionCoordinator<E, Arc<RecordingVectorStore>> {
        IngestionCoordinator::new(
            Arc::new(JobStore::open_in_memory().unwrap()),
            embedder,
            Arc::new(RecordingVectorStore::default()),
            Arc::new(LexicalIndex::new()),
            Arc::new(AcademicPdfParser::new().unwrap()),
        )
    }

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn text_file_runs_to_complete() {
        let coordinator = coordinator(FixedEmbedder);
        let file = write_temp(
            "Transformers process sequences in parallel using self attention. \
             Each token attends to every other token in the input.",
        );

        let job_id = coordinator.submit(file.path(), 7, None).await.unwrap();
        let job = coordinator.status(job_id).unwrap();
        assert_eq!(job.status, IngestionStatus::Complete);
        assert!(job.error.is_none());

        let stored = coordinator.vector.chunks.lock().unwrap();
        assert!(!stored.is_empty());
        assert!(stored.iter().all(|c| c.user_id == 7));
        assert!(stored.iter().all(|c| Uuid::parse_str(&c.id).is_ok()));
    }

    #[tokio::test]
    async fn missing_file_fails_the_job_but_returns_its_id() {
        let coordinator = coordinator(FixedEmbedder);
        let job_id = coordinator
            .submit(Path::new("/nonexistent/paper.txt"), 1, None)
            .await
            .unwrap();

        let job = coordinator.status(job_id).unwrap();
        assert_eq!(job.status, IngestionStatus::Failed);
        assert!(job.error.is_some());
    }

    #[tokio::test]
    async fn empty_file_completes_with_no_chunks() {
        let coordinator = coordinator(FixedEmbedder);
        let file = write_temp("");

        let job_id = coordinator.submit(file.path(), 1, None).await.unwrap();
        assert_eq!(
            coordinator.status(job_id).unwrap().status,
            IngestionStatus::Complete
        );
        assert!(coordinator.vector.chunks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_marks_the_job_failed() {
        let coordinator = coordinator(FailingEmbedder);
        let file = write_temp("Enough text to form at least one chunk of content here.");

        let job_id = coordinator.submit(file.path(), 1, None).await.unwrap();
        let job = coordinator.status(job_id).unwrap();
        assert_eq!(job.status, IngestionStatus::Failed);
        assert!(job.error.unwrap().contains("embedder"));
    }

    #[tokio::test]
    async fn metadata_file_id_takes_precedence_over_path_hash() {
        let coordinator = coordinator(FixedEmbedder);
        let file = write_temp("Stochastic gradient descent updates parameters iteratively.");

        let metadata = serde_json::json!({ "file_id": "paper-42" });
        let job_id = coordinator
            .submit(file.path(), 1, Some(&metadata))
            .await
            .unwrap();

        let job = coordinator.status(job_id).unwrap();
        assert_eq!(job.file_id, "paper-42");
        assert_eq!(job.metadata, Some(metadata));
        let stored = coordinator.vector.chunks.lock().unwrap();
        assert!(stored.iter().all(|c| c.file_id == "paper-42"));
    }

    #[tokio::test]
    async fn ingested_chunks_are_lexically_searchable() {
        let coordinator = coordinator(FixedEmbedder);
        let file = write_temp("Beam search widens the decoding frontier at each step.");

        coordinator.submit(file.path(), 3, None).await.unwrap();
        let hits = coordinator
            .lexical
            .search("beam search decoding", &ChunkFilter::for_user(3), 5);
        assert!(!hits.is_empty());
    }

    #[test]
    fn chunk_ids_are_deterministic() {
        let a = chunk_id(1, "file-1", 0, "same content");
        let b = chunk_id(1, "file-1", 0, "same content");
        let c = chunk_id(1, "file-1", 1, "same content");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn chunk_ids_differ_per_owner() {
        let a = chunk_id(1, "file-1", 0, "same content");
        let b = chunk_id(2, "file-1", 0, "same content");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn same_file_for_two_users_yields_distinct_ids() {
        let coordinator = coordinator(FixedEmbedder);
        let file = write_temp("Shared corpus text indexed by two different owners.");

        coordinator.submit(file.path(), 1, None).await.unwrap();
        coordinator.submit(file.path(), 2, None).await.unwrap();

        let first = coordinator.lexical.search("shared corpus", &ChunkFilter::for_user(1), 5);
        let second = coordinator.lexical.search("shared corpus", &ChunkFilter::for_user(2), 5);
        assert!(!first.is_empty());
        assert!(!second.is_empty());
        assert_ne!(first[0].chunk.id, second[0].chunk.id);
    }

    #[test]
    fn unknown_job_is_an_error() {
        let store = JobStore::open_in_memory().unwrap();
        let missing = Uuid::new_v4();
        assert!(matches!(
            store.load(missing),
            Err(IngestError::UnknownJob(id)) if id == missing
        ));
        assert!(store
            .update_status(missing, IngestionStatus::Failed, Some("x"))
            .is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(IngestionStatus::Complete.is_terminal());
        assert!(IngestionStatus::Failed.is_terminal());
        assert!(!IngestionStatus::Embedding.is_terminal());
        assert_eq!(
            IngestionStatus::from_str("chunking"),
            Some(IngestionStatus::Chunking)
        );
    }
}
