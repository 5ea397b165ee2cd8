use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use docrag_core::{
    AcademicPdfParser, ChunkFilter, CrossEncoderReranker, DocumentParser, EmbeddingProvider,
    HttpEmbeddingProvider, HttpLlmProvider, HttpScoringModel, IngestionCoordinator, JobStore,
    LexicalIndex, LlmProvider, NgramEmbeddingProvider, PassthroughReranker, QdrantVectorStore,
    Reranker, RetrievalOrchestrator, RetrievalRequest, ScoringModel, SqliteCacheStore,
    TieredCache, VectorStore,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;
use walkdir::WalkDir;

const L1_CACHE_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "docrag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL
    #[arg(long, env = "DOCRAG_QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, default_value = "doc_chunks")]
    qdrant_collection: String,

    /// Embedding service URL; omitted means the built-in ngram embedder.
    #[arg(long, env = "DOCRAG_EMBEDDER_URL")]
    embedder_url: Option<String>,

    /// Embedding dimensions
    #[arg(long, default_value = "128")]
    dimensions: usize,

    /// Cross-encoder scoring service URL; omitted disables reranking.
    #[arg(long, env = "DOCRAG_SCORER_URL")]
    scorer_url: Option<String>,

    /// Chat-completions URL for query expansion; omitted disables it.
    #[arg(long, env = "DOCRAG_LLM_URL")]
    llm_url: Option<String>,

    #[arg(long, default_value = "gpt-4o-mini")]
    llm_model: String,

    #[arg(long, env = "DOCRAG_LLM_API_KEY")]
    llm_api_key: Option<String>,

    /// SQLite file backing the result cache.
    #[arg(long, default_value = "docrag-cache.db")]
    cache_db: PathBuf,

    /// SQLite file backing ingestion job state.
    #[arg(long, default_value = "docrag-jobs.db")]
    jobs_db: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a document or a folder of documents.
    Ingest {
        /// PDF, text, or markdown file, or a folder searched recursively.
        #[arg(long)]
        path: PathBuf,
        /// Owning tenant; all retrieval is scoped to it.
        #[arg(long)]
        user_id: i64,
        /// Stable file id; defaults to a hash of the path.
        #[arg(long)]
        file_id: Option<String>,
    },
    /// Run a retrieval query.
    Query {
        #[arg(long)]
        query: String,
        #[arg(long)]
        user_id: i64,
        /// Restrict to these file ids.
        #[arg(long)]
        files: Vec<String>,
        #[arg(long, default_value = "10")]
        top_k: usize,
    },
    /// Show the state of an ingestion job.
    Status {
        #[arg(long)]
        job_id: Uuid,
    },
}

fn is_ingestible(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some(ext) if ["pdf", "txt", "md"].iter().any(|known| ext.eq_ignore_ascii_case(known))
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let embedder: Arc<dyn EmbeddingProvider> = match &cli.embedder_url {
        Some(url) => Arc::new(HttpEmbeddingProvider::new(url, cli.dimensions)?),
        None => Arc::new(NgramEmbeddingProvider {
            dimensions: cli.dimensions,
        }),
    };
    let vector = Arc::new(QdrantVectorStore::new(
        &cli.qdrant_url,
        &cli.qdrant_collection,
        embedder.dimensions(),
    )?);
    let lexical = Arc::new(LexicalIndex::new());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "docrag boot"
    );

    match cli.command {
        Command::Ingest {
            path,
            user_id,
            file_id,
        } => {
            vector.ensure_collection().await?;

            let jobs = Arc::new(JobStore::open(&cli.jobs_db)?);
            let parser: Arc<dyn DocumentParser> = Arc::new(AcademicPdfParser::new()?);
            let coordinator =
                IngestionCoordinator::new(jobs, embedder, vector, lexical, parser);

            let files: Vec<PathBuf> = if path.is_dir() {
                WalkDir::new(&path)
                    .into_iter()
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.file_type().is_file())
                    .map(|entry| entry.into_path())
                    .filter(|path| is_ingestible(path))
                    .collect()
            } else {
                vec![path.clone()]
            };

            if files.is_empty() {
                println!("no ingestible files under {}", path.display());
                return Ok(());
            }
            if files.len() > 1 && file_id.is_some() {
                warn!("--file-id ignored when ingesting a folder");
            }

            for file in &files {
                let metadata = file_id
                    .as_ref()
                    .filter(|_| files.len() == 1)
                    .map(|id| serde_json::json!({ "file_id": id }));
                let job_id = coordinator.submit(file, user_id, metadata.as_ref()).await?;
                let job = coordinator.status(job_id)?;
                match job.error {
                    Some(error) => println!(
                        "{}  job={} status={} error={}",
                        file.display(),
                        job_id,
                        job.status.as_str(),
                        error
                    ),
                    None => println!(
                        "{}  job={} status={}",
                        file.display(),
                        job_id,
                        job.status.as_str()
                    ),
                }
            }
        }
        Command::Query {
            query,
            user_id,
            files,
            top_k,
        } => {
            // The lexical index lives in-process; rebuild it from the
            // vector store before searching.
            let warm_filter = ChunkFilter::for_user(user_id);
            match vector.list(&warm_filter).await {
                Ok(chunks) => {
                    info!(chunks = chunks.len(), "warmed lexical index");
                    lexical.build(chunks);
                }
                Err(error) => warn!(%error, "lexical warm-up failed, vector legs only"),
            }

            let cache = Arc::new(TieredCache::new(
                L1_CACHE_CAPACITY,
                SqliteCacheStore::open(&cli.cache_db)?,
            ));
            let reranker: Arc<dyn Reranker> = match &cli.scorer_url {
                Some(url) => {
                    let scorer: Arc<dyn ScoringModel> = Arc::new(HttpScoringModel::new(url)?);
                    Arc::new(CrossEncoderReranker::new(scorer))
                }
                None => Arc::new(PassthroughReranker),
            };

            let mut orchestrator =
                RetrievalOrchestrator::<_, _, Arc<dyn LlmProvider>, _, _>::new(
                    embedder, vector, lexical, reranker, cache,
                )?;
            if let Some(url) = &cli.llm_url {
                let llm: Arc<dyn LlmProvider> = Arc::new(HttpLlmProvider::new(
                    url,
                    &cli.llm_model,
                    cli.llm_api_key.clone(),
                )?);
                orchestrator = orchestrator.with_llm(llm);
            }

            let mut request = RetrievalRequest::new(query, user_id, top_k);
            if !files.is_empty() {
                request.file_ids = Some(files);
            }

            let results = orchestrator.query(&request).await?;
            println!("query: {}", request.text);
            if results.is_empty() {
                println!("no results");
            }
            for (rank, hit) in results.iter().enumerate() {
                println!(
                    "{}. [{}] fused={:.4} score={:.4} file={} section={} pages={:?}-{:?}",
                    rank + 1,
                    hit.source.as_str(),
                    hit.fused_score,
                    hit.score,
                    hit.chunk.file_id,
                    hit.chunk.section,
                    hit.chunk.page_start,
                    hit.chunk.page_end,
                );
                println!("   {}", hit.chunk.content);
            }
        }
        Command::Status { job_id } => {
            let jobs = JobStore::open(&cli.jobs_db)?;
            let job = jobs.load(job_id)?;
            println!(
                "job={} file_id={} path={} status={}",
                job.job_id,
                job.file_id,
                job.path.display(),
                job.status.as_str()
            );
            if let Some(error) = job.error {
                println!("error: {error}");
            }
        }
    }

    Ok(())
}
