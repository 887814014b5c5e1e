//! # doc-ingest CLI
//!
//! Runs the HTTP API and offers a few maintenance commands that reuse the
//! same pipeline.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `doc-ingest serve` | Start the HTTP API |
//! | `doc-ingest init-index` | Create or update the AI Search index schema |
//! | `doc-ingest ingest <path>` | Ingest a local file |
//! | `doc-ingest search "<query>"` | Print the most similar chunks |
//!
//! Settings come from an optional `--config` TOML file and the environment;
//! a `.env` file in the working directory is loaded first.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use doc_ingest::azure_search::AzureSearchIndex;
use doc_ingest::config;
use doc_ingest::credential::{default_credential, ServiceAuth, SEARCH_SCOPE};
use doc_ingest::extract::read_file;
use doc_ingest::logging::init_tracing;
use doc_ingest::server::{run_server, AppState};
use doc_ingest::validate::{size_error, validate_filename};

/// File ingestion and retrieval-augmented chat API over Azure Cosmos DB,
/// Azure AI Search and Azure OpenAI.
#[derive(Parser)]
#[command(name = "doc-ingest", version)]
struct Cli {
    /// Path to a TOML configuration file.
    ///
    /// Optional; every setting can also come from environment variables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API.
    ///
    /// Loads login secrets from Key Vault when `KEY_VAULT_URL` is set.
    Serve {
        /// Address to bind, overriding `[server].bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Create or update the search index schema.
    InitIndex,

    /// Extract, chunk, embed and index a local file.
    Ingest {
        /// File to ingest (.txt, .pdf or .docx).
        path: PathBuf,
    },

    /// Search indexed chunks.
    Search {
        query: String,

        /// Maximum number of results (defaults to `[search].top_k`).
        #[arg(long)]
        k: Option<usize>,

        /// Restrict results to one file.
        #[arg(long)]
        file_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let mut cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            run_server(cfg).await?;
        }
        Commands::InitIndex => {
            let credential = default_credential();
            let auth = ServiceAuth::from_key_or_token(
                cfg.search.api_key.as_deref(),
                &credential,
                SEARCH_SCOPE,
            );
            let index = AzureSearchIndex::new(&cfg.search, auth)?;
            index.ensure_index(cfg.openai.embedding_dims).await?;
            println!("Search index '{}' is ready.", cfg.search.index);
        }
        Commands::Ingest { path } => {
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("Invalid file path: {}", path.display()))?
                .to_string();
            validate_filename(&filename)?;
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if bytes.len() > cfg.server.max_upload_bytes {
                return Err(size_error(cfg.server.max_upload_bytes).into());
            }
            let content = read_file(&filename, &bytes)?;

            let state = AppState::azure(cfg, default_credential())?;
            let result = state.files.process_file(&filename, &content).await?;
            println!("file_id: {}", result.file_id);
            println!("chunks indexed: {}", result.chunks_indexed);
        }
        Commands::Search { query, k, file_id } => {
            let k = k.unwrap_or(cfg.search.top_k);
            let threshold = cfg.search.score_threshold;
            let state = AppState::azure(cfg, default_credential())?;
            let results = state
                .files
                .vectors()
                .similarity_search(&query, k, threshold, file_id.as_deref())
                .await?;

            if results.is_empty() {
                println!("No results.");
            }
            for (i, result) in results.iter().enumerate() {
                let preview: String = result.chunk.content.chars().take(200).collect();
                println!(
                    "{}. [{:.3}] file {} chunk {}",
                    i + 1,
                    result.score,
                    result.chunk.file_id,
                    result.chunk.chunk_index
                );
                println!("   {}", preview.replace('\n', " "));
            }
        }
    }

    Ok(())
}
