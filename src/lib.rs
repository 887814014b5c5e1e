//! # doc-ingest
//!
//! File ingestion and retrieval-augmented chat over Azure services.
//!
//! Uploaded `.txt`, `.pdf` and `.docx` files are split into token windows,
//! embedded with Azure OpenAI and indexed in Azure AI Search; file
//! metadata lives in Cosmos DB. A chat endpoint answers questions using
//! the most relevant chunks as context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────┐   ┌──────────────┐
//! │  upload  │──▶│ extract ▸ chunk ▸ embed │──▶│  AI Search   │
//! └──────────┘   └──────────┬───────────┘   └──────┬───────┘
//!                           ▼                      │
//!                    ┌────────────┐                 ▼
//!                    │ Cosmos DB  │          ┌────────────┐
//!                    │ (metadata) │          │    chat    │
//!                    └────────────┘          └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cp example.env .env           # fill in endpoints
//! az login                      # when no keys are configured
//! doc-ingest init-index         # create the search index
//! doc-ingest serve              # listen on 127.0.0.1:8000
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + environment configuration |
//! | [`error`] | Service error taxonomy and HTTP mapping |
//! | [`credential`] | Azure identity (CLI, client secret, static token) |
//! | [`keyvault`] | Auth secrets from Key Vault |
//! | [`http`] | Retrying REST sender |
//! | [`extract`] | TXT / PDF / DOCX text extraction |
//! | [`validate`] | Upload extension and size checks |
//! | [`chunk`] | Token-window text splitter |
//! | [`embedding`] | Embedder trait and Azure OpenAI embeddings |
//! | [`metadata`] | Metadata store trait and in-memory store |
//! | [`cosmos`] | Cosmos DB metadata store |
//! | [`index`] | Vector index trait, in-memory index, vector store |
//! | [`azure_search`] | Azure AI Search vector index |
//! | [`chat`] | Retrieval-augmented chat |
//! | [`pipeline`] | Ingestion and deletion pipeline |
//! | [`auth`] | JWT login and bearer extractor |
//! | [`server`] | axum HTTP API |

pub mod auth;
pub mod azure_search;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod cosmos;
pub mod credential;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod http;
pub mod index;
pub mod keyvault;
pub mod logging;
pub mod metadata;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod validate;

#[cfg(test)]
mod testing;
