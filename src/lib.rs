//! # Ragline
//!
//! A local-first retrieval-augmented generation engine. Documents are
//! chunked, embedded and stored in a single-file vector index; questions
//! are answered by retrieving the closest chunks, packing them into a
//! budgeted context, and asking a language model for a cited answer.
//!
//! This crate is the application layer around [`ragline_core`]:
//! configuration, capability adapters, document loading and the CLI
//! commands.
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────┐   ┌────────────┐
//! │   loader   │──▶│  ragline-core engine │──▶│ index file │
//! │ txt/md/pdf │   │ chunk+embed+search   │   │  (.rgl)    │
//! └────────────┘   └──────────┬───────────┘   └────────────┘
//!                             │
//!              ┌──────────────┴─────────────┐
//!              ▼                            ▼
//!       ┌─────────────┐             ┌──────────────┐
//!       │  embedding  │             │  generation  │
//!       │ openai/...  │             │ openai/...   │
//!       └─────────────┘             └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`embedding`] | OpenAI, Ollama, hashing and local embedders |
//! | [`generation`] | OpenAI, Ollama, Gemini and disabled generators |
//! | [`http`] | Shared HTTP request and failure classification |
//! | [`loader`] | Filesystem walking and text/PDF loading |
//! | [`engine`] | Index opening, engine construction and saving |
//! | [`ingest`] | `ragline ingest` |
//! | [`search`] | `ragline search` |
//! | [`ask`] | `ragline ask` |
//! | [`remove`] | `ragline remove` |
//! | [`stats`] | `ragline stats` |

pub mod ask;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod generation;
pub mod http;
pub mod ingest;
pub mod loader;
pub mod remove;
pub mod search;
pub mod stats;
