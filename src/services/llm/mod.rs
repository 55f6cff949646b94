//! AI analysis of captured queries
//!
//! # Architecture
//! ```text
//! ┌──────────────────┐
//! │  QueryAnalyzer   │  ← prompt, parse, persist
//! └────────┬─────────┘
//!          │ AnalysisProvider (trait)
//!    ┌─────┼──────────┐
//!    ▼     ▼          ▼
//! ┌───────┐┌──────┐┌─────────┐
//! │Mistral││OpenAI││Anthropic│  ← ProviderClient
//! └───────┘└──────┘└─────────┘
//! ```

mod client;
mod models;
mod parser;
mod prompt;
mod service;

pub use client::{ANTHROPIC_MAX_TOKENS, ANTHROPIC_VERSION, AnalysisProvider, ProviderClient};
pub use models::*;
pub use parser::parse_analysis_response;
pub use prompt::{CONTEXT_CHARS, build_optimization_prompt};
pub use service::QueryAnalyzer;
