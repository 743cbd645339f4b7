//! Relevance ranking of over-fetched sections with a generative model.

pub mod client;
pub mod gemini;
pub mod parse;
pub mod reorder;
pub mod reranker;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::{CompletionService, RankingClient, RateGate, RetryPolicy};
pub use gemini::GeminiService;
pub use reranker::{Lane, RankingGroup, Reranker};
