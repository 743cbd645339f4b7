//! Daily Brief - a newsletter content aggregator
//!
//! This crate fetches many independent sources concurrently, isolating each
//! source's failures, then uses a generative model to rank the over-fetched
//! candidate lists down to their display quotas.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod payload;
pub mod ranking;
pub mod section;
