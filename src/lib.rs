//! modelpool - load-balancing, failover pool for model-serving backends
//!
//! This library spreads generation and chat requests across Ollama, RKLLama
//! and OpenAI-compatible endpoints, tracks each endpoint's health, and falls
//! over to the next eligible endpoint when a call fails.

pub mod backends;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod normalize;
pub mod pool;
pub mod telemetry;
pub mod types;
