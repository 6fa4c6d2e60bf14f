//! Command-line interface for modelpool
//!
//! Provides argument parsing and subcommand handling for the modelpool binary.

use clap::{Parser, Subcommand};

/// Load-balancing, failover pool for model-serving backends
#[derive(Parser)]
#[command(name = "modelpool")]
#[command(version)]
#[command(about = "Load-balancing, failover pool for model-serving backends")]
#[command(
    long_about = "modelpool spreads generation and chat requests across Ollama, RKLLama and \
    OpenAI endpoints, tracks their health, and fails over to the next endpoint when one breaks."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# modelpool configuration
# =======================

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"
port = 3000

# ─────────────────────────────────────────────────────────────────────────────
# POOL
# ─────────────────────────────────────────────────────────────────────────────

[pool]
# How the primary endpoint is chosen for each call:
#   - "priority": lowest priority value first (ties keep file order)
#   - "round_robin": cycle through healthy endpoints
#   - "least_load": fewest in-flight requests and resident models
strategy = "priority"

# Background health probe interval. Endpoints whose last check is older than
# this are also re-probed before use.
health_check_interval_ms = 30000

# Delay before each fallback attempt after a failure
retry_delay_ms = 1000

# "fixed" waits retry_delay_ms every time; "exponential" doubles it per
# attempt, capped at 30 seconds
backoff = "fixed"

# ─────────────────────────────────────────────────────────────────────────────
# TIMEOUTS (seconds per backend family, each in 1..=1800)
# ─────────────────────────────────────────────────────────────────────────────

[timeouts]
ollama = 120
rkllama = 600   # NPU boards are slow to produce long replies
openai = 120

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error" (RUST_LOG overrides)
log_level = "info"

# ─────────────────────────────────────────────────────────────────────────────
# ENDPOINTS
# ─────────────────────────────────────────────────────────────────────────────
#
# Fields:
#   - url: base URL of the server (http:// or https://)
#   - backend_type: "ollama", "rkllama" or "openai"
#   - name: label used in logs and metrics (defaults to the url)
#   - priority: lower values are preferred (default 1)
#   - max_retries: consecutive failures before the endpoint is taken out (default 3)
#   - enabled: set to false to keep an entry without using it (default true)
#   - model: default model when a request does not name one
#   - api_key: required for "openai"

[[endpoints]]
name = "local-ollama"
url = "http://localhost:11434"
backend_type = "ollama"
priority = 1
max_retries = 3
model = "llama3.2:1b"

[[endpoints]]
name = "rk3588-board"
url = "http://localhost:8080"
backend_type = "rkllama"
priority = 2
max_retries = 3

# Hosted fallback:
# [[endpoints]]
# name = "openai"
# url = "https://api.openai.com"
# backend_type = "openai"
# priority = 10
# api_key = "sk-..."
# model = "gpt-4o-mini"
"#
}
