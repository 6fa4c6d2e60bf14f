//! Pool status endpoint

use axum::{Json, extract::State};

use crate::handlers::AppState;
use crate::pool::PoolStatus;

/// GET /api/status
///
/// Served from cached endpoint state, so it stays fast even when every
/// backend is down.
pub async fn handler(State(state): State<AppState>) -> Json<PoolStatus> {
    Json(state.pool().pool_status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pool::SelectionStrategy;
    use std::str::FromStr;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_status_lists_endpoints_in_priority_order() {
        let config = Config::from_str(
            r#"
[pool]
strategy = "least_load"

[[endpoints]]
name = "board"
url = "http://127.0.0.1:2"
backend_type = "rkllama"
priority = 2

[[endpoints]]
name = "desktop"
url = "http://127.0.0.1:1"
backend_type = "ollama"
priority = 1
"#,
        )
        .expect("should parse test config");
        let state = AppState::new(Arc::new(config)).expect("should build state");

        let Json(status) = handler(State(state)).await;

        assert_eq!(status.total_endpoints, 2);
        assert_eq!(status.healthy_endpoints, 2);
        assert_eq!(status.strategy, SelectionStrategy::LeastLoad);
        let names: Vec<_> = status.endpoints.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["desktop", "board"]);
        assert!(status.endpoints.iter().all(|e| e.version.is_none()));
    }
}
