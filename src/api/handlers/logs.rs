//! Watchdog log access

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::server::AppState;

/// Lines returned when `lines` is absent or not a positive number
pub const DEFAULT_LOG_LINES: i64 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub lines: Option<String>,
}

impl LogsQuery {
    fn line_count(&self) -> i64 {
        self.lines
            .as_deref()
            .and_then(|l| l.parse::<i64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_LOG_LINES)
    }
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub lines: Vec<String>,
}

pub async fn get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Json<LogsResponse> {
    Json(LogsResponse {
        lines: state.watchdog.logs(query.line_count()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_count_defaults() {
        let query = |lines: Option<&str>| LogsQuery {
            lines: lines.map(str::to_string),
        };

        assert_eq!(query(None).line_count(), DEFAULT_LOG_LINES);
        assert_eq!(query(Some("abc")).line_count(), DEFAULT_LOG_LINES);
        assert_eq!(query(Some("0")).line_count(), DEFAULT_LOG_LINES);
        assert_eq!(query(Some("-3")).line_count(), DEFAULT_LOG_LINES);
        assert_eq!(query(Some("200")).line_count(), 200);
    }
}
