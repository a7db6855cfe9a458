//! Log Stream: converts incremental log reads into an ordered SSE event
//! stream to an observer. Purely a producer/consumer over the store —
//! no in-process pub/sub, matching the polling design this system commits
//! to for the log stream.

use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use uuid::Uuid;

use crate::store::AppState;

const CATCHUP_LIMIT: i64 = 50;
const POLL_LIMIT: i64 = 100;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Builds the SSE stream body for `GET /api/v1/deployments/{id}/logs` when
/// the caller requests `text/event-stream`.
pub fn stream_logs(
    state: AppState,
    deployment_id: Uuid,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream! {
        let connected = serde_json::json!({
            "deployment_id": deployment_id,
            "timestamp": Utc::now(),
        });
        yield Ok(Event::default().event("connected").json_data(connected).unwrap());

        let mut cursor: Option<(DateTime<Utc>, Uuid)> = None;
        let mut last_heartbeat = tokio::time::Instant::now();

        // Initial catch-up: latest CATCHUP_LIMIT logs, oldest first.
        match crate::store::deployments::list_logs_after(&state.pool, deployment_id, None, CATCHUP_LIMIT).await {
            Ok(logs) => {
                for log in &logs {
                    cursor = Some((log.created_at, log.id));
                    yield Ok(Event::default().event("log").json_data(log).unwrap());
                }
            }
            Err(e) => {
                yield Ok(Event::default().event("error").data(e.to_string()));
                return;
            }
        }

        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            let logs = match crate::store::deployments::list_logs_after(&state.pool, deployment_id, cursor, POLL_LIMIT).await {
                Ok(logs) => logs,
                Err(e) => {
                    yield Ok(Event::default().event("error").data(e.to_string()));
                    return;
                }
            };

            for log in &logs {
                cursor = Some((log.created_at, log.id));
                yield Ok(Event::default().event("log").json_data(log).unwrap());
            }

            if logs.is_empty() && last_heartbeat.elapsed() >= POLL_INTERVAL {
                let heartbeat = serde_json::json!({ "timestamp": Utc::now() });
                yield Ok(Event::default().event("heartbeat").json_data(heartbeat).unwrap());
                last_heartbeat = tokio::time::Instant::now();
            }

            match crate::store::deployments::get_deployment(&state.pool, deployment_id).await {
                Ok(deployment) if deployment.status.is_terminal() && logs.is_empty() => {
                    break;
                }
                Ok(_) | Err(_) => {}
            }
        }
    }
}
