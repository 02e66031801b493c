//! # Jobs API
//!
//! Polling and Server-Sent Events for validation jobs. The event stream
//! opens with the job's current state, follows live progress, and closes
//! after the `complete` or `error` event.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use citecheck_core::state::ValidationJob;
use citecheck_core::swarm::{JobEvent, JobEventKind};
use futures::{
    future,
    stream::{self, BoxStream, Stream},
    StreamExt,
};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;

use super::ApiResult;
use crate::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/:job_id", get(get_job))
        .route("/:job_id/events", get(job_events))
}

fn sse_event(event: &JobEvent) -> Event {
    let json = serde_json::to_string(event).unwrap_or_default();
    Event::default()
        .event(event.kind.as_str())
        .id(event.id.clone())
        .data(json)
}

/// Job status and per-tier progress
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{job_id}",
    tag = "jobs",
    params(("job_id" = String, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job record", body = serde_json::Value),
        (status = 404, description = "Unknown job", body = super::ErrorBody)
    )
)]
pub async fn get_job(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ValidationJob>> {
    Ok(Json(state.coordinator.job(&job_id).await?))
}

/// Live job events
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{job_id}/events",
    tag = "jobs",
    params(("job_id" = String, Path, description = "Job id")),
    responses(
        (status = 200, description = "text/event-stream of start, tier2_progress, tier2_complete, tier3_progress, complete and error events"),
        (status = 404, description = "Unknown job", body = super::ErrorBody)
    )
)]
pub async fn job_events(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Subscribe before reading the state so nothing falls in between
    let tracker = state.coordinator.jobs().tracker(&job_id).await;
    let receiver = tracker.as_ref().map(|t| t.subscribe());
    let job = match &tracker {
        Some(tracker) => tracker.snapshot(),
        None => state.coordinator.job(&job_id).await?,
    };

    let replay = JobEvent::from_job(JobEventKind::for_state(&job), &job);
    let finished = replay.is_final();
    let head = stream::once(future::ready(replay));

    let events: BoxStream<'static, JobEvent> = match receiver {
        Some(receiver) if !finished => {
            let live = BroadcastStream::new(receiver)
                .filter_map(move |item| {
                    future::ready(match item {
                        Ok(event) => Some(event),
                        Err(e) => {
                            tracing::warn!("Job event subscriber lagged: {}", e);
                            None
                        }
                    })
                })
                // Stop after the terminal event
                .scan(false, |done, event| {
                    if *done {
                        return future::ready(None);
                    }
                    *done = event.is_final();
                    future::ready(Some(event))
                });
            head.chain(live).boxed()
        }
        // Finished, or only known from the database
        _ => head.boxed(),
    };

    let stream = events.map(|event| Ok(sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

#[cfg(test)]
mod tests {
    use crate::tests::test_router;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn send(app: &axum::Router, method: &str, uri: &str, body: &str) -> (StatusCode, String) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    #[tokio::test]
    async fn test_event_stream_ends_with_terminal_event() {
        let app = test_router();
        let (_, created) = send(
            &app,
            "POST",
            "/api/v1/checks",
            r#"{"title":"Brief","paragraphs":["See Roe v. Wade, 410 U.S. 113 (1973)."]}"#,
        )
        .await;
        let created: serde_json::Value = serde_json::from_str(&created).unwrap();
        let check_id = created["checkId"].as_str().unwrap();
        send(&app, "POST", &format!("/api/v1/checks/{}/identify-citations", check_id), "").await;

        let (status, accepted) = send(
            &app,
            "POST",
            &format!("/api/v1/checks/{}/validate-citations", check_id),
            "",
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let accepted: serde_json::Value = serde_json::from_str(&accepted).unwrap();
        let job_id = accepted["jobId"].as_str().unwrap();

        // The panels are empty, so the citation misses quorum but the job completes
        let (status, body) = send(&app, "GET", &format!("/api/v1/jobs/{}/events", job_id), "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("event: complete"));

        let (_, job) = send(&app, "GET", &format!("/api/v1/jobs/{}", job_id), "").await;
        let job: serde_json::Value = serde_json::from_str(&job).unwrap();
        assert_eq!(job["status"], "completed");
        assert_eq!(job["tier2Progress"]["failed"], 1);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let app = test_router();
        for uri in ["/api/v1/jobs/job_missing", "/api/v1/jobs/job_missing/events"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert!(String::from_utf8_lossy(&bytes).contains("not_found"));
        }
    }
}
