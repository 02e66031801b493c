//! # Checks API
//!
//! Intake, snapshots, citation identification, paragraph edits, validation
//! and manual review for one check.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use citecheck_core::state::{CheckRecord, CheckSummary, Citation, DocumentSnapshot, SnapshotSummary, ValidationJob};
use citecheck_core::swarm::{EditOutcome, ReviewDecision, RiskLevel};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{ApiError, ApiResult};
use crate::SharedState;
use citecheck_core::CheckError;

/// Already-structured document text
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCheckRequest {
    pub title: String,
    /// One entry per paragraph, in reading order
    pub paragraphs: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EditParagraphRequest {
    /// New paragraph text; existing `<cite>` markers may be kept
    pub paragraph_text: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReviewRequest {
    /// "low", "moderate" or "needs_review"
    #[schema(value_type = String)]
    pub status: RiskLevel,
    pub note: Option<String>,
    pub reviewer: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: String,
    pub check_id: String,
    pub status: String,
}

/// Query flag: true when given bare (`?force`) or as `true`/`1`
fn query_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None => Ok(false),
        Some("" | "true" | "1") => Ok(true),
        Some("false" | "0") => Ok(false),
        Some(other) => Err(serde::de::Error::invalid_value(
            serde::de::Unexpected::Str(other),
            &"a boolean flag",
        )),
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ValidateQuery {
    /// Re-run citations that are already validated
    #[serde(default, deserialize_with = "query_flag")]
    pub force: bool,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
pub struct RevalidateQuery {
    /// Run the investigators even if the first panel agrees
    #[serde(default, deserialize_with = "query_flag")]
    pub force_tier3: bool,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/", post(create_check).get(list_checks))
        .route("/:check_id", get(get_check))
        .route("/:check_id/snapshots", get(list_snapshots))
        .route("/:check_id/snapshots/:snapshot_id", get(get_snapshot))
        .route("/:check_id/identify-citations", post(identify_citations))
        .route("/:check_id/validate-citations", post(validate_citations))
        .route("/:check_id/jobs", get(list_check_jobs))
        .route("/:check_id/summary", get(get_summary))
        .route(
            "/:check_id/citations/:citation_id/revalidate",
            post(revalidate_citation),
        )
        .route("/:check_id/citations/:citation_id/review", post(review_citation))
        .route("/:check_id/paragraphs/:paragraph_id/edit", patch(edit_paragraph))
}

/// Create a check from structured paragraphs
#[utoipa::path(
    post,
    path = "/api/v1/checks",
    tag = "checks",
    request_body = CreateCheckRequest,
    responses(
        (status = 201, description = "Version 1 of the new check", body = serde_json::Value),
        (status = 400, description = "Empty title or paragraphs", body = super::ErrorBody)
    )
)]
pub async fn create_check(
    State(state): State<SharedState>,
    Json(req): Json<CreateCheckRequest>,
) -> ApiResult<(StatusCode, Json<DocumentSnapshot>)> {
    let snapshot = state
        .coordinator
        .create_check(&req.title, &req.paragraphs)
        .await?;
    tracing::info!(check_id = %snapshot.check_id, "Check created");
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// List checks
#[utoipa::path(
    get,
    path = "/api/v1/checks",
    tag = "checks",
    responses((status = 200, description = "All checks, newest first", body = serde_json::Value))
)]
pub async fn list_checks(State(state): State<SharedState>) -> ApiResult<Json<Vec<CheckRecord>>> {
    Ok(Json(state.coordinator.list_checks().await?))
}

/// Current snapshot of a check
#[utoipa::path(
    get,
    path = "/api/v1/checks/{check_id}",
    tag = "checks",
    params(("check_id" = String, Path, description = "Check id")),
    responses(
        (status = 200, description = "Current snapshot", body = serde_json::Value),
        (status = 404, description = "Unknown check", body = super::ErrorBody)
    )
)]
pub async fn get_check(
    State(state): State<SharedState>,
    Path(check_id): Path<String>,
) -> ApiResult<Json<DocumentSnapshot>> {
    Ok(Json(state.coordinator.current(&check_id).await?))
}

/// Version history, newest first
#[utoipa::path(
    get,
    path = "/api/v1/checks/{check_id}/snapshots",
    tag = "checks",
    params(("check_id" = String, Path, description = "Check id")),
    responses((status = 200, description = "Snapshot history", body = serde_json::Value))
)]
pub async fn list_snapshots(
    State(state): State<SharedState>,
    Path(check_id): Path<String>,
) -> ApiResult<Json<Vec<SnapshotSummary>>> {
    Ok(Json(state.coordinator.history(&check_id).await?))
}

/// One historical snapshot
#[utoipa::path(
    get,
    path = "/api/v1/checks/{check_id}/snapshots/{snapshot_id}",
    tag = "checks",
    params(
        ("check_id" = String, Path, description = "Check id"),
        ("snapshot_id" = String, Path, description = "Snapshot id")
    ),
    responses(
        (status = 200, description = "Snapshot", body = serde_json::Value),
        (status = 404, description = "Unknown snapshot", body = super::ErrorBody)
    )
)]
pub async fn get_snapshot(
    State(state): State<SharedState>,
    Path((check_id, snapshot_id)): Path<(String, String)>,
) -> ApiResult<Json<DocumentSnapshot>> {
    let snapshot = state.coordinator.snapshot(&snapshot_id).await?;
    if snapshot.check_id != check_id {
        return Err(ApiError(CheckError::NotFound(format!(
            "snapshot {} of check {}",
            snapshot_id, check_id
        ))));
    }
    Ok(Json(snapshot))
}

/// Identify citations in every paragraph
#[utoipa::path(
    post,
    path = "/api/v1/checks/{check_id}/identify-citations",
    tag = "checks",
    params(("check_id" = String, Path, description = "Check id")),
    responses(
        (status = 200, description = "New snapshot with citation markers", body = serde_json::Value),
        (status = 404, description = "Unknown check", body = super::ErrorBody)
    )
)]
pub async fn identify_citations(
    State(state): State<SharedState>,
    Path(check_id): Path<String>,
) -> ApiResult<Json<DocumentSnapshot>> {
    Ok(Json(state.coordinator.identify_citations(&check_id).await?))
}

/// Start a validation job
#[utoipa::path(
    post,
    path = "/api/v1/checks/{check_id}/validate-citations",
    tag = "checks",
    params(("check_id" = String, Path, description = "Check id"), ValidateQuery),
    responses(
        (status = 202, description = "Job queued", body = JobAccepted),
        (status = 400, description = "Check has no citations", body = super::ErrorBody),
        (status = 409, description = "Nothing to validate without force", body = super::ErrorBody)
    )
)]
pub async fn validate_citations(
    State(state): State<SharedState>,
    Path(check_id): Path<String>,
    Query(query): Query<ValidateQuery>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let job = state
        .coordinator
        .start_validation(&check_id, query.force)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id: job.id,
            check_id: job.check_id,
            status: job.status.as_str().to_string(),
        }),
    ))
}

/// Jobs of a check, newest first
#[utoipa::path(
    get,
    path = "/api/v1/checks/{check_id}/jobs",
    tag = "jobs",
    params(("check_id" = String, Path, description = "Check id")),
    responses((status = 200, description = "Jobs", body = serde_json::Value))
)]
pub async fn list_check_jobs(
    State(state): State<SharedState>,
    Path(check_id): Path<String>,
) -> ApiResult<Json<Vec<ValidationJob>>> {
    Ok(Json(state.coordinator.jobs_for_check(&check_id).await?))
}

/// Reprocess a single citation
#[utoipa::path(
    post,
    path = "/api/v1/checks/{check_id}/citations/{citation_id}/revalidate",
    tag = "checks",
    params(
        ("check_id" = String, Path, description = "Check id"),
        ("citation_id" = String, Path, description = "Citation id"),
        RevalidateQuery
    ),
    responses(
        (status = 200, description = "Updated citation", body = serde_json::Value),
        (status = 404, description = "Unknown citation", body = super::ErrorBody),
        (status = 409, description = "Citation edited meanwhile", body = super::ErrorBody)
    )
)]
pub async fn revalidate_citation(
    State(state): State<SharedState>,
    Path((check_id, citation_id)): Path<(String, String)>,
    Query(query): Query<RevalidateQuery>,
) -> ApiResult<Json<Citation>> {
    Ok(Json(
        state
            .coordinator
            .revalidate_citation(&check_id, &citation_id, query.force_tier3)
            .await?,
    ))
}

/// Edit one paragraph
#[utoipa::path(
    patch,
    path = "/api/v1/checks/{check_id}/paragraphs/{paragraph_id}/edit",
    tag = "checks",
    params(
        ("check_id" = String, Path, description = "Check id"),
        ("paragraph_id" = String, Path, description = "Paragraph id")
    ),
    request_body = EditParagraphRequest,
    responses(
        (status = 200, description = "Reconciled citations and the resulting snapshot", body = serde_json::Value),
        (status = 400, description = "Malformed paragraph text", body = super::ErrorBody),
        (status = 404, description = "Unknown paragraph", body = super::ErrorBody)
    )
)]
pub async fn edit_paragraph(
    State(state): State<SharedState>,
    Path((check_id, paragraph_id)): Path<(String, String)>,
    Json(req): Json<EditParagraphRequest>,
) -> ApiResult<Json<EditOutcome>> {
    Ok(Json(
        state
            .coordinator
            .edit_paragraph(&check_id, &paragraph_id, &req.paragraph_text)
            .await?,
    ))
}

/// Record a manual review
#[utoipa::path(
    post,
    path = "/api/v1/checks/{check_id}/citations/{citation_id}/review",
    tag = "checks",
    params(
        ("check_id" = String, Path, description = "Check id"),
        ("citation_id" = String, Path, description = "Citation id")
    ),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Reviewed citation", body = serde_json::Value),
        (status = 404, description = "Unknown citation", body = super::ErrorBody)
    )
)]
pub async fn review_citation(
    State(state): State<SharedState>,
    Path((check_id, citation_id)): Path<(String, String)>,
    Json(req): Json<ReviewRequest>,
) -> ApiResult<Json<Citation>> {
    let decision = ReviewDecision {
        status: req.status,
        note: req.note,
        reviewer: req.reviewer,
    };
    Ok(Json(
        state
            .coordinator
            .record_manual_review(&check_id, &citation_id, decision)
            .await?,
    ))
}

/// Effective status of every citation
#[utoipa::path(
    get,
    path = "/api/v1/checks/{check_id}/summary",
    tag = "checks",
    params(("check_id" = String, Path, description = "Check id")),
    responses((status = 200, description = "Summary", body = serde_json::Value))
)]
pub async fn get_summary(
    State(state): State<SharedState>,
    Path(check_id): Path<String>,
) -> ApiResult<Json<CheckSummary>> {
    Ok(Json(state.coordinator.summary(&check_id).await?))
}

#[cfg(test)]
mod tests {
    use super::{RevalidateQuery, ValidateQuery};
    use crate::tests::test_router;
    use axum::body::{to_bytes, Body};
    use axum::extract::Query;
    use axum::http::{Request, StatusCode, Uri};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_intake_identify_and_edit_over_http() {
        let app = test_router();
        let (status, created) = call(
            &app,
            "POST",
            "/api/v1/checks",
            Some(json!({
                "title": "Brief",
                "paragraphs": [
                    "See Roe v. Wade, 410 U.S. 113 (1973).",
                    "Jurisdiction rests on 28 U.S.C. § 1331."
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let check_id = created["checkId"].as_str().unwrap().to_string();

        let (status, identified) = call(
            &app,
            "POST",
            &format!("/api/v1/checks/{}/identify-citations", check_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(identified["document"]["citations"].as_array().unwrap().len(), 2);

        let (status, edited) = call(
            &app,
            "PATCH",
            &format!("/api/v1/checks/{}/paragraphs/p_002/edit", check_id),
            Some(json!({ "paragraphText": "No statute applies here." })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(edited["removedCitations"], json!(["cit_002"]));
        assert_eq!(edited["newCitations"], json!([]));

        let (status, history) = call(
            &app,
            "GET",
            &format!("/api/v1/checks/{}/snapshots", check_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_bare_query_flags_count_as_set() {
        let force_tier3 = |uri: &str| {
            Query::<RevalidateQuery>::try_from_uri(&uri.parse::<Uri>().unwrap())
                .map(|q| q.0.force_tier3)
        };
        assert!(force_tier3("/r?forceTier3").unwrap());
        assert!(force_tier3("/r?forceTier3=").unwrap());
        assert!(force_tier3("/r?forceTier3=true").unwrap());
        assert!(!force_tier3("/r?forceTier3=false").unwrap());
        assert!(!force_tier3("/r").unwrap());
        assert!(force_tier3("/r?forceTier3=maybe").is_err());

        let force = Query::<ValidateQuery>::try_from_uri(&"/v?force".parse::<Uri>().unwrap()).unwrap();
        assert!(force.0.force);
    }

    #[tokio::test]
    async fn test_revalidate_accepts_bare_force_flag() {
        let app = test_router();
        let (_, created) = call(
            &app,
            "POST",
            "/api/v1/checks",
            Some(json!({ "title": "Brief", "paragraphs": ["See Roe v. Wade, 410 U.S. 113 (1973)."] })),
        )
        .await;
        let check_id = created["checkId"].as_str().unwrap().to_string();
        call(
            &app,
            "POST",
            &format!("/api/v1/checks/{}/identify-citations", check_id),
            None,
        )
        .await;

        let (status, citation) = call(
            &app,
            "POST",
            &format!("/api/v1/checks/{}/citations/cit_001/revalidate?forceTier3", check_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(citation["id"], "cit_001");

        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/v1/checks/{}/citations/cit_001/revalidate?forceTier3=maybe", check_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_errors_map_to_status_codes() {
        let app = test_router();
        let (status, body) = call(&app, "GET", "/api/v1/checks/chk_missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");

        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/checks",
            Some(json!({ "title": "Empty", "paragraphs": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, created) = call(
            &app,
            "POST",
            "/api/v1/checks",
            Some(json!({ "title": "Plain", "paragraphs": ["Nothing cited."] })),
        )
        .await;
        let check_id = created["checkId"].as_str().unwrap();
        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/v1/checks/{}/validate-citations?force=true", check_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
