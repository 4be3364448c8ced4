//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the reading-progress REST endpoints and
//! the master definition for the OpenAPI specification.
//!
//! Every handler runs the same preamble: the middleware has already
//! authenticated the caller, so each request resolves the material to its
//! owning course and checks enrollment-or-lecturer membership before any
//! engine operation executes. The engine itself never sees HTTP.

use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use coursegate_core::domain::{PageSummary, ProgressError, ProgressSummary, ReadingProgress};
use coursegate_core::ports::{MaterialRef, PortError, ProgressLookup};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        initialize_handler,
        start_page_handler,
        update_time_handler,
        complete_page_handler,
        get_progress_handler,
        can_download_handler,
        page_progress_handler,
    ),
    components(schemas(
        InitializeRequest,
        UpdateTimeRequest,
        ProgressResponse,
        PageStateBody,
        ProgressSummaryBody,
        DownloadEligibilityResponse,
    )),
    tags(
        (name = "Reading Progress API", description = "Gated page-by-page reading progress for course materials.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Request and Response Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    /// Page count of the material; defaults to 1 when absent.
    #[serde(default)]
    pub total_pages: Option<u32>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTimeRequest {
    /// Client-reported total seconds spent on the page so far.
    pub time_spent: u32,
}

/// Per-page dwell state as exposed over the wire.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageStateBody {
    pub page_number: u32,
    pub time_spent: u32,
    pub is_completed: bool,
    pub can_proceed: bool,
    pub min_time_required: u32,
    pub max_time_allowed: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<PageSummary> for PageStateBody {
    fn from(page: PageSummary) -> Self {
        Self {
            page_number: page.page_number,
            time_spent: page.time_spent_secs,
            is_completed: page.is_completed,
            can_proceed: page.can_proceed,
            min_time_required: page.min_time_required_secs,
            max_time_allowed: page.max_time_allowed_secs,
            start_time: page.started_at,
            end_time: page.ended_at,
        }
    }
}

/// The full progress record, returned by the mutating endpoints.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub material: Uuid,
    pub course: Uuid,
    pub total_pages: u32,
    pub current_page: u32,
    pub completed_pages: u32,
    pub can_download: bool,
    pub pages: Vec<PageStateBody>,
}

impl From<&ReadingProgress> for ProgressResponse {
    fn from(progress: &ReadingProgress) -> Self {
        Self {
            material: progress.material,
            course: progress.course,
            total_pages: progress.total_pages,
            current_page: progress.current_page,
            completed_pages: progress.completed_pages,
            can_download: progress.can_download,
            pages: progress
                .pages
                .keys()
                .map(|&n| progress.page_summary(n).into())
                .collect(),
        }
    }
}

/// Aggregate progress view, also used as the "not started" default.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummaryBody {
    pub completed_pages: u32,
    pub total_pages: u32,
    pub progress_percentage: u32,
    pub total_time_spent: u32,
    pub can_download: bool,
    pub current_page: u32,
}

impl From<ProgressSummary> for ProgressSummaryBody {
    fn from(view: ProgressSummary) -> Self {
        Self {
            completed_pages: view.completed_pages,
            total_pages: view.total_pages,
            progress_percentage: view.progress_percent,
            total_time_spent: view.total_time_secs,
            can_download: view.can_download,
            current_page: view.current_page,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DownloadEligibilityResponse {
    pub can_download: bool,
    pub progress: ProgressSummaryBody,
    pub reason: String,
}

//=========================================================================================
// Shared Handler Plumbing
//=========================================================================================

type Rejection = (StatusCode, String);

fn port_error_rejection(context: &str, e: PortError) -> Rejection {
    match e {
        PortError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        PortError::Conflict(msg) => {
            // A double-submitted request lost the read-modify-write race.
            (StatusCode::CONFLICT, msg)
        }
        PortError::Unexpected(msg) => {
            error!("{}: {}", context, msg);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to {}", context))
        }
    }
}

fn progress_error_rejection(e: ProgressError) -> Rejection {
    match e {
        ProgressError::PageNotStarted { .. } => {
            (StatusCode::NOT_FOUND, "Page not found in progress".to_string())
        }
        ProgressError::MinimumTimeNotMet { required_secs, .. } => (
            StatusCode::BAD_REQUEST,
            format!(
                "You must spend at least {} minutes on this page before completing it",
                required_secs.div_ceil(60)
            ),
        ),
    }
}

/// Resolves the material and verifies the caller is enrolled in, or
/// lectures, the owning course.
async fn authorize_material(
    state: &AppState,
    user_id: Uuid,
    material_id: Uuid,
) -> Result<MaterialRef, Rejection> {
    let material = state
        .directory
        .material_course(material_id)
        .await
        .map_err(|e| port_error_rejection("resolve material", e))?;

    let role = state
        .directory
        .membership(material.course, user_id)
        .await
        .map_err(|e| port_error_rejection("check course membership", e))?;

    if role.is_none() {
        return Err((
            StatusCode::FORBIDDEN,
            "Not authorized to read this material".to_string(),
        ));
    }
    Ok(material)
}

/// Loads the progress record, rejecting when the session was never
/// initialized. Mutating endpoints require an explicit record; only the
/// read-side endpoints fall back to default views.
async fn load_progress(
    state: &AppState,
    user_id: Uuid,
    material_id: Uuid,
) -> Result<ReadingProgress, Rejection> {
    match state
        .store
        .find(user_id, material_id)
        .await
        .map_err(|e| port_error_rejection("load reading progress", e))?
    {
        ProgressLookup::Found(progress) => Ok(progress),
        ProgressLookup::NotStarted => Err((
            StatusCode::NOT_FOUND,
            "Reading progress not found. Please initialize reading session first.".to_string(),
        )),
    }
}

async fn persist(state: &AppState, progress: &ReadingProgress) -> Result<(), Rejection> {
    state
        .store
        .update(progress)
        .await
        .map_err(|e| port_error_rejection("save reading progress", e))
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Initialize a reading session for a material.
///
/// Idempotent: when a progress record already exists for this caller and
/// material, it is returned unchanged and the supplied page count is ignored.
#[utoipa::path(
    post,
    path = "/materials/{material_id}/reading/initialize",
    request_body = InitializeRequest,
    params(("material_id" = Uuid, Path, description = "The material to read.")),
    responses(
        (status = 200, description = "Reading session ready", body = ProgressResponse),
        (status = 403, description = "Caller is not enrolled in the owning course"),
        (status = 404, description = "Material not found")
    )
)]
pub async fn initialize_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(material_id): Path<Uuid>,
    Json(body): Json<InitializeRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let material = authorize_material(&state, user_id, material_id).await?;

    let lookup = state
        .store
        .find(user_id, material_id)
        .await
        .map_err(|e| port_error_rejection("load reading progress", e))?;

    let progress = match lookup {
        ProgressLookup::Found(existing) => existing,
        ProgressLookup::NotStarted => {
            let fresh = ReadingProgress::new(
                user_id,
                material.material,
                material.course,
                body.total_pages.unwrap_or(1),
                Utc::now(),
            );
            state
                .store
                .create(&fresh)
                .await
                .map_err(|e| port_error_rejection("create reading progress", e))?
        }
    };

    Ok(Json(ProgressResponse::from(&progress)))
}

/// Start (or resume) reading a page.
///
/// Enforces the linear unlock: every page before this one must be completed.
#[utoipa::path(
    post,
    path = "/materials/{material_id}/reading/pages/{page_number}/start",
    params(
        ("material_id" = Uuid, Path, description = "The material being read."),
        ("page_number" = u32, Path, description = "The page to open.")
    ),
    responses(
        (status = 200, description = "Page opened", body = ProgressResponse),
        (status = 403, description = "Previous pages are not all completed"),
        (status = 404, description = "Material or progress record not found"),
        (status = 409, description = "Concurrent update, retry")
    )
)]
pub async fn start_page_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path((material_id, page_number)): Path<(Uuid, u32)>,
) -> Result<impl IntoResponse, Rejection> {
    authorize_material(&state, user_id, material_id).await?;
    let mut progress = load_progress(&state, user_id, material_id).await?;

    if !progress.can_navigate_to(page_number) {
        return Err((
            StatusCode::FORBIDDEN,
            "You must complete previous pages before accessing this page".to_string(),
        ));
    }

    progress.start_page(page_number, Utc::now());
    persist(&state, &progress).await?;

    Ok(Json(ProgressResponse::from(&progress)))
}

/// Record the client-reported dwell time for a page.
#[utoipa::path(
    put,
    path = "/materials/{material_id}/reading/pages/{page_number}/time",
    request_body = UpdateTimeRequest,
    params(
        ("material_id" = Uuid, Path, description = "The material being read."),
        ("page_number" = u32, Path, description = "The page being timed.")
    ),
    responses(
        (status = 200, description = "Time recorded", body = ProgressResponse),
        (status = 404, description = "Material, progress record or page not found"),
        (status = 409, description = "Concurrent update, retry")
    )
)]
pub async fn update_time_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path((material_id, page_number)): Path<(Uuid, u32)>,
    Json(body): Json<UpdateTimeRequest>,
) -> Result<impl IntoResponse, Rejection> {
    authorize_material(&state, user_id, material_id).await?;
    let mut progress = load_progress(&state, user_id, material_id).await?;

    progress
        .update_page_time(page_number, body.time_spent, Utc::now())
        .map_err(progress_error_rejection)?;
    persist(&state, &progress).await?;

    Ok(Json(ProgressResponse::from(&progress)))
}

/// Mark a page as completed.
///
/// The minimum-dwell gate lives inside the engine, so a client calling this
/// endpoint directly cannot bypass the timing check.
#[utoipa::path(
    post,
    path = "/materials/{material_id}/reading/pages/{page_number}/complete",
    params(
        ("material_id" = Uuid, Path, description = "The material being read."),
        ("page_number" = u32, Path, description = "The page to complete.")
    ),
    responses(
        (status = 200, description = "Page completed", body = ProgressResponse),
        (status = 400, description = "Minimum reading time not met"),
        (status = 404, description = "Material, progress record or page not found"),
        (status = 409, description = "Concurrent update, retry")
    )
)]
pub async fn complete_page_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path((material_id, page_number)): Path<(Uuid, u32)>,
) -> Result<impl IntoResponse, Rejection> {
    authorize_material(&state, user_id, material_id).await?;
    let mut progress = load_progress(&state, user_id, material_id).await?;

    progress
        .complete_page(page_number, Utc::now())
        .map_err(progress_error_rejection)?;
    persist(&state, &progress).await?;

    Ok(Json(ProgressResponse::from(&progress)))
}

/// Fetch the aggregate reading progress for a material.
///
/// A caller who never initialized a session gets the fixed "not started"
/// view rather than an error.
#[utoipa::path(
    get,
    path = "/materials/{material_id}/reading/progress",
    params(("material_id" = Uuid, Path, description = "The material being read.")),
    responses(
        (status = 200, description = "Aggregate progress", body = ProgressSummaryBody),
        (status = 403, description = "Caller is not enrolled in the owning course"),
        (status = 404, description = "Material not found")
    )
)]
pub async fn get_progress_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(material_id): Path<Uuid>,
) -> Result<impl IntoResponse, Rejection> {
    authorize_material(&state, user_id, material_id).await?;

    let view = match state
        .store
        .find(user_id, material_id)
        .await
        .map_err(|e| port_error_rejection("load reading progress", e))?
    {
        ProgressLookup::Found(progress) => progress.summary(),
        ProgressLookup::NotStarted => ProgressSummary::not_started(),
    };

    Ok(Json(ProgressSummaryBody::from(view)))
}

/// Check whether the caller may download the material.
#[utoipa::path(
    get,
    path = "/materials/{material_id}/reading/can-download",
    params(("material_id" = Uuid, Path, description = "The material to download.")),
    responses(
        (status = 200, description = "Download eligibility verdict", body = DownloadEligibilityResponse),
        (status = 403, description = "Caller is not enrolled in the owning course"),
        (status = 404, description = "Material not found")
    )
)]
pub async fn can_download_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(material_id): Path<Uuid>,
) -> Result<impl IntoResponse, Rejection> {
    authorize_material(&state, user_id, material_id).await?;

    let response = match state
        .store
        .find(user_id, material_id)
        .await
        .map_err(|e| port_error_rejection("load reading progress", e))?
    {
        ProgressLookup::NotStarted => DownloadEligibilityResponse {
            can_download: false,
            progress: ProgressSummary::not_started().into(),
            reason: "Reading progress not found".to_string(),
        },
        ProgressLookup::Found(progress) => {
            let view = progress.summary();
            let reason = if view.can_download {
                "All pages completed successfully".to_string()
            } else {
                format!("{}/{} pages completed", view.completed_pages, view.total_pages)
            };
            DownloadEligibilityResponse {
                can_download: view.can_download,
                progress: view.into(),
                reason,
            }
        }
    };

    Ok(Json(response))
}

/// Fetch the dwell state of a single page.
#[utoipa::path(
    get,
    path = "/materials/{material_id}/reading/pages/{page_number}/progress",
    params(
        ("material_id" = Uuid, Path, description = "The material being read."),
        ("page_number" = u32, Path, description = "The page to inspect.")
    ),
    responses(
        (status = 200, description = "Page dwell state", body = PageStateBody),
        (status = 403, description = "Caller is not enrolled in the owning course"),
        (status = 404, description = "Material not found")
    )
)]
pub async fn page_progress_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path((material_id, page_number)): Path<(Uuid, u32)>,
) -> Result<impl IntoResponse, Rejection> {
    authorize_material(&state, user_id, material_id).await?;

    let view = match state
        .store
        .find(user_id, material_id)
        .await
        .map_err(|e| port_error_rejection("load reading progress", e))?
    {
        ProgressLookup::Found(progress) => progress.page_summary(page_number),
        ProgressLookup::NotStarted => PageSummary::unvisited(page_number),
    };

    Ok(Json(PageStateBody::from(view)))
}
