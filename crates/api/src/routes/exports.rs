//! Inventory export endpoint handlers.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use domain::models::{
    ExportCategory, ExportJob, ExportStatusUpdate, InitiateExportQuery, InitiateExportResponse,
    ListExportJobsResponse, EXPORT_ACCEPTED_MESSAGE,
};
use std::convert::Infallible;
use domain::services::{ExportQueryService, SubscriptionEvent};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserAuth;
use crate::middleware::metrics::record_export_requested;

/// Buffered updates per SSE connection.
const SSE_BUFFER: usize = 16;

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Request an export.
///
/// POST /api/v1/inventory/export/:category?format=XLSX
///
/// Returns 202 with the job id once the job is persisted and its task is
/// queued. The artifact is produced in the background.
pub async fn initiate_export(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(category): Path<String>,
    Query(query): Query<InitiateExportQuery>,
) -> Result<(StatusCode, Json<InitiateExportResponse>), ApiError> {
    query.validate()?;

    let category: ExportCategory = category.parse().map_err(ApiError::Validation)?;

    if let Some(ref limiter) = state.export_rate_limiter {
        if let Err(retry_after) = limiter.check(auth.user_id) {
            return Err(ApiError::RateLimitedWithRetry {
                message: format!(
                    "Export rate limit of {} exports/hour exceeded",
                    limiter.rate_limit_per_hour()
                ),
                retry_after,
            });
        }
    }

    let job_id = state
        .requests
        .initiate_export(auth.user_id, category, query.format_or_default())
        .await?;
    record_export_requested(category);

    Ok((
        StatusCode::ACCEPTED,
        Json(InitiateExportResponse {
            job_id,
            message: EXPORT_ACCEPTED_MESSAGE.to_string(),
        }),
    ))
}

/// Get one export job.
///
/// GET /api/v1/inventory/export/status/:job_id
pub async fn get_export_status(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ExportJob>, ApiError> {
    let job = find_owned_job(&state, auth.user_id, job_id).await?;
    Ok(Json(job))
}

/// Redirect to a completed export's file.
///
/// GET /api/v1/inventory/export/download/:job_id
///
/// Returns 404 while the job is not COMPLETED.
pub async fn download_export(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(job_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    find_owned_job(&state, auth.user_id, job_id).await?;
    let location = state
        .queries
        .get_download_location(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Export {} has no downloadable file", job_id)))?;

    info!(job_id = %job_id, owner_id = %auth.user_id, "Export download redirect");
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

/// List the caller's export jobs, newest first.
///
/// GET /api/v1/inventory/export/jobs
pub async fn list_export_jobs(
    State(state): State<AppState>,
    auth: UserAuth,
) -> Result<Json<ListExportJobsResponse>, ApiError> {
    let data = state.queries.list_jobs_for_owner(auth.user_id).await?;
    Ok(Json(ListExportJobsResponse {
        total: data.len(),
        data,
    }))
}

/// Stream one job's status updates.
///
/// GET /api/v1/inventory/export/status/:job_id/events
///
/// The first event is the current status. The stream ends after a terminal
/// status has been sent. The job is re-read from the store when the
/// subscription lags and every `export.event_resync_secs`, so a terminal
/// status published elsewhere still closes the stream.
pub async fn stream_export_events(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(job_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    // Subscribe before reading the snapshot so no update falls in between.
    let mut subscription = state.notifier.subscribe_job(job_id);
    let job = find_owned_job(&state, auth.user_id, job_id).await?;

    let queries = state.queries.clone();
    let resync_every = state.config.export.event_resync_interval();

    let (tx, rx) = mpsc::channel::<ExportStatusUpdate>(SSE_BUFFER);
    tokio::spawn(async move {
        let mut last = ExportStatusUpdate::from(&job);
        if tx.send(last.clone()).await.is_err() {
            return;
        }

        let mut resync = time::interval_at(Instant::now() + resync_every, resync_every);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !last.status.is_terminal() {
            let next = tokio::select! {
                _ = tx.closed() => break,
                _ = resync.tick() => reload(&queries, job_id).await,
                event = subscription.next_event() => match event {
                    Some(SubscriptionEvent::Update(update)) => Some(update),
                    Some(SubscriptionEvent::Lagged(_)) => reload(&queries, job_id).await,
                    None => break,
                },
            };
            let Some(update) = next else { continue };
            if update == last {
                continue;
            }
            last = update;
            if tx.send(last.clone()).await.is_err() {
                break;
            }
        }
        debug!(job_id = %job_id, "Export event stream closed");
    });

    let stream = ReceiverStream::new(rx).filter_map(|update| match status_event(&update) {
        Ok(event) => Some(Ok(event)),
        Err(e) => {
            tracing::warn!(job_id = %update.job_id, error = %e, "Failed to serialize status update");
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE)))
}

/// Current persisted status of a streamed job.
async fn reload(queries: &ExportQueryService, job_id: Uuid) -> Option<ExportStatusUpdate> {
    match queries.get_status(job_id).await {
        Ok(job) => job.as_ref().map(ExportStatusUpdate::from),
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to reload streamed export job");
            None
        }
    }
}

fn status_event(update: &ExportStatusUpdate) -> Result<SseEvent, serde_json::Error> {
    let data = serde_json::to_string(update)?;
    Ok(SseEvent::default()
        .event(update.status.as_label())
        .data(data))
}

/// Loads a job, treating other owners' jobs as missing.
async fn find_owned_job(
    state: &AppState,
    owner_id: Uuid,
    job_id: Uuid,
) -> Result<ExportJob, ApiError> {
    state
        .queries
        .get_status(job_id)
        .await?
        .filter(|job| job.owner_id == owner_id)
        .ok_or_else(|| ApiError::NotFound(format!("Export job {} not found", job_id)))
}
