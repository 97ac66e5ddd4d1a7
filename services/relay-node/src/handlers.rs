use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use lifeline_domain::BloodRequest;
use lifeline_relay::{DispatchReport, StoreError, StoredNotice, UpdateReport};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument, Span};
use uuid::Uuid;

use crate::state::AppState;

const DEFAULT_NOTICE_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct RequestUpdate {
    pub before: BloodRequest,
    pub after: BloodRequest,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenBy {
    pub viewer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct NoticeQuery {
    pub limit: Option<usize>,
}

fn trigger_span(kind: &'static str) -> Span {
    info_span!("trigger", trigger_id = %Uuid::new_v4(), kind)
}

pub async fn request_created(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BloodRequest>,
) -> Json<DispatchReport> {
    let span = trigger_span("request_created");
    let report = state
        .engine
        .on_request_created(&request)
        .instrument(span)
        .await;
    Json(report)
}

pub async fn request_updated(
    State(state): State<Arc<AppState>>,
    Json(update): Json<RequestUpdate>,
) -> Json<UpdateReport> {
    let span = trigger_span("request_updated");
    let report = state
        .engine
        .on_request_updated(&update.before, &update.after)
        .instrument(span)
        .await;
    Json(report)
}

pub async fn record_seen(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
    Json(seen): Json<SeenBy>,
) -> StatusCode {
    match state.engine.record_seen(&request_id, &seen.viewer_id).await {
        Ok(added) => {
            info!(%request_id, viewer_id = %seen.viewer_id, added, "Seen recorded");
            StatusCode::NO_CONTENT
        }
        Err(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        Err(StoreError::InvalidDocument(e)) => {
            error!(%request_id, error = %e, "Stored request is unreadable");
            StatusCode::UNPROCESSABLE_ENTITY
        }
        Err(e) => {
            error!(%request_id, error = %e, "Failed to record viewer");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

pub async fn recent_notices(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NoticeQuery>,
) -> Json<Vec<StoredNotice>> {
    Json(state.feed.recent(query.limit.unwrap_or(DEFAULT_NOTICE_LIMIT)))
}
