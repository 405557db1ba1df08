use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::{DateTime, Datelike, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use therapy_log_storage::{ParentRecord, RecentSession, TherapyLogError};

use crate::auth::ParentUser;
use crate::child::{ChildView, UNKNOWN_CHILD_NAME};
use crate::problem::ProblemResponse;
use crate::router::AppState;

const RECENT_ACTIVITY_LIMIT: i64 = 5;
const ACTIVITY_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Serialize)]
pub struct RecentActivity {
    child_name: String,
    date: DateTime<Utc>,
    duration: i64,
    activities: String,
}

impl From<RecentSession> for RecentActivity {
    fn from(session: RecentSession) -> Self {
        Self {
            child_name: session.child_name,
            date: session.session_date,
            duration: session.duration_minutes,
            activities: session
                .activities_performed
                .chars()
                .take(ACTIVITY_PREVIEW_CHARS)
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    total_children: usize,
    monthly_sessions: u64,
    recent_activity: Vec<RecentActivity>,
}

#[derive(Debug, Serialize)]
pub struct ParentProfile {
    id: String,
    name: String,
    email: String,
    phone: Option<String>,
    total_children: usize,
}

#[derive(Debug, Deserialize)]
pub struct LinkChildRequest {
    #[serde(default)]
    child_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LinkChildResponse {
    message: &'static str,
    child_id: String,
    child_name: String,
}

fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .with_day(1)
        .unwrap_or_else(|| now.date_naive())
        .and_time(NaiveTime::MIN)
        .and_utc()
}

async fn load_parent(state: &AppState, parent: &ParentUser) -> Result<ParentRecord, ProblemResponse> {
    state
        .storage()
        .parents()
        .find_by_id(&parent.parent_id)
        .await
        .map_err(|err| ProblemResponse::failure("parent", "failed to load parent", err))?
        .ok_or_else(|| ProblemResponse::not_found("parent_not_found", "Parent not found"))
}

async fn linked_child_count(state: &AppState, parent_id: &str) -> Result<usize, ProblemResponse> {
    let ids = state
        .storage()
        .parents()
        .list_child_ids(parent_id)
        .await
        .map_err(|err| ProblemResponse::failure("parent", "failed to list linked children", err))?;
    Ok(ids.len())
}

pub async fn children(
    State(state): State<AppState>,
    parent: ParentUser,
) -> Result<Json<Vec<ChildView>>, ProblemResponse> {
    let record = load_parent(&state, &parent).await?;
    let children = state
        .storage()
        .children()
        .list_for_parent(&record.id)
        .await
        .map_err(|err| ProblemResponse::failure("parent", "failed to list children", err))?;
    Ok(Json(children.into_iter().map(ChildView::from).collect()))
}

pub async fn dashboard_stats(
    State(state): State<AppState>,
    parent: ParentUser,
) -> Result<Json<DashboardStats>, ProblemResponse> {
    let record = load_parent(&state, &parent).await?;
    let logs = state.storage().therapy_logs();
    let stats_failure =
        |err: TherapyLogError| ProblemResponse::failure("parent", "failed to compute dashboard stats", err);

    let total_children = linked_child_count(&state, &record.id).await?;
    let monthly_sessions = logs
        .count_for_parent_since(&record.id, month_start(state.now()))
        .await
        .map_err(stats_failure)?;
    let recent_activity = logs
        .recent_for_parent(&record.id, RECENT_ACTIVITY_LIMIT)
        .await
        .map_err(stats_failure)?
        .into_iter()
        .map(RecentActivity::from)
        .collect();

    Ok(Json(DashboardStats {
        total_children,
        monthly_sessions,
        recent_activity,
    }))
}

pub async fn profile(
    State(state): State<AppState>,
    parent: ParentUser,
) -> Result<Json<ParentProfile>, ProblemResponse> {
    let record = load_parent(&state, &parent).await?;
    let total_children = linked_child_count(&state, &record.id).await?;
    Ok(Json(ParentProfile {
        id: record.id,
        name: record.name,
        email: record.email,
        phone: record.phone,
        total_children,
    }))
}

/// Links the caller to the child owning `child_code`. Linking twice is not an
/// error.
pub async fn link_child(
    State(state): State<AppState>,
    parent: ParentUser,
    payload: Result<Json<LinkChildRequest>, JsonRejection>,
) -> Result<Json<LinkChildResponse>, ProblemResponse> {
    let Json(request) = payload?;
    let code = request
        .child_code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .ok_or_else(|| ProblemResponse::bad_request("missing_child_code", "Child code is required"))?;

    let storage = state.storage();
    let code_record = storage
        .child_codes()
        .find_active(code)
        .await
        .map_err(|err| ProblemResponse::failure("parent", "failed to look up child code", err))?
        .ok_or_else(|| ProblemResponse::not_found("invalid_child_code", "Invalid or expired child code"))?;

    let record = load_parent(&state, &parent).await?;
    let child_name = storage
        .children()
        .find_by_id(&code_record.child_id)
        .await
        .map_err(|err| ProblemResponse::failure("parent", "failed to load child", err))?
        .map(|child| child.name)
        .unwrap_or_else(|| UNKNOWN_CHILD_NAME.to_string());

    let mut tx = storage
        .begin()
        .await
        .map_err(|err| ProblemResponse::failure("parent", "failed to open transaction", err))?;
    let linked = storage
        .parents()
        .link_child(&mut tx, &record.id, &code_record.child_id, state.now())
        .await
        .map_err(|err| ProblemResponse::failure("parent", "failed to link child", err))?;
    tx.commit()
        .await
        .map_err(|err| ProblemResponse::failure("parent", "failed to commit child link", err))?;

    let message = if linked {
        info!(
            stage = "parent",
            parent_id = %record.id,
            child_id = %code_record.child_id,
            "child linked to parent"
        );
        "Child linked successfully"
    } else {
        "Child is already linked to your account"
    };

    Ok(Json(LinkChildResponse {
        message,
        child_id: code_record.child_id,
        child_name,
    }))
}
