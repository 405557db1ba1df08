use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use therapy_log_core::types::UserRole;
use therapy_log_storage::ChildRecord;

use crate::auth::AuthUser;
use crate::problem::ProblemResponse;
use crate::router::AppState;

pub(crate) const UNKNOWN_CHILD_NAME: &str = "Unknown";

#[derive(Debug, Serialize)]
pub struct ChildView {
    pub id: String,
    pub child_code: String,
    pub name: String,
    pub age: i64,
    pub gender: String,
    pub diagnosis: String,
    pub created_at: DateTime<Utc>,
}

impl From<ChildRecord> for ChildView {
    fn from(child: ChildRecord) -> Self {
        Self {
            id: child.id,
            child_code: child.child_code,
            name: child.name,
            age: child.age,
            gender: child.gender,
            diagnosis: child.diagnosis,
            created_at: child.created_at,
        }
    }
}

pub(crate) fn child_not_found() -> ProblemResponse {
    ProblemResponse::not_found("child_not_found", "Child not found")
}

/// Loads a child the caller may read. Doctors see the children assigned to
/// them and parents see linked children; anything else is reported as missing.
pub(crate) async fn load_accessible_child(
    state: &AppState,
    user: &AuthUser,
    child_id: &str,
) -> Result<ChildRecord, ProblemResponse> {
    let storage = state.storage();
    let child = storage
        .children()
        .find_by_id(child_id)
        .await
        .map_err(|err| ProblemResponse::failure("child", "failed to load child", err))?
        .ok_or_else(child_not_found)?;

    let allowed = match user.role {
        UserRole::Doctor => child.assigned_doctor_id == user.user_id,
        UserRole::Parent => storage
            .parents()
            .is_linked(&user.user_id, &child.id)
            .await
            .map_err(|err| ProblemResponse::failure("child", "failed to check child link", err))?,
    };

    if allowed {
        Ok(child)
    } else {
        Err(child_not_found())
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyCodeQuery {
    code: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyCodeResponse {
    valid: bool,
    child_name: String,
}

pub async fn verify_code(
    State(state): State<AppState>,
    query: Result<Query<VerifyCodeQuery>, QueryRejection>,
) -> Result<Json<VerifyCodeResponse>, ProblemResponse> {
    let Query(query) = query?;
    let storage = state.storage();

    let code = storage
        .child_codes()
        .find_active(query.code.trim())
        .await
        .map_err(|err| ProblemResponse::failure("child", "failed to verify child code", err))?
        .ok_or_else(|| ProblemResponse::not_found("invalid_child_code", "Invalid or expired child code"))?;

    let child_name = storage
        .children()
        .find_by_id(&code.child_id)
        .await
        .map_err(|err| ProblemResponse::failure("child", "failed to load child", err))?
        .map(|child| child.name)
        .unwrap_or_else(|| UNKNOWN_CHILD_NAME.to_string());

    Ok(Json(VerifyCodeResponse {
        valid: true,
        child_name,
    }))
}

pub async fn details(
    State(state): State<AppState>,
    user: AuthUser,
    Path(child_id): Path<String>,
) -> Result<Json<ChildView>, ProblemResponse> {
    let child = load_accessible_child(&state, &user, &child_id).await?;
    Ok(Json(child.into()))
}
