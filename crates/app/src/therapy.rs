use std::collections::BTreeMap;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use therapy_log_core::scoring::session_domain_scores;
use therapy_log_core::types::{deserialize_session_date, DomainAssessments, TherapyLog};
use therapy_log_storage::{new_id, NewTherapyLog};

use crate::auth::{AuthUser, DoctorUser};
use crate::child::load_accessible_child;
use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::telemetry;

const LOG_LIST_LIMIT: i64 = 100;
/// Upper bound on a single session, one full day.
const MAX_SESSION_MINUTES: i64 = 24 * 60;

#[derive(Debug, Deserialize)]
pub struct AddLogRequest {
    child_id: String,
    #[serde(deserialize_with = "deserialize_session_date")]
    session_date: DateTime<Utc>,
    duration_minutes: i64,
    activities_performed: String,
    notes: String,
    #[serde(default)]
    goals_addressed: Option<String>,
    #[serde(default)]
    recommendations: Option<String>,
    #[serde(flatten)]
    assessments: DomainAssessments,
}

#[derive(Debug, Serialize)]
pub struct AddLogResponse {
    success: bool,
    log_id: String,
    message: &'static str,
}

/// Single session with per-domain percentages.
#[derive(Debug, Serialize)]
pub struct SessionDetail {
    id: String,
    child_id: String,
    session_date: DateTime<Utc>,
    duration_minutes: i64,
    activities_performed: String,
    goals_addressed: Option<String>,
    notes: String,
    recommendations: Option<String>,
    domain_scores: Option<BTreeMap<&'static str, u32>>,
    #[serde(flatten)]
    assessments: DomainAssessments,
    created_at: DateTime<Utc>,
}

impl From<TherapyLog> for SessionDetail {
    fn from(log: TherapyLog) -> Self {
        let scores = session_domain_scores(&log.assessments);
        Self {
            id: log.id,
            child_id: log.child_id,
            session_date: log.session_date,
            duration_minutes: log.duration_minutes,
            activities_performed: log.activities_performed,
            goals_addressed: log.goals_addressed,
            notes: log.notes,
            recommendations: log.recommendations,
            domain_scores: (!scores.is_empty()).then_some(scores),
            assessments: log.assessments,
            created_at: log.created_at,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|text| !text.is_empty())
}

pub async fn add_log(
    State(state): State<AppState>,
    doctor: DoctorUser,
    payload: Result<Json<AddLogRequest>, JsonRejection>,
) -> Result<Json<AddLogResponse>, ProblemResponse> {
    let Json(request) = payload?;
    if !(1..=MAX_SESSION_MINUTES).contains(&request.duration_minutes) {
        return Err(ProblemResponse::bad_request(
            "invalid_duration",
            format!("duration_minutes must be between 1 and {MAX_SESSION_MINUTES}"),
        ));
    }

    let storage = state.storage();
    let child = storage
        .children()
        .find_by_id(&request.child_id)
        .await
        .map_err(|err| ProblemResponse::failure("therapy", "failed to load child", err))?
        .filter(|child| child.assigned_doctor_id == doctor.doctor_id)
        .ok_or_else(|| {
            ProblemResponse::not_found("child_not_found", "Child not found or not assigned to you")
        })?;

    let log = NewTherapyLog {
        id: new_id(),
        child_id: &child.id,
        doctor_id: &doctor.doctor_id,
        session_date: request.session_date,
        duration_minutes: request.duration_minutes,
        activities_performed: &request.activities_performed,
        notes: &request.notes,
        goals_addressed: non_blank(&request.goals_addressed),
        recommendations: non_blank(&request.recommendations),
        assessments: &request.assessments,
        created_at: state.now(),
    };
    storage
        .therapy_logs()
        .insert(&log)
        .await
        .map_err(|err| ProblemResponse::failure("therapy", "failed to store therapy log", err))?;

    telemetry::record_therapy_log();
    info!(
        stage = "therapy",
        log_id = %log.id,
        child_id = %child.id,
        session_date = %log.session_date,
        "therapy log recorded"
    );

    Ok(Json(AddLogResponse {
        success: true,
        log_id: log.id,
        message: "Therapy log added successfully",
    }))
}

pub async fn session(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetail>, ProblemResponse> {
    let session_missing = || ProblemResponse::not_found("session_not_found", "Session not found");
    let log = state
        .storage()
        .therapy_logs()
        .find_by_id(&session_id)
        .await
        .map_err(|err| ProblemResponse::failure("therapy", "failed to load session", err))?
        .ok_or_else(session_missing)?;

    // Sessions of children the caller cannot see are reported as missing.
    load_accessible_child(&state, &user, &log.child_id)
        .await
        .map_err(|problem| {
            if problem.status().is_server_error() {
                problem
            } else {
                session_missing()
            }
        })?;

    Ok(Json(log.into()))
}

pub async fn logs(
    State(state): State<AppState>,
    user: AuthUser,
    Path(child_id): Path<String>,
) -> Result<Json<Vec<TherapyLog>>, ProblemResponse> {
    let child = load_accessible_child(&state, &user, &child_id).await?;
    let logs = state
        .storage()
        .therapy_logs()
        .list_for_child(&child.id, LOG_LIST_LIMIT)
        .await
        .map_err(|err| ProblemResponse::failure("therapy", "failed to list therapy logs", err))?;
    Ok(Json(logs))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::test_support::{link, seed_child, seed_doctor, seed_parent, send, setup_state};

    fn log_body(child_id: &str, session_date: &str) -> serde_json::Value {
        json!({
            "child_id": child_id,
            "session_date": session_date,
            "duration_minutes": 45,
            "activities_performed": "Turn-taking games",
            "notes": "Engaged well",
            "communication_skills": {
                "verbal": {"speak_words_sentences": "good"},
                "non_verbal": {"eye_contact": "average"}
            },
            "social_skills": {"sharing_turn_taking": "no_improvement"}
        })
    }

    #[tokio::test]
    async fn doctor_records_and_reads_session() {
        let state = setup_state().await;
        let (doctor_id, token) = seed_doctor(&state, "doc@example.com").await;
        let child = seed_child(&state, &doctor_id, "Sam", "P-2024-1234").await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/therapy/add-log",
            Some(&token),
            Some(log_body(&child.id, "2024-03-13T10:00")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let log_id = body["log_id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &state,
            Method::GET,
            &format!("/api/therapy/session/{log_id}"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_date"], "2024-03-13T10:00:00Z");
        assert_eq!(body["domain_scores"]["communication"], 80);
        assert_eq!(body["domain_scores"]["social"], 20);
        assert!(body["domain_scores"].get("behavior").is_none());
        assert_eq!(
            body["communication_skills"]["verbal"]["speak_words_sentences"],
            "good"
        );
        assert!(body["behavior"].is_null());
    }

    #[tokio::test]
    async fn add_log_validates_duration_and_assignment() {
        let state = setup_state().await;
        let (doctor_id, token) = seed_doctor(&state, "doc@example.com").await;
        let (_, other_token) = seed_doctor(&state, "other@example.com").await;
        let child = seed_child(&state, &doctor_id, "Sam", "P-2024-1234").await;

        let mut body = log_body(&child.id, "2024-03-13T10:00:00Z");
        body["duration_minutes"] = json!(0);
        let (status, _) =
            send(&state, Method::POST, "/api/therapy/add-log", Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        for (minutes, expected) in [
            (json!(24 * 60 + 1), StatusCode::BAD_REQUEST),
            (json!(i64::MAX), StatusCode::BAD_REQUEST),
            (json!(24 * 60), StatusCode::OK),
        ] {
            let mut body = log_body(&child.id, "2024-03-13T10:00:00Z");
            body["duration_minutes"] = minutes;
            let (status, problem) =
                send(&state, Method::POST, "/api/therapy/add-log", Some(&token), Some(body)).await;
            assert_eq!(status, expected);
            if expected == StatusCode::BAD_REQUEST {
                assert_eq!(problem["type"], "invalid_duration");
            }
        }

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/therapy/add-log",
            Some(&other_token),
            Some(log_body(&child.id, "2024-03-13T10:00:00Z")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Child not found or not assigned to you");

        let (status, _) = send(
            &state,
            Method::POST,
            "/api/therapy/add-log",
            Some(&token),
            Some(log_body(&child.id, "last tuesday")),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn logs_are_newest_first_and_access_checked() {
        let state = setup_state().await;
        let (doctor_id, token) = seed_doctor(&state, "doc@example.com").await;
        let (parent_id, parent_token) = seed_parent(&state, "parent@example.com").await;
        let child = seed_child(&state, &doctor_id, "Sam", "P-2024-1234").await;

        for date in ["2024-03-10T09:00:00Z", "2024-03-12T09:00:00Z", "2024-03-11T09:00:00Z"] {
            let (status, _) = send(
                &state,
                Method::POST,
                "/api/therapy/add-log",
                Some(&token),
                Some(log_body(&child.id, date)),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let uri = format!("/api/therapy/logs/{}", child.id);
        let (status, _) = send(&state, Method::GET, &uri, Some(&parent_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        link(&state, &parent_id, &child.id).await;
        let (status, body) = send(&state, Method::GET, &uri, Some(&parent_token), None).await;
        assert_eq!(status, StatusCode::OK);
        let dates: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|log| log["session_date"].as_str().unwrap())
            .collect();
        assert_eq!(
            dates,
            vec!["2024-03-12T09:00:00Z", "2024-03-11T09:00:00Z", "2024-03-10T09:00:00Z"]
        );

        let session_id = body[0]["id"].as_str().unwrap().to_string();
        let (_, stranger_token) = seed_parent(&state, "stranger@example.com").await;
        let (status, body) = send(
            &state,
            Method::GET,
            &format!("/api/therapy/session/{session_id}"),
            Some(&stranger_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Session not found");
    }
}
