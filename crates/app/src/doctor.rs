use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::{DateTime, Datelike, Duration, Utc};
use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use therapy_log_core::credentials::{generate_child_code, generate_password, GENERATED_PASSWORD_LEN};
use therapy_log_core::types::{normalize_email, UserRole};
use therapy_log_storage::{
    new_id, AccountError, ChildError, NewChild, NewParent, ParentRecord, RecentSession,
    TherapyLogError,
};

use crate::auth::DoctorUser;
use crate::child::ChildView;
use crate::mailer::{self, OutgoingMessage};
use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::telemetry;

const MAX_CODE_ATTEMPTS: usize = 32;
const CHILD_LIST_LIMIT: i64 = 100;
const RECENT_ACTIVITY_LIMIT: i64 = 5;

#[derive(Debug, Deserialize)]
pub struct CreateChildRequest {
    name: String,
    age: i64,
    gender: String,
    diagnosis: String,
    #[serde(default)]
    parent_email: Option<String>,
    #[serde(default)]
    parent_phone: Option<String>,
    #[serde(default)]
    parent_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateChildResponse {
    success: bool,
    child_id: String,
    child_code: String,
    parent_created: bool,
    email_sent: bool,
    message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RecentActivity {
    child_name: String,
    date: DateTime<Utc>,
    duration: i64,
}

impl From<RecentSession> for RecentActivity {
    fn from(session: RecentSession) -> Self {
        Self {
            child_name: session.child_name,
            date: session.session_date,
            duration: session.duration_minutes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    total_children: u64,
    todays_sessions: u64,
    weeks_sessions: u64,
    recent_activity: Vec<RecentActivity>,
}

#[derive(Debug, Serialize)]
pub struct DoctorProfile {
    id: String,
    name: String,
    email: String,
    specialization: String,
    total_children: u64,
}

#[derive(Debug, Error)]
enum CreateChildError {
    #[error(transparent)]
    Child(#[from] ChildError),
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("no unique child code after {0} attempts")]
    CodesExhausted(usize),
}

/// Parent side of a new child profile.
enum ParentPlan<'a> {
    None,
    Existing(ParentRecord),
    Create {
        parent: NewParent<'a>,
        password: String,
    },
}

/// Midnight UTC of `now`'s day and of the Monday starting its week.
fn day_and_week_start(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = now.date_naive().and_time(chrono::NaiveTime::MIN).and_utc();
    let week = today - Duration::days(i64::from(now.weekday().num_days_from_monday()));
    (today, week)
}

pub async fn create_child(
    State(state): State<AppState>,
    doctor: DoctorUser,
    payload: Result<Json<CreateChildRequest>, JsonRejection>,
) -> Result<Json<CreateChildResponse>, ProblemResponse> {
    let Json(request) = payload?;
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ProblemResponse::bad_request("invalid_name", "Child name is required"));
    }
    if request.age < 0 {
        return Err(ProblemResponse::bad_request("invalid_age", "Age must not be negative"));
    }
    let parent_email = match request.parent_email.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(
            normalize_email(raw)
                .map_err(|err| ProblemResponse::bad_request("invalid_email", err.to_string()))?,
        ),
        _ => None,
    };

    let storage = state.storage();
    let now = state.now();

    let parent_name = request
        .parent_name
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Parent of {name}"));
    let parent_phone = request
        .parent_phone
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let password_hash;
    let plan = match &parent_email {
        None => ParentPlan::None,
        Some(email) => match storage
            .parents()
            .find_by_email(email)
            .await
            .map_err(|err| ProblemResponse::failure("doctor", "failed to look up parent", err))?
        {
            Some(existing) => ParentPlan::Existing(existing),
            None => {
                let password = generate_password(&mut OsRng, GENERATED_PASSWORD_LEN);
                password_hash = state.passwords().hash(&password).await.map_err(|err| {
                    ProblemResponse::failure("doctor", "password hashing failed", err)
                })?;
                ParentPlan::Create {
                    parent: NewParent {
                        id: new_id(),
                        name: &parent_name,
                        email,
                        phone: parent_phone,
                        password_hash: &password_hash,
                        created_by_system: true,
                        created_at: now,
                    },
                    password,
                }
            }
        },
    };

    let child_id = new_id();
    let child = NewChild {
        id: child_id.clone(),
        child_code: "",
        name,
        age: request.age,
        gender: request.gender.trim(),
        diagnosis: request.diagnosis.trim(),
        assigned_doctor_id: &doctor.doctor_id,
        created_at: now,
    };
    let child_code = match store_with_unique_code(&state, &child, &plan, &mut OsRng).await {
        Ok(code) => code,
        Err(CreateChildError::Account(AccountError::DuplicateEmail)) => {
            return Err(ProblemResponse::bad_request(
                "email_taken",
                "Parent email already registered",
            ))
        }
        Err(err) => return Err(ProblemResponse::failure("doctor", "failed to create child", err)),
    };

    telemetry::record_child_created();
    let (parent_created, email_sent) = match &plan {
        ParentPlan::None => (false, false),
        ParentPlan::Existing(parent) => {
            let message = OutgoingMessage::child_code(&parent.email, &child_code, name);
            (false, mailer::deliver(state.mailer(), &message))
        }
        ParentPlan::Create { parent, password } => {
            telemetry::record_registration(UserRole::Parent, "doctor");
            let message = OutgoingMessage::parent_credentials(parent.email, password, name);
            (true, mailer::deliver(state.mailer(), &message))
        }
    };
    if parent_email.is_some() && !email_sent {
        warn!(stage = "doctor", child_id = %child_id, "parent notification was not sent");
    }

    info!(
        stage = "doctor",
        doctor_id = %doctor.doctor_id,
        child_id = %child_id,
        parent_created,
        "child profile created"
    );

    Ok(Json(CreateChildResponse {
        success: true,
        child_id,
        child_code,
        parent_created,
        email_sent,
        message: "Child profile created successfully",
    }))
}

/// Stores `child` under the first code drawn from `rng` that is not taken.
/// A code claimed concurrently between the lookup and the insert is retried.
async fn store_with_unique_code<R: Rng + Send + ?Sized>(
    state: &AppState,
    child: &NewChild<'_>,
    plan: &ParentPlan<'_>,
    rng: &mut R,
) -> Result<String, CreateChildError> {
    let codes = state.storage().child_codes();
    for _ in 0..MAX_CODE_ATTEMPTS {
        let candidate = generate_child_code(child.created_at.year(), &mut *rng);
        if codes.exists(&candidate).await? {
            continue;
        }
        let attempt = NewChild {
            child_code: &candidate,
            ..child.clone()
        };
        match persist_child(state, &attempt, plan).await {
            Ok(()) => return Ok(candidate),
            Err(CreateChildError::Child(ChildError::DuplicateCode)) => continue,
            Err(err) => return Err(err),
        }
    }
    Err(CreateChildError::CodesExhausted(MAX_CODE_ATTEMPTS))
}

async fn persist_child(
    state: &AppState,
    child: &NewChild<'_>,
    plan: &ParentPlan<'_>,
) -> Result<(), CreateChildError> {
    let storage = state.storage();
    let mut tx = storage.begin().await?;
    storage.children().insert(&mut tx, child).await?;
    storage
        .child_codes()
        .insert(&mut tx, child.child_code, &child.id, child.created_at)
        .await?;
    match plan {
        ParentPlan::None => {}
        ParentPlan::Existing(parent) => {
            storage
                .parents()
                .link_child(&mut tx, &parent.id, &child.id, child.created_at)
                .await?;
        }
        ParentPlan::Create { parent, .. } => {
            storage.parents().insert(&mut tx, parent).await?;
            storage
                .parents()
                .link_child(&mut tx, &parent.id, &child.id, child.created_at)
                .await?;
        }
    }
    tx.commit().await?;
    Ok(())
}

pub async fn children(
    State(state): State<AppState>,
    doctor: DoctorUser,
) -> Result<Json<Vec<ChildView>>, ProblemResponse> {
    let children = state
        .storage()
        .children()
        .list_for_doctor(&doctor.doctor_id, CHILD_LIST_LIMIT)
        .await
        .map_err(|err| ProblemResponse::failure("doctor", "failed to list children", err))?;
    Ok(Json(children.into_iter().map(ChildView::from).collect()))
}

pub async fn dashboard_stats(
    State(state): State<AppState>,
    doctor: DoctorUser,
) -> Result<Json<DashboardStats>, ProblemResponse> {
    let storage = state.storage();
    let (today_start, week_start) = day_and_week_start(state.now());
    let logs = storage.therapy_logs();
    let stats_failure =
        |err: TherapyLogError| ProblemResponse::failure("doctor", "failed to compute dashboard stats", err);

    let total_children = storage
        .children()
        .count_for_doctor(&doctor.doctor_id)
        .await
        .map_err(|err| ProblemResponse::failure("doctor", "failed to count children", err))?;
    let todays_sessions = logs
        .count_for_doctor(
            &doctor.doctor_id,
            today_start,
            Some(today_start + Duration::days(1)),
        )
        .await
        .map_err(stats_failure)?;
    let weeks_sessions = logs
        .count_for_doctor(&doctor.doctor_id, week_start, None)
        .await
        .map_err(stats_failure)?;
    let recent_activity = logs
        .recent_for_doctor(&doctor.doctor_id, RECENT_ACTIVITY_LIMIT)
        .await
        .map_err(stats_failure)?
        .into_iter()
        .map(RecentActivity::from)
        .collect();

    Ok(Json(DashboardStats {
        total_children,
        todays_sessions,
        weeks_sessions,
        recent_activity,
    }))
}

pub async fn profile(
    State(state): State<AppState>,
    doctor: DoctorUser,
) -> Result<Json<DoctorProfile>, ProblemResponse> {
    let storage = state.storage();
    let record = storage
        .doctors()
        .find_by_id(&doctor.doctor_id)
        .await
        .map_err(|err| ProblemResponse::failure("doctor", "failed to load doctor", err))?
        .ok_or_else(|| ProblemResponse::not_found("doctor_not_found", "Doctor not found"))?;
    let total_children = storage
        .children()
        .count_for_doctor(&record.id)
        .await
        .map_err(|err| ProblemResponse::failure("doctor", "failed to count children", err))?;

    Ok(Json(DoctorProfile {
        id: record.id,
        name: record.name,
        email: record.email,
        specialization: record.specialization,
        total_children,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{Method, StatusCode};
    use chrono::TimeZone;
    use serde_json::json;

    use rand::{rngs::StdRng, SeedableRng};

    use therapy_log_core::credentials::is_child_code_shape;
    use therapy_log_core::types::DomainAssessments;
    use therapy_log_storage::NewTherapyLog;

    use super::*;
    use crate::mailer::testing::RecordingMailer;
    use crate::mailer::MessageKind;
    use crate::test_support::{seed_child, seed_doctor, seed_parent, send, setup_state, token_for};

    #[test]
    fn week_starts_on_monday_midnight() {
        let thursday = Utc.with_ymd_and_hms(2024, 3, 14, 12, 30, 0).unwrap();
        let (today, week) = day_and_week_start(thursday);
        assert_eq!(today, Utc.with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap());
        assert_eq!(week, Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());

        let monday = Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap();
        assert_eq!(day_and_week_start(monday).1, monday);
    }

    #[tokio::test]
    async fn create_child_auto_creates_parent_and_sends_credentials() {
        let recorder = RecordingMailer::default();
        let state = setup_state().await.with_mailer(Arc::new(recorder.clone()));
        let (doctor_id, token) = seed_doctor(&state, "doc@example.com").await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/doctor/create-child",
            Some(&token),
            Some(json!({
                "name": "Sam",
                "age": 6,
                "gender": "male",
                "diagnosis": "ASD",
                "parent_email": "New.Parent@Example.com",
                "parent_phone": "555-0101"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["parent_created"], true);
        assert_eq!(body["email_sent"], true);
        let code = body["child_code"].as_str().unwrap();
        assert!(is_child_code_shape(code));
        assert!(code.starts_with("P-2024-"));

        let child_id = body["child_id"].as_str().unwrap();
        let child = state
            .storage()
            .children()
            .find_by_id(child_id)
            .await
            .unwrap()
            .expect("child stored");
        assert_eq!(child.assigned_doctor_id, doctor_id);
        assert!(state.storage().child_codes().find_active(code).await.unwrap().is_some());

        let parent = state
            .storage()
            .parents()
            .find_by_email("new.parent@example.com")
            .await
            .unwrap()
            .expect("parent created");
        assert!(parent.created_by_system);
        assert_eq!(parent.name, "Parent of Sam");
        assert!(state.storage().parents().is_linked(&parent.id, child_id).await.unwrap());

        let messages = recorder.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, MessageKind::ParentCredentials);
        let password = messages[0]
            .body
            .lines()
            .find_map(|line| line.strip_prefix("Password: "))
            .expect("password line");
        assert_eq!(password.chars().count(), GENERATED_PASSWORD_LEN);
        assert!(state
            .passwords()
            .verify(password, &parent.password_hash)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn create_child_links_existing_parent() {
        let recorder = RecordingMailer::default();
        let state = setup_state().await.with_mailer(Arc::new(recorder.clone()));
        let (_, token) = seed_doctor(&state, "doc@example.com").await;
        let (parent_id, _) = seed_parent(&state, "parent@example.com").await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/doctor/create-child",
            Some(&token),
            Some(json!({
                "name": "Ava",
                "age": 5,
                "gender": "female",
                "diagnosis": "ASD",
                "parent_email": "parent@example.com"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["parent_created"], false);

        let child_id = body["child_id"].as_str().unwrap();
        assert!(state.storage().parents().is_linked(&parent_id, child_id).await.unwrap());
        let messages = recorder.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, MessageKind::ChildCode);
        assert!(messages[0].body.contains(body["child_code"].as_str().unwrap()));
    }

    #[tokio::test]
    async fn create_child_without_parent_uses_log_mailer() {
        let state = setup_state().await;
        let (_, token) = seed_doctor(&state, "doc@example.com").await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/doctor/create-child",
            Some(&token),
            Some(json!({"name": "Leo", "age": 7, "gender": "male", "diagnosis": "ASD"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["parent_created"], false);
        assert_eq!(body["email_sent"], false);
    }

    #[tokio::test]
    async fn doctor_routes_reject_parent_tokens() {
        let state = setup_state().await;
        let (_, parent_token) = seed_parent(&state, "parent@example.com").await;

        let (status, body) = send(
            &state,
            Method::GET,
            "/api/doctor/children",
            Some(&parent_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["detail"], "Access denied. Doctor privileges required.");
    }

    #[tokio::test]
    async fn children_profile_and_dashboard() {
        let state = setup_state().await;
        let (doctor_id, token) = seed_doctor(&state, "doc@example.com").await;
        let (other_id, _) = seed_doctor(&state, "other@example.com").await;
        let sam = seed_child(&state, &doctor_id, "Sam", "P-2024-1111").await;
        seed_child(&state, &doctor_id, "Ava", "P-2024-2222").await;
        seed_child(&state, &other_id, "Leo", "P-2024-3333").await;

        let assessments = DomainAssessments::default();
        for (offset, day) in [(0, 14), (1, 12), (2, 10)] {
            state
                .storage()
                .therapy_logs()
                .insert(&NewTherapyLog {
                    id: new_id(),
                    child_id: &sam.id,
                    doctor_id: &doctor_id,
                    session_date: Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap(),
                    duration_minutes: 45,
                    activities_performed: "Puzzle play",
                    notes: "Calm",
                    goals_addressed: None,
                    recommendations: None,
                    assessments: &assessments,
                    created_at: state.now() + Duration::minutes(offset),
                })
                .await
                .unwrap();
        }

        let (status, body) =
            send(&state, Method::GET, "/api/doctor/children", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let mut names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|child| child["name"].as_str().unwrap())
            .collect();
        names.sort_unstable();
        assert_eq!(names, vec!["Ava", "Sam"]);

        let (status, body) =
            send(&state, Method::GET, "/api/doctor/dashboard-stats", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_children"], 2);
        assert_eq!(body["todays_sessions"], 1);
        assert_eq!(body["weeks_sessions"], 2);
        let recent = body["recent_activity"].as_array().unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0]["child_name"], "Sam");
        assert_eq!(recent[0]["date"], "2024-03-10T09:00:00Z");

        let (status, body) =
            send(&state, Method::GET, "/api/doctor/profile", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "doc@example.com");
        assert_eq!(body["total_children"], 2);

        let ghost = token_for(&state, "missing-doctor", UserRole::Doctor);
        let (status, body) =
            send(&state, Method::GET, "/api/doctor/profile", Some(&ghost), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Doctor not found");
    }

    async fn seed_taken_codes(state: &AppState, doctor_id: &str, codes: &[String]) {
        for (index, code) in codes.iter().enumerate() {
            seed_child(state, doctor_id, &format!("Taken {index}"), code).await;
        }
    }

    fn drawn_codes(seed: u64, count: usize) -> Vec<String> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut codes: Vec<String> = Vec::new();
        for _ in 0..count {
            let code = generate_child_code(2024, &mut rng);
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
        codes
    }

    fn draft<'a>(doctor_id: &'a str, now: DateTime<Utc>) -> NewChild<'a> {
        NewChild {
            id: new_id(),
            child_code: "",
            name: "Mia",
            age: 5,
            gender: "female",
            diagnosis: "ASD level 2",
            assigned_doctor_id: doctor_id,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn unique_code_skips_codes_already_taken() {
        let state = setup_state().await;
        let (doctor_id, _) = seed_doctor(&state, "doc@example.com").await;
        let drawn = drawn_codes(7, 8);
        seed_taken_codes(&state, &doctor_id, &drawn[..3]).await;

        let child = draft(&doctor_id, state.now());
        let mut rng = StdRng::seed_from_u64(7);
        let code = store_with_unique_code(&state, &child, &ParentPlan::None, &mut rng)
            .await
            .expect("free code available");

        assert!(!drawn[..3].contains(&code));
        assert!(drawn.contains(&code));
        let stored = state
            .storage()
            .child_codes()
            .find_active(&code)
            .await
            .unwrap()
            .expect("code stored");
        assert_eq!(stored.child_id, child.id);
    }

    #[tokio::test]
    async fn unique_code_gives_up_after_max_attempts() {
        let state = setup_state().await;
        let (doctor_id, _) = seed_doctor(&state, "doc@example.com").await;
        seed_taken_codes(&state, &doctor_id, &drawn_codes(7, MAX_CODE_ATTEMPTS)).await;

        let child = draft(&doctor_id, state.now());
        let mut rng = StdRng::seed_from_u64(7);
        let err = store_with_unique_code(&state, &child, &ParentPlan::None, &mut rng)
            .await
            .expect_err("every drawn code is taken");

        assert!(matches!(err, CreateChildError::CodesExhausted(MAX_CODE_ATTEMPTS)));
        assert!(state.storage().children().find_by_id(&child.id).await.unwrap().is_none());
    }
}
