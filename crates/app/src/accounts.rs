use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use therapy_log_core::types::{normalize_email, UserRole};
use therapy_log_storage::{new_id, AccountError, NewDoctor, NewParent};

use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::telemetry;

pub(crate) const MIN_PASSWORD_LEN: usize = 6;
const INVALID_LOGIN: &str = "Invalid email or password";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
    user_type: UserRole,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    user_type: UserRole,
    user_id: String,
    user_name: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterDoctorRequest {
    name: String,
    email: String,
    password: String,
    specialization: String,
}

#[derive(Debug, Serialize)]
pub struct DoctorResponse {
    id: String,
    name: String,
    email: String,
    specialization: String,
    assigned_children: Vec<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterParentRequest {
    name: String,
    email: String,
    #[serde(default)]
    phone: Option<String>,
    password: String,
    #[serde(default)]
    child_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ParentResponse {
    id: String,
    name: String,
    email: String,
    phone: Option<String>,
    children: Vec<String>,
    created_at: DateTime<Utc>,
}

fn invalid_login(role: UserRole) -> ProblemResponse {
    telemetry::record_login(role, "failure");
    ProblemResponse::unauthorized("invalid_credentials", INVALID_LOGIN)
}

fn email_taken() -> ProblemResponse {
    ProblemResponse::bad_request("email_taken", "Email already registered")
}

fn account_failure(err: AccountError) -> ProblemResponse {
    match err {
        AccountError::DuplicateEmail => email_taken(),
        other => ProblemResponse::failure("auth", "account storage failed", other),
    }
}

/// Shared checks for self-service registration. Returns the normalized email.
fn validate_registration(name: &str, email: &str, password: &str) -> Result<String, ProblemResponse> {
    if name.trim().is_empty() {
        return Err(ProblemResponse::bad_request("invalid_name", "Name is required"));
    }
    let email = normalize_email(email)
        .map_err(|err| ProblemResponse::bad_request("invalid_email", err.to_string()))?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ProblemResponse::bad_request(
            "weak_password",
            format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    Ok(email)
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ProblemResponse> {
    let Json(request) = payload?;
    let role = request.user_type;
    let Ok(email) = normalize_email(&request.email) else {
        return Err(invalid_login(role));
    };

    let storage = state.storage();
    let account = match role {
        UserRole::Doctor => storage
            .doctors()
            .find_by_email(&email)
            .await
            .map(|found| found.map(|doctor| (doctor.id, doctor.name, doctor.password_hash))),
        UserRole::Parent => storage
            .parents()
            .find_by_email(&email)
            .await
            .map(|found| found.map(|parent| (parent.id, parent.name, parent.password_hash))),
    }
    .map_err(account_failure)?;

    let Some((user_id, user_name, password_hash)) = account else {
        return Err(invalid_login(role));
    };

    let matched = state
        .passwords()
        .verify(&request.password, &password_hash)
        .await
        .map_err(|err| ProblemResponse::failure("auth", "password verification failed", err))?;
    if !matched {
        return Err(invalid_login(role));
    }

    let access_token = state
        .tokens()
        .issue(&user_id, role, state.now())
        .map_err(|err| ProblemResponse::failure("auth", "failed to issue access token", err))?;

    telemetry::record_login(role, "success");
    info!(stage = "auth", user_id = %user_id, role = %role, "login succeeded");

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
        user_type: role,
        user_id,
        user_name,
    }))
}

pub async fn register_doctor(
    State(state): State<AppState>,
    payload: Result<Json<RegisterDoctorRequest>, JsonRejection>,
) -> Result<Json<DoctorResponse>, ProblemResponse> {
    let Json(request) = payload?;
    let email = validate_registration(&request.name, &request.email, &request.password)?;

    let doctors = state.storage().doctors();
    if doctors
        .find_by_email(&email)
        .await
        .map_err(account_failure)?
        .is_some()
    {
        return Err(email_taken());
    }

    let password_hash = state
        .passwords()
        .hash(&request.password)
        .await
        .map_err(|err| ProblemResponse::failure("auth", "password hashing failed", err))?;

    let doctor = NewDoctor {
        id: new_id(),
        name: request.name.trim(),
        email: &email,
        password_hash: &password_hash,
        specialization: request.specialization.trim(),
        created_at: state.now(),
    };
    doctors.insert(&doctor).await.map_err(account_failure)?;

    telemetry::record_registration(UserRole::Doctor, "self");
    info!(stage = "auth", doctor_id = %doctor.id, "doctor registered");

    Ok(Json(DoctorResponse {
        id: doctor.id.clone(),
        name: doctor.name.to_string(),
        email: email.clone(),
        specialization: doctor.specialization.to_string(),
        assigned_children: Vec::new(),
        created_at: doctor.created_at,
    }))
}

pub async fn register_parent(
    State(state): State<AppState>,
    payload: Result<Json<RegisterParentRequest>, JsonRejection>,
) -> Result<Json<ParentResponse>, ProblemResponse> {
    let Json(request) = payload?;
    let email = validate_registration(&request.name, &request.email, &request.password)?;
    let storage = state.storage();

    if storage
        .parents()
        .find_by_email(&email)
        .await
        .map_err(account_failure)?
        .is_some()
    {
        return Err(email_taken());
    }

    let child_code = request
        .child_code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty());
    let linked_child = match child_code {
        Some(code) => {
            let record = storage
                .child_codes()
                .find_active(code)
                .await
                .map_err(|err| ProblemResponse::failure("auth", "failed to look up child code", err))?
                .ok_or_else(|| {
                    ProblemResponse::bad_request("invalid_child_code", "Invalid or expired child code")
                })?;
            Some(record.child_id)
        }
        None => None,
    };

    let password_hash = state
        .passwords()
        .hash(&request.password)
        .await
        .map_err(|err| ProblemResponse::failure("auth", "password hashing failed", err))?;

    let now = state.now();
    let phone = request
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|phone| !phone.is_empty());
    let parent = NewParent {
        id: new_id(),
        name: request.name.trim(),
        email: &email,
        phone,
        password_hash: &password_hash,
        created_by_system: false,
        created_at: now,
    };

    let mut tx = storage
        .begin()
        .await
        .map_err(|err| ProblemResponse::failure("auth", "failed to open transaction", err))?;
    storage
        .parents()
        .insert(&mut tx, &parent)
        .await
        .map_err(account_failure)?;
    if let Some(child_id) = &linked_child {
        storage
            .parents()
            .link_child(&mut tx, &parent.id, child_id, now)
            .await
            .map_err(account_failure)?;
    }
    tx.commit()
        .await
        .map_err(|err| ProblemResponse::failure("auth", "failed to commit registration", err))?;

    telemetry::record_registration(UserRole::Parent, "self");
    info!(
        stage = "auth",
        parent_id = %parent.id,
        linked = linked_child.is_some(),
        "parent registered"
    );

    Ok(Json(ParentResponse {
        id: parent.id.clone(),
        name: parent.name.to_string(),
        email: email.clone(),
        phone: phone.map(str::to_string),
        children: linked_child.into_iter().collect(),
        created_at: now,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::{header, Method, StatusCode};
    use serde_json::json;

    use crate::test_support::{seed_child, seed_doctor, send, setup_state, TEST_PASSWORD};

    #[tokio::test]
    async fn doctor_registers_and_logs_in() {
        let state = setup_state().await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/auth/register/doctor",
            None,
            Some(json!({
                "name": "Dr. Rivera",
                "email": " Rivera@Example.com ",
                "password": "longenough",
                "specialization": "Occupational therapy"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "rivera@example.com");
        assert_eq!(body["assigned_children"], json!([]));
        let doctor_id = body["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({
                "email": "rivera@example.com",
                "password": "longenough",
                "user_type": "doctor"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "bearer");
        assert_eq!(body["user_type"], "doctor");
        assert_eq!(body["user_id"], doctor_id);
        assert_eq!(body["user_name"], "Dr. Rivera");

        let claims = state
            .tokens()
            .verify(body["access_token"].as_str().unwrap(), state.now())
            .expect("token verifies");
        assert_eq!(claims.sub, doctor_id);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let state = setup_state().await;
        seed_doctor(&state, "doc@example.com").await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/auth/register/doctor",
            None,
            Some(json!({
                "name": "Dr. Again",
                "email": "DOC@example.com",
                "password": "longenough",
                "specialization": "ABA"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Email already registered");
    }

    #[tokio::test]
    async fn registration_validates_input() {
        let state = setup_state().await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/auth/register/parent",
            None,
            Some(json!({"name": "Jordan", "email": "not-an-email", "password": "longenough"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "invalid_email");

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/auth/register/parent",
            None,
            Some(json!({"name": "Jordan", "email": "jordan@example.com", "password": "short"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "weak_password");

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/auth/register/parent",
            None,
            Some(json!({"name": "Jordan"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["type"], "invalid_body");
    }

    #[tokio::test]
    async fn parent_registration_with_child_code_links_child() {
        let state = setup_state().await;
        let (doctor_id, _) = seed_doctor(&state, "doc@example.com").await;
        let child = seed_child(&state, &doctor_id, "Sam", "P-2024-1234").await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/auth/register/parent",
            None,
            Some(json!({
                "name": "Jordan Lee",
                "email": "jordan@example.com",
                "phone": "555-0100",
                "password": "longenough",
                "child_code": "P-2024-1234"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["children"], json!([child.id.clone()]));
        let parent_id = body["id"].as_str().unwrap();

        let linked = state
            .storage()
            .parents()
            .list_for_child(&child.id)
            .await
            .expect("parents");
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].id, parent_id);

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/auth/register/parent",
            None,
            Some(json!({
                "name": "Casey",
                "email": "casey@example.com",
                "password": "longenough",
                "child_code": "P-2024-0000"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Invalid or expired child code");
        assert!(state
            .storage()
            .parents()
            .find_by_email("casey@example.com")
            .await
            .expect("lookup")
            .is_none());
    }

    #[tokio::test]
    async fn login_failures_share_one_message() {
        let state = setup_state().await;
        seed_doctor(&state, "doc@example.com").await;

        for (email, password, user_type) in [
            ("doc@example.com", "wrong-pass", "doctor"),
            ("nobody@example.com", TEST_PASSWORD, "doctor"),
            ("doc@example.com", TEST_PASSWORD, "parent"),
        ] {
            let app = crate::router::app_router(state.clone());
            let request = axum::http::Request::post("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(axum::body::Body::from(
                    json!({"email": email, "password": password, "user_type": user_type})
                        .to_string(),
                ))
                .unwrap();
            let response = tower::ServiceExt::oneshot(app, request).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
                "Bearer"
            );
        }

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"email": "doc@example.com", "password": TEST_PASSWORD, "user_type": "doctor"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_type"], "doctor");
    }
}
