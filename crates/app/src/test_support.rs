use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use therapy_log_core::types::UserRole;
use therapy_log_storage::{new_id, ChildRecord, Database, NewChild, NewDoctor, NewParent};

use crate::auth::{PasswordHasher, TokenIssuer};
use crate::router::{app_router, AppState};
use crate::telemetry;

pub const TEST_PASSWORD: &str = "secret-pass";

/// Thursday 2024-03-14 12:00 UTC.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 14, 12, 0, 0).unwrap()
}

pub async fn setup_state() -> AppState {
    let metrics = telemetry::init_metrics().expect("metrics init");
    let database = Database::connect("sqlite::memory:").await.expect("connect");
    database.run_migrations().await.expect("migrations");

    AppState::new(
        metrics,
        database,
        TokenIssuer::new(b"token-secret", 60),
        PasswordHasher::new(4),
    )
    .with_clock(Arc::new(fixed_now))
}

pub fn token_for(state: &AppState, user_id: &str, role: UserRole) -> String {
    state
        .tokens()
        .issue(user_id, role, state.now())
        .expect("issue token")
}

/// Inserts a doctor and returns `(doctor_id, bearer_token)`.
pub async fn seed_doctor(state: &AppState, email: &str) -> (String, String) {
    let hash = state.passwords().hash(TEST_PASSWORD).await.expect("hash");
    let id = new_id();
    state
        .storage()
        .doctors()
        .insert(&NewDoctor {
            id: id.clone(),
            name: "Dr. Rivera",
            email,
            password_hash: &hash,
            specialization: "Speech therapy",
            created_at: state.now(),
        })
        .await
        .expect("insert doctor");
    let token = token_for(state, &id, UserRole::Doctor);
    (id, token)
}

/// Inserts a parent and returns `(parent_id, bearer_token)`.
pub async fn seed_parent(state: &AppState, email: &str) -> (String, String) {
    let hash = state.passwords().hash(TEST_PASSWORD).await.expect("hash");
    let id = new_id();
    let mut tx = state.storage().begin().await.expect("begin");
    state
        .storage()
        .parents()
        .insert(
            &mut tx,
            &NewParent {
                id: id.clone(),
                name: "Jordan Lee",
                email,
                phone: Some("555-0100"),
                password_hash: &hash,
                created_by_system: false,
                created_at: state.now(),
            },
        )
        .await
        .expect("insert parent");
    tx.commit().await.expect("commit");
    let token = token_for(state, &id, UserRole::Parent);
    (id, token)
}

/// Inserts a child assigned to `doctor_id` with an active registration code.
pub async fn seed_child(state: &AppState, doctor_id: &str, name: &str, code: &str) -> ChildRecord {
    let id = new_id();
    let storage = state.storage();
    let mut tx = storage.begin().await.expect("begin");
    storage
        .children()
        .insert(
            &mut tx,
            &NewChild {
                id: id.clone(),
                child_code: code,
                name,
                age: 6,
                gender: "female",
                diagnosis: "ASD level 1",
                assigned_doctor_id: doctor_id,
                created_at: state.now(),
            },
        )
        .await
        .expect("insert child");
    storage
        .child_codes()
        .insert(&mut tx, code, &id, state.now())
        .await
        .expect("insert code");
    tx.commit().await.expect("commit");
    storage
        .children()
        .find_by_id(&id)
        .await
        .expect("load child")
        .expect("child exists")
}

pub async fn link(state: &AppState, parent_id: &str, child_id: &str) {
    let mut tx = state.storage().begin().await.expect("begin");
    state
        .storage()
        .parents()
        .link_child(&mut tx, parent_id, child_id, state.now())
        .await
        .expect("link");
    tx.commit().await.expect("commit");
}

/// Sends a request through a fresh router and decodes the JSON response.
pub async fn send(
    state: &AppState,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let app: Router = app_router(state.clone());
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, json)
}
