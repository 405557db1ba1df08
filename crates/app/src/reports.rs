use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use tracing::info;

use therapy_log_core::report::{
    build_monthly_report, build_weekly_report, weekly_summary_line, MonthWindow, MonthlyReport,
    ReportSubject, WeeklyReport, WeeklyWindow,
};
use therapy_log_storage::ChildRecord;

use crate::auth::{AuthUser, DoctorUser};
use crate::child::{child_not_found, load_accessible_child};
use crate::mailer::{self, OutgoingMessage};
use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::telemetry;

#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    #[serde(default)]
    month: Option<u32>,
    #[serde(default)]
    year: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    success: bool,
    recipients: usize,
    sent: usize,
    summary: String,
}

async fn weekly_report_for(
    state: &AppState,
    child: &ChildRecord,
) -> Result<WeeklyReport, ProblemResponse> {
    let window = WeeklyWindow::ending_at(state.now());
    let logs = state
        .storage()
        .therapy_logs()
        .list_for_child_between(&child.id, window.start, window.end)
        .await
        .map_err(|err| ProblemResponse::failure("report", "failed to load therapy logs", err))?;
    let subject = ReportSubject {
        child_id: &child.id,
        child_name: &child.name,
    };
    telemetry::record_report("weekly");
    Ok(build_weekly_report(subject, &logs, window))
}

pub async fn weekly(
    State(state): State<AppState>,
    user: AuthUser,
    Path(child_id): Path<String>,
) -> Result<Json<WeeklyReport>, ProblemResponse> {
    let child = load_accessible_child(&state, &user, &child_id).await?;
    let report = weekly_report_for(&state, &child).await?;
    Ok(Json(report))
}

/// Calendar month report. Missing `month` or `year` fall back to the
/// current month. Access is checked before the period is validated.
pub async fn monthly(
    State(state): State<AppState>,
    user: AuthUser,
    Path(child_id): Path<String>,
    query: Result<Query<MonthQuery>, QueryRejection>,
) -> Result<Json<MonthlyReport>, ProblemResponse> {
    let child = load_accessible_child(&state, &user, &child_id).await?;
    let Query(query) = query?;
    let now = state.now();
    let window = MonthWindow::new(
        query.year.unwrap_or_else(|| now.year()),
        query.month.unwrap_or_else(|| now.month()),
    )
    .map_err(|err| ProblemResponse::bad_request("invalid_period", err.to_string()))?;

    let logs = state
        .storage()
        .therapy_logs()
        .list_for_child_between(&child.id, window.start, window.end)
        .await
        .map_err(|err| ProblemResponse::failure("report", "failed to load therapy logs", err))?;

    let subject = ReportSubject {
        child_id: &child.id,
        child_name: &child.name,
    };
    telemetry::record_report("monthly");
    Ok(Json(build_monthly_report(subject, &logs, window)))
}

/// Mails the weekly summary to every parent linked to the child.
pub async fn notify_weekly(
    State(state): State<AppState>,
    doctor: DoctorUser,
    Path(child_id): Path<String>,
) -> Result<Json<NotifyResponse>, ProblemResponse> {
    let storage = state.storage();
    let child = storage
        .children()
        .find_by_id(&child_id)
        .await
        .map_err(|err| ProblemResponse::failure("report", "failed to load child", err))?
        .filter(|child| child.assigned_doctor_id == doctor.doctor_id)
        .ok_or_else(child_not_found)?;

    let report = weekly_report_for(&state, &child).await?;
    let summary = weekly_summary_line(&report);
    let parents = storage
        .parents()
        .list_for_child(&child.id)
        .await
        .map_err(|err| ProblemResponse::failure("report", "failed to load parents", err))?;

    let sent = parents
        .iter()
        .filter(|parent| {
            let message = OutgoingMessage::weekly_report(&parent.email, &child.name, &summary);
            mailer::deliver(state.mailer(), &message)
        })
        .count();

    info!(
        stage = "report",
        child_id = %child.id,
        recipients = parents.len(),
        sent,
        "weekly report notification processed"
    );

    Ok(Json(NotifyResponse {
        success: true,
        recipients: parents.len(),
        sent,
        summary,
    }))
}
