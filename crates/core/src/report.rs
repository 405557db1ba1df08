use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::scoring::{domain_score, mean_one};
use crate::types::{Domain, DomainMap, TherapyLog};

/// Length of the rolling weekly report window.
pub const WEEKLY_WINDOW_DAYS: i64 = 7;
/// Length of a trend bucket inside a monthly report.
pub const TREND_BUCKET_DAYS: i64 = 7;

const FOCUS_THRESHOLD: f64 = 40.0;
const CONTINUE_THRESHOLD: f64 = 60.0;
const EXCELLENT_THRESHOLD: f64 = 80.0;

/// The child a report is generated for.
#[derive(Debug, Clone, Copy)]
pub struct ReportSubject<'a> {
    pub child_id: &'a str,
    pub child_name: &'a str,
}

/// Rolling window ending at `end`, both bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklyWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl WeeklyWindow {
    pub fn ending_at(now: DateTime<Utc>) -> Self {
        Self {
            start: now - Duration::days(WEEKLY_WINDOW_DAYS),
            end: now,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Calendar month in UTC, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthWindow {
    pub year: i32,
    pub month: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MonthWindow {
    pub fn new(year: i32, month: u32) -> Result<Self, ReportError> {
        if !(1..=12).contains(&month) {
            return Err(ReportError::InvalidMonth(month));
        }
        if !(1970..=9999).contains(&year) {
            return Err(ReportError::InvalidYear(year));
        }
        let (next_year, next_month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
        let start = first_of_month(year, month)?;
        let end = first_of_month(next_year, next_month)?;
        Ok(Self {
            year,
            month,
            start,
            end,
        })
    }

    /// The month containing `now`.
    pub fn containing(now: DateTime<Utc>) -> Result<Self, ReportError> {
        Self::new(now.year(), now.month())
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

fn first_of_month(year: i32, month: u32) -> Result<DateTime<Utc>, ReportError> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or(ReportError::InvalidYear(year))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("month must be between 1 and 12 (got {0})")]
    InvalidMonth(u32),
    #[error("year must be between 1970 and 9999 (got {0})")]
    InvalidYear(i32),
}

/// Direction of progress between the first and second half of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub date: DateTime<Utc>,
    pub duration: i64,
    pub activities: String,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyReport {
    pub child_id: String,
    pub child_name: String,
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
    pub total_sessions: usize,
    pub total_duration: i64,
    pub domain_averages: DomainMap<f64>,
    pub session_summaries: Vec<SessionSummary>,
    pub improvement_trends: DomainMap<Trend>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyTrend {
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
    pub sessions: usize,
    pub domain_scores: DomainMap<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyReport {
    pub child_id: String,
    pub child_name: String,
    pub month: u32,
    pub year: i32,
    pub total_sessions: usize,
    pub total_duration: i64,
    pub domain_averages: DomainMap<f64>,
    pub weekly_trends: Vec<WeeklyTrend>,
    pub recommendations: Vec<String>,
    pub behavior_alerts: Vec<String>,
}

/// Builds the rolling weekly report. Logs outside the window are ignored and
/// the remainder is ordered by session date before trends are computed.
pub fn build_weekly_report(
    subject: ReportSubject<'_>,
    logs: &[TherapyLog],
    window: WeeklyWindow,
) -> WeeklyReport {
    let sessions = select_sorted(logs, |log| window.contains(log.session_date));
    let scores = scores_by_domain(&sessions);

    WeeklyReport {
        child_id: subject.child_id.to_string(),
        child_name: subject.child_name.to_string(),
        week_start: window.start,
        week_end: window.end,
        total_sessions: sessions.len(),
        total_duration: total_duration(&sessions),
        domain_averages: scores.map(|_, values| mean_one(values)),
        session_summaries: sessions
            .iter()
            .map(|log| SessionSummary {
                date: log.session_date,
                duration: log.duration_minutes,
                activities: log.activities_performed.clone(),
                notes: log.notes.clone(),
            })
            .collect(),
        improvement_trends: scores.map(|_, values| trend(values)),
    }
}

/// Builds the calendar month report with 7-day trend buckets.
pub fn build_monthly_report(
    subject: ReportSubject<'_>,
    logs: &[TherapyLog],
    window: MonthWindow,
) -> MonthlyReport {
    let sessions = select_sorted(logs, |log| window.contains(log.session_date));

    let mut weekly_trends = Vec::new();
    let mut bucket_start = window.start;
    while bucket_start < window.end {
        let bucket_end = (bucket_start + Duration::days(TREND_BUCKET_DAYS)).min(window.end);
        let bucket: Vec<&TherapyLog> = sessions
            .iter()
            .copied()
            .filter(|log| bucket_start <= log.session_date && log.session_date < bucket_end)
            .collect();
        if !bucket.is_empty() {
            weekly_trends.push(WeeklyTrend {
                week_start: bucket_start,
                week_end: bucket_end,
                sessions: bucket.len(),
                domain_scores: scores_by_domain(&bucket).map(|_, values| mean_one(values)),
            });
        }
        bucket_start = bucket_end;
    }

    let scores = scores_by_domain(&sessions);
    let domain_averages = scores.map(|_, values| mean_one(values));

    let mut recommendations = Vec::new();
    let mut behavior_alerts = Vec::new();
    for domain in Domain::ALL {
        if scores.get(domain).is_empty() {
            continue;
        }
        let score = *domain_averages.get(domain);
        let name = domain.title();
        if score < FOCUS_THRESHOLD {
            recommendations.push(format!(
                "Focus more on {name} - current progress is below expectations"
            ));
            if domain == Domain::Behavior {
                behavior_alerts.push(format!("Behavioral concerns detected - score: {score:.1}%"));
            }
        } else if score < CONTINUE_THRESHOLD {
            recommendations.push(format!(
                "Continue working on {name} - showing some progress"
            ));
        } else if score >= EXCELLENT_THRESHOLD {
            recommendations.push(format!(
                "Excellent progress in {name} - maintain current approach"
            ));
        }
    }

    MonthlyReport {
        child_id: subject.child_id.to_string(),
        child_name: subject.child_name.to_string(),
        month: window.month,
        year: window.year,
        total_sessions: sessions.len(),
        total_duration: total_duration(&sessions),
        domain_averages,
        weekly_trends,
        recommendations,
        behavior_alerts,
    }
}

/// Plain text summary used in parent notifications.
pub fn weekly_summary_line(report: &WeeklyReport) -> String {
    let plural = if report.total_sessions == 1 { "" } else { "s" };
    let mut line = format!(
        "{} session{plural}, {} minutes this week.",
        report.total_sessions, report.total_duration
    );
    let improving: Vec<String> = Domain::ALL
        .iter()
        .filter(|&&domain| *report.improvement_trends.get(domain) == Trend::Improving)
        .map(|domain| domain.title())
        .collect();
    if !improving.is_empty() {
        line.push_str(" Improving in: ");
        line.push_str(&improving.join(", "));
        line.push('.');
    }
    line
}

fn select_sorted<'a>(
    logs: &'a [TherapyLog],
    keep: impl Fn(&TherapyLog) -> bool,
) -> Vec<&'a TherapyLog> {
    let mut selected: Vec<&TherapyLog> = logs.iter().filter(|&log| keep(log)).collect();
    selected.sort_by_key(|log| log.session_date);
    selected
}

/// Per-domain scores of every session that rated the domain, in session order.
fn scores_by_domain(sessions: &[&TherapyLog]) -> DomainMap<Vec<f64>> {
    let mut scores: DomainMap<Vec<f64>> = DomainMap::default();
    for log in sessions {
        for domain in Domain::ALL {
            let score = domain_score(log.assessments.ratings(domain));
            if score.is_rated() {
                scores.get_mut(domain).push(score.score);
            }
        }
    }
    scores
}

fn trend(values: &[f64]) -> Trend {
    if values.len() < 2 {
        return Trend::InsufficientData;
    }
    let (first, second) = values.split_at(values.len() / 2);
    let first_avg = first.iter().sum::<f64>() / first.len() as f64;
    let second_avg = second.iter().sum::<f64>() / second.len() as f64;
    if second_avg > first_avg {
        Trend::Improving
    } else if second_avg < first_avg {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

fn total_duration(sessions: &[&TherapyLog]) -> i64 {
    sessions
        .iter()
        .fold(0i64, |total, log| total.saturating_add(log.duration_minutes))
}
