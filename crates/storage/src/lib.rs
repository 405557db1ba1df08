use std::{str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Row, Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;
use uuid::Uuid;

use therapy_log_core::types::{DomainAssessments, TherapyLog};

const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
const SQLITE_CONSTRAINT_PRIMARYKEY: &str = "1555";

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// Connection level pragmas are set on every pooled connection.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(5000));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Begins a SQLite transaction for multi-step writes.
    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Returns a handle for doctor accounts.
    pub fn doctors(&self) -> DoctorRepository {
        DoctorRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for parent accounts and their child links.
    pub fn parents(&self) -> ParentRepository {
        ParentRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for child profiles.
    pub fn children(&self) -> ChildRepository {
        ChildRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for child registration codes.
    pub fn child_codes(&self) -> ChildCodeRepository {
        ChildCodeRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for therapy session logs.
    pub fn therapy_logs(&self) -> TherapyLogRepository {
        TherapyLogRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Generates a new opaque record identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some(SQLITE_CONSTRAINT_UNIQUE) | Some(SQLITE_CONSTRAINT_PRIMARYKEY)
        ),
        _ => false,
    }
}

/// Errors raised by the account repositories.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for AccountError {
    fn from(err: sqlx::Error) -> Self {
        if is_unique_violation(&err) {
            Self::DuplicateEmail
        } else {
            Self::Database(err)
        }
    }
}

/// Stored doctor account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DoctorRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub specialization: String,
    pub created_at: DateTime<Utc>,
}

pub struct NewDoctor<'a> {
    pub id: String,
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub specialization: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Repository for doctor accounts.
#[derive(Clone)]
pub struct DoctorRepository {
    pool: SqlitePool,
}

impl DoctorRepository {
    /// Inserts a doctor, failing with [`AccountError::DuplicateEmail`] when the email is taken.
    pub async fn insert(&self, doctor: &NewDoctor<'_>) -> Result<(), AccountError> {
        sqlx::query(
            "INSERT INTO doctors (id, name, email, password_hash, specialization, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&doctor.id)
        .bind(doctor.name)
        .bind(doctor.email)
        .bind(doctor.password_hash)
        .bind(doctor.specialization)
        .bind(to_rfc3339(doctor.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<DoctorRecord>, AccountError> {
        let row = sqlx::query_as::<_, DoctorRecord>(
            "SELECT id, name, email, password_hash, specialization, created_at \
             FROM doctors WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(AccountError::Database)?;
        Ok(row)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<DoctorRecord>, AccountError> {
        let row = sqlx::query_as::<_, DoctorRecord>(
            "SELECT id, name, email, password_hash, specialization, created_at \
             FROM doctors WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AccountError::Database)?;
        Ok(row)
    }
}

/// Stored parent account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ParentRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub created_by_system: bool,
    pub created_at: DateTime<Utc>,
}

pub struct NewParent<'a> {
    pub id: String,
    pub name: &'a str,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub password_hash: &'a str,
    pub created_by_system: bool,
    pub created_at: DateTime<Utc>,
}

/// Repository for parent accounts and the parent/child link table.
#[derive(Clone)]
pub struct ParentRepository {
    pool: SqlitePool,
}

impl ParentRepository {
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        parent: &NewParent<'_>,
    ) -> Result<(), AccountError> {
        sqlx::query(
            "INSERT INTO parents (id, name, email, phone, password_hash, created_by_system, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&parent.id)
        .bind(parent.name)
        .bind(parent.email)
        .bind(parent.phone)
        .bind(parent.password_hash)
        .bind(parent.created_by_system)
        .bind(to_rfc3339(parent.created_at))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<ParentRecord>, AccountError> {
        let row = sqlx::query_as::<_, ParentRecord>(
            "SELECT id, name, email, phone, password_hash, created_by_system, created_at \
             FROM parents WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(AccountError::Database)?;
        Ok(row)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<ParentRecord>, AccountError> {
        let row = sqlx::query_as::<_, ParentRecord>(
            "SELECT id, name, email, phone, password_hash, created_by_system, created_at \
             FROM parents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AccountError::Database)?;
        Ok(row)
    }

    /// Links a parent to a child. Returns `false` when the link already existed.
    pub async fn link_child(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        parent_id: &str,
        child_id: &str,
        linked_at: DateTime<Utc>,
    ) -> Result<bool, AccountError> {
        let result = sqlx::query(
            "INSERT INTO parent_children (parent_id, child_id, linked_at) VALUES (?, ?, ?) \
             ON CONFLICT(parent_id, child_id) DO NOTHING",
        )
        .bind(parent_id)
        .bind(child_id)
        .bind(to_rfc3339(linked_at))
        .execute(&mut **tx)
        .await
        .map_err(AccountError::Database)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn is_linked(&self, parent_id: &str, child_id: &str) -> Result<bool, AccountError> {
        let row = sqlx::query(
            "SELECT 1 AS linked FROM parent_children WHERE parent_id = ? AND child_id = ?",
        )
        .bind(parent_id)
        .bind(child_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AccountError::Database)?;
        Ok(row.is_some())
    }

    /// Child identifiers linked to the parent, oldest link first.
    pub async fn list_child_ids(&self, parent_id: &str) -> Result<Vec<String>, AccountError> {
        let rows = sqlx::query(
            "SELECT child_id FROM parent_children WHERE parent_id = ? ORDER BY linked_at, child_id",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AccountError::Database)?;
        Ok(rows.into_iter().map(|row| row.get("child_id")).collect())
    }

    /// Parents linked to the child.
    pub async fn list_for_child(&self, child_id: &str) -> Result<Vec<ParentRecord>, AccountError> {
        let rows = sqlx::query_as::<_, ParentRecord>(
            "SELECT p.id, p.name, p.email, p.phone, p.password_hash, p.created_by_system, p.created_at \
               FROM parents AS p \
               JOIN parent_children AS pc ON pc.parent_id = p.id \
              WHERE pc.child_id = ? \
              ORDER BY pc.linked_at, p.id",
        )
        .bind(child_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AccountError::Database)?;
        Ok(rows)
    }
}

/// Errors raised by the child and child code repositories.
#[derive(Debug, Error)]
pub enum ChildError {
    #[error("child code already exists")]
    DuplicateCode,
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for ChildError {
    fn from(err: sqlx::Error) -> Self {
        if is_unique_violation(&err) {
            Self::DuplicateCode
        } else {
            Self::Database(err)
        }
    }
}

/// Stored child profile.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChildRecord {
    pub id: String,
    pub child_code: String,
    pub name: String,
    pub age: i64,
    pub gender: String,
    pub diagnosis: String,
    pub assigned_doctor_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewChild<'a> {
    pub id: String,
    pub child_code: &'a str,
    pub name: &'a str,
    pub age: i64,
    pub gender: &'a str,
    pub diagnosis: &'a str,
    pub assigned_doctor_id: &'a str,
    pub created_at: DateTime<Utc>,
}

const CHILD_COLUMNS: &str =
    "c.id, c.child_code, c.name, c.age, c.gender, c.diagnosis, c.assigned_doctor_id, c.created_at";

/// Repository for child profiles.
#[derive(Clone)]
pub struct ChildRepository {
    pool: SqlitePool,
}

impl ChildRepository {
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        child: &NewChild<'_>,
    ) -> Result<(), ChildError> {
        sqlx::query(
            "INSERT INTO children (id, child_code, name, age, gender, diagnosis, assigned_doctor_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&child.id)
        .bind(child.child_code)
        .bind(child.name)
        .bind(child.age)
        .bind(child.gender)
        .bind(child.diagnosis)
        .bind(child.assigned_doctor_id)
        .bind(to_rfc3339(child.created_at))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<ChildRecord>, ChildError> {
        let row = sqlx::query_as::<_, ChildRecord>(&format!(
            "SELECT {CHILD_COLUMNS} FROM children AS c WHERE c.id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ChildError::Database)?;
        Ok(row)
    }

    /// Children assigned to the doctor, oldest first.
    pub async fn list_for_doctor(
        &self,
        doctor_id: &str,
        limit: i64,
    ) -> Result<Vec<ChildRecord>, ChildError> {
        let rows = sqlx::query_as::<_, ChildRecord>(&format!(
            "SELECT {CHILD_COLUMNS} FROM children AS c \
              WHERE c.assigned_doctor_id = ? \
              ORDER BY c.created_at, c.id \
              LIMIT ?"
        ))
        .bind(doctor_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(ChildError::Database)?;
        Ok(rows)
    }

    /// Children linked to the parent, in link order.
    pub async fn list_for_parent(&self, parent_id: &str) -> Result<Vec<ChildRecord>, ChildError> {
        let rows = sqlx::query_as::<_, ChildRecord>(&format!(
            "SELECT {CHILD_COLUMNS} FROM children AS c \
               JOIN parent_children AS pc ON pc.child_id = c.id \
              WHERE pc.parent_id = ? \
              ORDER BY pc.linked_at, c.id"
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ChildError::Database)?;
        Ok(rows)
    }

    pub async fn count_for_doctor(&self, doctor_id: &str) -> Result<u64, ChildError> {
        let count: i64 =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM children WHERE assigned_doctor_id = ?")
                .bind(doctor_id)
                .fetch_one(&self.pool)
                .await
                .map_err(ChildError::Database)?;
        Ok(count as u64)
    }
}

/// Stored child registration code.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChildCodeRecord {
    pub code: String,
    pub child_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a child registration code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildCodeStatus {
    Active,
}

impl ChildCodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
        }
    }
}

/// Repository for child registration codes.
#[derive(Clone)]
pub struct ChildCodeRepository {
    pool: SqlitePool,
}

impl ChildCodeRepository {
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        code: &str,
        child_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), ChildError> {
        sqlx::query("INSERT INTO child_codes (code, child_id, status, created_at) VALUES (?, ?, ?, ?)")
            .bind(code)
            .bind(child_id)
            .bind(ChildCodeStatus::Active.as_str())
            .bind(to_rfc3339(created_at))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Returns `true` when the code is already taken, whatever its status.
    pub async fn exists(&self, code: &str) -> Result<bool, ChildError> {
        let row = sqlx::query("SELECT 1 AS taken FROM child_codes WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(ChildError::Database)?;
        Ok(row.is_some())
    }

    pub async fn find_active(&self, code: &str) -> Result<Option<ChildCodeRecord>, ChildError> {
        let row = sqlx::query_as::<_, ChildCodeRecord>(
            "SELECT code, child_id, status, created_at FROM child_codes WHERE code = ? AND status = ?",
        )
        .bind(code)
        .bind(ChildCodeStatus::Active.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(ChildError::Database)?;
        Ok(row)
    }
}

/// Errors raised by the therapy log repository.
#[derive(Debug, Error)]
pub enum TherapyLogError {
    #[error("failed to encode assessments: {0}")]
    Encode(serde_json::Error),
    #[error("failed to decode stored assessments: {0}")]
    Decode(serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Data required to record a therapy session.
pub struct NewTherapyLog<'a> {
    pub id: String,
    pub child_id: &'a str,
    pub doctor_id: &'a str,
    pub session_date: DateTime<Utc>,
    pub duration_minutes: i64,
    pub activities_performed: &'a str,
    pub notes: &'a str,
    pub goals_addressed: Option<&'a str>,
    pub recommendations: Option<&'a str>,
    pub assessments: &'a DomainAssessments,
    pub created_at: DateTime<Utc>,
}

/// Raw therapy log row; assessments are kept as JSON.
#[derive(Debug, sqlx::FromRow)]
pub struct TherapyLogRow {
    pub id: String,
    pub child_id: String,
    pub doctor_id: String,
    pub session_date: DateTime<Utc>,
    pub duration_minutes: i64,
    pub activities_performed: String,
    pub notes: String,
    pub goals_addressed: Option<String>,
    pub recommendations: Option<String>,
    pub assessments_json: String,
    pub created_at: DateTime<Utc>,
}

impl TherapyLogRow {
    /// Converts the database row into the domain log.
    pub fn into_domain(self) -> Result<TherapyLog, TherapyLogError> {
        let assessments: DomainAssessments =
            serde_json::from_str(&self.assessments_json).map_err(TherapyLogError::Decode)?;
        Ok(TherapyLog {
            id: self.id,
            child_id: self.child_id,
            doctor_id: self.doctor_id,
            session_date: self.session_date,
            duration_minutes: self.duration_minutes,
            activities_performed: self.activities_performed,
            notes: self.notes,
            goals_addressed: self.goals_addressed,
            recommendations: self.recommendations,
            assessments,
            created_at: self.created_at,
        })
    }
}

/// Session joined with the child's name for dashboard activity feeds.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecentSession {
    pub child_name: String,
    pub session_date: DateTime<Utc>,
    pub duration_minutes: i64,
    pub activities_performed: String,
}

const LOG_COLUMNS: &str = "id, child_id, doctor_id, session_date, duration_minutes, \
     activities_performed, notes, goals_addressed, recommendations, assessments_json, created_at";

/// Repository for therapy session logs.
#[derive(Clone)]
pub struct TherapyLogRepository {
    pool: SqlitePool,
}

impl TherapyLogRepository {
    pub async fn insert(&self, log: &NewTherapyLog<'_>) -> Result<(), TherapyLogError> {
        let assessments_json =
            serde_json::to_string(log.assessments).map_err(TherapyLogError::Encode)?;
        sqlx::query(&format!(
            "INSERT INTO therapy_logs ({LOG_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&log.id)
        .bind(log.child_id)
        .bind(log.doctor_id)
        .bind(to_rfc3339(log.session_date))
        .bind(log.duration_minutes)
        .bind(log.activities_performed)
        .bind(log.notes)
        .bind(log.goals_addressed)
        .bind(log.recommendations)
        .bind(assessments_json)
        .bind(to_rfc3339(log.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<TherapyLog>, TherapyLogError> {
        let row = sqlx::query_as::<_, TherapyLogRow>(&format!(
            "SELECT {LOG_COLUMNS} FROM therapy_logs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TherapyLogRow::into_domain).transpose()
    }

    /// Most recent sessions for the child, newest session date first.
    pub async fn list_for_child(
        &self,
        child_id: &str,
        limit: i64,
    ) -> Result<Vec<TherapyLog>, TherapyLogError> {
        let rows = sqlx::query_as::<_, TherapyLogRow>(&format!(
            "SELECT {LOG_COLUMNS} FROM therapy_logs \
              WHERE child_id = ? \
              ORDER BY session_date DESC, created_at DESC \
              LIMIT ?"
        ))
        .bind(child_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TherapyLogRow::into_domain).collect()
    }

    /// Sessions for the child with `start <= session_date <= end`, oldest first.
    pub async fn list_for_child_between(
        &self,
        child_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TherapyLog>, TherapyLogError> {
        let rows = sqlx::query_as::<_, TherapyLogRow>(&format!(
            "SELECT {LOG_COLUMNS} FROM therapy_logs \
              WHERE child_id = ? AND session_date >= ? AND session_date <= ? \
              ORDER BY session_date ASC, created_at ASC"
        ))
        .bind(child_id)
        .bind(to_rfc3339(start))
        .bind(to_rfc3339(end))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TherapyLogRow::into_domain).collect()
    }

    /// Counts the doctor's sessions with `since <= session_date`, and `< until` when given.
    pub async fn count_for_doctor(
        &self,
        doctor_id: &str,
        since: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> Result<u64, TherapyLogError> {
        let count: i64 = match until {
            Some(until) => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM therapy_logs \
                      WHERE doctor_id = ? AND session_date >= ? AND session_date < ?",
                )
                .bind(doctor_id)
                .bind(to_rfc3339(since))
                .bind(to_rfc3339(until))
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM therapy_logs WHERE doctor_id = ? AND session_date >= ?",
                )
                .bind(doctor_id)
                .bind(to_rfc3339(since))
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(count as u64)
    }

    /// The doctor's most recently recorded sessions.
    pub async fn recent_for_doctor(
        &self,
        doctor_id: &str,
        limit: i64,
    ) -> Result<Vec<RecentSession>, TherapyLogError> {
        let rows = sqlx::query_as::<_, RecentSession>(
            "SELECT c.name AS child_name, t.session_date, t.duration_minutes, t.activities_performed \
               FROM therapy_logs AS t \
               JOIN children AS c ON c.id = t.child_id \
              WHERE t.doctor_id = ? \
              ORDER BY t.created_at DESC, t.id DESC \
              LIMIT ?",
        )
        .bind(doctor_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Counts sessions of every child linked to the parent since `since`.
    pub async fn count_for_parent_since(
        &self,
        parent_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, TherapyLogError> {
        let count: i64 = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM therapy_logs AS t \
               JOIN parent_children AS pc ON pc.child_id = t.child_id \
              WHERE pc.parent_id = ? AND t.session_date >= ?",
        )
        .bind(parent_id)
        .bind(to_rfc3339(since))
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    /// Latest sessions across the parent's children, newest session date first.
    pub async fn recent_for_parent(
        &self,
        parent_id: &str,
        limit: i64,
    ) -> Result<Vec<RecentSession>, TherapyLogError> {
        let rows = sqlx::query_as::<_, RecentSession>(
            "SELECT c.name AS child_name, t.session_date, t.duration_minutes, t.activities_performed \
               FROM therapy_logs AS t \
               JOIN parent_children AS pc ON pc.child_id = t.child_id \
               JOIN children AS c ON c.id = t.child_id \
              WHERE pc.parent_id = ? \
              ORDER BY t.session_date DESC, t.id DESC \
              LIMIT ?",
        )
        .bind(parent_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
