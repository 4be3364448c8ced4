//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete
//! implementation of the storage and lookup ports from the core crate. It
//! handles all interactions with the PostgreSQL database using `sqlx`.
//!
//! A progress record is one row per (student, material) with the per-page
//! states and the session audit log embedded as JSONB; pages are never
//! stored separately. Concurrent read-modify-write cycles on the same row
//! are serialized with an optimistic version column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coursegate_core::domain::{PageState, ReadingProgress, ReadingSession};
use coursegate_core::ports::{
    AuthSessions, CourseDirectory, CourseRole, MaterialRef, PortError, PortResult,
    ProgressLookup, ProgressStore,
};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `ProgressStore`, `CourseDirectory`
/// and `AuthSessions` ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ProgressRecord {
    student_id: Uuid,
    material_id: Uuid,
    course_id: Uuid,
    total_pages: i32,
    current_page: i32,
    completed_pages: i32,
    can_download: bool,
    pages: Json<Vec<PageState>>,
    reading_sessions: Json<Vec<ReadingSession>>,
    session_started_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    version: i64,
}

impl ProgressRecord {
    fn to_domain(self) -> ReadingProgress {
        ReadingProgress {
            student: self.student_id,
            material: self.material_id,
            course: self.course_id,
            total_pages: self.total_pages as u32,
            current_page: self.current_page as u32,
            completed_pages: self.completed_pages as u32,
            can_download: self.can_download,
            pages: self
                .pages
                .0
                .into_iter()
                .map(|p| (p.page_number, p))
                .collect(),
            session_started_at: self.session_started_at,
            last_activity_at: self.last_activity_at,
            reading_sessions: self.reading_sessions.0,
            version: self.version,
        }
    }
}

/// Flattens the ordered page map back into the JSONB array shape.
fn pages_json(progress: &ReadingProgress) -> Json<Vec<PageState>> {
    Json(progress.pages.values().cloned().collect())
}

const SELECT_PROGRESS: &str = "SELECT student_id, material_id, course_id, total_pages, \
     current_page, completed_pages, can_download, pages, reading_sessions, \
     session_started_at, last_activity_at, version \
     FROM reading_progress WHERE student_id = $1 AND material_id = $2";

//=========================================================================================
// `ProgressStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ProgressStore for DbAdapter {
    async fn find(&self, student: Uuid, material: Uuid) -> PortResult<ProgressLookup> {
        let record = sqlx::query_as::<_, ProgressRecord>(SELECT_PROGRESS)
            .bind(student)
            .bind(material)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;

        Ok(match record {
            Some(record) => ProgressLookup::Found(record.to_domain()),
            None => ProgressLookup::NotStarted,
        })
    }

    async fn create(&self, progress: &ReadingProgress) -> PortResult<ReadingProgress> {
        // Racing initializations for the same pair resolve to whichever row
        // landed first; re-selecting afterwards makes this idempotent.
        sqlx::query(
            "INSERT INTO reading_progress \
             (student_id, material_id, course_id, total_pages, current_page, \
              completed_pages, can_download, pages, reading_sessions, \
              session_started_at, last_activity_at, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (student_id, material_id) DO NOTHING",
        )
        .bind(progress.student)
        .bind(progress.material)
        .bind(progress.course)
        .bind(progress.total_pages as i32)
        .bind(progress.current_page as i32)
        .bind(progress.completed_pages as i32)
        .bind(progress.can_download)
        .bind(pages_json(progress))
        .bind(Json(progress.reading_sessions.clone()))
        .bind(progress.session_started_at)
        .bind(progress.last_activity_at)
        .bind(progress.version)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        let record = sqlx::query_as::<_, ProgressRecord>(SELECT_PROGRESS)
            .bind(progress.student)
            .bind(progress.material)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => PortError::NotFound(format!(
                    "Progress for student {} on material {} not found",
                    progress.student, progress.material
                )),
                _ => unexpected(e),
            })?;

        Ok(record.to_domain())
    }

    async fn update(&self, progress: &ReadingProgress) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE reading_progress SET \
             total_pages = $3, current_page = $4, completed_pages = $5, \
             can_download = $6, pages = $7, reading_sessions = $8, \
             last_activity_at = $9, version = version + 1, updated_at = now() \
             WHERE student_id = $1 AND material_id = $2 AND version = $10",
        )
        .bind(progress.student)
        .bind(progress.material)
        .bind(progress.total_pages as i32)
        .bind(progress.current_page as i32)
        .bind(progress.completed_pages as i32)
        .bind(progress.can_download)
        .bind(pages_json(progress))
        .bind(Json(progress.reading_sessions.clone()))
        .bind(progress.last_activity_at)
        .bind(progress.version)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::Conflict(format!(
                "Progress for student {} on material {} was modified concurrently",
                progress.student, progress.material
            )));
        }
        Ok(())
    }
}

//=========================================================================================
// `CourseDirectory` Trait Implementation
//=========================================================================================

#[async_trait]
impl CourseDirectory for DbAdapter {
    async fn material_course(&self, material: Uuid) -> PortResult<MaterialRef> {
        let row = sqlx::query("SELECT course_id FROM materials WHERE id = $1")
            .bind(material)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| PortError::NotFound(format!("Material {} not found", material)))?;

        Ok(MaterialRef {
            material,
            course: row.get("course_id"),
        })
    }

    async fn membership(&self, course: Uuid, user: Uuid) -> PortResult<Option<CourseRole>> {
        let lecturer = sqlx::query("SELECT lecturer_id FROM courses WHERE id = $1")
            .bind(course)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| PortError::NotFound(format!("Course {} not found", course)))?;

        if lecturer.get::<Uuid, _>("lecturer_id") == user {
            return Ok(Some(CourseRole::Lecturer));
        }

        let enrolled: bool = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM course_students \
             WHERE course_id = $1 AND student_id = $2) AS enrolled",
        )
        .bind(course)
        .bind(user)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?
        .get("enrolled");

        Ok(enrolled.then_some(CourseRole::Student))
    }
}

//=========================================================================================
// `AuthSessions` Trait Implementation
//=========================================================================================

#[async_trait]
impl AuthSessions for DbAdapter {
    async fn validate_session(&self, token: &str) -> PortResult<Uuid> {
        let row = sqlx::query(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound("Auth session not found or expired".to_string()))?;

        Ok(row.get("user_id"))
    }
}
