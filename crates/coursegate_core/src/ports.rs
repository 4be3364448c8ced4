//! crates/coursegate_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the engine's collaborators.
//! These traits form the boundary of the hexagonal architecture: the engine
//! never sees a database, an HTTP request, or an auth cookie, only these
//! ports.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::ReadingProgress;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A concurrent writer got there first; the caller should re-read and
    /// retry the whole read-modify-write.
    #[error("Conflicting concurrent update: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Progress Storage
//=========================================================================================

/// Lookup outcome for a (student, material) pair. Absence of a record means
/// "not started", which is a normal state and not an error, so it is a
/// variant the caller branches on rather than a sentinel default object.
#[derive(Debug, Clone)]
pub enum ProgressLookup {
    Found(ReadingProgress),
    NotStarted,
}

/// Durable storage for progress records. Implementations must guarantee a
/// uniqueness constraint on (student, material) and must serialize
/// concurrent read-modify-write cycles on the same record: `update` fails
/// with `Conflict` when the stored version is no longer the one the caller
/// read.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn find(&self, student: Uuid, material: Uuid) -> PortResult<ProgressLookup>;

    /// Inserts a fresh record. Racing creates for the same (student,
    /// material) pair are resolved by returning whichever record actually
    /// landed, making first-time initialization idempotent.
    async fn create(&self, progress: &ReadingProgress) -> PortResult<ReadingProgress>;

    /// Persists a mutated record, bumping its version.
    async fn update(&self, progress: &ReadingProgress) -> PortResult<()>;
}

//=========================================================================================
// Course Directory (enrollment / ownership)
//=========================================================================================

/// A material together with the course that owns it.
#[derive(Debug, Clone, Copy)]
pub struct MaterialRef {
    pub material: Uuid,
    pub course: Uuid,
}

/// The caller's relationship to a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseRole {
    Student,
    Lecturer,
}

/// Read-side lookup into the course catalog. The engine itself never calls
/// this; the request layer uses it to authorize access before any engine
/// operation runs.
#[async_trait]
pub trait CourseDirectory: Send + Sync {
    /// Resolves a material to its owning course, `NotFound` if the material
    /// does not exist.
    async fn material_course(&self, material: Uuid) -> PortResult<MaterialRef>;

    /// `None` when the user is neither enrolled in the course nor its
    /// lecturer.
    async fn membership(&self, course: Uuid, user: Uuid) -> PortResult<Option<CourseRole>>;
}

//=========================================================================================
// Identity
//=========================================================================================

/// Validates browser session tokens into caller identities. Account
/// creation and login live in a separate service; only validation is needed
/// here.
#[async_trait]
pub trait AuthSessions: Send + Sync {
    async fn validate_session(&self, token: &str) -> PortResult<Uuid>;
}
