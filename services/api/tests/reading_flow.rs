//! End-to-end tests for the reading-progress routes, driving the real router
//! over in-memory port implementations.

use api_lib::config::Config;
use api_lib::web::{self, state::AppState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use coursegate_core::domain::ReadingProgress;
use coursegate_core::ports::{
    AuthSessions, CourseDirectory, CourseRole, MaterialRef, PortError, PortResult,
    ProgressLookup, ProgressStore,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use tracing::Level;
use uuid::Uuid;

//=========================================================================================
// In-memory Port Implementations
//=========================================================================================

#[derive(Default)]
struct InMemoryStore {
    records: Mutex<HashMap<(Uuid, Uuid), ReadingProgress>>,
}

#[async_trait]
impl ProgressStore for InMemoryStore {
    async fn find(&self, student: Uuid, material: Uuid) -> PortResult<ProgressLookup> {
        let records = self.records.lock().unwrap();
        Ok(match records.get(&(student, material)) {
            Some(progress) => ProgressLookup::Found(progress.clone()),
            None => ProgressLookup::NotStarted,
        })
    }

    async fn create(&self, progress: &ReadingProgress) -> PortResult<ReadingProgress> {
        let mut records = self.records.lock().unwrap();
        let stored = records
            .entry((progress.student, progress.material))
            .or_insert_with(|| progress.clone());
        Ok(stored.clone())
    }

    async fn update(&self, progress: &ReadingProgress) -> PortResult<()> {
        let mut records = self.records.lock().unwrap();
        let stored = records
            .get_mut(&(progress.student, progress.material))
            .ok_or_else(|| PortError::NotFound("no progress record".to_string()))?;
        if stored.version != progress.version {
            return Err(PortError::Conflict("stale version".to_string()));
        }
        let mut updated = progress.clone();
        updated.version += 1;
        *stored = updated;
        Ok(())
    }
}

/// Wraps the in-memory store and, on the first update only, lets a rival
/// write land between the handler's read and its write, simulating a
/// double-submitted request losing the read-modify-write race.
#[derive(Default)]
struct ContendedStore {
    inner: InMemoryStore,
    raced: AtomicBool,
}

#[async_trait]
impl ProgressStore for ContendedStore {
    async fn find(&self, student: Uuid, material: Uuid) -> PortResult<ProgressLookup> {
        self.inner.find(student, material).await
    }

    async fn create(&self, progress: &ReadingProgress) -> PortResult<ReadingProgress> {
        self.inner.create(progress).await
    }

    async fn update(&self, progress: &ReadingProgress) -> PortResult<()> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            // The rival carries the same version the handler read, so it
            // wins and bumps the stored record out from under the caller.
            self.inner.update(progress).await?;
        }
        self.inner.update(progress).await
    }
}

struct StaticDirectory {
    /// material -> owning course
    materials: HashMap<Uuid, Uuid>,
    /// course -> lecturer
    lecturers: HashMap<Uuid, Uuid>,
    enrollments: HashSet<(Uuid, Uuid)>,
}

#[async_trait]
impl CourseDirectory for StaticDirectory {
    async fn material_course(&self, material: Uuid) -> PortResult<MaterialRef> {
        let course = self
            .materials
            .get(&material)
            .ok_or_else(|| PortError::NotFound(format!("Material {} not found", material)))?;
        Ok(MaterialRef {
            material,
            course: *course,
        })
    }

    async fn membership(&self, course: Uuid, user: Uuid) -> PortResult<Option<CourseRole>> {
        if self.lecturers.get(&course) == Some(&user) {
            return Ok(Some(CourseRole::Lecturer));
        }
        Ok(self
            .enrollments
            .contains(&(course, user))
            .then_some(CourseRole::Student))
    }
}

struct StaticAuth {
    sessions: HashMap<String, Uuid>,
}

#[async_trait]
impl AuthSessions for StaticAuth {
    async fn validate_session(&self, token: &str) -> PortResult<Uuid> {
        self.sessions
            .get(token)
            .copied()
            .ok_or_else(|| PortError::NotFound("Auth session not found or expired".to_string()))
    }
}

//=========================================================================================
// Test Harness
//=========================================================================================

struct Harness {
    router: Router,
    material: Uuid,
}

const STUDENT_TOKEN: &str = "session-student";
const LECTURER_TOKEN: &str = "session-lecturer";
const OUTSIDER_TOKEN: &str = "session-outsider";

fn harness() -> Harness {
    harness_with(Arc::new(InMemoryStore::default()))
}

fn harness_with(store: Arc<dyn ProgressStore>) -> Harness {
    let student = Uuid::new_v4();
    let lecturer = Uuid::new_v4();
    let outsider = Uuid::new_v4();
    let course = Uuid::new_v4();
    let material = Uuid::new_v4();

    let config = Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        database_url: String::new(),
        log_level: Level::INFO,
        cors_origin: "http://localhost:3000".to_string(),
    };

    let state = Arc::new(AppState {
        store,
        directory: Arc::new(StaticDirectory {
            materials: HashMap::from([(material, course)]),
            lecturers: HashMap::from([(course, lecturer)]),
            enrollments: HashSet::from([(course, student)]),
        }),
        auth: Arc::new(StaticAuth {
            sessions: HashMap::from([
                (STUDENT_TOKEN.to_string(), student),
                (LECTURER_TOKEN.to_string(), lecturer),
                (OUTSIDER_TOKEN.to_string(), outsider),
            ]),
        }),
        config: Arc::new(config),
    });

    Harness {
        router: web::router(state),
        material,
    }
}

impl Harness {
    async fn send(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let uri = format!("/materials/{}/reading{}", self.material, path);
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::COOKIE, format!("session={}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };
        (status, json)
    }

    async fn initialize(&self, total_pages: u32) -> (StatusCode, Value) {
        self.send(
            Method::POST,
            "/initialize",
            Some(STUDENT_TOKEN),
            Some(json!({ "totalPages": total_pages })),
        )
        .await
    }

    async fn start_page(&self, page: u32) -> (StatusCode, Value) {
        self.send(
            Method::POST,
            &format!("/pages/{}/start", page),
            Some(STUDENT_TOKEN),
            None,
        )
        .await
    }

    async fn update_time(&self, page: u32, secs: u32) -> (StatusCode, Value) {
        self.send(
            Method::PUT,
            &format!("/pages/{}/time", page),
            Some(STUDENT_TOKEN),
            Some(json!({ "timeSpent": secs })),
        )
        .await
    }

    async fn complete_page(&self, page: u32) -> (StatusCode, Value) {
        self.send(
            Method::POST,
            &format!("/pages/{}/complete", page),
            Some(STUDENT_TOKEN),
            None,
        )
        .await
    }

    /// Start, dwell long enough, complete.
    async fn read_page(&self, page: u32) {
        assert_eq!(self.start_page(page).await.0, StatusCode::OK);
        assert_eq!(self.update_time(page, 400).await.0, StatusCode::OK);
        assert_eq!(self.complete_page(page).await.0, StatusCode::OK);
    }
}

fn page_state<'a>(body: &'a Value, page: u64) -> &'a Value {
    body["pages"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["pageNumber"] == json!(page))
        .unwrap()
}

//=========================================================================================
// Tests
//=========================================================================================

#[tokio::test]
async fn requests_without_a_session_cookie_are_unauthorized() {
    let h = harness();
    let (status, _) = h.send(Method::GET, "/progress", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = h
        .send(Method::GET, "/progress", Some("bogus-token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn non_members_are_forbidden() {
    let h = harness();
    let (status, _) = h
        .send(
            Method::POST,
            "/initialize",
            Some(OUTSIDER_TOKEN),
            Some(json!({ "totalPages": 3 })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn lecturers_of_the_owning_course_are_allowed() {
    let h = harness();
    let (status, body) = h
        .send(Method::GET, "/progress", Some(LECTURER_TOKEN), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalPages"], json!(1));
}

#[tokio::test]
async fn unknown_material_is_not_found() {
    let h = harness();
    let unknown = Uuid::new_v4();
    let uri = format!("/materials/{}/reading/progress", unknown);
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::COOKIE, format!("session={}", STUDENT_TOKEN))
        .body(Body::empty())
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn initialize_is_idempotent_and_ignores_later_page_counts() {
    let h = harness();
    let (status, body) = h.initialize(3).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalPages"], json!(3));
    assert_eq!(body["currentPage"], json!(1));
    assert_eq!(body["canDownload"], json!(false));

    let (status, body) = h.initialize(99).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalPages"], json!(3));
}

#[tokio::test]
async fn read_endpoints_default_when_never_initialized() {
    let h = harness();

    let (status, body) = h.send(Method::GET, "/progress", Some(STUDENT_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalPages"], json!(1));
    assert_eq!(body["completedPages"], json!(0));
    assert_eq!(body["progressPercentage"], json!(0));
    assert_eq!(body["canDownload"], json!(false));

    let (status, body) = h
        .send(Method::GET, "/can-download", Some(STUDENT_TOKEN), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["canDownload"], json!(false));
    assert_eq!(body["reason"], json!("Reading progress not found"));

    let (status, body) = h
        .send(Method::GET, "/pages/2/progress", Some(STUDENT_TOKEN), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pageNumber"], json!(2));
    assert_eq!(body["minTimeRequired"], json!(360));
    assert_eq!(body["maxTimeAllowed"], json!(720));
    assert_eq!(body["canProceed"], json!(false));
}

#[tokio::test]
async fn mutating_routes_require_an_initialized_session() {
    let h = harness();
    let (status, _) = h.start_page(1).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = h.update_time(1, 400).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn locked_pages_cannot_be_started() {
    let h = harness();
    h.initialize(3).await;

    let (status, _) = h.start_page(2).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = h.start_page(1).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn updating_time_on_an_unvisited_page_is_not_found() {
    let h = harness();
    h.initialize(3).await;
    h.start_page(1).await;

    let (status, _) = h.update_time(2, 400).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn completion_is_gated_on_minimum_dwell_time() {
    let h = harness();
    h.initialize(2).await;
    h.start_page(1).await;
    h.update_time(1, 200).await;

    let (status, _) = h.complete_page(1).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    h.update_time(1, 400).await;
    let (status, body) = h.complete_page(1).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["completedPages"], json!(1));
}

#[tokio::test]
async fn overlong_dwell_revokes_eligibility_until_back_in_window() {
    let h = harness();
    h.initialize(1).await;
    h.start_page(1).await;

    let (_, body) = h.update_time(1, 400).await;
    assert_eq!(page_state(&body, 1)["canProceed"], json!(true));

    let (_, body) = h.update_time(1, 721).await;
    assert_eq!(page_state(&body, 1)["canProceed"], json!(false));

    let (_, body) = h.update_time(1, 700).await;
    assert_eq!(page_state(&body, 1)["canProceed"], json!(true));
}

#[tokio::test]
async fn full_gated_flow_unlocks_download() {
    let h = harness();
    h.initialize(3).await;

    h.read_page(1).await;

    // Page 3 stays locked until page 2 is done.
    let (status, _) = h.start_page(3).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    h.read_page(2).await;
    h.read_page(3).await;

    let (status, body) = h
        .send(Method::GET, "/can-download", Some(STUDENT_TOKEN), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["canDownload"], json!(true));
    assert_eq!(body["reason"], json!("All pages completed successfully"));
    assert_eq!(body["progress"]["progressPercentage"], json!(100));
    assert_eq!(body["progress"]["completedPages"], json!(3));
}

#[tokio::test]
async fn losing_a_double_submit_race_conflicts_and_succeeds_on_retry() {
    let h = harness_with(Arc::new(ContendedStore::default()));
    h.initialize(2).await;

    // The first mutation loses the race to its double-submitted twin and
    // must surface the stale write as a conflict, not silently clobber it.
    let (status, _) = h.start_page(1).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // A retry re-reads the bumped record and goes through.
    let (status, body) = h.start_page(1).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currentPage"], json!(1));
}

#[tokio::test]
async fn completing_a_page_twice_counts_once() {
    let h = harness();
    h.initialize(2).await;
    h.read_page(1).await;

    let (status, body) = h.complete_page(1).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["completedPages"], json!(1));
    assert_eq!(body["canDownload"], json!(false));
}
