//! crates/coursegate_core/src/domain.rs
//!
//! The gated sequential-reading progress engine. One `ReadingProgress`
//! aggregate exists per (student, material) pair; every mutation goes through
//! the methods here, and the derived fields (`completed_pages`,
//! `can_download`, per-page `can_proceed`) are only ever recomputed, never
//! assigned from outside.
//!
//! The engine owns no clock: every timestamp and every dwell-time figure is
//! supplied by the caller. Time accounting therefore trusts client reports;
//! the min/max window below is the only anti-gaming measure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Minimum dwell time on a page before it may be completed (6 minutes).
pub const MIN_TIME_PER_PAGE_SECS: u32 = 360;
/// Dwell time after which a page no longer counts as ready (12 minutes).
/// A page left open past this window loses `can_proceed` until the client
/// reports a figure back inside the window.
pub const MAX_TIME_PER_PAGE_SECS: u32 = 720;

/// Refusals the engine itself enforces.
///
/// Both checks lived in the request layer of the original system; they are
/// part of the state machine here so a caller that skips its own validation
/// cannot bypass the gate.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProgressError {
    #[error("page {page} has not been started in this reading session")]
    PageNotStarted { page: u32 },
    #[error("page {page} requires {required_secs}s of reading time, only {spent_secs}s recorded")]
    MinimumTimeNotMet {
        page: u32,
        required_secs: u32,
        spent_secs: u32,
    },
}

/// Dwell-time state for a single page the student has actually opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageState {
    pub page_number: u32,
    /// Latest client-reported total for this page. Each update overwrites the
    /// previous figure; the engine never adds increments together.
    pub time_spent_secs: u32,
    pub is_completed: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub min_time_required_secs: u32,
    pub max_time_allowed_secs: u32,
    pub can_proceed: bool,
}

impl PageState {
    fn new(page_number: u32, now: DateTime<Utc>) -> Self {
        Self {
            page_number,
            time_spent_secs: 0,
            is_completed: false,
            started_at: Some(now),
            ended_at: None,
            min_time_required_secs: MIN_TIME_PER_PAGE_SECS,
            max_time_allowed_secs: MAX_TIME_PER_PAGE_SECS,
            can_proceed: false,
        }
    }
}

/// One window of reading activity. Append-only audit trail: nothing in the
/// engine reads these back, they exist for later reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingSession {
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub pages_viewed: Vec<u32>,
    pub total_time_secs: u32,
}

/// The per-(student, material) aggregate root. `PageState` entries are owned
/// exclusively by this struct and are never referenced from outside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingProgress {
    pub student: Uuid,
    pub material: Uuid,
    pub course: Uuid,
    pub total_pages: u32,
    pub current_page: u32,
    pub completed_pages: u32,
    pub can_download: bool,
    /// Keyed by page number; populated lazily on first visit.
    pub pages: BTreeMap<u32, PageState>,
    pub session_started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub reading_sessions: Vec<ReadingSession>,
    /// Optimistic-concurrency token managed by the store.
    pub version: i64,
}

impl ReadingProgress {
    /// Creates a fresh record positioned on page 1 with no pages visited.
    /// A `total_pages` of zero is treated as a single-page material.
    pub fn new(
        student: Uuid,
        material: Uuid,
        course: Uuid,
        total_pages: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            student,
            material,
            course,
            total_pages: total_pages.max(1),
            current_page: 1,
            completed_pages: 0,
            can_download: false,
            pages: BTreeMap::new(),
            session_started_at: now,
            last_activity_at: now,
            reading_sessions: vec![ReadingSession {
                started_at: now,
                ended_at: None,
                pages_viewed: Vec::new(),
                total_time_secs: 0,
            }],
            version: 0,
        }
    }

    /// Opens a page for reading. First visit creates the page entry; a
    /// revisit only refreshes `started_at` (resuming restarts the timer,
    /// which is intentional).
    ///
    /// Callers must have checked `can_navigate_to` first; this method does
    /// not re-check the unlock order.
    pub fn start_page(&mut self, page_number: u32, now: DateTime<Utc>) {
        match self.pages.get_mut(&page_number) {
            Some(page) => page.started_at = Some(now),
            None => {
                self.pages.insert(page_number, PageState::new(page_number, now));
            }
        }
        self.current_page = page_number;
        self.last_activity_at = now;
        if let Some(session) = self.reading_sessions.last_mut() {
            if !session.pages_viewed.contains(&page_number) {
                session.pages_viewed.push(page_number);
            }
        }
    }

    /// Records the client-reported dwell total for a page and re-derives its
    /// eligibility. Reaching the page minimum grants `can_proceed`; exceeding
    /// the maximum revokes it even if the page had qualified earlier, since a
    /// page left idling does not count as ready. A report below the minimum
    /// never takes an earned grant away.
    pub fn update_page_time(
        &mut self,
        page_number: u32,
        time_spent_secs: u32,
        now: DateTime<Utc>,
    ) -> Result<(), ProgressError> {
        let page = self
            .pages
            .get_mut(&page_number)
            .ok_or(ProgressError::PageNotStarted { page: page_number })?;

        page.time_spent_secs = time_spent_secs;
        if time_spent_secs >= page.min_time_required_secs {
            page.can_proceed = true;
        }
        if time_spent_secs > page.max_time_allowed_secs {
            page.can_proceed = false;
        }
        self.last_activity_at = now;

        if let Some(session) = self.reading_sessions.last_mut() {
            session.total_time_secs = self.pages.values().map(|p| p.time_spent_secs).sum();
        }
        Ok(())
    }

    /// Marks a page as read. Refuses when the page was never started or when
    /// the recorded dwell time is below the page minimum; completion is
    /// otherwise idempotent and one-way. Recomputes the aggregate counters
    /// and flips `can_download` once every page is complete; the flip is
    /// one-way, a granted download is never taken back.
    pub fn complete_page(
        &mut self,
        page_number: u32,
        now: DateTime<Utc>,
    ) -> Result<(), ProgressError> {
        let page = self
            .pages
            .get_mut(&page_number)
            .ok_or(ProgressError::PageNotStarted { page: page_number })?;

        if page.time_spent_secs < page.min_time_required_secs {
            return Err(ProgressError::MinimumTimeNotMet {
                page: page_number,
                required_secs: page.min_time_required_secs,
                spent_secs: page.time_spent_secs,
            });
        }

        page.is_completed = true;
        page.ended_at = Some(now);
        self.last_activity_at = now;

        self.completed_pages = self.pages.values().filter(|p| p.is_completed).count() as u32;
        if self.completed_pages >= self.total_pages {
            self.can_download = true;
        }

        if self.can_download {
            if let Some(session) = self.reading_sessions.last_mut() {
                if session.ended_at.is_none() {
                    session.ended_at = Some(now);
                }
            }
        }
        Ok(())
    }

    /// Strict linear unlock: page 1 is always reachable, page N requires
    /// every page before it to exist and be completed. No skipping.
    pub fn can_navigate_to(&self, page_number: u32) -> bool {
        if page_number <= 1 {
            return true;
        }
        (1..page_number).all(|n| self.pages.get(&n).is_some_and(|p| p.is_completed))
    }

    /// Aggregate read projection. No side effects.
    pub fn summary(&self) -> ProgressSummary {
        let total_time_secs: u32 = self.pages.values().map(|p| p.time_spent_secs).sum();
        let progress_percent =
            ((self.completed_pages as f64 / self.total_pages as f64) * 100.0).round() as u32;
        ProgressSummary {
            completed_pages: self.completed_pages,
            total_pages: self.total_pages,
            progress_percent,
            total_time_secs,
            can_download: self.can_download,
            current_page: self.current_page,
        }
    }

    /// Per-page read projection; unvisited pages get the fixed default shape.
    pub fn page_summary(&self, page_number: u32) -> PageSummary {
        match self.pages.get(&page_number) {
            Some(page) => PageSummary {
                page_number: page.page_number,
                time_spent_secs: page.time_spent_secs,
                is_completed: page.is_completed,
                can_proceed: page.can_proceed,
                min_time_required_secs: page.min_time_required_secs,
                max_time_allowed_secs: page.max_time_allowed_secs,
                started_at: page.started_at,
                ended_at: page.ended_at,
            },
            None => PageSummary::unvisited(page_number),
        }
    }
}

/// Aggregate progress view for one (student, material) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub completed_pages: u32,
    pub total_pages: u32,
    pub progress_percent: u32,
    pub total_time_secs: u32,
    pub can_download: bool,
    pub current_page: u32,
}

impl ProgressSummary {
    /// View returned when no progress record exists: "not started" rather
    /// than an error.
    pub fn not_started() -> Self {
        Self {
            completed_pages: 0,
            total_pages: 1,
            progress_percent: 0,
            total_time_secs: 0,
            can_download: false,
            current_page: 1,
        }
    }
}

/// Detailed view of one page's dwell state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSummary {
    pub page_number: u32,
    pub time_spent_secs: u32,
    pub is_completed: bool,
    pub can_proceed: bool,
    pub min_time_required_secs: u32,
    pub max_time_allowed_secs: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl PageSummary {
    pub fn unvisited(page_number: u32) -> Self {
        Self {
            page_number,
            time_spent_secs: 0,
            is_completed: false,
            can_proceed: false,
            min_time_required_secs: MIN_TIME_PER_PAGE_SECS,
            max_time_allowed_secs: MAX_TIME_PER_PAGE_SECS,
            started_at: None,
            ended_at: None,
        }
    }
}
