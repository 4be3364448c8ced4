pub mod domain;
pub mod ports;

pub use domain::{
    PageState, PageSummary, ProgressError, ProgressSummary, ReadingProgress, ReadingSession,
    MAX_TIME_PER_PAGE_SECS, MIN_TIME_PER_PAGE_SECS,
};
pub use ports::{
    AuthSessions, CourseDirectory, CourseRole, MaterialRef, PortError, PortResult, ProgressLookup,
    ProgressStore,
};
