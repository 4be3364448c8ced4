//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use coursegate_core::ports::{AuthSessions, CourseDirectory, ProgressStore};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all
/// handlers. Everything behind the ports is swappable; the handlers only
/// ever see the trait objects.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ProgressStore>,
    pub directory: Arc<dyn CourseDirectory>,
    pub auth: Arc<dyn AuthSessions>,
    pub config: Arc<Config>,
}
