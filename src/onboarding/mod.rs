//! Onboarding sessions: stages, the transition engine, and the service
//! that ties them to ticket sync.
//!
//! A session walks a fixed sequence of stages. Each message is matched
//! against the current stage's completion triggers from the `StageCatalog`;
//! a match moves the session exactly one stage forward. Sessions live in the
//! `SessionStore`, which is the only place they are mutated.

pub mod catalog;
pub mod engine;
pub mod progress;
pub mod routes;
pub mod service;
pub mod session;
pub mod stage;
pub mod store;

pub use catalog::{StageCatalog, StageDefinition};
pub use engine::{MatchMode, StageEngine, TicketEvent, Transition};
pub use progress::ProgressReporter;
pub use routes::{ApiResponse, onboarding_routes};
pub use service::{
    HealthReport, HealthStatus, LinkTicketRequest, MessageRequest, MessageResponse, OnboardingService,
    SessionListItem, StartRequest, StartResponse, StatusResponse, spawn_maintenance_task,
};
pub use session::{Session, SessionSummary, UserIdentity};
pub use stage::Stage;
pub use store::SessionStore;
