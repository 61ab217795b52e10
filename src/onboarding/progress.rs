//! Percent complete and human-readable status summaries.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use super::catalog::StageCatalog;
use super::session::Session;
use super::stage::Stage;

/// Derives progress figures from a session and the stage catalog.
#[derive(Clone)]
pub struct ProgressReporter {
    catalog: Arc<StageCatalog>,
}

impl ProgressReporter {
    pub fn new(catalog: Arc<StageCatalog>) -> Self {
        Self { catalog }
    }

    /// Fraction complete in `[0, 1]`: `ordinal / (stages - 1)`.
    pub fn progress(&self, session: &Session) -> f64 {
        stage_progress(session.stage)
    }

    /// Status line combining stage name, elapsed time, and completion.
    pub fn summarize(&self, session: &Session, now: DateTime<Utc>) -> String {
        let def = self.catalog.get(session.stage);
        let percent = (self.progress(session) * 100.0).round() as u32;

        if session.completed {
            let finished = session.completed_at.unwrap_or(session.last_activity);
            return format!(
                "{} completed onboarding in {} ({}% complete).",
                session.user.username,
                format_elapsed(finished - session.created_at),
                percent
            );
        }

        format!(
            "{} is at stage {} of {}: {} ({}% complete). Started {} ago.",
            session.user.username,
            session.stage.ordinal() + 1,
            Stage::COUNT,
            def.name,
            percent,
            format_elapsed(now - session.created_at)
        )
    }
}

/// Progress of a stage on its own.
pub fn stage_progress(stage: Stage) -> f64 {
    if stage.is_terminal() {
        return 1.0;
    }
    stage.ordinal() as f64 / (Stage::COUNT - 1) as f64
}

/// Compact elapsed-time rendering: "45s", "12m", "3h 5m", "2d 4h".
fn format_elapsed(elapsed: TimeDelta) -> String {
    let secs = elapsed.num_seconds().max(0);
    let (days, hours, minutes) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60);
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{secs}s")
    }
}
