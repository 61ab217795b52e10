//! Pure decision logic for onboarding transitions.
//!
//! Given a session and an incoming message, the engine proposes the next
//! stage, the reply, suggested actions, and whether the external ticket
//! needs reconciling. It performs no I/O and never mutates the session
//! itself; callers apply the proposal through `SessionStore::update`.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::catalog::StageCatalog;
use super::session::{Author, Session};
use super::stage::Stage;
use crate::error::ConfigError;

/// How completion triggers are matched against messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Case-insensitive substring match.
    Substring,
    /// Case-insensitive match on word boundaries ("done" does not match "undone").
    #[default]
    Word,
}

impl FromStr for MatchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "substring" => Ok(Self::Substring),
            "word" => Ok(Self::Word),
            other => Err(ConfigError::InvalidValue {
                key: "match_mode".to_string(),
                message: format!("unknown match mode '{other}' (expected substring or word)"),
            }),
        }
    }
}

/// Request to bring a session's ticket in line with a new stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketEvent {
    pub session_id: String,
    pub stage: Stage,
}

impl TicketEvent {
    pub fn advance(session_id: impl Into<String>, stage: Stage) -> Self {
        Self {
            session_id: session_id.into(),
            stage,
        }
    }
}

/// A proposed transition.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: Stage,
    pub to: Stage,
    /// Reply shown to the user.
    pub response: String,
    /// Suggested next steps from the resulting stage.
    pub actions: Vec<String>,
    pub ticket_event: Option<TicketEvent>,
    /// Whether applying this transition sets the completion flag.
    pub completes: bool,
    /// The trigger keyword that matched, if any.
    pub trigger: Option<String>,
}

impl Transition {
    pub fn advanced(&self) -> bool {
        self.to != self.from
    }

    /// Apply the proposal to a session, recording the exchange.
    pub fn apply(&self, session: &mut Session, input: &str, now: DateTime<Utc>) {
        session.record(Author::User, input, now);
        session.stage = self.to;
        if self.completes {
            session.completed = true;
            session.completed_at.get_or_insert(now);
        }
        session.record(Author::Agent, self.response.clone(), now);
        session.touch(now);
    }
}

enum Matcher {
    Substring(String),
    Word(Regex),
}

impl Matcher {
    fn is_match(&self, lowered_input: &str) -> bool {
        match self {
            Self::Substring(keyword) => lowered_input.contains(keyword.as_str()),
            Self::Word(re) => re.is_match(lowered_input),
        }
    }
}

/// Catalog-driven transition logic.
pub struct StageEngine {
    catalog: Arc<StageCatalog>,
    /// Compiled triggers, indexed by stage ordinal.
    matchers: Vec<Vec<(String, Matcher)>>,
}

impl StageEngine {
    pub fn new(catalog: Arc<StageCatalog>, mode: MatchMode) -> Result<Self, ConfigError> {
        let mut matchers = Vec::with_capacity(Stage::COUNT);
        for def in catalog.stages() {
            let mut compiled = Vec::new();
            for keyword in &def.triggers {
                let keyword = keyword.trim().to_lowercase();
                if keyword.is_empty() {
                    continue;
                }
                let matcher = match mode {
                    MatchMode::Substring => Matcher::Substring(keyword.clone()),
                    MatchMode::Word => {
                        let pattern = format!(r"\b{}\b", regex::escape(&keyword));
                        let re = Regex::new(&pattern).map_err(|e| {
                            ConfigError::InvalidCatalog(format!(
                                "trigger '{keyword}' for stage {}: {e}",
                                def.stage
                            ))
                        })?;
                        Matcher::Word(re)
                    }
                };
                compiled.push((keyword, matcher));
            }
            matchers.push(compiled);
        }
        Ok(Self { catalog, matchers })
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    /// The first completion trigger of `stage` found in `input`.
    pub fn matched_trigger(&self, stage: Stage, input: &str) -> Option<&str> {
        let lowered = input.trim().to_lowercase();
        if lowered.is_empty() {
            return None;
        }
        self.matchers[stage.ordinal()]
            .iter()
            .find(|(_, m)| m.is_match(&lowered))
            .map(|(keyword, _)| keyword.as_str())
    }

    /// Decide what happens when `input` arrives for `session`.
    pub fn advance(&self, session: &Session, input: &str) -> Transition {
        let current = session.stage;

        if current.is_terminal() {
            return Transition {
                from: current,
                to: current,
                response: self.catalog.acknowledgment().to_string(),
                actions: self.catalog.get(current).actions.clone(),
                ticket_event: None,
                completes: !session.completed,
                trigger: None,
            };
        }

        let Some(trigger) = self.matched_trigger(current, input) else {
            debug!(session_id = %session.id, stage = %current, "No completion trigger matched");
            let def = self.catalog.get(current);
            return Transition {
                from: current,
                to: current,
                response: def.guidance.clone(),
                actions: def.actions.clone(),
                ticket_event: None,
                completes: false,
                trigger: None,
            };
        };

        // Non-terminal stages always have a successor.
        let next = current.next().unwrap_or(current);
        let def = self.catalog.get(next);
        Transition {
            from: current,
            to: next,
            response: def.guidance.clone(),
            actions: def.actions.clone(),
            ticket_event: Some(TicketEvent::advance(&session.id, next)),
            completes: next.is_terminal(),
            trigger: Some(trigger.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::session::UserIdentity;

    fn engine(mode: MatchMode) -> StageEngine {
        StageEngine::new(Arc::new(StageCatalog::default()), mode).unwrap()
    }

    fn session_at(stage: Stage) -> Session {
        let mut s = Session::new("s1", UserIdentity::new("u1", "Jane", "jane@x.com"), Utc::now());
        s.stage = stage;
        s
    }

    #[test]
    fn matching_message_advances_one_stage() {
        let engine = engine(MatchMode::Substring);
        let session = session_at(Stage::Welcome);

        let t = engine.advance(&session, "I've completed setting up my environment");
        assert!(t.advanced());
        assert_eq!(t.to, Stage::EnvironmentSetup);
        assert_eq!(t.response, engine.catalog().get(Stage::EnvironmentSetup).guidance);
        assert_eq!(t.ticket_event, Some(TicketEvent::advance("s1", Stage::EnvironmentSetup)));
        assert!(!t.completes);
        assert_eq!(t.actions.len(), 3);
    }

    #[test]
    fn unrelated_message_restates_guidance() {
        let engine = engine(MatchMode::Substring);
        let session = session_at(Stage::EnvironmentSetup);

        let t = engine.advance(&session, "what's next?");
        assert!(!t.advanced());
        assert_eq!(t.response, engine.catalog().get(Stage::EnvironmentSetup).guidance);
        assert!(t.ticket_event.is_none());
        assert!(t.trigger.is_none());
    }

    #[test]
    fn empty_input_is_a_no_op() {
        let engine = engine(MatchMode::Substring);
        for input in ["", "   ", "\n"] {
            let t = engine.advance(&session_at(Stage::Welcome), input);
            assert_eq!(t.to, Stage::Welcome);
            assert!(t.ticket_event.is_none());
        }
    }

    #[test]
    fn matching_is_case_insensitive() {
        let engine = engine(MatchMode::Substring);
        let t = engine.advance(&session_at(Stage::TeamIntroduction), "I MET everyone today");
        assert_eq!(t.to, Stage::FirstTasks);
        assert_eq!(t.trigger.as_deref(), Some("met"));
    }

    #[test]
    fn entering_terminal_stage_completes() {
        let engine = engine(MatchMode::Substring);
        let t = engine.advance(&session_at(Stage::FirstTasks), "PR merged");
        assert_eq!(t.to, Stage::Completion);
        assert!(t.completes);
        assert_eq!(t.ticket_event, Some(TicketEvent::advance("s1", Stage::Completion)));
    }

    #[test]
    fn terminal_stage_acknowledges_without_ticket_event() {
        let engine = engine(MatchMode::Substring);
        let mut session = session_at(Stage::Completion);
        session.completed = true;

        for input in ["done", "go back to welcome", ""] {
            let t = engine.advance(&session, input);
            assert_eq!(t.to, Stage::Completion);
            assert_eq!(t.response, engine.catalog().acknowledgment());
            assert!(t.ticket_event.is_none());
            assert!(!t.completes);
        }
    }

    #[test]
    fn word_mode_respects_boundaries() {
        let substring = engine(MatchMode::Substring);
        let word = engine(MatchMode::Word);
        let session = session_at(Stage::FirstTasks);

        // "done" is a substring of "undone" but not a word in it.
        assert!(substring.advance(&session, "it's undone").advanced());
        assert!(!word.advance(&session, "it's undone").advanced());
        assert!(word.advance(&session, "It's done!").advanced());
    }

    #[test]
    fn default_mode_ignores_triggers_inside_other_words() {
        let engine = engine(MatchMode::default());

        // "met" in "something", "ready" in "already", "start" in "restart".
        let team = session_at(Stage::TeamIntroduction);
        assert!(!engine.advance(&team, "I need something").advanced());
        assert!(!engine.advance(&session_at(Stage::Welcome), "I already asked").advanced());
        assert!(!engine.advance(&session_at(Stage::Welcome), "can I restart?").advanced());

        assert!(engine.advance(&session_at(Stage::Welcome), "I'm ready").advanced());
        assert!(engine.advance(&team, "Met the team").advanced());
    }

    #[test]
    fn apply_records_exchange_and_sets_completion_once() {
        let engine = engine(MatchMode::Substring);
        let mut session = session_at(Stage::FirstTasks);
        let now = Utc::now();

        let t = engine.advance(&session, "finished my first PR");
        t.apply(&mut session, "finished my first PR", now);
        assert_eq!(session.stage, Stage::Completion);
        assert!(session.completed);
        assert_eq!(session.completed_at, Some(now));
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].author, Author::User);
        assert_eq!(session.history[0].stage, Stage::FirstTasks);
        assert_eq!(session.history[1].stage, Stage::Completion);

        let later = now + chrono::TimeDelta::minutes(5);
        let again = engine.advance(&session, "anything else?");
        again.apply(&mut session, "anything else?", later);
        assert_eq!(session.completed_at, Some(now));
        assert_eq!(session.last_activity, later);
    }

    #[test]
    fn match_mode_parses() {
        assert_eq!("word".parse::<MatchMode>().unwrap(), MatchMode::Word);
        assert_eq!(" Substring ".parse::<MatchMode>().unwrap(), MatchMode::Substring);
        assert!("fuzzy".parse::<MatchMode>().is_err());
    }
}
