//! Stage catalog: guidance text, completion triggers, and suggested
//! actions for every stage, loaded as data.
//!
//! The catalog is data. The engine never hard-codes keywords; it reads them
//! from here, and deployments can swap the built-in table for a JSON file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::stage::Stage;
use crate::error::ConfigError;

/// One immutable catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageDefinition {
    pub stage: Stage,
    /// Display name, e.g. "Environment Setup".
    pub name: String,
    /// Guidance shown when the session enters (or stays in) this stage.
    pub guidance: String,
    /// Keywords that mark this stage as complete when found in a message.
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Suggested next steps, purely descriptive.
    #[serde(default)]
    pub actions: Vec<String>,
}

/// The full, validated stage table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCatalog {
    stages: Vec<StageDefinition>,
    /// Reply for messages received once onboarding is complete.
    #[serde(default = "default_acknowledgment")]
    acknowledgment: String,
}

fn default_acknowledgment() -> String {
    "Your onboarding is complete. Reach out to your onboarding buddy or team lead if anything else comes up.".to_string()
}

impl StageCatalog {
    /// Build a catalog from definitions, validating shape.
    pub fn new(
        stages: Vec<StageDefinition>,
        acknowledgment: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let catalog = Self {
            stages,
            acknowledgment: acknowledgment.into(),
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Parse and validate a catalog from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let catalog: StageCatalog =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load a catalog from a JSON file.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = tokio::fs::read_to_string(path).await?;
        let catalog = Self::from_json(&json)?;
        tracing::info!(path = %path.display(), "Loaded stage catalog");
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.stages.len() != Stage::COUNT {
            return Err(ConfigError::InvalidCatalog(format!(
                "expected {} stages, found {}",
                Stage::COUNT,
                self.stages.len()
            )));
        }
        for (def, expected) in self.stages.iter().zip(Stage::ALL) {
            if def.stage != expected {
                return Err(ConfigError::InvalidCatalog(format!(
                    "stage {} is out of order (expected {})",
                    def.stage, expected
                )));
            }
            if def.guidance.trim().is_empty() {
                return Err(ConfigError::InvalidCatalog(format!(
                    "stage {} has no guidance",
                    def.stage
                )));
            }
            if !def.stage.is_terminal() && !def.triggers.iter().any(|t| !t.trim().is_empty()) {
                return Err(ConfigError::InvalidCatalog(format!(
                    "stage {} has no completion triggers",
                    def.stage
                )));
            }
        }
        if self.acknowledgment.trim().is_empty() {
            return Err(ConfigError::InvalidCatalog(
                "completion acknowledgment is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Definition for a stage. Validation guarantees every stage is present.
    pub fn get(&self, stage: Stage) -> &StageDefinition {
        &self.stages[stage.ordinal()]
    }

    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn acknowledgment(&self) -> &str {
        &self.acknowledgment
    }
}

impl Default for StageCatalog {
    fn default() -> Self {
        let def = |stage, name: &str, guidance: &str, triggers: &[&str], actions: &[&str]| {
            StageDefinition {
                stage,
                name: name.to_string(),
                guidance: guidance.to_string(),
                triggers: triggers.iter().map(|s| s.to_string()).collect(),
                actions: actions.iter().map(|s| s.to_string()).collect(),
            }
        };

        Self {
            stages: vec![
                def(
                    Stage::Welcome,
                    "Welcome",
                    "Welcome to the team! I'll walk you through onboarding one step at a time. \
                     First we'll get your development environment ready. Tell me when you're ready to start.",
                    &["ready", "start", "begin", "environment", "let's go"],
                    &[
                        "Read the team handbook",
                        "Confirm your laptop and accounts are provisioned",
                        "Say \"ready\" to begin environment setup",
                    ],
                ),
                def(
                    Stage::EnvironmentSetup,
                    "Environment Setup",
                    "Let's set up your environment: clone the service repositories, install the toolchain, \
                     and request access to the staging cluster. Let me know once everything is installed.",
                    &["done", "completed", "finished", "installed", "set up"],
                    &[
                        "Clone the service repositories",
                        "Install the required toolchain",
                        "Request staging cluster access",
                    ],
                ),
                def(
                    Stage::TeamIntroduction,
                    "Team Introduction",
                    "Time to meet the team. Join the team chat channels, introduce yourself, \
                     and schedule a coffee chat with your onboarding buddy. Tell me once you've met everyone.",
                    &["met", "introduced", "said hello", "done", "finished"],
                    &[
                        "Join the team chat channels",
                        "Introduce yourself at stand-up",
                        "Schedule a chat with your onboarding buddy",
                    ],
                ),
                def(
                    Stage::FirstTasks,
                    "First Tasks",
                    "Now for your first tasks: pick a starter issue from the backlog, open a pull request, \
                     and get it reviewed. Let me know when it's done.",
                    &["done", "completed", "finished", "submitted", "merged"],
                    &[
                        "Pick a starter issue from the backlog",
                        "Open a pull request",
                        "Request a review from your buddy",
                    ],
                ),
                def(
                    Stage::Completion,
                    "Completion",
                    "Congratulations, you've finished onboarding! You're all set to work independently.",
                    &[],
                    &["Share onboarding feedback with your team lead"],
                ),
            ],
            acknowledgment: default_acknowledgment(),
        }
    }
}
