//! The fixed, ordered sequence of stages every session walks.

use serde::{Deserialize, Serialize};

/// The stages of onboarding.
///
/// Progresses linearly: Welcome → EnvironmentSetup → TeamIntroduction →
/// FirstTasks → Completion. A session never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Welcome,
    EnvironmentSetup,
    TeamIntroduction,
    FirstTasks,
    Completion,
}

impl Stage {
    /// Every stage in ordinal order.
    pub const ALL: [Stage; 5] = [
        Stage::Welcome,
        Stage::EnvironmentSetup,
        Stage::TeamIntroduction,
        Stage::FirstTasks,
        Stage::Completion,
    ];

    /// Number of stages in the sequence.
    pub const COUNT: usize = Self::ALL.len();

    /// Zero-based position in the sequence.
    pub fn ordinal(&self) -> usize {
        match self {
            Self::Welcome => 0,
            Self::EnvironmentSetup => 1,
            Self::TeamIntroduction => 2,
            Self::FirstTasks => 3,
            Self::Completion => 4,
        }
    }

    /// The first stage of every session.
    pub fn first() -> Stage {
        Stage::Welcome
    }

    /// Check if a transition from `self` to `target` is valid.
    ///
    /// Staying put is allowed; advancing is allowed one step at a time.
    pub fn can_transition_to(&self, target: Stage) -> bool {
        *self == target || self.next() == Some(target)
    }

    /// Whether this stage is terminal (onboarding is done).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completion)
    }

    /// Get the next stage in the linear progression, if any.
    pub fn next(&self) -> Option<Stage> {
        Self::ALL.get(self.ordinal() + 1).copied()
    }
}

impl Default for Stage {
    fn default() -> Self {
        Self::first()
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Welcome => "welcome",
            Self::EnvironmentSetup => "environment_setup",
            Self::TeamIntroduction => "team_introduction",
            Self::FirstTasks => "first_tasks",
            Self::Completion => "completion",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_follow_declaration_order() {
        for (i, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(stage.ordinal(), i);
        }
        assert_eq!(Stage::COUNT, 5);
    }

    #[test]
    fn valid_transitions() {
        use Stage::*;
        assert!(Welcome.can_transition_to(EnvironmentSetup));
        assert!(FirstTasks.can_transition_to(Completion));
        assert!(Completion.can_transition_to(Completion));
        assert!(TeamIntroduction.can_transition_to(TeamIntroduction));
    }

    #[test]
    fn invalid_transitions() {
        use Stage::*;
        // Skip stages
        assert!(!Welcome.can_transition_to(TeamIntroduction));
        // Go backward
        assert!(!EnvironmentSetup.can_transition_to(Welcome));
        assert!(!Completion.can_transition_to(Welcome));
    }

    #[test]
    fn next_walks_all_stages() {
        let mut current = Stage::first();
        let mut walked = vec![current];
        while let Some(next) = current.next() {
            walked.push(next);
            current = next;
        }
        assert_eq!(walked, Stage::ALL.to_vec());
        assert!(current.is_terminal());
    }

    #[test]
    fn display_matches_serde() {
        for stage in Stage::ALL {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(format!("\"{stage}\""), json, "mismatch for {stage:?}");
        }
    }

    #[test]
    fn ordering_matches_ordinal() {
        assert!(Stage::Welcome < Stage::EnvironmentSetup);
        assert!(Stage::FirstTasks < Stage::Completion);
        assert_eq!(Stage::default(), Stage::Welcome);
    }
}
