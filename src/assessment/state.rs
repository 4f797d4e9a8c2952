//! Assessment stage machine: the five ordered phases of an intake conversation.

use serde::{Deserialize, Serialize};

/// The stages of the assessment conversation.
///
/// Progresses linearly: BasicInfo → OpenEnded → Narrowing → Psychometric →
/// Completed. No stage is skipped and none is revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    BasicInfo,
    OpenEnded,
    Narrowing,
    Psychometric,
    Completed,
}

impl Stage {
    /// Every stage in conversation order.
    pub const ALL: [Stage; 5] = [
        Stage::BasicInfo,
        Stage::OpenEnded,
        Stage::Narrowing,
        Stage::Psychometric,
        Stage::Completed,
    ];

    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, target),
            (BasicInfo, OpenEnded)
                | (OpenEnded, Narrowing)
                | (Narrowing, Psychometric)
                | (Psychometric, Completed)
        )
    }

    /// Whether this stage is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Get the next stage in the linear progression, if any.
    pub fn next(&self) -> Option<Stage> {
        use Stage::*;
        match self {
            BasicInfo => Some(OpenEnded),
            OpenEnded => Some(Narrowing),
            Narrowing => Some(Psychometric),
            Psychometric => Some(Completed),
            Completed => None,
        }
    }

    /// Zero-based position, used by progress indicators.
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).unwrap_or(0)
    }

    /// Participant-facing label for progress displays.
    pub fn label(&self) -> &'static str {
        match self {
            Self::BasicInfo => "Getting to know you",
            Self::OpenEnded => "Your feelings",
            Self::Narrowing => "Understanding",
            Self::Psychometric => "Assessment",
            Self::Completed => "Your report",
        }
    }
}

impl Default for Stage {
    fn default() -> Self {
        Self::BasicInfo
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BasicInfo => "basic-info",
            Self::OpenEnded => "open-ended",
            Self::Narrowing => "narrowing",
            Self::Psychometric => "psychometric",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.to_string() == s)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}
