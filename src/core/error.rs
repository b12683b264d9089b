use std::time::Duration;
use thiserror::Error;

/// Error taxonomy for one harvest run.
///
/// Only [`HarvestError::Launch`] aborts the run — a browser that cannot start
/// is an environment problem, not a per-target transient. Every other variant
/// is caught at the per-target boundary, converted into a diagnostic record,
/// and the loop moves on.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation timed out after {0:?}")]
    NavigationTimeout(Duration),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("puzzle geometry unavailable: {0}")]
    Geometry(String),

    #[error("challenge unresolved: {0}")]
    ChallengeUnresolved(String),

    #[error("persistence failed: {0}")]
    Persistence(#[from] std::io::Error),
}

impl HarvestError {
    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HarvestError::Launch(_))
    }

    /// Short machine-friendly tag used in diagnostic records and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            HarvestError::Launch(_) => "launch",
            HarvestError::NavigationTimeout(_) => "navigation_timeout",
            HarvestError::Navigation(_) => "navigation",
            HarvestError::Geometry(_) => "geometry",
            HarvestError::ChallengeUnresolved(_) => "challenge_unresolved",
            HarvestError::Persistence(_) => "persistence",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_launch_is_fatal() {
        assert!(HarvestError::Launch("no browser".into()).is_fatal());
        assert!(!HarvestError::Navigation("dns".into()).is_fatal());
        assert!(!HarvestError::NavigationTimeout(Duration::from_secs(30)).is_fatal());
        assert!(!HarvestError::Geometry("crop out of bounds".into()).is_fatal());
        assert!(!HarvestError::ChallengeUnresolved("container still present".into()).is_fatal());
    }

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(HarvestError::Launch("x".into()).kind(), "launch");
        assert_eq!(
            HarvestError::ChallengeUnresolved("x".into()).kind(),
            "challenge_unresolved"
        );
    }
}
