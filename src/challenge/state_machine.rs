//! Challenge resolution sequencing: Detect → Confirm → Solve → Verify.
//!
//! The machine is bounded: one confirmation attempt, one puzzle-solve
//! attempt, one clearance wait, then a terminal state. It never loops;
//! re-invocation policy belongs to the caller (and the harvester's default
//! is one attempt per target).

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::challenge::solver::{PuzzleSolver, TemplateMatcher};
use crate::challenge::ChallengeSurface;
use crate::core::error::HarvestError;
use crate::core::types::ChallengeState;
use crate::features::motion::MotionSynthesizer;

/// Timing and strategy knobs, resolved from config at wiring time.
#[derive(Debug, Clone)]
pub struct StateMachineConfig {
    /// Ordered candidate selectors for the confirmation control; first match
    /// wins.
    pub confirmation_selectors: Vec<String>,
    /// How long to keep trying confirmation selectors before proceeding —
    /// some challenge instances skip the confirmation stage entirely.
    pub confirmation_timeout: Duration,
    /// Fixed settle delay after a successful confirmation click, for the
    /// puzzle UI to render.
    pub settle_delay: Duration,
    /// Bounded wait for the challenge container to disappear after the drag.
    pub clearance_wait: Duration,
    /// Poll interval within the clearance wait.
    pub clearance_poll: Duration,
    /// Minimum segment count of the drag path.
    pub drag_steps: usize,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            confirmation_selectors: Vec::new(),
            confirmation_timeout: Duration::from_secs(3),
            settle_delay: Duration::from_millis(1_500),
            clearance_wait: Duration::from_secs(8),
            clearance_poll: Duration::from_millis(250),
            drag_steps: 24,
        }
    }
}

/// Terminal result of one resolution attempt, with the visited-state trace.
#[derive(Debug, Clone)]
pub struct ChallengeOutcome {
    pub state: ChallengeState,
    pub trace: Vec<ChallengeState>,
}

pub struct ChallengeStateMachine {
    cfg: StateMachineConfig,
}

impl ChallengeStateMachine {
    pub fn new(cfg: StateMachineConfig) -> Self {
        Self { cfg }
    }

    /// Drive one detected challenge to a terminal state.
    ///
    /// Caller has already classified the page as `Detected`. Solve failures
    /// (geometry, missing handle, container still present after the drag)
    /// terminate in `Failed`; only transport-level errors propagate.
    pub async fn resolve<M: TemplateMatcher>(
        &self,
        surface: &dyn ChallengeSurface,
        solver: &PuzzleSolver<M>,
        motion: &mut MotionSynthesizer,
    ) -> Result<ChallengeOutcome, HarvestError> {
        let mut trace = vec![ChallengeState::Detected];

        // Detected → AwaitingConfirmation: strategy list, first match wins.
        trace.push(ChallengeState::AwaitingConfirmation);
        let clicked = surface
            .click_first(&self.cfg.confirmation_selectors, self.cfg.confirmation_timeout)
            .await?;
        if clicked {
            debug!("confirmation control clicked, settling");
            tokio::time::sleep(self.cfg.settle_delay).await;
        } else {
            debug!("no confirmation control matched — assuming direct puzzle");
        }

        // AwaitingConfirmation → AwaitingPuzzle.
        trace.push(ChallengeState::AwaitingPuzzle);
        let geometry = match solver.solve(surface).await {
            Ok(g) => g,
            Err(HarvestError::Geometry(reason)) => {
                warn!("puzzle solve failed: {}", reason);
                trace.push(ChallengeState::Failed);
                return Ok(ChallengeOutcome {
                    state: ChallengeState::Failed,
                    trace,
                });
            }
            Err(e) => return Err(e),
        };

        let Some(origin) = surface.slider_handle_origin().await? else {
            warn!("slider handle not found on challenged page");
            trace.push(ChallengeState::Failed);
            return Ok(ChallengeOutcome {
                state: ChallengeState::Failed,
                trace,
            });
        };

        // Horizontal correction only: the drag destination keeps the handle's
        // vertical position.
        let dest = (origin.0 + geometry.best_offset.0 as f64, origin.1);
        let path = motion.curve(origin, dest, self.cfg.drag_steps);
        info!(
            dx = geometry.best_offset.0,
            score = geometry.match_score,
            segments = path.len(),
            "replaying slider drag"
        );
        surface.replay_pointer_path(&path).await?;

        // Verify by absence: the container gone within the bounded wait is
        // treated as clearance. This is the provider's only observable
        // signal, an approximation rather than a guarantee.
        let state = if self.wait_cleared(surface).await? {
            ChallengeState::Solved
        } else {
            ChallengeState::Failed
        };
        trace.push(state);
        Ok(ChallengeOutcome { state, trace })
    }

    async fn wait_cleared(&self, surface: &dyn ChallengeSurface) -> Result<bool, HarvestError> {
        let deadline = tokio::time::Instant::now() + self.cfg.clearance_wait;
        loop {
            if !surface.frame_present().await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.cfg.clearance_poll).await;
        }
    }
}
