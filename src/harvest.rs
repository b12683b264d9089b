//! The sequential harvesting loop.
//!
//! One target at a time, strictly in order: parallel sessions would multiply
//! the observable request pattern and defeat both the rate limiter and the
//! motion synthesizer. Per-target failures become diagnostics and the loop
//! moves on; only a browser-launch failure aborts the run.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::challenge::detector;
use crate::challenge::solver::PuzzleSolver;
use crate::challenge::state_machine::{ChallengeStateMachine, StateMachineConfig};
use crate::core::config::HarvestConfig;
use crate::core::error::HarvestError;
use crate::core::types::{ChallengeState, HarvestTarget};
use crate::features::archive::ArchiveWriter;
use crate::features::motion::MotionSynthesizer;
use crate::features::proxy_pool::ProxyPool;
use crate::features::rate_limiter::{AdmissionDecision, RateLimiter};
use crate::scraping::browser::{Session, SessionOptions};

#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    pub archived: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// One harvest run: owns the rate state, the archive, and the challenge
/// machinery for its whole lifetime.
pub struct HarvestRun {
    cfg: HarvestConfig,
    limiter: RateLimiter,
    archive: ArchiveWriter,
    proxies: Option<ProxyPool>,
    motion: MotionSynthesizer,
    machine: ChallengeStateMachine,
    solver: PuzzleSolver,
}

impl HarvestRun {
    /// Wire the run up from config. Failure to create the archive directory
    /// is fatal — there is nowhere to put any result.
    pub fn new(cfg: HarvestConfig) -> anyhow::Result<Self> {
        let archive = ArchiveWriter::open(&cfg.resolve_archive_dir())?;

        let proxy_path = cfg.resolve_proxy_list_path();
        let proxies = if proxy_path.exists() {
            match ProxyPool::load(&proxy_path, "http") {
                Ok(pool) if !pool.is_empty() => Some(pool),
                Ok(_) => None,
                Err(e) => {
                    warn!("Proxy list unusable: {}. Continuing without proxies.", e);
                    None
                }
            }
        } else {
            info!(
                "Proxy list not found at {} — proxy feature disabled",
                proxy_path.display()
            );
            None
        };

        let machine = ChallengeStateMachine::new(StateMachineConfig {
            confirmation_selectors: cfg.resolve_confirmation_selectors(),
            confirmation_timeout: Duration::from_millis(cfg.resolve_confirmation_timeout_ms()),
            settle_delay: Duration::from_millis(cfg.resolve_settle_delay_ms()),
            clearance_wait: Duration::from_millis(cfg.resolve_clearance_wait_ms()),
            ..Default::default()
        });
        let solver = PuzzleSolver::new(cfg.resolve_puzzle_regions());
        let limiter = RateLimiter::hourly(cfg.resolve_max_requests_per_hour());

        Ok(Self {
            limiter,
            archive,
            proxies,
            motion: MotionSynthesizer::new(),
            machine,
            solver,
            cfg,
        })
    }

    /// Process every target in order. Returns the run summary, or the fatal
    /// launch error.
    pub async fn run(&mut self, targets: &[HarvestTarget]) -> anyhow::Result<RunSummary> {
        let mut summary = RunSummary::default();

        for target in targets {
            if self.archive.is_archived(&target.id) {
                info!("Target {} already archived — skipping", target.id);
                summary.skipped += 1;
                continue;
            }

            let Some(domain) = target.domain() else {
                warn!("Target {} has an unparsable URL: {}", target.id, target.url);
                self.archive
                    .record_failure(target, "invalid target URL", None, None);
                summary.failed += 1;
                continue;
            };

            // Admission is checked (and the wait honored) until the budget
            // opens; denied checks never consume a slot.
            loop {
                match self.limiter.admit(&domain) {
                    AdmissionDecision::Allow => break,
                    AdmissionDecision::Wait(wait) => {
                        info!(
                            "Rate budget for {} exhausted — waiting {:.1}s",
                            domain,
                            wait.as_secs_f64()
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
            }

            match self.process_target(target).await {
                Ok(true) => summary.archived += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) if e.is_fatal() => {
                    error!("Fatal: {}", e);
                    return Err(e.into());
                }
                Err(e) => {
                    warn!("Target {} failed ({}): {}", target.id, e.kind(), e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Run complete: {} archived, {} failed, {} skipped",
            summary.archived, summary.failed, summary.skipped
        );
        Ok(summary)
    }

    /// One target, one session. Returns whether a new archive record was
    /// written. All per-target errors are converted to diagnostics here;
    /// only `Launch` escapes unhandled.
    async fn process_target(&mut self, target: &HarvestTarget) -> Result<bool, HarvestError> {
        let (width, height) = self.cfg.resolve_viewport();
        let mut opts = SessionOptions::new(width, height);
        opts.executable = self.cfg.resolve_browser_executable();
        opts.profile_dir = self.cfg.resolve_browser_profile_dir();
        opts.proxy = self
            .proxies
            .as_ref()
            .and_then(|p| p.pick())
            .map(str::to_string);

        let session = Session::open(&opts).await?;

        let result = match self.drive(&session, target).await {
            Ok(content) => match self.archive.record(target, &content) {
                Ok(Some(_)) => Ok(true),
                Ok(None) => Ok(false),
                Err(e) => {
                    error!("Persistence failed for {}: {}", target.id, e);
                    Err(e)
                }
            },
            Err(e) => {
                // Best-effort failure artifacts from whatever the session can
                // still produce.
                let screenshot = session.screenshot_full().await.ok();
                let markup = session.content().await.ok();
                self.archive.record_failure(
                    target,
                    &e.to_string(),
                    screenshot.as_deref(),
                    markup.as_deref(),
                );
                Err(e)
            }
        };

        session.close().await;
        result
    }

    async fn drive(
        &mut self,
        session: &Session,
        target: &HarvestTarget,
    ) -> Result<String, HarvestError> {
        let nav_timeout = Duration::from_millis(self.cfg.resolve_navigation_timeout_ms());
        session.navigate(&target.url, nav_timeout).await?;

        // Reading dwell before touching anything.
        let dwell = self.motion.idle(
            self.cfg.resolve_min_action_delay_ms(),
            self.cfg.resolve_max_action_delay_ms(),
        );
        tokio::time::sleep(dwell).await;

        if detector::inspect(session).await? == ChallengeState::Detected {
            info!("Challenge detected on {} — engaging state machine", target.url);
            let outcome = self
                .machine
                .resolve(session, &self.solver, &mut self.motion)
                .await?;
            if outcome.state != ChallengeState::Solved {
                return Err(HarvestError::ChallengeUnresolved(format!(
                    "terminal state {:?}, trace {:?}",
                    outcome.state, outcome.trace
                )));
            }
            info!("Challenge cleared for {}", target.url);
        }

        // Post-resolution human-like browsing before capture.
        for (dy, pause) in self.motion.scroll_plan() {
            if let Err(e) = session.scroll_by(dy).await {
                warn!("Scroll simulation error: {}", e);
            }
            tokio::time::sleep(pause).await;
        }
        session.wait_until_stable(1_500, 8_000).await;

        session.content().await
    }
}
