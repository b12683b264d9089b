//! Sliding-window request budget, keyed by target domain.
//!
//! The limiter is an explicit value owned by the harvest run and consulted
//! before every navigation; there is no ambient singleton. Budgets are
//! domain-global for the life of the process, because the point is to bound
//! what the *target* observes, not what one batch file contains.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::debug;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Proceed now; the request has been counted.
    Allow,
    /// Come back after this long; nothing was counted.
    Wait(Duration),
}

/// One enforced `(horizon, cap)` pair.
#[derive(Debug, Clone, Copy)]
pub struct RateBudget {
    pub horizon: Duration,
    pub cap: usize,
}

impl RateBudget {
    pub fn new(horizon: Duration, cap: usize) -> Self {
        Self { horizon, cap }
    }

    pub fn hourly(cap: usize) -> Self {
        Self::new(Duration::from_secs(3_600), cap)
    }
}

/// Per-domain sliding-window counter over one or more horizons.
pub struct RateLimiter {
    /// Sorted smallest horizon first, so the wait instruction comes from the
    /// tightest violated budget.
    budgets: Vec<RateBudget>,
    max_horizon: Duration,
    history: HashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(mut budgets: Vec<RateBudget>) -> Self {
        budgets.sort_by_key(|b| b.horizon);
        let max_horizon = budgets
            .last()
            .map(|b| b.horizon)
            .unwrap_or(Duration::from_secs(3_600));
        Self {
            budgets,
            max_horizon,
            history: HashMap::new(),
        }
    }

    /// Limiter enforcing only the hourly cap.
    pub fn hourly(cap: usize) -> Self {
        Self::new(vec![RateBudget::hourly(cap)])
    }

    /// Admission check for one navigation to `domain`.
    ///
    /// Prunes entries older than the largest horizon, then checks each budget
    /// smallest-horizon first. On the first violated budget the wait is
    /// `oldest_in_horizon + horizon − now`; otherwise `now` is recorded and
    /// the request admitted. `Instant`-based, so the clock is monotonic and
    /// admission can never be retroactive.
    pub fn admit(&mut self, domain: &str) -> AdmissionDecision {
        self.admit_at(domain, Instant::now())
    }

    fn admit_at(&mut self, domain: &str, now: Instant) -> AdmissionDecision {
        let entries = self.history.entry(domain.to_string()).or_default();

        while let Some(&front) = entries.front() {
            if now.duration_since(front) > self.max_horizon {
                entries.pop_front();
            } else {
                break;
            }
        }

        for budget in &self.budgets {
            let in_window = |t: &Instant| now.duration_since(*t) < budget.horizon;
            let count = entries.iter().filter(|t| in_window(t)).count();
            if count >= budget.cap {
                let oldest = entries
                    .iter()
                    .find(|t| in_window(t))
                    .copied()
                    .unwrap_or(now);
                let wait = (oldest + budget.horizon).saturating_duration_since(now);
                debug!(
                    domain,
                    count,
                    cap = budget.cap,
                    wait_ms = wait.as_millis() as u64,
                    "rate budget exhausted"
                );
                return AdmissionDecision::Wait(wait);
            }
        }

        entries.push_back(now);
        AdmissionDecision::Allow
    }

    /// Admitted requests for `domain` within the trailing `horizon`.
    pub fn count_within(&self, domain: &str, horizon: Duration) -> usize {
        let now = Instant::now();
        self.history
            .get(domain)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|t| now.duration_since(**t) < horizon)
                    .count()
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3_600);

    #[test]
    fn allows_up_to_cap_then_waits() {
        let mut limiter = RateLimiter::hourly(2);
        let t0 = Instant::now();

        assert_eq!(limiter.admit_at("example.com", t0), AdmissionDecision::Allow);
        assert_eq!(
            limiter.admit_at("example.com", t0 + Duration::from_secs(1)),
            AdmissionDecision::Allow
        );

        // Third back-to-back admission must wait until the first slot expires.
        let now = t0 + Duration::from_secs(2);
        match limiter.admit_at("example.com", now) {
            AdmissionDecision::Wait(d) => {
                let expected = (t0 + HOUR).saturating_duration_since(now);
                assert_eq!(d, expected);
            }
            AdmissionDecision::Allow => panic!("cap exceeded"),
        }
    }

    #[test]
    fn domains_are_independent() {
        let mut limiter = RateLimiter::hourly(1);
        let t0 = Instant::now();
        assert_eq!(limiter.admit_at("a.com", t0), AdmissionDecision::Allow);
        assert_eq!(limiter.admit_at("b.com", t0), AdmissionDecision::Allow);
        assert!(matches!(
            limiter.admit_at("a.com", t0 + Duration::from_secs(1)),
            AdmissionDecision::Wait(_)
        ));
    }

    #[test]
    fn window_slides_and_entries_expire() {
        let mut limiter = RateLimiter::hourly(2);
        let t0 = Instant::now();
        assert_eq!(limiter.admit_at("d.com", t0), AdmissionDecision::Allow);
        assert_eq!(limiter.admit_at("d.com", t0 + Duration::from_secs(10)), AdmissionDecision::Allow);

        // Just past the first entry's horizon: one slot has freed up.
        let later = t0 + HOUR + Duration::from_secs(1);
        assert_eq!(limiter.admit_at("d.com", later), AdmissionDecision::Allow);
    }

    #[test]
    fn wait_does_not_consume_a_slot() {
        let mut limiter = RateLimiter::hourly(1);
        let t0 = Instant::now();
        assert_eq!(limiter.admit_at("d.com", t0), AdmissionDecision::Allow);
        // Denied admissions must not extend the window.
        for i in 1..5u64 {
            assert!(matches!(
                limiter.admit_at("d.com", t0 + Duration::from_secs(i)),
                AdmissionDecision::Wait(_)
            ));
        }
        assert_eq!(
            limiter.admit_at("d.com", t0 + HOUR + Duration::from_millis(1)),
            AdmissionDecision::Allow
        );
    }

    #[test]
    fn cap_invariant_holds_over_arbitrary_sequences() {
        let mut limiter = RateLimiter::new(vec![
            RateBudget::new(Duration::from_secs(60), 3),
            RateBudget::hourly(10),
        ]);
        let t0 = Instant::now();

        // Deterministic pseudo-random arrival pattern.
        let mut seed = 0x2545f491_u64;
        let mut now = t0;
        let mut allowed_minute: Vec<Instant> = Vec::new();
        for _ in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            now += Duration::from_millis(seed % 5_000);
            if limiter.admit_at("mixed.com", now) == AdmissionDecision::Allow {
                allowed_minute.push(now);
            }
            // Invariant: no 60 s window ever holds more than 3 admissions.
            let in_minute = allowed_minute
                .iter()
                .filter(|t| now.duration_since(**t) < Duration::from_secs(60))
                .count();
            assert!(in_minute <= 3, "minute cap violated: {}", in_minute);
        }
    }

    #[test]
    fn smallest_horizon_produces_the_wait() {
        let mut limiter = RateLimiter::new(vec![
            RateBudget::new(Duration::from_secs(60), 1),
            RateBudget::hourly(100),
        ]);
        let t0 = Instant::now();
        assert_eq!(limiter.admit_at("d.com", t0), AdmissionDecision::Allow);
        match limiter.admit_at("d.com", t0 + Duration::from_secs(30)) {
            AdmissionDecision::Wait(d) => assert_eq!(d, Duration::from_secs(30)),
            AdmissionDecision::Allow => panic!("minute budget ignored"),
        }
    }
}
