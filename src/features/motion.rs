//! Human-motion synthesis: pointer curves, idle dwell, and scroll plans.
//!
//! Behavioral detectors score pointer velocity profiles and timing, so every
//! synthesized path bends through a randomized waypoint and every pause is
//! sampled rather than fixed. The synthesizer is a pure function of its
//! inputs plus the RNG; seed it for deterministic tests.

use std::time::Duration;

use rand::distr::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::core::types::PathPoint;

/// Upper bound on the distance between consecutive curve points, pixels.
/// The curve inserts extra steps rather than exceed it.
pub const MAX_STEP_PX: f64 = 40.0;

/// Minimum sideways bulge of the curve waypoint, as a fraction of the
/// start-to-end span. Keeps the path visibly off the straight line.
const MIN_BULGE_RATIO: f64 = 0.06;
const MAX_BULGE_RATIO: f64 = 0.22;

pub struct MotionSynthesizer {
    rng: StdRng,
}

impl MotionSynthesizer {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_rng(&mut rand::rng()),
        }
    }

    /// Deterministic synthesizer for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Pointer path from `from` to `to` with at least `steps` segments.
    ///
    /// The path is a quadratic pull toward one randomized waypoint offset
    /// perpendicular to the chord, with per-point pauses sampled so velocity
    /// is non-uniform. First point is exactly `from`, last exactly `to`; no
    /// two consecutive points are farther apart than [`MAX_STEP_PX`].
    pub fn curve(&mut self, from: (f64, f64), to: (f64, f64), steps: usize) -> Vec<PathPoint> {
        let dx = to.0 - from.0;
        let dy = to.1 - from.1;
        let span = (dx * dx + dy * dy).sqrt();

        // A quadratic curve bulges at most bulge/2 off the chord; doubling the
        // chord-based step count keeps segment lengths under the cap.
        let min_steps = ((span / MAX_STEP_PX).ceil() as usize * 2).max(2);
        let steps = steps.max(min_steps);

        if span < f64::EPSILON {
            return vec![
                PathPoint { x: from.0, y: from.1, pause: self.step_pause() },
                PathPoint { x: to.0, y: to.1, pause: self.step_pause() },
            ];
        }

        // Perpendicular unit vector to the chord; sign chosen at random.
        let (px, py) = (-dy / span, dx / span);
        let side = if self.rng.random_bool(0.5) { 1.0 } else { -1.0 };
        let bulge = Uniform::new(span * MIN_BULGE_RATIO, span * MAX_BULGE_RATIO)
            .expect("bulge range is non-empty")
            .sample(&mut self.rng)
            * side;

        let mid = (from.0 + dx * 0.5, from.1 + dy * 0.5);
        let ctrl = (mid.0 + px * bulge, mid.1 + py * bulge);

        let mut points = Vec::with_capacity(steps + 1);
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let u = 1.0 - t;
            let x = u * u * from.0 + 2.0 * u * t * ctrl.0 + t * t * to.0;
            let y = u * u * from.1 + 2.0 * u * t * ctrl.1 + t * t * to.1;
            points.push(PathPoint { x, y, pause: self.step_pause() });
        }

        // Endpoints must be exact, not float-accumulated.
        if let Some(p) = points.first_mut() {
            p.x = from.0;
            p.y = from.1;
        }
        if let Some(p) = points.last_mut() {
            p.x = to.0;
            p.y = to.1;
        }
        points
    }

    /// Dwell between actions, uniformly sampled in `[min_ms, max_ms]`.
    pub fn idle(&mut self, min_ms: u64, max_ms: u64) -> Duration {
        let max_ms = max_ms.max(min_ms);
        let ms = Uniform::new_inclusive(min_ms, max_ms)
            .expect("idle range is non-empty")
            .sample(&mut self.rng);
        Duration::from_millis(ms)
    }

    /// Randomized scroll passes for post-resolution browsing: a few downward
    /// scrolls with read pauses, occasionally backtracking upward the way a
    /// person re-reads.
    pub fn scroll_plan(&mut self) -> Vec<(i32, Duration)> {
        let passes = Uniform::new(2usize, 6).expect("pass range").sample(&mut self.rng);
        let dist = Uniform::new(200i32, 700).expect("scroll range");
        let pause = Uniform::new(300u64, 1_500).expect("pause range");
        let backtrack = Uniform::new(50i32, 200).expect("backtrack range");

        let mut plan = Vec::with_capacity(passes + 1);
        for _ in 0..passes {
            plan.push((
                dist.sample(&mut self.rng),
                Duration::from_millis(pause.sample(&mut self.rng)),
            ));
            if self.rng.random_bool(0.2) {
                plan.push((
                    -backtrack.sample(&mut self.rng),
                    Duration::from_millis(200 + pause.sample(&mut self.rng) / 3),
                ));
            }
        }
        plan
    }

    fn step_pause(&mut self) -> Duration {
        let ms = Uniform::new(8u64, 35).expect("pause range").sample(&mut self.rng);
        Duration::from_millis(ms)
    }
}

impl Default for MotionSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}
