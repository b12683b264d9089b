//! Challenge handling: detection, pixel-level solving, and the bounded
//! resolution state machine.
//!
//! Everything in this module talks to the page through [`ChallengeSurface`],
//! a narrow async interface. The live implementation wraps a CDP session;
//! tests drive the same code with a scripted mock.

pub mod detector;
pub mod solver;
pub mod state_machine;

use std::time::Duration;

use async_trait::async_trait;

use crate::core::error::HarvestError;
use crate::core::types::{PathPoint, Rect};

/// Substrings identifying the provider's challenge sub-frame by `src` or
/// `title`. Matching any of these in an iframe classifies the page as
/// challenged.
pub const CHALLENGE_FRAME_MARKERS: &[&str] = &[
    "captcha-delivery",
    "geo.captcha-delivery.com",
    "challenge",
    "verification",
];

/// Slider handle candidates, most specific first. The provider obfuscates
/// class names but keeps "slider" in them across layout revisions.
pub const SLIDER_HANDLE_SELECTORS: &[&str] = &[
    ".slider",
    "[class*='sliderHandle']",
    "[class*='slider-handle']",
    "[class*='sliderIcon']",
];

/// The page operations challenge resolution needs, and nothing more.
#[async_trait]
pub trait ChallengeSurface: Send + Sync {
    /// Whether the named challenge sub-frame/container is currently present.
    /// Absence is the common case and must be a cheap, non-error result.
    async fn frame_present(&self) -> Result<bool, HarvestError>;

    /// Current page markup, for blocking-text signature scanning.
    async fn page_markup(&self) -> Result<String, HarvestError>;

    /// Try each selector in order until one matches and is clicked, retrying
    /// until `timeout` elapses. Returns whether anything was clicked.
    async fn click_first(
        &self,
        selectors: &[String],
        timeout: Duration,
    ) -> Result<bool, HarvestError>;

    /// PNG screenshot of `region`, in page viewport coordinates.
    async fn capture_region(&self, region: Rect) -> Result<Vec<u8>, HarvestError>;

    /// Viewport center of the slider handle, if one is on the page.
    async fn slider_handle_origin(&self) -> Result<Option<(f64, f64)>, HarvestError>;

    /// Replay a synthesized pointer path as press → move… → release.
    async fn replay_pointer_path(&self, path: &[PathPoint]) -> Result<(), HarvestError>;
}
