use std::path::{Path, PathBuf};

use crate::core::types::Rect;

// ---------------------------------------------------------------------------
// HarvestConfig — file-based config loader (veilcrawl.json) with env-var fallback
// ---------------------------------------------------------------------------

/// Pixel regions of the targeted slider-challenge layout.
///
/// These are calibration data, not discovered values: they match one known
/// challenge layout and need re-measuring if the provider changes it. All
/// coordinates except `container` are relative to the container screenshot.
#[derive(serde::Deserialize, Clone, Copy, Debug)]
pub struct PuzzleRegions {
    /// Challenge container, in page viewport coordinates.
    pub container: Rect,
    /// Draggable piece fragment, within the container screenshot.
    pub piece: Rect,
    /// Slot area the piece must fill, within the container screenshot.
    pub background: Rect,
}

impl Default for PuzzleRegions {
    fn default() -> Self {
        // Calibrated against the 400×300 widget the targeted provider renders
        // centered in a 1280×900 viewport.
        Self {
            container: Rect::new(440, 260, 400, 300),
            piece: Rect::new(12, 96, 56, 56),
            background: Rect::new(76, 72, 312, 150),
        }
    }
}

/// Top-level config loaded from `veilcrawl.json`.
///
/// Every field is optional; `resolve_*` accessors apply the env-var fallback
/// and the built-in default, in that order.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct HarvestConfig {
    /// Path of the JSON-lines target list.
    pub targets_path: Option<String>,
    /// Directory receiving content files, `index.csv`, and diagnostics.
    pub archive_dir: Option<String>,
    /// Proxy endpoint list, one per line. Missing file → no proxying.
    pub proxy_list_path: Option<String>,
    /// Explicit browser executable (otherwise auto-discovered).
    pub browser_executable: Option<String>,
    /// Browser profile (user-data) directory. `None` lets the browser use a
    /// throwaway default, which is what single-use sessions normally want.
    pub browser_profile_dir: Option<String>,
    /// Minimum inter-action dwell, milliseconds.
    pub min_action_delay_ms: Option<u64>,
    /// Maximum inter-action dwell, milliseconds.
    pub max_action_delay_ms: Option<u64>,
    /// Sliding-window request cap per domain per hour.
    pub max_requests_per_hour: Option<usize>,
    /// Per-navigation timeout, milliseconds.
    pub navigation_timeout_ms: Option<u64>,
    /// Ordered candidate selectors for the challenge confirmation control.
    pub confirmation_selectors: Option<Vec<String>>,
    /// How long to keep trying confirmation selectors before skipping ahead.
    pub confirmation_timeout_ms: Option<u64>,
    /// Settle delay after a confirmation click, for the puzzle UI to render.
    pub settle_delay_ms: Option<u64>,
    /// Bounded wait for the challenge container to disappear after a drag.
    pub clearance_wait_ms: Option<u64>,
    pub viewport_width: Option<u32>,
    pub viewport_height: Option<u32>,
    pub puzzle: Option<PuzzleRegions>,
}

pub const ENV_CONFIG_PATH: &str = "VEILCRAWL_CONFIG";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";
pub const ENV_IP_LIST_PATH: &str = "IP_LIST_PATH";
pub const ENV_ARCHIVE_DIR: &str = "VEILCRAWL_ARCHIVE_DIR";
pub const ENV_TARGETS_PATH: &str = "VEILCRAWL_TARGETS";
pub const ENV_HOURLY_CAP: &str = "VEILCRAWL_MAX_REQUESTS_PER_HOUR";

/// Stock confirmation controls of the targeted challenge family, tried in
/// order; the provider localizes the label, so both text-bearing buttons and
/// structural selectors are listed.
pub const DEFAULT_CONFIRMATION_SELECTORS: &[&str] = &[
    "#challenge-confirm",
    "button[data-action='verify']",
    ".challenge-button",
    "input[type='checkbox']",
];

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl HarvestConfig {
    /// Target list path: JSON field → `VEILCRAWL_TARGETS` → `targets.jsonl`.
    pub fn resolve_targets_path(&self) -> PathBuf {
        self.targets_path
            .clone()
            .or_else(|| env_nonempty(ENV_TARGETS_PATH))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("targets.jsonl"))
    }

    /// Archive directory: JSON field → `VEILCRAWL_ARCHIVE_DIR` → `~/.veilcrawl/archive`.
    pub fn resolve_archive_dir(&self) -> PathBuf {
        if let Some(d) = self.archive_dir.clone().or_else(|| env_nonempty(ENV_ARCHIVE_DIR)) {
            return PathBuf::from(d);
        }
        dirs::home_dir()
            .map(|h| h.join(".veilcrawl").join("archive"))
            .unwrap_or_else(|| PathBuf::from("archive"))
    }

    /// Proxy list path: JSON field → `IP_LIST_PATH` → `ip.txt`.
    pub fn resolve_proxy_list_path(&self) -> PathBuf {
        self.proxy_list_path
            .clone()
            .or_else(|| env_nonempty(ENV_IP_LIST_PATH))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("ip.txt"))
    }

    /// Browser executable override: JSON field → `CHROME_EXECUTABLE` (must exist).
    pub fn resolve_browser_executable(&self) -> Option<String> {
        if let Some(p) = &self.browser_executable {
            return Some(p.clone());
        }
        let p = env_nonempty(ENV_CHROME_EXECUTABLE)?;
        Path::new(&p).exists().then_some(p)
    }

    /// Profile directory: JSON field → `VEILCRAWL_PROFILE_DIR` → none.
    pub fn resolve_browser_profile_dir(&self) -> Option<String> {
        self.browser_profile_dir
            .clone()
            .or_else(|| env_nonempty("VEILCRAWL_PROFILE_DIR"))
    }

    pub fn resolve_min_action_delay_ms(&self) -> u64 {
        self.min_action_delay_ms
            .or_else(|| env_parse("VEILCRAWL_MIN_DELAY_MS"))
            .unwrap_or(800)
    }

    pub fn resolve_max_action_delay_ms(&self) -> u64 {
        let max = self
            .max_action_delay_ms
            .or_else(|| env_parse("VEILCRAWL_MAX_DELAY_MS"))
            .unwrap_or(2400);
        max.max(self.resolve_min_action_delay_ms())
    }

    /// Hourly per-domain cap: JSON field → `VEILCRAWL_MAX_REQUESTS_PER_HOUR` → 20.
    pub fn resolve_max_requests_per_hour(&self) -> usize {
        self.max_requests_per_hour
            .or_else(|| env_parse(ENV_HOURLY_CAP))
            .unwrap_or(20)
    }

    pub fn resolve_navigation_timeout_ms(&self) -> u64 {
        self.navigation_timeout_ms
            .or_else(|| env_parse("VEILCRAWL_NAV_TIMEOUT_MS"))
            .unwrap_or(30_000)
    }

    pub fn resolve_confirmation_selectors(&self) -> Vec<String> {
        self.confirmation_selectors.clone().unwrap_or_else(|| {
            DEFAULT_CONFIRMATION_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect()
        })
    }

    pub fn resolve_confirmation_timeout_ms(&self) -> u64 {
        self.confirmation_timeout_ms.unwrap_or(3_000)
    }

    pub fn resolve_settle_delay_ms(&self) -> u64 {
        self.settle_delay_ms.unwrap_or(1_500)
    }

    pub fn resolve_clearance_wait_ms(&self) -> u64 {
        self.clearance_wait_ms.unwrap_or(8_000)
    }

    pub fn resolve_viewport(&self) -> (u32, u32) {
        (
            self.viewport_width.unwrap_or(1280),
            self.viewport_height.unwrap_or(900),
        )
    }

    pub fn resolve_puzzle_regions(&self) -> PuzzleRegions {
        self.puzzle.unwrap_or_default()
    }
}

/// Load `veilcrawl.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `VEILCRAWL_CONFIG` env var path
/// 2. `./veilcrawl.json`  (process cwd)
/// 3. `../veilcrawl.json` (one level up — repo root during `cargo run`)
///
/// Missing file → `HarvestConfig::default()` (silent, env-var fallbacks apply).
/// Parse error → log a warning, return defaults.
pub fn load_config() -> HarvestConfig {
    let candidates: Vec<PathBuf> = {
        let mut v = vec![
            PathBuf::from("veilcrawl.json"),
            PathBuf::from("../veilcrawl.json"),
        ];
        if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
            v.insert(0, PathBuf::from(env_path));
        }
        v
    };

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<HarvestConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("veilcrawl.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "veilcrawl.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return HarvestConfig::default();
                }
            },
            Err(_) => continue, // not found at this path — try next
        }
    }

    HarvestConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = HarvestConfig::default();
        assert_eq!(cfg.resolve_max_requests_per_hour(), 20);
        assert_eq!(cfg.resolve_navigation_timeout_ms(), 30_000);
        assert!(cfg.resolve_min_action_delay_ms() <= cfg.resolve_max_action_delay_ms());
        assert_eq!(cfg.resolve_viewport(), (1280, 900));
        assert!(!cfg.resolve_confirmation_selectors().is_empty());
    }

    #[test]
    fn max_delay_never_below_min() {
        let cfg = HarvestConfig {
            min_action_delay_ms: Some(2_000),
            max_action_delay_ms: Some(500),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_max_action_delay_ms(), 2_000);
    }

    #[test]
    fn puzzle_regions_fit_default_container() {
        let regions = HarvestConfig::default().resolve_puzzle_regions();
        let c = regions.container;
        assert!(regions.piece.fits_within(c.width, c.height));
        assert!(regions.background.fits_within(c.width, c.height));
        // The scan needs room for at least one offset.
        assert!(regions.piece.width <= regions.background.width);
        assert!(regions.piece.height <= regions.background.height);
    }

    #[test]
    fn config_json_roundtrip() {
        let raw = r##"{
            "max_requests_per_hour": 5,
            "confirmation_selectors": ["#go"],
            "puzzle": {
                "container": {"x": 100, "y": 50, "width": 300, "height": 200},
                "piece": {"x": 4, "y": 60, "width": 40, "height": 40},
                "background": {"x": 50, "y": 50, "width": 240, "height": 120}
            }
        }"##;
        let cfg: HarvestConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.resolve_max_requests_per_hour(), 5);
        assert_eq!(cfg.resolve_confirmation_selectors(), vec!["#go".to_string()]);
        assert_eq!(cfg.resolve_puzzle_regions().container.width, 300);
    }
}
