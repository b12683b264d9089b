use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One page to harvest. Loaded once per run; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestTarget {
    pub id: String,
    pub url: String,
}

impl HarvestTarget {
    /// Host portion of the target URL — the rate-limit key.
    pub fn domain(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
    }
}

/// Load targets from a JSON-lines file: one `{"id": …, "url": …}` per line.
///
/// Blank lines and `#` comments are skipped. Malformed lines are counted and
/// logged rather than aborting the run — a single bad row should not discard
/// an otherwise valid batch.
pub fn load_targets(path: &Path) -> Result<Vec<HarvestTarget>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("Failed to read target list {}: {}", path.display(), e))?;

    let mut targets = Vec::new();
    let mut skipped = 0usize;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<HarvestTarget>(line) {
            Ok(t) => targets.push(t),
            Err(e) => {
                skipped += 1;
                warn!("Skipping malformed target line ({}): {}", e, line);
            }
        }
    }
    if skipped > 0 {
        warn!(
            "Target list {}: {} loaded, {} malformed lines skipped",
            path.display(),
            targets.len(),
            skipped
        );
    }
    Ok(targets)
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Axis-aligned pixel region, in challenge-container screenshot coordinates
/// (or page coordinates, for the container itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Whether `self` lies fully inside an image of `w`×`h` pixels.
    pub fn fits_within(&self, w: u32, h: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.checked_add(self.width).is_some_and(|r| r <= w)
            && self.y.checked_add(self.height).is_some_and(|b| b <= h)
    }
}

/// Result geometry of one puzzle-solve attempt.
///
/// Created fresh per attempt and discarded after the drag is replayed —
/// never persisted.
#[derive(Debug, Clone)]
pub struct PuzzleGeometry {
    pub piece_region: Rect,
    pub background_region: Rect,
    /// Best-matching offset of the piece within the background, in pixels.
    /// The `x` component is the horizontal drag distance.
    pub best_offset: (i64, i64),
    /// Mean absolute grayscale difference at the best offset (lower is better).
    pub match_score: f64,
}

// ---------------------------------------------------------------------------
// Challenge lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle of one challenge-resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    None,
    Detected,
    AwaitingConfirmation,
    AwaitingPuzzle,
    Solved,
    Failed,
}

impl ChallengeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChallengeState::Solved | ChallengeState::Failed)
    }
}

/// One point of a synthesized pointer path, with the pause to hold before
/// moving to the next point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathPoint {
    pub x: f64,
    pub y: f64,
    pub pause: Duration,
}

// ---------------------------------------------------------------------------
// Persistence records
// ---------------------------------------------------------------------------

/// Index row appended exactly once per successfully archived target.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveRecord {
    pub id: String,
    pub timestamp: String,
    pub source_domain: String,
    pub url: String,
    pub content_type: String,
    pub file_path: PathBuf,
}

/// Failure artifacts written at most once per failed target.
#[derive(Debug, Clone)]
pub struct DiagnosticRecord {
    pub timestamp: String,
    pub url: String,
    pub screenshot_path: Option<PathBuf>,
    pub html_path: Option<PathBuf>,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn target_domain_extraction() {
        let t = HarvestTarget {
            id: "a1".into(),
            url: "https://news.example.com/story/42".into(),
        };
        assert_eq!(t.domain().as_deref(), Some("news.example.com"));

        let bad = HarvestTarget {
            id: "a2".into(),
            url: "not a url".into(),
        };
        assert!(bad.domain().is_none());
    }

    #[test]
    fn rect_bounds_checks() {
        let r = Rect::new(10, 10, 50, 20);
        assert!(r.fits_within(60, 30));
        assert!(!r.fits_within(59, 30));
        assert!(!r.fits_within(60, 29));
        assert!(!Rect::new(0, 0, 0, 10).fits_within(100, 100));
    }

    #[test]
    fn load_targets_skips_junk_lines() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "# comment").unwrap();
        writeln!(f, r#"{{"id": "t1", "url": "https://example.com/a"}}"#).unwrap();
        writeln!(f).unwrap();
        writeln!(f, "this is not json").unwrap();
        writeln!(f, r#"{{"id": "t2", "url": "https://example.com/b"}}"#).unwrap();

        let targets = load_targets(f.path()).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].id, "t1");
        assert_eq!(targets[1].url, "https://example.com/b");
    }

    #[test]
    fn terminal_states() {
        assert!(ChallengeState::Solved.is_terminal());
        assert!(ChallengeState::Failed.is_terminal());
        assert!(!ChallengeState::Detected.is_terminal());
        assert!(!ChallengeState::AwaitingPuzzle.is_terminal());
    }
}
