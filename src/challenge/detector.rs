//! Challenge presence classification.
//!
//! Two independent signals, either of which classifies a page as challenged:
//! the provider's sub-frame in the live DOM, and blocking-page text
//! signatures in the captured markup. Absence of both is the fast path.

use std::sync::OnceLock;

use aho_corasick::AhoCorasick;

use crate::challenge::{ChallengeSurface, CHALLENGE_FRAME_MARKERS};
use crate::core::error::HarvestError;
use crate::core::types::ChallengeState;

/// Text signatures of blocking/interstitial pages. Matched case-insensitively
/// against raw markup.
const BLOCK_SIGNATURES: &[&str] = &[
    "verifying you are human",
    "checking your browser before accessing",
    "please verify you are a human",
    "prove you are human",
    "checking if the site connection is secure",
    "verification required",
    "just a moment",
    "access denied",
];

static SIGNATURE_MATCHER: OnceLock<AhoCorasick> = OnceLock::new();

fn signature_matcher() -> &'static AhoCorasick {
    SIGNATURE_MATCHER.get_or_init(|| {
        AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(BLOCK_SIGNATURES)
            .expect("valid block-page signatures")
    })
}

/// Whether this markup carries a blocking-page text signature.
pub fn looks_blocked(html: &str) -> bool {
    signature_matcher().is_match(html)
}

/// Classify the loaded page.
///
/// Returns [`ChallengeState::Detected`] when the challenge frame is present
/// or the markup matches a blocking signature, [`ChallengeState::None`]
/// otherwise. Absence never surfaces as an error.
pub async fn inspect(surface: &dyn ChallengeSurface) -> Result<ChallengeState, HarvestError> {
    if surface.frame_present().await? {
        return Ok(ChallengeState::Detected);
    }
    let markup = surface.page_markup().await?;
    if looks_blocked(&markup) {
        return Ok(ChallengeState::Detected);
    }
    Ok(ChallengeState::None)
}

/// In-page probe for the challenge sub-frame, shared by the live surface.
/// Scans iframe `src`/`title` attributes for the known container markers.
pub fn frame_probe_script() -> String {
    let markers = serde_json::to_string(CHALLENGE_FRAME_MARKERS).unwrap_or_else(|_| "[]".into());
    format!(
        r#"(() => {{
            const markers = {markers};
            const frames = Array.from(document.querySelectorAll('iframe'));
            return frames.some(f => {{
                const sig = ((f.getAttribute('src') || '') + ' ' + (f.getAttribute('title') || '')).toLowerCase();
                return markers.some(m => sig.includes(m));
            }});
        }})()"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_scan_is_case_insensitive() {
        assert!(looks_blocked("<title>Just a Moment...</title>"));
        assert!(looks_blocked("VERIFYING YOU ARE HUMAN, please wait"));
        assert!(looks_blocked("<h1>Access Denied</h1>"));
    }

    #[test]
    fn ordinary_pages_are_clean() {
        assert!(!looks_blocked("<html><body><h1>Weather report</h1></body></html>"));
        assert!(!looks_blocked(""));
    }

    #[test]
    fn probe_script_embeds_all_markers() {
        let script = frame_probe_script();
        for marker in CHALLENGE_FRAME_MARKERS {
            assert!(script.contains(marker));
        }
        assert!(script.contains("querySelectorAll('iframe')"));
    }
}
