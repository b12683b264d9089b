//! Process- and JS-level anti-fingerprint defaults.
//!
//! Two layers, applied to every session:
//! * launch flags (see `browser::build_session_config`) suppress the
//!   Blink-level automation marker;
//! * the script below is injected via `Page.addScriptToEvaluateOnNewDocument`
//!   before any site code runs, and patches what the flags cannot reach.

use rand::seq::IndexedRandom;

pub const DESKTOP_USER_AGENTS: &[&str] = &[
    // Chrome 132 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 132 – macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 131 – Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    // Firefox 133 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    // Edge 132 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36 Edg/132.0.0.0",
];

/// Returns a randomly-chosen realistic desktop User-Agent string.
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    DESKTOP_USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(DESKTOP_USER_AGENTS[0])
}

/// Site-agnostic stealth script injected before page load.
pub fn universal_stealth_script() -> &'static str {
    r#"
// 0. Navigator hardening — webdriver must read as absent, not false.
(() => {
    try {
        const proto = Navigator.prototype;
        try {
            Object.defineProperty(proto, 'webdriver', {
                get: () => undefined,
                configurable: true,
            });
        } catch (e) {}
        try { delete navigator.webdriver; } catch (e) {}

        try {
            Object.defineProperty(proto, 'languages', {
                get: () => ['en-US', 'en'],
                configurable: true,
            });
        } catch (e) {}
        try {
            Object.defineProperty(proto, 'plugins', {
                get: () => [1, 2, 3, 4, 5],
                configurable: true,
            });
        } catch (e) {}
    } catch (e) {}
})();

// 1. Chrome runtime stub — many detectors only probe presence + callability.
if (!window.chrome) {
    window.chrome = {};
}
if (!window.chrome.runtime) {
    window.chrome.runtime = {
        connect: function() { return { onDisconnect: { addListener: function() {} } }; },
        sendMessage: function() {},
    };
}

// 2. Notification-permission probe consistency.
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {
    window.navigator.permissions.query = (parameters) => (
        parameters.name === 'notifications'
            ? Promise.resolve({ state: Notification.permission })
            : originalQuery(parameters)
    );
}

// 3. Canvas fingerprint noise (last-character randomization).
const originalGetContext = HTMLCanvasElement.prototype.getContext;
HTMLCanvasElement.prototype.getContext = function(type, ...args) {
    const context = originalGetContext.apply(this, [type, ...args]);
    if ((type === '2d' || type === 'webgl' || type === 'webgl2') && context) {
        const originalToDataURL = this.toDataURL;
        this.toDataURL = function(...args) {
            const data = originalToDataURL.apply(this, args);
            return data.replace(/.$/, String.fromCharCode(Math.random() * 10 | 0));
        };
    }
    return context;
};

// 4. WebGL vendor/renderer spoofing (SwiftShader masking).
const getParameter = WebGLRenderingContext.prototype.getParameter;
WebGLRenderingContext.prototype.getParameter = function(parameter) {
    if (parameter === 37445) return 'Intel Inc.';         // UNMASKED_VENDOR_WEBGL
    if (parameter === 37446) return 'Intel Iris OpenGL Engine'; // UNMASKED_RENDERER_WEBGL
    return getParameter.apply(this, arguments);
};
if (typeof WebGL2RenderingContext !== 'undefined') {
    const getParameter2 = WebGL2RenderingContext.prototype.getParameter;
    WebGL2RenderingContext.prototype.getParameter = function(parameter) {
        if (parameter === 37445) return 'Intel Inc.';
        if (parameter === 37446) return 'Intel Iris OpenGL Engine';
        return getParameter2.apply(this, arguments);
    };
}

// 5. Automation-framework marker cleanup.
delete window.__playwright;
delete window.__puppeteer;
delete window.__selenium;
delete window.callPhantom;
delete window._phantom;
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_pool_is_plausible() {
        assert!(!DESKTOP_USER_AGENTS.is_empty());
        for ua in DESKTOP_USER_AGENTS {
            assert!(ua.starts_with("Mozilla/5.0"));
        }
        assert!(DESKTOP_USER_AGENTS.contains(&random_user_agent()));
    }

    #[test]
    fn stealth_script_covers_the_known_probes() {
        let script = universal_stealth_script();
        assert!(script.contains("webdriver"));
        assert!(script.contains("chrome.runtime"));
        assert!(script.contains("toDataURL"));
        assert!(script.contains("37445"));
        assert!(script.contains("__playwright"));
    }
}
