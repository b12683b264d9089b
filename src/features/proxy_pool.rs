//! Proxy endpoint pool — one random pick per browser session.
//!
//! Endpoints are loaded from a one-per-line list file. The harvester opens a
//! single sequential session per target, so there is no health scoring or
//! rotation state here: a fresh random endpoint per session is what keeps the
//! per-exit-IP request pattern thin.

use std::path::Path;

use anyhow::{anyhow, Result};
use rand::seq::IndexedRandom;
use tracing::info;

pub struct ProxyPool {
    endpoints: Vec<String>,
}

impl ProxyPool {
    /// Load endpoints from a list file, one per line.
    ///
    /// Blank lines and `#` comments are skipped; lines without a scheme get
    /// `default_scheme://` prepended; lines that still do not parse as URLs
    /// are counted and dropped.
    pub fn load(path: &Path, default_scheme: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read proxy list {}: {}", path.display(), e))?;

        let mut endpoints = Vec::new();
        let mut skipped = 0usize;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let candidate = if line.contains("://") {
                line.to_string()
            } else {
                format!("{}://{}", default_scheme, line)
            };
            if url::Url::parse(&candidate).is_ok() {
                endpoints.push(candidate);
            } else {
                skipped += 1;
            }
        }

        info!(
            "Loaded {} proxies from {} ({} invalid lines skipped)",
            endpoints.len(),
            path.display(),
            skipped
        );
        Ok(Self { endpoints })
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// One endpoint chosen at random, or `None` for an empty pool.
    pub fn pick(&self) -> Option<&str> {
        let mut rng = rand::rng();
        self.endpoints.choose(&mut rng).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_applies_scheme_and_skips_junk() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "# exit nodes").unwrap();
        writeln!(f, "10.0.0.1:8080").unwrap();
        writeln!(f, "socks5://10.0.0.2:1080").unwrap();
        writeln!(f).unwrap();
        writeln!(f, ":::not a proxy:::").unwrap();

        let pool = ProxyPool::load(f.path(), "http").unwrap();
        assert_eq!(pool.len(), 2);
        let picked = pool.pick().unwrap();
        assert!(picked.starts_with("http://") || picked.starts_with("socks5://"));
    }

    #[test]
    fn empty_pool_picks_nothing() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let pool = ProxyPool::load(f.path(), "http").unwrap();
        assert!(pool.is_empty());
        assert!(pool.pick().is_none());
    }

    #[test]
    fn pick_only_returns_loaded_endpoints() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "10.0.0.1:8080").unwrap();
        writeln!(f, "10.0.0.2:8080").unwrap();
        let pool = ProxyPool::load(f.path(), "http").unwrap();
        for _ in 0..20 {
            let p = pool.pick().unwrap();
            assert!(p == "http://10.0.0.1:8080" || p == "http://10.0.0.2:8080");
        }
    }
}
