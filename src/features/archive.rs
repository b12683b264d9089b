//! Append-only archive of harvested pages, plus failure diagnostics.
//!
//! Layout under the archive directory:
//! * `index.csv` — one row per archived target, strict append, never
//!   rewritten or truncated.
//! * `{timestamp}_{sanitized-url}.html` — captured page markup, one file per
//!   success, never overwritten.
//! * `FAIL_{timestamp}_{sanitized-url}.png` / `.html` — diagnostic artifacts,
//!   at most one pair per failed target.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::core::error::HarvestError;
use crate::core::types::{ArchiveRecord, DiagnosticRecord, HarvestTarget};

const INDEX_FILE: &str = "index.csv";
const INDEX_HEADER: &str = "id,timestamp,source_domain,url,content_type,path";

/// Longest sanitized-URL fragment kept in filenames.
const MAX_NAME_CHARS: usize = 120;

pub struct ArchiveWriter {
    dir: PathBuf,
    index_path: PathBuf,
    /// Ids already present in the index — consulted so a re-run never
    /// produces a duplicate row.
    archived_ids: HashSet<String>,
    /// Targets that already received a diagnostic this run.
    failed_ids: HashSet<String>,
}

impl ArchiveWriter {
    /// Open (or create) the archive directory and read back the ids already
    /// recorded in `index.csv`.
    ///
    /// Failure here is fatal to the run: if the output directory cannot be
    /// created there is nowhere to put any result.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create archive directory {}", dir.display()))?;

        let index_path = dir.join(INDEX_FILE);
        let mut archived_ids = HashSet::new();
        match std::fs::read_to_string(&index_path) {
            Ok(existing) => {
                for row in existing.lines().skip(1) {
                    if let Some(id) = row.split(',').next() {
                        if !id.is_empty() {
                            archived_ids.insert(unescape_csv_field(id));
                        }
                    }
                }
                info!(
                    "Archive index {} holds {} prior entries",
                    index_path.display(),
                    archived_ids.len()
                );
            }
            Err(_) => {
                // Fresh index: write the header row once.
                let mut f = OpenOptions::new()
                    .create_new(true)
                    .write(true)
                    .open(&index_path)
                    .with_context(|| format!("Cannot create index {}", index_path.display()))?;
                writeln!(f, "{INDEX_HEADER}")?;
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            index_path,
            archived_ids,
            failed_ids: HashSet::new(),
        })
    }

    pub fn is_archived(&self, id: &str) -> bool {
        self.archived_ids.contains(id)
    }

    /// Persist one successfully captured page: a content file plus one index
    /// row. Returns `Ok(None)` when the target id is already archived (the
    /// re-run fast path) — nothing is written in that case.
    pub fn record(
        &mut self,
        target: &HarvestTarget,
        content: &str,
    ) -> Result<Option<ArchiveRecord>, HarvestError> {
        if self.is_archived(&target.id) {
            info!("Target {} already archived — skipping", target.id);
            return Ok(None);
        }

        let now = Utc::now();
        let stem = format!(
            "{}_{}",
            now.format("%Y%m%dT%H%M%S"),
            sanitize_url(&target.url)
        );
        let file_path = self.unique_path(&stem, "html")?;
        std::fs::write(&file_path, content)?;

        let record = ArchiveRecord {
            id: target.id.clone(),
            timestamp: now.to_rfc3339(),
            source_domain: target.domain().unwrap_or_default(),
            url: target.url.clone(),
            content_type: "text/html".to_string(),
            file_path: file_path.clone(),
        };
        self.append_index_row(&record)?;
        self.archived_ids.insert(target.id.clone());

        info!(
            "Archived {} → {} ({} bytes)",
            target.id,
            file_path.display(),
            content.len()
        );
        Ok(Some(record))
    }

    /// Persist failure artifacts for a target, at most once per target.
    ///
    /// Disk errors here are logged and swallowed: a diagnostic that cannot be
    /// written must not take the run down with it.
    pub fn record_failure(
        &mut self,
        target: &HarvestTarget,
        reason: &str,
        screenshot: Option<&[u8]>,
        html: Option<&str>,
    ) -> Option<DiagnosticRecord> {
        if !self.failed_ids.insert(target.id.clone()) {
            return None;
        }

        let now = Utc::now();
        let stem = format!(
            "FAIL_{}_{}",
            now.format("%Y%m%dT%H%M%S"),
            sanitize_url(&target.url)
        );

        let screenshot_path = screenshot.and_then(|bytes| {
            let path = self.dir.join(format!("{stem}.png"));
            match std::fs::write(&path, bytes) {
                Ok(()) => Some(path),
                Err(e) => {
                    warn!("Diagnostic screenshot write failed for {}: {}", target.id, e);
                    None
                }
            }
        });
        let html_path = html.and_then(|markup| {
            let path = self.dir.join(format!("{stem}.html"));
            match std::fs::write(&path, markup) {
                Ok(()) => Some(path),
                Err(e) => {
                    warn!("Diagnostic markup write failed for {}: {}", target.id, e);
                    None
                }
            }
        });

        warn!("Target {} failed: {}", target.id, reason);
        Some(DiagnosticRecord {
            timestamp: now.to_rfc3339(),
            url: target.url.clone(),
            screenshot_path,
            html_path,
            reason: reason.to_string(),
        })
    }

    /// First free path for `stem.ext`, suffixing a counter rather than ever
    /// overwriting an existing archive file.
    fn unique_path(&self, stem: &str, ext: &str) -> Result<PathBuf, HarvestError> {
        let direct = self.dir.join(format!("{stem}.{ext}"));
        if !direct.exists() {
            return Ok(direct);
        }
        for n in 1..1_000u32 {
            let candidate = self.dir.join(format!("{stem}-{n}.{ext}"));
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(HarvestError::Persistence(std::io::Error::other(format!(
            "no free archive filename for {stem}"
        ))))
    }

    fn append_index_row(&self, record: &ArchiveRecord) -> Result<(), HarvestError> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.index_path)?;
        writeln!(
            f,
            "{},{},{},{},{},{}",
            escape_csv_field(&record.id),
            escape_csv_field(&record.timestamp),
            escape_csv_field(&record.source_domain),
            escape_csv_field(&record.url),
            escape_csv_field(&record.content_type),
            escape_csv_field(&record.file_path.to_string_lossy())
        )?;
        Ok(())
    }
}

/// Filesystem-safe fragment derived from a URL: scheme stripped, anything
/// outside `[A-Za-z0-9._-]` mapped to `_`, length capped.
fn sanitize_url(url: &str) -> String {
    let trimmed = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let mut out: String = trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    out.truncate(MAX_NAME_CHARS);
    out
}

fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn unescape_csv_field(field: &str) -> String {
    let field = field.trim();
    if field.starts_with('"') && field.ends_with('"') && field.len() >= 2 {
        field[1..field.len() - 1].replace("\"\"", "\"")
    } else {
        field.to_string()
    }
}
