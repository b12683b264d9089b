use tracing::{info, warn};

use veilcrawl::core::types;
use veilcrawl::{config, HarvestRun};

/// `--targets <path>` / `--targets=<path>` override of the configured list.
fn parse_targets_from_args() -> Option<String> {
    let mut args = std::env::args().peekable();
    while let Some(a) = args.next() {
        if a == "--targets" {
            if let Some(v) = args.next() {
                return Some(v);
            }
        } else if let Some(rest) = a.strip_prefix("--targets=") {
            return Some(rest.to_string());
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("Starting veilcrawl harvester");

    let cfg = config::load_config();

    let targets_path = parse_targets_from_args()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| cfg.resolve_targets_path());
    let targets = types::load_targets(&targets_path)?;
    if targets.is_empty() {
        warn!("Target list {} is empty — nothing to do", targets_path.display());
        return Ok(());
    }
    info!(
        "Loaded {} targets from {}",
        targets.len(),
        targets_path.display()
    );

    // Per-target failures are absorbed into diagnostics inside the run; an
    // error here means a fatal environment problem (browser launch, archive
    // directory) and exits non-zero.
    let mut run = HarvestRun::new(cfg)?;
    let summary = run.run(&targets).await?;

    info!(
        "Done: {} archived, {} failed, {} skipped",
        summary.archived, summary.failed, summary.skipped
    );
    Ok(())
}
