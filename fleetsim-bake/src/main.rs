//! `fleetsim-bake [OUT] [SCENARIOS.yaml]`
//!
//! Bakes one 24h dataset (144 points per server) ending at the current
//! 10-minute boundary and writes it as a JSON array. Without a scenario file
//! the built-in demo lifecycles are used.

use anyhow::{Context, Result};
use fleetsim_engine::profiles::default_catalog;
use fleetsim_engine::{step_boundary, to_dataset, FleetConfig, ScenarioOverlay, ScenarioSet};
use rand::Rng;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_OUT: &str = "dataset.json";

fn bake<R: Rng + ?Sized>(
    out: &Path,
    scenarios: Option<&Path>,
    now: OffsetDateTime,
    rng: &mut R,
) -> Result<usize> {
    let scenarios = match scenarios {
        Some(path) => ScenarioSet::load(path)
            .with_context(|| format!("failed to load scenarios from {}", path.display()))?,
        None => ScenarioSet::demo(),
    };
    let overlay = ScenarioOverlay::new(default_catalog(), FleetConfig::default().size, scenarios)?;
    let end = step_boundary(now);
    let records = to_dataset(&overlay.generate(end, rng));

    let file = File::create(out).with_context(|| format!("cannot create {}", out.display()))?;
    serde_json::to_writer(BufWriter::new(file), &records)
        .with_context(|| format!("cannot write {}", out.display()))?;
    info!(records = records.len(), end = %end, out = %out.display(), "dataset written");
    Ok(records.len())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let out = PathBuf::from(args.next().unwrap_or_else(|| DEFAULT_OUT.to_string()));
    let scenarios = args.next().map(PathBuf::from);

    bake(&out, scenarios.as_deref(), OffsetDateTime::now_utc(), &mut rand::thread_rng())?;
    Ok(())
}
