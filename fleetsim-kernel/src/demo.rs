use crate::config::DemoConf;
use crate::state::Shared;
use fleetsim_engine::{step_boundary, to_dataset, DatasetRecord, OverlayFrame, ScenarioOverlay, ScenarioSet};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task;
use tracing::{info, warn};

/// Pre-baked 24h dataset served to the dashboard
#[derive(Debug, Clone)]
pub struct DemoDataset {
    pub generated_at: OffsetDateTime,
    pub end: OffsetDateTime,
    pub records: Arc<Vec<DatasetRecord>>,
}

/// When and how the current dataset was baked.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetInfo {
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
    pub records: usize,
}

impl DemoDataset {
    pub fn info(&self) -> DatasetInfo {
        DatasetInfo {
            generated_at: self.generated_at,
            end: self.end,
            records: self.records.len(),
        }
    }
}

pub type SharedDemo = Shared<Option<DemoDataset>>;

pub fn load_scenarios(conf: &DemoConf) -> ScenarioSet {
    match conf.scenarios.as_deref() {
        Some(path) => ScenarioSet::load(path).unwrap_or_else(|e| {
            warn!(path, error = %e, "scenario file unusable, using built-in demo scenarios");
            ScenarioSet::demo()
        }),
        None => ScenarioSet::demo(),
    }
}

/// Generate frames ending at the last 10-minute boundary before `now`.
pub fn bake(overlay: &ScenarioOverlay, now: OffsetDateTime) -> (Vec<OverlayFrame>, DemoDataset) {
    let end = step_boundary(now);
    let frames = overlay.generate(end, &mut rand::thread_rng());
    let dataset = DemoDataset {
        generated_at: now,
        end,
        records: Arc::new(to_dataset(&frames)),
    };
    (frames, dataset)
}

pub fn spawn_demo_refresher(overlay: Arc<ScenarioOverlay>, demo: SharedDemo, every: Duration) {
    task::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // first tick fires immediately; the startup bake already covers it
        interval.tick().await;
        loop {
            interval.tick().await;
            let (_, dataset) = bake(&overlay, OffsetDateTime::now_utc());
            info!(records = dataset.records.len(), end = %dataset.end, "demo dataset refreshed");
            *demo.lock() = Some(dataset);
        }
    });
}
