//! FleetSim engine - synthetic telemetry and incident-state simulation
//!
//! Invents a plausible fleet of servers and keeps it internally consistent:
//! - Diurnal load model and per-role baseline catalog
//! - Closed-loop tick engine steering Warning/Critical populations
//! - Bounded per-host history (24h at 10-minute resolution)
//! - Deterministic scenario overlay for pre-baked datasets
//! - Alert synthesis with dedup, incident detection with narratives

pub mod alerts;
pub mod classify;
pub mod error;
pub mod fleet;
pub mod history;
pub mod incidents;
pub mod load;
pub mod models;
pub mod overlay;
pub mod profiles;
pub mod tick;

pub use classify::{classify, classify_state};
pub use error::{EngineError, NarrativeError};
pub use fleet::{Fleet, FleetConfig, FleetEvent};
pub use incidents::{Incident, IncidentDetector, IncidentPolicy, NarrativeProvider, NARRATIVE_FALLBACK};
pub use models::{Alert, AlertSeverity, HealthStatus, ServerRole, ServerState, ServiceStatus};
pub use overlay::{step_boundary, to_dataset, DatasetRecord, OverlayFrame, ScenarioOverlay, ScenarioSet, ScenarioWindow};
pub use tick::{ControlTargets, TickSummary};
