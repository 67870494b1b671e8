use thiserror::Error;

/// Failures of the external narrative collaborator.
///
/// None of these are fatal: the detector swaps the narrative for a fixed
/// fallback string and keeps the incident.
#[derive(Debug, Error)]
pub enum NarrativeError {
    #[error("narrative provider unavailable: {0}")]
    Unavailable(String),
    #[error("narrative request failed: {0}")]
    Request(String),
    #[error("narrative request timed out after {0}ms")]
    Timeout(u64),
}

/// Errors surfaced by the engine's fallible entry points (lookups, scenario
/// and catalog loading).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown host: {0}")]
    UnknownHost(String),
    #[error("invalid scenario window for {hostname}: {reason}")]
    InvalidScenario { hostname: String, reason: String },
    #[error("invalid profile catalog: {0}")]
    InvalidCatalog(String),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
