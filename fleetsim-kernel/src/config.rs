use fleetsim_engine::{FleetConfig, IncidentPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

pub const CONFIG_ENV: &str = "FLEETSIM_KERNEL_CONFIG";
pub const API_KEY_ENV: &str = "FLEETSIM_API_KEY";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    pub fleet: FleetConf,
    pub incidents: IncidentPolicy,
    pub narrative: NarrativeConf,
    pub http: HttpConf,
    pub mqtt: Option<MqttConf>,
    pub demo: DemoConf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FleetConf {
    pub size: usize,
    pub seed: Option<u64>,
    pub target_critical_ratio: f64,
    pub target_warning_ratio: f64,
    pub tick_interval_secs: u64,
}

impl Default for FleetConf {
    fn default() -> Self {
        let engine = FleetConfig::default();
        Self {
            size: engine.size,
            seed: engine.seed,
            target_critical_ratio: engine.target_critical_ratio,
            target_warning_ratio: engine.target_warning_ratio,
            tick_interval_secs: 10,
        }
    }
}

impl FleetConf {
    pub fn engine(&self) -> FleetConfig {
        FleetConfig {
            size: self.size,
            seed: self.seed,
            target_critical_ratio: self.target_critical_ratio,
            target_warning_ratio: self.target_warning_ratio,
        }
    }
}

/// Text-generation backend. No endpoint means narratives are disabled and
/// every incident carries the fallback text.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct NarrativeConf {
    pub endpoint: Option<String>,
    pub model: String,
}

impl Default for NarrativeConf {
    fn default() -> Self {
        Self { endpoint: None, model: "llama3".into() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DemoConf {
    pub refresh_interval_secs: u64,
    /// YAML scenario file; the built-in demo lifecycles when absent.
    pub scenarios: Option<String>,
}

impl Default for DemoConf {
    fn default() -> Self {
        Self { refresh_interval_secs: 600, scenarios: None }
    }
}

pub fn parse_config(txt: &str) -> KernelConfig {
    if txt.trim().is_empty() {
        return KernelConfig::default();
    }
    serde_yaml::from_str(txt).unwrap_or_else(|e| {
        warn!(error = %e, "invalid kernel config, using defaults");
        KernelConfig::default()
    })
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "kernel.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        info!(path = %path, "kernel config loaded");
        parse_config(&txt)
    } else {
        warn!(path = %path, "no kernel config file, using defaults");
        KernelConfig::default()
    }
}
