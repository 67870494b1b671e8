/**
 * NARRATIVE CLIENT - Incident analysis through an external text generator
 *
 * ROLE : Implements the engine's NarrativeProvider over HTTP.
 * POST {model, prompt, stream:false} -> {response}
 *
 * The detector owns the timeout; this client only maps transport and
 * payload failures onto NarrativeError.
 */

use crate::config::NarrativeConf;
use async_trait::async_trait;
use fleetsim_engine::{NarrativeError, NarrativeProvider};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Clone)]
pub struct HttpNarrativeProvider {
    client: Client,
    endpoint: String,
    model: String,
}

impl HttpNarrativeProvider {
    pub fn new(endpoint: String, model: String) -> Self {
        Self { client: Client::new(), endpoint, model }
    }
}

#[async_trait]
impl NarrativeProvider for HttpNarrativeProvider {
    async fn generate_narrative(&self, prompt: &str) -> Result<String, NarrativeError> {
        let body = GenerateRequest { model: &self.model, prompt, stream: false };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| NarrativeError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NarrativeError::Request(format!("status {status}")));
        }
        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|e| NarrativeError::Request(e.to_string()))?;
        debug!(chars = payload.response.len(), "narrative received");
        Ok(payload.response)
    }
}

/// Used when no endpoint is configured.
#[derive(Debug, Clone, Default)]
pub struct DisabledNarrativeProvider;

#[async_trait]
impl NarrativeProvider for DisabledNarrativeProvider {
    async fn generate_narrative(&self, _prompt: &str) -> Result<String, NarrativeError> {
        Err(NarrativeError::Unavailable("no narrative endpoint configured".into()))
    }
}

pub fn provider_from_config(conf: &NarrativeConf) -> Arc<dyn NarrativeProvider> {
    match conf.endpoint.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        Some(endpoint) => {
            info!(endpoint, model = %conf.model, "narrative provider enabled");
            Arc::new(HttpNarrativeProvider::new(endpoint.to_string(), conf.model.clone()))
        }
        None => {
            info!("narrative provider disabled, incidents use the fallback text");
            Arc::new(DisabledNarrativeProvider)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/api/generate")
    }

    #[tokio::test]
    async fn posts_prompt_and_reads_response() {
        let router = Router::new().route(
            "/api/generate",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["stream"], serde_json::json!(false));
                assert_eq!(body["model"], serde_json::json!("test-model"));
                let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
                Json(serde_json::json!({ "response": format!("analysis of: {prompt}") }))
            }),
        );
        let provider = HttpNarrativeProvider::new(serve(router).await, "test-model".into());
        let text = provider.generate_narrative("db-01 disk full").await.unwrap();
        assert_eq!(text, "analysis of: db-01 disk full");
    }

    #[tokio::test]
    async fn server_error_maps_to_request_error() {
        let router = Router::new().route(
            "/api/generate",
            post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let provider = HttpNarrativeProvider::new(serve(router).await, "m".into());
        assert!(matches!(
            provider.generate_narrative("x").await,
            Err(NarrativeError::Request(_))
        ));
    }

    #[tokio::test]
    async fn missing_endpoint_disables_narratives() {
        let provider = provider_from_config(&NarrativeConf::default());
        assert!(matches!(
            provider.generate_narrative("x").await,
            Err(NarrativeError::Unavailable(_))
        ));
    }
}
