/*!
Stub narrative provider for tests without a text-generation backend.

Records every prompt and answers according to a scripted behavior that can
be switched mid-test.
*/

use async_trait::async_trait;
use fleetsim_engine::{NarrativeError, NarrativeProvider};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum StubBehavior {
    Reply(String),
    Fail(String),
    /// Never answers; only a caller-side timeout ends the call.
    Hang,
}

#[derive(Clone)]
pub struct StubNarrativeProvider {
    behavior: Arc<Mutex<StubBehavior>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl StubNarrativeProvider {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(behavior)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(StubBehavior::Reply(text.to_string()))
    }

    pub fn failing(reason: &str) -> Self {
        Self::new(StubBehavior::Fail(reason.to_string()))
    }

    pub fn hanging() -> Self {
        Self::new(StubBehavior::Hang)
    }

    pub fn set_behavior(&self, behavior: StubBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.prompts.lock().unwrap().clear();
    }
}

#[async_trait]
impl NarrativeProvider for StubNarrativeProvider {
    async fn generate_narrative(&self, prompt: &str) -> Result<String, NarrativeError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let behavior = self.behavior.lock().unwrap().clone();
        log::debug!("📝 [STUB] narrative requested ({} chars)", prompt.len());
        match behavior {
            StubBehavior::Reply(text) => Ok(text),
            StubBehavior::Fail(reason) => Err(NarrativeError::Unavailable(reason)),
            StubBehavior::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_prompts_and_switches_behavior() {
        let stub = StubNarrativeProvider::replying("all good");
        assert_eq!(stub.generate_narrative("first").await.unwrap(), "all good");

        stub.set_behavior(StubBehavior::Fail("down".to_string()));
        assert!(matches!(
            stub.generate_narrative("second").await,
            Err(NarrativeError::Unavailable(_))
        ));
        assert_eq!(stub.prompts(), vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn hanging_stub_never_answers() {
        let stub = StubNarrativeProvider::hanging();
        let res = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            stub.generate_narrative("anyone?"),
        )
        .await;
        assert!(res.is_err());
        assert_eq!(stub.call_count(), 1);
    }
}
