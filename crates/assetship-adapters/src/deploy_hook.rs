//! Deploy hook trigger: `POST {url}/{service_id}?key={key}` with no body.
//! Any 2xx response means the deploy was accepted.

use std::time::Duration;

use assetship_core::{DeploymentNotifier, DispatchPayload, ServiceError, ServiceResult};
use async_trait::async_trait;
use tracing::info;

use crate::http::{from_reqwest, from_status};
use crate::USER_AGENT;

const DEFAULT_HOOK_URL: &str = "https://api.render.com/deploy";

/// Deploy hook configuration
#[derive(Clone)]
pub struct DeployHookConfig {
    /// Hook base URL
    pub url: String,
    /// Service to deploy
    pub service_id: String,
    /// Authorization key
    pub key: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for DeployHookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployHookConfig")
            .field("url", &self.url)
            .field("service_id", &self.service_id)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl DeployHookConfig {
    pub fn new(service_id: &str, key: &str) -> Self {
        DeployHookConfig {
            url: DEFAULT_HOOK_URL.to_string(),
            service_id: service_id.to_string(),
            key: key.to_string(),
            timeout_secs: 30,
        }
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - DEPLOY_SERVICE_ID (required)
    /// - DEPLOY_HOOK_KEY (required)
    /// - DEPLOY_HOOK_URL (optional, default: "https://api.render.com/deploy")
    pub fn from_env() -> std::result::Result<Self, String> {
        let service_id =
            std::env::var("DEPLOY_SERVICE_ID").map_err(|_| "DEPLOY_SERVICE_ID not set")?;
        let key = std::env::var("DEPLOY_HOOK_KEY").map_err(|_| "DEPLOY_HOOK_KEY not set")?;
        let mut config = Self::new(&service_id, &key);
        if let Ok(url) = std::env::var("DEPLOY_HOOK_URL") {
            config = config.with_url(&url);
        }
        Ok(config)
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.trim_end_matches('/').to_string();
        self
    }

    /// Endpoint without the key, safe to log.
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.url, self.service_id)
    }
}

/// Deploy hook notifier
pub struct DeployHook {
    config: DeployHookConfig,
    http: reqwest::Client,
}

impl DeployHook {
    pub fn new(config: DeployHookConfig) -> ServiceResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::Rejected(format!("building HTTP client: {e}")))?;
        Ok(DeployHook { config, http })
    }
}

#[async_trait]
impl DeploymentNotifier for DeployHook {
    fn name(&self) -> &str {
        "deploy-hook"
    }

    async fn notify(&self, payload: &DispatchPayload) -> ServiceResult<()> {
        let what = "deploy hook";
        let resp = self
            .http
            .post(self.config.endpoint())
            .query(&[("key", self.config.key.as_str())])
            .send()
            .await
            // The URL carries the key; keep it out of the error text.
            .map_err(|e| from_reqwest(what, e.without_url()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(from_status(what, status, &body));
        }
        info!(
            endpoint = %self.config.endpoint(),
            image = %payload.image_reference,
            "deploy triggered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_excludes_key() {
        let config = DeployHookConfig::new("srv-123", "secret-key").with_url("https://hooks.example.com/deploy/");
        assert_eq!(config.endpoint(), "https://hooks.example.com/deploy/srv-123");
        assert!(!format!("{config:?}").contains("secret-key"));
    }

    #[tokio::test]
    async fn unreachable_hook_is_retryable_failure() {
        // Port 9 on localhost is discard; nothing listens there in CI.
        let config = DeployHookConfig::new("srv-1", "k").with_url("http://127.0.0.1:9");
        let hook = DeployHook::new(config).unwrap();
        let payload = DispatchPayload {
            event_type: "docker-image-updated".to_string(),
            image_reference: "owner/server:latest".to_string(),
            triggering_run_id: "1".to_string(),
            trigger_source: "push".to_string(),
        };
        let err = hook.notify(&payload).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.to_string().contains("key=k"));
    }
}
