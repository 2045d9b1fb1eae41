//! Thin wrapper around `reqwest` for the assistive VQA service endpoints.

use crate::engine::validate::RequestPlan;
use crate::model::{HealthResponse, ModulesResponse};
use anyhow::{Context, Result};
use std::time::Duration;

/// Conventional local port of the inference service.
const DEFAULT_PORT: u16 = 5001;

/// Environment variable that overrides the API base URL.
pub const BASE_URL_ENV: &str = "ASSISTIVE_VQA_API_URL";

/// Resolve the API base URL: explicit env override first, then the
/// service's conventional localhost port.
pub fn default_base_url() -> String {
    match std::env::var(BASE_URL_ENV) {
        Ok(v) if !v.trim().is_empty() => v.trim().trim_end_matches('/').to_string(),
        _ => format!("http://localhost:{DEFAULT_PORT}"),
    }
}

pub(crate) struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Issue the multipart query: `image` binary part plus `question` text field.
    pub async fn post_query(
        &self,
        plan: &RequestPlan,
        image_bytes: Vec<u8>,
    ) -> reqwest::Result<reqwest::Response> {
        let part = reqwest::multipart::Part::bytes(image_bytes)
            .file_name(plan.file_name.clone())
            .mime_str(&plan.mime)?;
        let form = reqwest::multipart::Form::new()
            .text("question", plan.question.clone())
            .part("image", part);
        self.http
            .post(self.endpoint("/api/query"))
            .multipart(form)
            .send()
            .await
    }

    pub async fn fetch_health(&self) -> Result<HealthResponse> {
        self.http
            .get(self.endpoint("/api/health"))
            .send()
            .await
            .context("health request failed")?
            .error_for_status()
            .context("health check rejected")?
            .json::<HealthResponse>()
            .await
            .context("parse health response")
    }

    pub async fn fetch_modules(&self) -> Result<ModulesResponse> {
        self.http
            .post(self.endpoint("/api/test"))
            .send()
            .await
            .context("module availability request failed")?
            .error_for_status()
            .context("module availability rejected")?
            .json::<ModulesResponse>()
            .await
            .context("parse module availability")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let client = ApiClient::new(
            "http://localhost:5001/",
            "test-agent",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.endpoint("/api/query"),
            "http://localhost:5001/api/query"
        );
    }

    #[test]
    fn base_url_falls_back_to_local_port() {
        // Only meaningful when the override is unset, which is the norm in CI.
        if std::env::var(BASE_URL_ENV).is_err() {
            assert_eq!(default_base_url(), "http://localhost:5001");
        }
    }
}
