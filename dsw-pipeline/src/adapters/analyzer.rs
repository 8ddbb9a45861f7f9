//! NLP / translation / image-location service
//!
//! The analyzer is optional: the enrichment pipeline falls back to the
//! keyword classifier whenever it is missing, slow or failing.

use async_trait::async_trait;
use governor::DefaultDirectRateLimiter;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{per_second_limiter, USER_AGENT};
use crate::error::AdapterError;
use dsw_common::models::Sentiment;

/// Analyzer output for one text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default)]
    pub key_phrases: Vec<String>,
    /// Location mentioned in the text, if the service found one
    #[serde(default)]
    pub location_guess: Option<String>,
    #[serde(default)]
    pub confidence: f32,
    /// Service-side classification; the rule table decides when absent
    #[serde(default)]
    pub is_disaster_related: Option<bool>,
    /// Service-side severity; the keyword heuristic decides when absent
    #[serde(default)]
    pub severity: Option<f32>,
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    async fn analyze(&self, text: &str) -> Result<Analysis, AdapterError>;

    /// Translate `text` from `from_lang` into the primary language
    async fn translate(&self, text: &str, from_lang: &str) -> Result<String, AdapterError>;

    /// Best-effort location for an attached image
    async fn locate_image(&self, _image_url: &str) -> Result<Option<String>, AdapterError> {
        Ok(None)
    }
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    text: &'a str,
    from: &'a str,
    to: &'a str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translated_text: String,
}

#[derive(Serialize)]
struct ImageLocationRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ImageLocationResponse {
    location: Option<String>,
}

/// JSON-over-HTTP analyzer client
pub struct HttpAnalyzer {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    target_language: String,
    rate_limiter: DefaultDirectRateLimiter,
}

impl HttpAnalyzer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        requests_per_second: u32,
        timeout: Duration,
    ) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AdapterError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            target_language: "en".to_string(),
            rate_limiter: per_second_limiter(requests_per_second),
        })
    }

    /// Language translations are requested into (defaults to "en")
    pub fn with_target_language(mut self, language: impl Into<String>) -> Self {
        self.target_language = language.into();
        self
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, AdapterError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, "Calling analyzer");

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AdapterError::RateLimited(format!("{} throttled", path)));
        }
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(AdapterError::Unavailable(format!("{} unavailable", path)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Api(status.as_u16(), body));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| AdapterError::Parse(e.to_string()))
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    fn name(&self) -> &'static str {
        "http-analyzer"
    }

    async fn analyze(&self, text: &str) -> Result<Analysis, AdapterError> {
        let mut analysis: Analysis = self.post_json("analyze", &AnalyzeRequest { text }).await?;
        analysis.confidence = dsw_common::time::clamp_unit(analysis.confidence);
        Ok(analysis)
    }

    async fn translate(&self, text: &str, from_lang: &str) -> Result<String, AdapterError> {
        let response: TranslateResponse = self
            .post_json(
                "translate",
                &TranslateRequest {
                    text,
                    from: from_lang,
                    to: &self.target_language,
                },
            )
            .await?;
        Ok(response.translated_text)
    }

    async fn locate_image(&self, image_url: &str) -> Result<Option<String>, AdapterError> {
        let response: ImageLocationResponse = self
            .post_json("image-location", &ImageLocationRequest { url: image_url })
            .await?;
        Ok(response.location.filter(|l| !l.trim().is_empty()))
    }
}
