use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::classifier::Classifier;
use crate::error::ClassifyError;
use crate::settings::ClassifierConfig;

/// HTTP classification backend speaking the Ollama generate API.
///
/// Immutable once built; to change the endpoint or key, construct a new
/// one.
pub struct LlmClassifier {
    client: Client,
    base_url: String,
    model: String,
}

// -- wire types --

#[derive(Serialize)]
struct GenRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenResponse {
    response: Option<String>,
}

impl LlmClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ClassifyError> {
        let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_seconds));

        if let Some(key) = &config.api_key {
            let mut headers = reqwest::header::HeaderMap::new();
            let value = format!("Bearer {}", key)
                .parse()
                .map_err(|_| ClassifyError::Request("api key is not a valid header value".into()))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        let client = builder
            .build()
            .map_err(|e| ClassifyError::Request(e.to_string()))?;

        Ok(LlmClassifier {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

impl Classifier for LlmClassifier {
    async fn classify(&self, prompt: &str) -> Result<String, ClassifyError> {
        let request = GenRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassifyError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let code = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClassifyError::Status { code, body });
        }

        let answer: GenResponse = resp
            .json()
            .await
            .map_err(|e| ClassifyError::Request(format!("malformed response: {}", e)))?;

        match answer.response {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(ClassifyError::EmptyAnswer),
        }
    }
}
