use std::marker::PhantomData;

use async_trait::async_trait;
use live_scan_common::config::ClassifierConfig;
use live_scan_common::frame::EncodedImage;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{Classifier, ClassifyError};

/// Classifier backed by an HTTP endpoint.
///
/// The JPEG is POSTed as the raw request body. The endpoint answers with the
/// domain's JSON payload, or with an object carrying an `"error"` member when
/// it refuses the image.
pub struct HttpClassifier<T> {
    name: String,
    endpoint: String,
    client: reqwest::Client,
    _output: PhantomData<fn() -> T>,
}

impl<T> HttpClassifier<T> {
    pub fn new(name: &str, config: &ClassifierConfig) -> Result<Self, ClassifyError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ClassifyError::Transport(e.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            endpoint: config.endpoint.clone(),
            client,
            _output: PhantomData,
        })
    }
}

#[async_trait]
impl<T> Classifier for HttpClassifier<T>
where
    T: DeserializeOwned + Clone + Send + Sync + std::fmt::Debug + 'static,
{
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn classify(&self, image: EncodedImage) -> Result<T, ClassifyError> {
        debug!(
            classifier = %self.name,
            endpoint = %self.endpoint,
            bytes = image.len(),
            "posting frame to classifier"
        );
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, image.content_type())
            .body(image.bytes)
            .send()
            .await
            .map_err(|e| ClassifyError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ClassifyError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(match error_message(&body) {
                Some(message) => ClassifyError::Rejected(message),
                None => ClassifyError::Transport(format!("HTTP status {}", status.as_u16())),
            });
        }
        parse_response(&body)
    }
}

/// Decode a classifier response body into the domain payload.
pub fn parse_response<T: DeserializeOwned>(body: &[u8]) -> Result<T, ClassifyError> {
    if let Some(message) = error_message(body) {
        return Err(ClassifyError::Rejected(message));
    }
    serde_json::from_slice(body).map_err(|e| ClassifyError::Malformed(e.to_string()))
}

/// The `"error"` member of a JSON object body, if present and non-null.
fn error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    match value.get("error")? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
