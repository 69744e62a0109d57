use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AnswerError {
    /// Nothing is listening at the configured address.
    #[error("could not connect to answer service: {0}")]
    Unavailable(#[source] reqwest::Error),

    #[error("answer service request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("answer service returned status {0}")]
    Status(u16),

    #[error("answer service returned an unreadable body: {0}")]
    Decode(#[source] reqwest::Error),
}

impl From<AnswerError> for ApiError {
    fn from(err: AnswerError) -> Self {
        let message = err.to_string();
        match err {
            AnswerError::Unavailable(_) => ApiError::UpstreamUnavailable(message),
            _ => ApiError::Internal(message),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnswerRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnswerResponse {
    answer: String,
}

/// Client for the external service that turns a query into an answer.
///
/// No timeout is configured: a service that never responds holds the
/// request open.
#[derive(Clone, Debug)]
pub struct AnswerClient {
    http: reqwest::Client,
    url: String,
}

impl AnswerClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn ask(&self, query: &str) -> Result<String, AnswerError> {
        debug!("POST {} ({} chars)", self.url, query.chars().count());

        let response = self
            .http
            .post(&self.url)
            .json(&AnswerRequest { query })
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    AnswerError::Unavailable(e)
                } else {
                    AnswerError::Request(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnswerError::Status(status.as_u16()));
        }

        let body: AnswerResponse = response.json().await.map_err(AnswerError::Decode)?;
        Ok(body.answer)
    }
}
