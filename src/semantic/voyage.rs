use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::semantic::embeddings::{EmbeddingError, EmbeddingProvider};

pub const VOYAGE_API_BASE: &str = "https://api.voyageai.com/v1";

/// Voyage AI embeddings over the blocking HTTP client.
///
/// One call is one HTTP request; retries are the caller's business.
pub struct VoyageProvider {
    client: reqwest::blocking::Client,
    api_base: String,
    api_key: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl VoyageProvider {
    pub fn new(api_base: &str, api_key: &str, timeout: Duration) -> Result<Self, EmbeddingError> {
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::MissingApiKey);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

/// Vectors in request order. Items without an `index` keep their response position.
fn into_vectors(response: EmbeddingResponse) -> Vec<Vec<f32>> {
    let mut items: Vec<(usize, Vec<f32>)> = response
        .data
        .into_iter()
        .enumerate()
        .map(|(pos, item)| (item.index.unwrap_or(pos), item.embedding))
        .collect();
    items.sort_by_key(|(index, _)| *index);
    items.into_iter().map(|(_, v)| v).collect()
}

impl EmbeddingProvider for VoyageProvider {
    fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let url = format!("{}/embeddings", self.api_base);
        log::debug!("POST {url} model={model} inputs={}", texts.len());

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest { model, input: texts })
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response.json()?;
        Ok(into_vectors(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_sorted_by_index() {
        let json = r#"{
            "object": "list",
            "data": [
                {"object": "embedding", "embedding": [0.2, 0.2], "index": 1},
                {"object": "embedding", "embedding": [0.1, 0.1], "index": 0}
            ],
            "model": "voyage-3.5",
            "usage": {"total_tokens": 10}
        }"#;
        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(into_vectors(parsed), vec![vec![0.1, 0.1], vec![0.2, 0.2]]);
    }

    #[test]
    fn test_response_without_index_keeps_order() {
        let json = r#"{"data": [{"embedding": [1.0]}, {"embedding": [2.0]}]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(into_vectors(parsed), vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_blank_key_rejected() {
        let result = VoyageProvider::new(VOYAGE_API_BASE, "  ", Duration::from_secs(5));
        assert!(matches!(result, Err(EmbeddingError::MissingApiKey)));
    }
}
