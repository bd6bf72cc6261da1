//! Shorts provider client: candidate search.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use reel_models::Candidate;

use crate::error::ClientResult;
use crate::poll::{submit_and_poll, TaskContract};

/// Searches the shorts catalogue for candidate clips.
#[async_trait]
pub trait ShortsProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> ClientResult<Vec<Candidate>>;
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    clip_id: String,
    #[serde(default)]
    title: Option<String>,
    duration: f64,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    fps: Option<f64>,
}

/// HTTP shorts provider.
pub struct HttpShortsProvider {
    client: Client,
    contract: TaskContract,
}

impl HttpShortsProvider {
    pub fn new(contract: TaskContract) -> Self {
        Self {
            client: Client::new(),
            contract,
        }
    }

    pub fn from_env() -> ClientResult<Self> {
        Ok(Self::new(TaskContract::from_env(
            "SHORTS_PROVIDER_URL",
            "shorts-provider",
        )?))
    }
}

#[async_trait]
impl ShortsProvider for HttpShortsProvider {
    async fn search(&self, query: &str, max_results: usize) -> ClientResult<Vec<Candidate>> {
        let request = SearchRequest { query, max_results };
        let result: SearchResult =
            submit_and_poll(&self.client, &self.contract, "/v1/search", &request).await?;

        info!(query, found = result.results.len(), "Candidate search finished");

        Ok(result
            .results
            .into_iter()
            .map(|hit| Candidate {
                clip_id: hit.clip_id,
                title: hit.title,
                duration: hit.duration,
                path: None,
                width: hit.width,
                height: hit.height,
                fps: hit.fps,
            })
            .collect())
    }
}
