use reqwest::StatusCode;

use crate::error::CatalogError;
use crate::model::{TrackNode, valid_catalog_id};

/// Fetch-a-tree capability over the remote catalog. The HTTP client below
/// is the production implementation; tests inject scripted fakes.
#[async_trait::async_trait]
pub trait CatalogFetcher: Send + Sync {
    async fn fetch_tree(&self, id: &str) -> Result<Vec<TrackNode>, CatalogError>;
}

#[derive(Debug, Clone)]
pub struct HttpCatalogClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatalogClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl CatalogFetcher for HttpCatalogClient {
    async fn fetch_tree(&self, id: &str) -> Result<Vec<TrackNode>, CatalogError> {
        if !valid_catalog_id(id) {
            return Err(CatalogError::NotFound(id.to_string()));
        }
        let url = format!("{}/api/tracks/{id}", self.base_url);
        tracing::debug!(%url, "fetching catalog tree");
        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(CatalogError::NotFound(id.to_string())),
            status if !status.is_success() => Err(CatalogError::Status(status)),
            _ => Ok(response.json().await?),
        }
    }
}
