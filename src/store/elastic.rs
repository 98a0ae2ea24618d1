//! Ingested-document index in Elasticsearch.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{DocumentStore, IngestedDocument};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

/// `_bulk` body: an `index` action line followed by the source line.
fn bulk_body(project_id: &str, documents: &[IngestedDocument]) -> Result<String> {
    let ingested_at = Utc::now().to_rfc3339();
    let mut body = String::new();
    for document in documents {
        body.push_str(&serde_json::to_string(&json!({ "index": {} }))?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&json!({
            "document_id": document.document_id,
            "project_id": project_id,
            "title": document.title,
            "ingested_at": ingested_at,
        }))?);
        body.push('\n');
    }
    Ok(body)
}

/// Document store backed by an Elasticsearch index.
#[derive(Debug, Clone)]
pub struct ElasticDocumentStore {
    http: Client,
    base_url: String,
    index: String,
    credentials: Option<(String, String)>,
}

impl ElasticDocumentStore {
    pub fn new(base_url: &str, index: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent("knowledge_builder/0.1.0")
            .build()
            .map_err(|e| Error::InvalidArgument(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
            credentials: None,
        })
    }

    /// Use HTTP basic auth.
    pub fn with_credentials(mut self, user: &str, password: &str) -> Self {
        self.credentials = Some((user.to_string(), password.to_string()));
        self
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self
            .http
            .post(format!("{}/{}/{}", self.base_url, self.index, path));
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }
}

#[async_trait]
impl DocumentStore for ElasticDocumentStore {
    async fn exists(&self, document_id: &str, project_id: &str) -> Result<bool> {
        let body = json!({
            "query": {
                "bool": {
                    "must": [
                        { "term": { "document_id.keyword": document_id } },
                        { "term": { "project_id.keyword": project_id } }
                    ]
                }
            }
        });

        let response = self
            .post("_count")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Elasticsearch request failed: {}", e)))?;

        let status = response.status();
        // Index not created yet.
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let text = response
            .text()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Failed to read response: {}", e)))?;
        if !status.is_success() {
            return Err(Error::StoreUnavailable(format!(
                "Elasticsearch error {}: {}",
                status, text
            )));
        }

        let count: CountResponse = serde_json::from_str(&text)
            .map_err(|e| Error::StoreUnavailable(format!("Invalid count response: {}", e)))?;
        debug!("Document {} in {}: {} hits", document_id, self.index, count.count);
        Ok(count.count > 0)
    }

    async fn record_all(&self, project_id: &str, documents: &[IngestedDocument]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let body = bulk_body(project_id, documents)?;

        let response = self
            .post("_bulk?refresh=wait_for")
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Elasticsearch request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Failed to read response: {}", e)))?;
        if !status.is_success() {
            return Err(Error::StoreUnavailable(format!(
                "Elasticsearch error {}: {}",
                status, text
            )));
        }

        let bulk: BulkResponse = serde_json::from_str(&text)
            .map_err(|e| Error::StoreUnavailable(format!("Invalid bulk response: {}", e)))?;
        if bulk.errors {
            let failed = bulk
                .items
                .iter()
                .filter(|item| item["index"]["error"].is_object())
                .count();
            return Err(Error::StoreUnavailable(format!(
                "Elasticsearch rejected {} of {} documents",
                failed,
                documents.len()
            )));
        }
        info!("Recorded {} documents in {}", documents.len(), self.index);
        Ok(())
    }
}
