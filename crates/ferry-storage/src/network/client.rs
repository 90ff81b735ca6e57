use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use super::{DurableError, DurableResult, DurableStore, WriteReceipt};

/// Longest slice of an error body kept in error messages.
const MAX_ERROR_BODY: usize = 2048;

/// Publisher answer to `PUT /v1/blobs`.
#[derive(Debug, Deserialize)]
enum StoreResponse {
    #[serde(rename = "newlyCreated")]
    NewlyCreated {
        #[serde(rename = "blobObject")]
        blob_object: BlobObject,
    },
    #[serde(rename = "alreadyCertified")]
    AlreadyCertified {
        #[serde(rename = "blobId")]
        blob_id: String,
        #[serde(default)]
        object: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct BlobObject {
    id: String,
    #[serde(rename = "blobId")]
    blob_id: String,
}

impl From<StoreResponse> for WriteReceipt {
    fn from(response: StoreResponse) -> Self {
        match response {
            StoreResponse::NewlyCreated { blob_object } => WriteReceipt {
                external_id: blob_object.blob_id,
                object_ref: Some(blob_object.id),
            },
            StoreResponse::AlreadyCertified { blob_id, object } => WriteReceipt {
                external_id: blob_id,
                object_ref: object,
            },
        }
    }
}

/// HTTP client for a publisher (writes) and an aggregator (reads).
#[derive(Clone, Debug)]
pub struct HttpNetworkClient {
    client: Client,
    publisher_url: String,
    aggregator_url: String,
    request_timeout: Duration,
}

impl HttpNetworkClient {
    /// `request_timeout` bounds reads and retention extensions. Writes are bounded by
    /// the caller, whose limit scales with the retention requested.
    pub fn new(
        publisher_url: &str,
        aggregator_url: &str,
        request_timeout: Duration,
    ) -> DurableResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                DurableError::Permanent(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            publisher_url: publisher_url.trim_end_matches('/').to_string(),
            aggregator_url: aggregator_url.trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    fn send_error(&self, err: reqwest::Error) -> DurableError {
        if err.is_timeout() {
            DurableError::Timeout(self.request_timeout)
        } else {
            DurableError::Transient(err.to_string())
        }
    }
}

/// Map a non-success status. `missing` is returned for 404.
fn status_error(status: StatusCode, body: &str, missing: DurableError) -> DurableError {
    let body = truncate(body);
    if status == StatusCode::NOT_FOUND {
        missing
    } else if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        DurableError::Transient(format!("status {}: {}", status, body))
    } else {
        DurableError::Permanent(format!("status {}: {}", status, body))
    }
}

fn truncate(body: &str) -> &str {
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[async_trait]
impl DurableStore for HttpNetworkClient {
    async fn write(&self, data: Bytes, retention_units: i32) -> DurableResult<WriteReceipt> {
        let url = format!("{}/v1/blobs", self.publisher_url);
        let size = data.len();
        let start = std::time::Instant::now();

        let response = self
            .client
            .put(&url)
            .query(&[("epochs", retention_units.to_string())])
            .body(data)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DurableError::Transient(format!("Failed to read publisher response: {}", e)))?;

        if !status.is_success() {
            tracing::warn!(
                status = %status,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Durable write rejected by publisher"
            );
            return Err(status_error(
                status,
                &body,
                DurableError::Permanent(format!("publisher endpoint not found: {}", url)),
            ));
        }

        let parsed: StoreResponse = serde_json::from_str(&body).map_err(|e| {
            DurableError::Transient(format!(
                "Unexpected publisher response ({}): {}",
                e,
                truncate(&body)
            ))
        })?;
        let receipt = WriteReceipt::from(parsed);

        tracing::info!(
            external_id = %receipt.external_id,
            size_bytes = size,
            retention_units,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Durable write successful"
        );

        Ok(receipt)
    }

    async fn read(&self, external_id: &str) -> DurableResult<Bytes> {
        let url = format!("{}/v1/blobs/{}", self.aggregator_url, external_id);
        let start = std::time::Instant::now();

        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(
                status,
                &body,
                DurableError::NotYetReplicated(format!("blob {} not available yet", external_id)),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.send_error(e))?;

        tracing::debug!(
            external_id = %external_id,
            size_bytes = bytes.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Durable read successful"
        );

        Ok(bytes)
    }

    async fn extend(&self, object_ref: &str, additional_units: i32) -> DurableResult<()> {
        let url = format!("{}/v1/blobs/{}/extend", self.publisher_url, object_ref);

        let response = self
            .client
            .post(&url)
            .query(&[("epochs", additional_units.to_string())])
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(
                status,
                &body,
                DurableError::Permanent(format!("object {} not found", object_ref)),
            ));
        }

        tracing::info!(
            object_ref = %object_ref,
            additional_units,
            "Durable retention extended"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use std::collections::HashMap;

    const BLOB_ID: &str = "M4hsZGQ1oCktdzegB6HnI6Mi28S2nqOPHxK-W7_4BUk";

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base: &str) -> HttpNetworkClient {
        HttpNetworkClient::new(base, base, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn write_parses_newly_created() {
        let router = Router::new().route(
            "/v1/blobs",
            put(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("epochs").map(String::as_str), Some("3"));
                Json(serde_json::json!({
                    "newlyCreated": {
                        "blobObject": { "id": "0xabc", "blobId": BLOB_ID, "size": 5 },
                        "cost": 100
                    }
                }))
            }),
        );
        let base = spawn(router).await;

        let receipt = client(&base)
            .write(Bytes::from_static(b"hello"), 3)
            .await
            .unwrap();
        assert_eq!(receipt.external_id, BLOB_ID);
        assert_eq!(receipt.object_ref.as_deref(), Some("0xabc"));
    }

    #[tokio::test]
    async fn write_parses_already_certified() {
        let router = Router::new().route(
            "/v1/blobs",
            put(|| async {
                Json(serde_json::json!({
                    "alreadyCertified": { "blobId": BLOB_ID, "endEpoch": 40 }
                }))
            }),
        );
        let base = spawn(router).await;

        let receipt = client(&base)
            .write(Bytes::from_static(b"hello"), 1)
            .await
            .unwrap();
        assert_eq!(receipt.external_id, BLOB_ID);
        assert!(receipt.object_ref.is_none());
    }

    #[tokio::test]
    async fn write_failure_keeps_body_text() {
        let router = Router::new().route(
            "/v1/blobs",
            put(|| async {
                (
                    AxumStatus::GATEWAY_TIMEOUT,
                    format!("timed out waiting for certificate of {}", BLOB_ID),
                )
            }),
        );
        let base = spawn(router).await;

        let err = client(&base)
            .write(Bytes::from_static(b"hello"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DurableError::Transient(_)));
        assert!(err.to_string().contains(BLOB_ID));
    }

    #[tokio::test]
    async fn read_classifies_statuses() {
        let router = Router::new().route(
            "/v1/blobs/{id}",
            get(|Path(id): Path<String>| async move {
                match id.as_str() {
                    "fresh" => (AxumStatus::NOT_FOUND, String::new()),
                    "busy" => (AxumStatus::SERVICE_UNAVAILABLE, "busy".to_string()),
                    "bad" => (AxumStatus::BAD_REQUEST, "invalid blob id".to_string()),
                    _ => (AxumStatus::OK, "payload".to_string()),
                }
            }),
        );
        let base = spawn(router).await;
        let client = client(&base);

        assert!(client.read("fresh").await.unwrap_err().is_not_yet_replicated());
        assert!(matches!(
            client.read("busy").await.unwrap_err(),
            DurableError::Transient(_)
        ));
        let permanent = client.read("bad").await.unwrap_err();
        assert!(!permanent.is_retryable());
        assert_eq!(
            client.read("ok").await.unwrap(),
            Bytes::from_static(b"payload")
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let body = "é".repeat(MAX_ERROR_BODY);
        let cut = truncate(&body);
        assert!(cut.len() <= MAX_ERROR_BODY);
        assert!(body.starts_with(cut));
    }
}
