//! Qdrant REST client implementing [`VectorIndex`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use intelgraph_shared::{IntelError, Result};

use crate::vector::{ScoredPoint, VectorIndex, VectorPayload, VectorRecord};

const SCROLL_PAGE: usize = 256;

/// Vector index stored in a Qdrant collection (cosine distance).
#[derive(Clone)]
pub struct QdrantIndex {
    client: Client,
    base_url: String,
    collection: String,
    dimensions: usize,
    max_retries: usize,
}

impl std::fmt::Debug for QdrantIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantIndex")
            .field("base_url", &self.base_url)
            .field("collection", &self.collection)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl QdrantIndex {
    pub fn new(base_url: &str, collection: &str, dimensions: usize, timeout: Duration) -> Result<Self> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(IntelError::config(format!(
                "qdrant url must be http(s): {base_url}"
            )));
        }
        if collection.trim().is_empty() {
            return Err(IntelError::config("qdrant collection name is empty"));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntelError::Network(format!("failed to build qdrant client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.trim().to_string(),
            dimensions,
            max_retries: 3,
        })
    }

    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{suffix}", self.base_url, self.collection)
    }

    /// Create the collection if it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<()> {
        if self.call(Method::GET, &self.url(""), None).await?.is_some() {
            return Ok(());
        }
        tracing::info!(
            collection = %self.collection,
            dimensions = self.dimensions,
            "creating qdrant collection"
        );
        let body = json!({ "vectors": { "size": self.dimensions, "distance": "Cosine" } });
        self.call(Method::PUT, &self.url(""), Some(&body))
            .await?
            .ok_or_else(|| IntelError::Storage("qdrant rejected collection create".into()))?;
        Ok(())
    }

    /// Send one request with retries. `Ok(None)` means 404.
    async fn call(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Option<Value>> {
        let mut attempt = 0usize;
        loop {
            let mut request = self.client.request(method.clone(), url);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let value = resp.json::<Value>().await.map_err(|e| {
                            IntelError::parse(format!("bad qdrant response from {url}: {e}"))
                        })?;
                        return Ok(Some(value));
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    let text = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tracing::debug!(%status, attempt, url, "retrying qdrant request");
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(IntelError::Storage(format!(
                        "qdrant request failed ({status}): {text}"
                    )));
                }
                Err(err) => {
                    if (err.is_connect() || err.is_timeout() || err.is_request())
                        && attempt + 1 < self.max_retries
                    {
                        attempt += 1;
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(IntelError::Network(format!("qdrant unreachable: {err}")));
                }
            }
        }
    }

    async fn call_result<T: for<'de> Deserialize<'de>>(&self, method: Method, suffix: &str, body: &Value) -> Result<T> {
        let url = self.url(suffix);
        let value = self
            .call(method, &url, Some(body))
            .await?
            .ok_or_else(|| IntelError::Storage(format!("qdrant collection '{}' not found", self.collection)))?;
        let envelope: Envelope<T> = serde_json::from_value(value)
            .map_err(|e| IntelError::parse(format!("unexpected qdrant response shape: {e}")))?;
        Ok(envelope.result)
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct RetrievedPoint {
    id: Uuid,
    #[serde(default)]
    vector: Option<Vec<f32>>,
    #[serde(default)]
    payload: Option<VectorPayload>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: Uuid,
    score: f32,
    payload: Option<VectorPayload>,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    points: Vec<RetrievedPoint>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn upsert(&self, record: VectorRecord) -> Result<()> {
        if record.vector.len() != self.dimensions {
            return Err(IntelError::validation(format!(
                "vector has {} dimensions, collection expects {}",
                record.vector.len(),
                self.dimensions
            )));
        }
        let body = json!({
            "points": [{
                "id": record.id,
                "vector": record.vector,
                "payload": record.payload,
            }]
        });
        let _: Value = self
            .call_result(Method::PUT, "/points?wait=true", &body)
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<VectorRecord>> {
        let body = json!({ "ids": [id], "with_payload": true, "with_vector": true });
        let points: Vec<RetrievedPoint> = self.call_result(Method::POST, "/points", &body).await?;
        Ok(points.into_iter().find(|p| p.id == id).and_then(|p| {
            Some(VectorRecord {
                id: p.id,
                vector: p.vector?,
                payload: p.payload?,
            })
        }))
    }

    async fn query(&self, vector: &[f32], top_k: usize, threshold: f32) -> Result<Vec<ScoredPoint>> {
        let body = json!({
            "vector": vector,
            "limit": top_k,
            "score_threshold": threshold,
            "with_payload": true,
        });
        let hits: Vec<SearchHit> = self
            .call_result(Method::POST, "/points/search", &body)
            .await?;
        Ok(hits
            .into_iter()
            .filter_map(|h| {
                Some(ScoredPoint {
                    id: h.id,
                    score: h.score,
                    payload: h.payload?,
                })
            })
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        let result: CountResult = self
            .call_result(Method::POST, "/points/count", &json!({ "exact": true }))
            .await?;
        Ok(result.count)
    }

    async fn ids(&self) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        let mut offset: Option<Value> = None;
        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE,
                "with_payload": false,
                "with_vector": false,
            });
            if let Some(offset) = offset.take() {
                body["offset"] = offset;
            }
            let page: ScrollResult = self
                .call_result(Method::POST, "/points/scroll", &body)
                .await?;
            ids.extend(page.points.into_iter().map(|p| p.id));
            match page.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intelgraph_shared::EntityLabel;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn index(server: &MockServer) -> QdrantIndex {
        QdrantIndex::new(&server.uri(), "entities", 2, Duration::from_secs(5)).unwrap()
    }

    fn payload() -> Value {
        json!({ "text": "SpaceX", "label": "organization", "key": "spacex",
                "source_urls": ["https://a.example/"], "job_ids": [] })
    }

    #[test]
    fn rejects_bad_config() {
        assert!(QdrantIndex::new("localhost:6333", "entities", 2, Duration::from_secs(1)).is_err());
        assert!(QdrantIndex::new("http://localhost:6333", " ", 2, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(retry_backoff(1), Duration::from_millis(1000));
        assert_eq!(retry_backoff(5), retry_backoff(9));
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry(StatusCode::BAD_GATEWAY));
        assert!(!should_retry(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn creates_missing_collection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/entities"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/entities"))
            .and(body_partial_json(json!({ "vectors": { "size": 2, "distance": "Cosine" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": true })))
            .expect(1)
            .mount(&server)
            .await;

        index(&server).ensure_collection().await.unwrap();
    }

    #[tokio::test]
    async fn upsert_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/collections/entities/points"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/entities/points"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "result": { "status": "completed" } })),
            )
            .mount(&server)
            .await;

        let record = VectorRecord {
            id: Uuid::from_u128(1),
            vector: vec![1.0, 0.0],
            payload: serde_json::from_value(payload()).unwrap(),
        };
        index(&server).upsert(record).await.unwrap();
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/entities/points/count"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let err = index(&server).count().await.unwrap_err();
        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn search_parses_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/entities/points/search"))
            .and(body_partial_json(json!({ "limit": 3, "with_payload": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [{ "id": Uuid::from_u128(1), "version": 0, "score": 0.93, "payload": payload() }],
                "status": "ok"
            })))
            .mount(&server)
            .await;

        let hits = index(&server).query(&[1.0, 0.0], 3, 0.5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.label, EntityLabel::Organization);
        assert!((hits[0].score - 0.93).abs() < 1e-6);
    }

    #[tokio::test]
    async fn scroll_follows_offsets() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/entities/points/scroll"))
            .and(body_partial_json(json!({ "offset": Uuid::from_u128(2) })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "points": [{ "id": Uuid::from_u128(2) }], "next_page_offset": null }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/collections/entities/points/scroll"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "points": [{ "id": Uuid::from_u128(1) }], "next_page_offset": Uuid::from_u128(2) }
            })))
            .mount(&server)
            .await;

        let ids = index(&server).ids().await.unwrap();
        assert_eq!(ids, vec![Uuid::from_u128(1), Uuid::from_u128(2)]);
    }
}
