//! PostgREST-style record store (`/rest/v1/<table>?id=eq.<id>`).

use super::RecordStore;
use crate::config::PipelineConfig;
use crate::error::StoreError;
use crate::job::Fields;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const BODY_LIMIT: usize = 500;

/// Record store speaking the PostgREST dialect (Supabase and friends).
#[derive(Debug, Clone)]
pub struct PostgrestRecordStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl PostgrestRecordStore {
    /// `base_url` is the project root, e.g. `https://xyz.supabase.co`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Like [`new`](Self::new), with the timeout from `config.http_timeout_secs`.
    pub fn from_config(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        config: &PipelineConfig,
    ) -> Result<Self, StoreError> {
        Self::new(base_url, api_key, config.http_timeout())
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn select(&self, table: &str, id: &str, columns: &str) -> Result<Vec<Value>, StoreError> {
        let request = self
            .client
            .get(self.table_url(table))
            .query(&[("id", format!("eq.{id}")), ("select", columns.to_string())]);
        let response = check(self.authorized(request).send().await?).await?;

        match response.json::<Value>().await? {
            Value::Array(rows) => Ok(rows),
            other => Err(StoreError::Decode(format!(
                "expected an array of rows, got {}",
                truncate(&other.to_string())
            ))),
        }
    }
}

#[async_trait]
impl RecordStore for PostgrestRecordStore {
    async fn exists(&self, table: &str, id: &str) -> Result<bool, StoreError> {
        let rows = self.select(table, id, "id").await?;
        debug!("exists({table}, {id}) -> {}", !rows.is_empty());
        Ok(!rows.is_empty())
    }

    async fn update(&self, table: &str, id: &str, fields: &Fields) -> Result<(), StoreError> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=minimal")
            .json(fields);
        check(self.authorized(request).send().await?).await?;
        debug!("update({table}, {id}) wrote {} fields", fields.len());
        Ok(())
    }

    async fn read(&self, table: &str, id: &str) -> Result<Option<Fields>, StoreError> {
        let rows = self.select(table, id, "*").await?;
        match rows.into_iter().next() {
            None => Ok(None),
            Some(Value::Object(fields)) => Ok(Some(fields)),
            Some(other) => Err(StoreError::Decode(format!(
                "expected a row object, got {}",
                truncate(&other.to_string())
            ))),
        }
    }
}

/// Turn a non-success response into [`StoreError::Status`].
async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(StoreError::Status {
        status: status.as_u16(),
        body: truncate(&body),
    })
}

fn truncate(s: &str) -> String {
    s.chars().take(BODY_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store(server: &MockServer) -> PostgrestRecordStore {
        PostgrestRecordStore::new(server.uri(), "secret", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn configured_http_timeout_applies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let config = PipelineConfig::builder().http_timeout_secs(1).build().unwrap();
        let s = PostgrestRecordStore::from_config(server.uri(), "secret", &config).unwrap();
        let err = s.exists("pdf_conversions_window", "j").await.unwrap_err();
        assert!(matches!(err, StoreError::Http(ref e) if e.is_timeout()), "{err}");
    }

    #[tokio::test]
    async fn exists_queries_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/pdf_conversions_window"))
            .and(query_param("id", "eq.job-1"))
            .and(query_param("select", "id"))
            .and(header("apikey", "secret"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "job-1" }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/pdf_conversions_window"))
            .and(query_param("id", "eq.nope"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let s = store(&server).await;
        assert!(s.exists("pdf_conversions_window", "job-1").await.unwrap());
        assert!(!s.exists("pdf_conversions_window", "nope").await.unwrap());
    }

    #[tokio::test]
    async fn update_patches_fields() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/pdf_conversions_solar"))
            .and(query_param("id", "eq.j"))
            .and(body_json(json!({ "pdf_status": "processing" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut fields = Fields::new();
        fields.insert("pdf_status".into(), json!("processing"));
        store(&server)
            .await
            .update("pdf_conversions_solar", "j", &fields)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn read_returns_first_row() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/pdf_conversions_roofing"))
            .and(query_param("select", "*"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{ "id": "j", "pdf_status": "ready" }])),
            )
            .mount(&server)
            .await;

        let row = store(&server)
            .await
            .read("pdf_conversions_roofing", "j")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["pdf_status"], "ready");
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = store(&server)
            .await
            .update("t", "j", &Fields::new())
            .await
            .unwrap_err();
        match err {
            StoreError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn non_array_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "oops": true })))
            .mount(&server)
            .await;

        let err = store(&server).await.exists("t", "j").await.unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }
}
