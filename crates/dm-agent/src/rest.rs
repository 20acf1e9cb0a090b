//! Platform REST client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use dm_core::traits::{BinaryUpload, NewEvent, PlatformApi, TenantInfo};
use dm_core::{Credentials, RestError};

/// Upper bound on a single request, so an unreachable platform reads as no response
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`PlatformApi`] over HTTP with Basic authentication
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Result<Self, RestError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RestError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send an authenticated request, mapping non-success statuses to errors
    async fn send(&self, request: RequestBuilder) -> Result<Response, RestError> {
        let response = request
            .basic_auth(self.credentials.username(), Some(&self.credentials.password))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| RestError::NoResponse(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RestError::Status {
            status: status.as_u16(),
            message: error_message(&body),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RestError> {
        let response = self.send(self.http.get(self.url(path))).await?;
        decode(response).await
    }
}

#[async_trait]
impl PlatformApi for RestClient {
    async fn current_tenant(&self) -> Result<TenantInfo, RestError> {
        self.get_json("/tenant/currentTenant").await
    }

    async fn managed_object_id(&self, id_type: &str, external_id: &str) -> Result<String, RestError> {
        let body: Value = self
            .get_json(&format!("/identity/externalIds/{}/{}", id_type, external_id))
            .await?;
        string_at(&body, &["managedObject", "id"])
    }

    async fn create_event(&self, event: &NewEvent) -> Result<String, RestError> {
        let response = self
            .send(self.http.post(self.url("/event/events")).json(event))
            .await?;
        let body: Value = decode(response).await?;
        string_at(&body, &["id"])
    }

    async fn upload_event_binary(&self, event_id: &str, upload: BinaryUpload) -> Result<String, RestError> {
        let object = json!({
            "name": upload.file_name,
            "type": upload.content_type,
        });
        let file = Part::bytes(upload.content.to_vec())
            .file_name(upload.file_name.clone())
            .mime_str(&upload.content_type)
            .map_err(|e| RestError::InvalidRequest(e.to_string()))?;
        let form = Form::new().text("object", object.to_string()).part("file", file);

        let url = self.url(&format!("/event/events/{}/binaries", event_id));
        let response = self.send(self.http.post(url).multipart(form)).await?;
        let body: Value = decode(response).await?;
        string_at(&body, &["self"])
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RestError> {
    response
        .json::<T>()
        .await
        .map_err(|e| RestError::UnexpectedResponse(e.to_string()))
}

/// Error text from a platform error body (`{"message": ...}`), else the raw body
fn error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(body) {
        Ok(value) => value
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        Err(_) => Some(body.to_string()),
    }
}

/// String (or number) at a nested path of a JSON document
fn string_at(body: &Value, path: &[&str]) -> Result<String, RestError> {
    let value = path.iter().try_fold(body, |value, key| value.get(*key));
    match value {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(RestError::UnexpectedResponse(format!(
            "missing {} in response",
            path.join(".")
        ))),
    }
}
