//! Thin client for the managed instance's admin API.
//!
//! Child controllers use this to submit dashboards and notification
//! channels to a running instance. All writes are keyed by a stable natural
//! uid, so every submission is create-or-update: an entity created
//! out-of-band under the same uid is overwritten, never duplicated.
//!
//! Deletes tolerate 404 so that removal is idempotent across retries.

use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

/// Errors from the admin API client
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (connect, timeout, TLS)
    #[error("admin api transport error: {source}")]
    Transport {
        /// Underlying reqwest error
        #[from]
        source: reqwest::Error,
    },

    /// Non-success HTTP status from the admin API
    #[error("admin api returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// The entity payload could not be prepared for submission
    #[error("invalid payload: {message}")]
    Payload {
        /// What was wrong with the payload
        message: String,
    },
}

/// Result alias for admin API operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Basic-auth credentials for the admin API
#[derive(Clone, Debug)]
pub struct Credentials {
    /// Admin user name
    pub username: String,
    /// Admin password
    pub password: String,
}

/// Client for one instance's admin API.
#[derive(Clone, Debug)]
pub struct AdminApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl AdminApiClient {
    /// Build a client for the given base URL with a per-request timeout.
    pub fn new(base_url: impl Into<String>, credentials: Credentials, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Create or update a dashboard under the given uid.
    ///
    /// The uid is forced into the document before submission so the instance
    /// treats repeated posts as updates of the same dashboard.
    pub async fn apply_dashboard(
        &self,
        uid: &str,
        mut dashboard: Value,
        folder: Option<&str>,
    ) -> Result<()> {
        let obj = dashboard
            .as_object_mut()
            .ok_or_else(|| ClientError::Payload {
                message: "dashboard document must be a JSON object".to_string(),
            })?;
        obj.insert("uid".to_string(), Value::String(uid.to_string()));

        let mut body = json!({
            "dashboard": dashboard,
            "overwrite": true,
        });
        if let Some(folder) = folder {
            body["folderTitle"] = Value::String(folder.to_string());
        }

        debug!(uid, "submitting dashboard");
        let response = self
            .http
            .post(format!("{}/api/dashboards/db", self.base_url))
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .json(&body)
            .send()
            .await?;
        Self::expect_success(response).await
    }

    /// Delete a dashboard by uid; absence is not an error.
    pub async fn delete_dashboard(&self, uid: &str) -> Result<()> {
        debug!(uid, "deleting dashboard");
        let response = self
            .http
            .delete(format!("{}/api/dashboards/uid/{uid}", self.base_url))
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await?;
        Self::expect_success_or_missing(response).await
    }

    /// Create or update a notification channel under the given uid.
    ///
    /// Tries an update first; a 404 means the channel does not exist yet
    /// and degrades to a create. A create that races an out-of-band
    /// creation is retried as an update on the next cycle.
    pub async fn apply_channel(&self, uid: &str, mut channel: Value) -> Result<()> {
        let obj = channel.as_object_mut().ok_or_else(|| ClientError::Payload {
            message: "channel document must be a JSON object".to_string(),
        })?;
        obj.insert("uid".to_string(), Value::String(uid.to_string()));

        debug!(uid, "submitting notification channel");
        let update = self
            .http
            .put(format!("{}/api/alert-notifications/uid/{uid}", self.base_url))
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .json(&channel)
            .send()
            .await?;

        if update.status().as_u16() == 404 {
            let create = self
                .http
                .post(format!("{}/api/alert-notifications", self.base_url))
                .basic_auth(&self.credentials.username, Some(&self.credentials.password))
                .json(&channel)
                .send()
                .await?;
            return Self::expect_success(create).await;
        }
        Self::expect_success(update).await
    }

    /// Delete a notification channel by uid; absence is not an error.
    pub async fn delete_channel(&self, uid: &str) -> Result<()> {
        debug!(uid, "deleting notification channel");
        let response = self
            .http
            .delete(format!("{}/api/alert-notifications/uid/{uid}", self.base_url))
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await?;
        Self::expect_success_or_missing(response).await
    }

    /// Probe the instance's health endpoint.
    pub async fn health(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/api/health", self.base_url))
            .send()
            .await?;
        Self::expect_success(response).await
    }

    async fn expect_success(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status {
            status: status.as_u16(),
            body: truncate(&body, 256),
        })
    }

    async fn expect_success_or_missing(response: reqwest::Response) -> Result<()> {
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        Self::expect_success(response).await
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{basic_auth, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn creds() -> Credentials {
        Credentials {
            username: "admin".to_string(),
            password: "admin".to_string(),
        }
    }

    fn client(server: &MockServer) -> AdminApiClient {
        AdminApiClient::new(server.uri(), creds(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn dashboard_submission_forces_uid_and_overwrite() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/dashboards/db"))
            .and(basic_auth("admin", "admin"))
            .and(body_partial_json(json!({
                "overwrite": true,
                "dashboard": { "uid": "monitoring-latency", "title": "Latency" }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .apply_dashboard("monitoring-latency", json!({ "title": "Latency" }), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dashboard_must_be_an_object() {
        let server = MockServer::start().await;
        let err = client(&server)
            .apply_dashboard("uid", json!([1, 2, 3]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Payload { .. }));
    }

    #[tokio::test]
    async fn channel_update_falls_back_to_create_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/alert-notifications/uid/monitoring-pager"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/alert-notifications"))
            .and(body_partial_json(json!({ "uid": "monitoring-pager" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .apply_channel("monitoring-pager", json!({ "name": "pager" }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn deletes_tolerate_missing_entities() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/dashboards/uid/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        client(&server).delete_dashboard("gone").await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/dashboards/db"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client(&server)
            .apply_dashboard("uid", json!({}), None)
            .await
            .unwrap_err();
        match err {
            ClientError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected status error, got {other}"),
        }
    }
}
