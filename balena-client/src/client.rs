//! HTTP implementation of [`FleetApi`] over the balena OData API.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::api::FleetApi;
use crate::error::{ClientError, Result};
use crate::model::{Application, Device, ODataResponse, Release};

/// OData API version prefix.
const API_VERSION: &str = "v6";

const APPLICATION_FIELDS: &str = "id,app_name";
const DEVICE_FIELDS: &str =
    "uuid,belongs_to__application,is_running__release,memory_usage,status,overall_status";
const RELEASE_FIELDS: &str = "id,commit,created_at";

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

/// Client for a balenaCloud or openBalena API server.
#[derive(Debug, Clone)]
pub struct BalenaClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BalenaClient {
    /// Create an unauthenticated client for `base_url`
    /// (e.g. `https://api.balena-cloud.com`).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Use an existing API token instead of logging in.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// The API base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange username and password for a session token.
    ///
    /// The token is kept for the lifetime of the client and never refreshed.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let url = format!("{}/login_", self.base_url);

        let response = self
            .http
            .post(&url)
            .json(&Credentials { username, password })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Login(format!("{} returned HTTP {}", url, status)));
        }

        let token = response.text().await?.trim().to_string();
        if token.is_empty() {
            return Err(ClientError::Login("empty token in response".to_string()));
        }

        info!(base_url = %self.base_url, username, "Logged in to fleet API");
        self.token = Some(token);
        Ok(())
    }

    fn resource_url(&self, resource: &str, fields: &str) -> String {
        format!(
            "{}/{}/{}?$select={}",
            self.base_url, API_VERSION, resource, fields
        )
    }

    async fn get_collection<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let mut request = self.http.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body: ODataResponse<T> = response.json().await?;
        debug!(url, count = body.d.len(), "Fetched collection");
        Ok(body.d)
    }
}

impl FleetApi for BalenaClient {
    async fn applications(&self) -> Result<Vec<Application>> {
        let url = self.resource_url("application", APPLICATION_FIELDS);
        self.get_collection(&url).await
    }

    async fn devices(&self) -> Result<Vec<Device>> {
        let url = self.resource_url("device", DEVICE_FIELDS);
        self.get_collection(&url).await
    }

    async fn release(&self, id: u64) -> Result<Release> {
        let url = self.resource_url(&format!("release({})", id), RELEASE_FIELDS);
        self.get_collection::<Release>(&url)
            .await?
            .into_iter()
            .next()
            .ok_or(ClientError::ReleaseNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_url_without_scheme() {
        let result = BalenaClient::new("api.balena-cloud.com", Duration::from_secs(5));
        assert!(matches!(result, Err(ClientError::InvalidUrl(_))));
    }

    #[test]
    fn test_trims_trailing_slash() {
        let client = BalenaClient::new("https://api.example.com/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "https://api.example.com");
    }

    #[test]
    fn test_resource_url() {
        let client = BalenaClient::new("https://api.example.com", Duration::from_secs(5)).unwrap();

        assert_eq!(
            client.resource_url("application", APPLICATION_FIELDS),
            "https://api.example.com/v6/application?$select=id,app_name"
        );
        assert_eq!(
            client.resource_url("release(42)", RELEASE_FIELDS),
            "https://api.example.com/v6/release(42)?$select=id,commit,created_at"
        );
    }
}
