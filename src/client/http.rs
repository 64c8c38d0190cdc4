use async_trait::async_trait;
use digest_auth::{AuthContext, WwwAuthenticateHeader};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};
use url::Url;

use super::{DeviceTransport, Endpoint};
use crate::config::DeviceConfig;
use crate::errors::{AppError, AppResult, DeviceError, DeviceResult};

/// Digest-authenticated JSON client for one device
pub struct DeviceHttpClient {
    client: Client,
    base_url: Url,
    username: String,
    password: String,
    /// Last challenge seen, reused so steady-state requests skip the 401 round trip
    challenge: Mutex<Option<WwwAuthenticateHeader>>,
}

/// Base URL for a configured host, defaulting to plain http
pub fn base_url(host: &str) -> AppResult<Url> {
    let host = host.trim().trim_end_matches('/');
    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    };
    Url::parse(&with_scheme)
        .map_err(|e| AppError::configuration(format!("Invalid device host '{host}': {e}")))
}

impl DeviceHttpClient {
    pub fn new(config: &DeviceConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url(&config.host)?,
            username: config.username.clone(),
            password: config.password.clone(),
            challenge: Mutex::new(None),
        })
    }

    /// Authorization header for the cached challenge, if any
    async fn authorization(&self, uri: &str) -> DeviceResult<Option<String>> {
        let mut challenge = self.challenge.lock().await;
        let Some(header) = challenge.as_mut() else {
            return Ok(None);
        };
        let context = AuthContext::new(self.username.as_str(), self.password.as_str(), uri);
        header
            .respond(&context)
            .map(|answer| Some(answer.to_header_string()))
            .map_err(|e| DeviceError::unexpected(uri, format!("Digest response failed: {e}")))
    }

    async fn send(&self, endpoint: Endpoint) -> DeviceResult<Response> {
        let path = endpoint.path();
        let url = self
            .base_url
            .join(path)
            .map_err(|e| DeviceError::unexpected(path, e.to_string()))?;

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(authorization) = self.authorization(path).await? {
            request = request.header(AUTHORIZATION, authorization);
        }

        request.send().await.map_err(|e| classify_transport(path, &e))
    }

    /// Store the challenge from a 401, false when it carries no usable one
    async fn accept_challenge(&self, response: &Response) -> bool {
        let parsed = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.trim_start().to_ascii_lowercase().starts_with("digest"))
            .and_then(|v| digest_auth::parse(v).ok());
        match parsed {
            Some(header) => {
                *self.challenge.lock().await = Some(header);
                true
            }
            None => false,
        }
    }
}

fn classify_transport(endpoint: &str, err: &reqwest::Error) -> DeviceError {
    if err.is_timeout() {
        DeviceError::timeout(endpoint)
    } else if err.is_connect() {
        DeviceError::unreachable(endpoint, err.to_string())
    } else {
        DeviceError::unexpected(endpoint, err.to_string())
    }
}

#[async_trait]
impl DeviceTransport for DeviceHttpClient {
    async fn get_json(&self, endpoint: Endpoint) -> DeviceResult<Value> {
        let path = endpoint.path();
        let mut response = self.send(endpoint).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if !self.accept_challenge(&response).await {
                warn!("401 from {} without a digest challenge", path);
                return Err(DeviceError::auth_failed(path));
            }
            debug!("Answering digest challenge for {}", path);
            response = self.send(endpoint).await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                // credentials were rejected, a fresh challenge is needed next time
                *self.challenge.lock().await = None;
                return Err(DeviceError::auth_failed(path));
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(DeviceError::from_status(path, status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| classify_transport(path, &e))?;
        trace!("{} returned {} bytes", path, body.len());
        serde_json::from_slice(&body).map_err(|e| DeviceError::malformed(path, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_adds_scheme() {
        assert_eq!(base_url("192.168.1.76").unwrap().as_str(), "http://192.168.1.76/");
        assert_eq!(
            base_url("https://energyme.local:8443/").unwrap().as_str(),
            "https://energyme.local:8443/"
        );
    }

    #[test]
    fn test_join_keeps_api_path() {
        let base = base_url("energyme.local:8080").unwrap();
        assert_eq!(
            base.join(Endpoint::SystemInfo.path()).unwrap().as_str(),
            "http://energyme.local:8080/api/v1/system/info"
        );
    }

    #[test]
    fn test_invalid_host_is_configuration_error() {
        assert!(matches!(
            base_url("http://exa mple"),
            Err(AppError::Configuration { .. })
        ));
    }
}
