//! reqwest-backed transport

use super::{ApiError, ApiRequest, ApiResponse, Method, Transport};
use crate::config::ClientConfig;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// HTTP transport for the request API
///
/// # Example
///
/// ```rust,no_run
/// use request_desk::{ClientConfig, HttpTransport};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = HttpTransport::new(&ClientConfig {
///     base_url: "https://requests.example.com".into(),
///     ..Default::default()
/// })?;
/// # Ok(())
/// # }
/// ```
pub struct HttpTransport {
    base_url: String,
    client: Client,
}

impl HttpTransport {
    /// Create a new transport from client configuration
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.api_root().to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Patch => self.client.patch(&url),
            Method::Delete => self.client.delete(&url),
        };

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        if let Some(ref credential) = request.credential {
            builder = builder.header(
                header::AUTHORIZATION,
                format!("Bearer {}", credential.expose()),
            );
        }

        tracing::debug!("{} {}", request.method, request.path);
        let response = builder.send().await?;

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let text = response.text().await?;

        if !status.is_success() {
            let body = if text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            };
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))?
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_drops_trailing_slash() {
        let config = ClientConfig {
            base_url: "https://api.example.com/".into(),
            timeout_secs: 5,
            ..Default::default()
        };
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.base_url(), "https://api.example.com");
    }
}
