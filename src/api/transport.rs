//! HTTPS JSON-RPC transport.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use rand::Rng;
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Client;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::classify::{classify, FailureKind, NetworkFailure, RetryClass};
use super::{ApiVersion, Endpoint};
use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::retry::{PredicateRetry, RetryPolicy};

/// Error code reported when the cluster leaves it out.
pub const DEFAULT_ERROR_CODE: i64 = 500;

/// Cookie jar shared by every cookie-enabled transport in the process.
static COOKIE_JAR: Lazy<Arc<Jar>> = Lazy::new(|| Arc::new(Jar::default()));

/// Sends JSON-RPC requests and returns the `result` member of the response.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The endpoint plain [`Transport::call`] goes to.
    fn endpoint(&self) -> &Endpoint;

    /// Call `method` on an explicit endpoint, usually a single node.
    async fn call_at(&self, endpoint: &Endpoint, method: &str, params: Value, version: ApiVersion) -> Result<Value>;

    /// Fetch a report page (`/reports/...`) from the cluster endpoint.
    async fn fetch(&self, path: &str) -> Result<String>;

    /// Call `method` on the cluster endpoint.
    async fn call(&self, method: &str, params: Value, version: ApiVersion) -> Result<Value> {
        let endpoint = self.endpoint().clone();
        self.call_at(&endpoint, method, params, version).await
    }
}

/// One failed attempt, with the decision already made.
#[derive(Debug)]
struct AttemptFailure {
    class: RetryClass,
    error: Error,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

/// [`Transport`] over HTTPS with basic auth.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    endpoint: Endpoint,
    username: String,
    password: String,
    client: Client,
    policy: RetryPolicy,
}

impl HttpTransport {
    pub fn new(endpoint: Endpoint, username: impl Into<String>, password: impl Into<String>, config: &ApiConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(true);
        if config.cookies {
            builder = builder.cookie_provider(COOKIE_JAR.clone());
        }
        let client = builder
            .build()
            .map_err(|e| Error::transport(endpoint.to_string(), format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint,
            username: username.into(),
            password: password.into(),
            client,
            policy: RetryPolicy::constant(config.retries, config.retry_delay),
        })
    }

    /// Replace the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    fn network_failure(&self, endpoint: &Endpoint, method: &str, error: reqwest::Error) -> AttemptFailure {
        let failure = if error.is_timeout() {
            NetworkFailure::TimedOut
        } else {
            NetworkFailure::from_error(&error)
        };
        AttemptFailure {
            class: classify(&FailureKind::Network(failure), method),
            error: Error::transport(endpoint.to_string(), format!("{} calling {}: {}", failure, method, error)),
        }
    }

    async fn attempt(&self, endpoint: &Endpoint, method: &str, params: &Value, version: ApiVersion) -> std::result::Result<Value, AttemptFailure> {
        let id: u32 = rand::thread_rng().gen_range(100..1000);
        let body = json!({ "method": method, "params": params, "id": id });
        debug!("Calling {} on {} with {}", method, endpoint, params);

        let mut response = self
            .client
            .post(endpoint.url(version))
            .basic_auth(&self.username, Some(&self.password))
            .header(CONTENT_TYPE, "application/json-rpc")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| self.network_failure(endpoint, method, e))?;

        let status = response.status();
        if !status.is_success() {
            let kind = FailureKind::Http(status.as_u16());
            let class = classify(&kind, method);
            let error = match (class, status.as_u16()) {
                (RetryClass::Auth, _) => Error::auth(endpoint.to_string(), format!("HTTP {} calling {}", status, method)),
                (_, 404) => Error::api(
                    "xUnknownAPIVersion",
                    format!("API version {} is not supported by {}", version, endpoint),
                    404,
                ),
                _ => Error::transport(endpoint.to_string(), format!("HTTP {} calling {}", status, method)),
            };
            return Err(AttemptFailure { class, error });
        }

        let expected_len = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let mut body = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) => break,
                // The connection dropped before the advertised length arrived
                Err(_) if expected_len.is_some_and(|expected| (body.len() as u64) < expected) => break,
                Err(e) => return Err(self.network_failure(endpoint, method, e)),
            }
        }

        if let Some(expected) = expected_len {
            let received = body.len() as u64;
            if expected != received {
                warn!(
                    "Content-Length mismatch from {} calling {}: expected {} bytes, received {}",
                    endpoint, method, expected, received
                );
                let kind = FailureKind::LengthMismatch { expected, received };
                return Err(AttemptFailure {
                    class: classify(&kind, method),
                    error: Error::transport(endpoint.to_string(), format!("Incomplete response to {}", method)),
                });
            }
        }
        let text = String::from_utf8_lossy(&body);

        let value: Value = serde_json::from_str(&text).map_err(|e| {
            let kind = if text.trim_end().ends_with('}') {
                FailureKind::InvalidJson
            } else {
                FailureKind::TruncatedJson
            };
            AttemptFailure {
                class: classify(&kind, method),
                error: Error::transport(endpoint.to_string(), format!("Invalid JSON in response to {}: {}", method, e)),
            }
        })?;

        parse_response(value, method).map_err(|(name, error)| AttemptFailure {
            class: classify(&FailureKind::Api(name), method),
            error,
        })
    }
}

/// Split a JSON-RPC response into its result or an API error.
fn parse_response(value: Value, method: &str) -> std::result::Result<Value, (String, Error)> {
    let Value::Object(mut map) = value else {
        return Err(("xInvalidResponse".into(), Error::api("xInvalidResponse", format!("Response to {} is not an object", method), DEFAULT_ERROR_CODE)));
    };

    if let Some(error) = map.remove("error") {
        let name = error.get("name").and_then(Value::as_str).unwrap_or("xUnknown").to_string();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or("<empty message>")
            .to_string();
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(DEFAULT_ERROR_CODE);
        return Err((name.clone(), Error::api(name, message, code)));
    }

    match map.remove("result") {
        Some(result) => Ok(result),
        None => Err((
            "xInvalidResponse".into(),
            Error::api("xInvalidResponse", format!("Response to {} has neither result nor error", method), DEFAULT_ERROR_CODE),
        )),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn call_at(&self, endpoint: &Endpoint, method: &str, params: Value, version: ApiVersion) -> Result<Value> {
        let condition = PredicateRetry::new(|failure: &AttemptFailure, _attempt: u32| failure.class == RetryClass::Retry);
        let params = &params;
        self.policy
            .execute(&condition, move || self.attempt(endpoint, method, params, version))
            .await
            .map_err(|e| e.into_inner().error)
    }

    async fn fetch(&self, path: &str) -> Result<String> {
        let url = &format!("{}{}", self.endpoint.base(), path);
        let condition = PredicateRetry::new(|failure: &AttemptFailure, _attempt: u32| failure.class == RetryClass::Retry);
        let outcome = self
            .policy
            .execute(&condition, move || async move {
                debug!("Fetching {}", url);
                let response = self
                    .client
                    .get(url)
                    .basic_auth(&self.username, Some(&self.password))
                    .send()
                    .await
                    .map_err(|e| self.network_failure(&self.endpoint, path, e))?;
                let status = response.status();
                if !status.is_success() {
                    let class = classify(&FailureKind::Http(status.as_u16()), "Get");
                    let error = if class == RetryClass::Auth {
                        Error::auth(self.endpoint.to_string(), format!("HTTP {} fetching {}", status, path))
                    } else {
                        Error::transport(self.endpoint.to_string(), format!("HTTP {} fetching {}", status, path))
                    };
                    return Err(AttemptFailure { class, error });
                }
                response.text().await.map_err(|e| self.network_failure(&self.endpoint, path, e))
            })
            .await;
        outcome.map_err(|e| e.into_inner().error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_result() {
        let value = json!({"id": 1, "result": {"accounts": []}});
        assert_eq!(parse_response(value, "ListAccounts").unwrap(), json!({"accounts": []}));
    }

    #[test]
    fn test_parse_error_defaults() {
        let value = json!({"id": 1, "error": {"name": "xAccountIDDoesNotExist"}});
        let (name, error) = parse_response(value, "RemoveAccount").unwrap_err();
        assert_eq!(name, "xAccountIDDoesNotExist");
        match error {
            Error::Api { name, message, code } => {
                assert_eq!(name, "xAccountIDDoesNotExist");
                assert_eq!(message, "<empty message>");
                assert_eq!(code, 500);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_with_code() {
        let value = json!({"error": {"name": "xDBConnectionLoss", "message": "lost", "code": 503}});
        let (_, error) = parse_response(value, "ListAccounts").unwrap_err();
        assert_eq!(error.to_string(), "xDBConnectionLoss: lost");
    }

    #[test]
    fn test_parse_neither() {
        assert!(parse_response(json!({"id": 3}), "ListAccounts").is_err());
        assert!(parse_response(json!([1, 2]), "ListAccounts").is_err());
    }
}
