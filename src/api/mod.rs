//! JSON-RPC access to the cluster management API.
//!
//! [`Transport`] moves one request to an endpoint and back, retrying what
//! [`classify`] marks as transient. [`ApiClient`] layers one typed function
//! per API method on top, choosing payload shapes by cluster version.

pub mod classify;
pub mod client;
pub mod transport;
pub mod types;

pub use classify::{classify, FailureKind, NetworkFailure, RetryClass};
pub use client::ApiClient;
pub use transport::{HttpTransport, Transport};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Port the per-node API listens on.
pub const NODE_API_PORT: u16 = 442;

/// API version as `major.minor`, ordered numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "String")]
pub struct ApiVersion {
    pub major: u16,
    pub minor: u16,
}

impl ApiVersion {
    pub const V1_0: ApiVersion = ApiVersion::new(1, 0);
    pub const V4_0: ApiVersion = ApiVersion::new(4, 0);
    pub const V5_0: ApiVersion = ApiVersion::new(5, 0);
    pub const V6_0: ApiVersion = ApiVersion::new(6, 0);
    pub const V7_0: ApiVersion = ApiVersion::new(7, 0);
    pub const V8_0: ApiVersion = ApiVersion::new(8, 0);
    pub const V9_0: ApiVersion = ApiVersion::new(9, 0);

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Parse a version from the JSON the cluster returns, either `"9.0"` or `9.0`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.to_string().parse().ok(),
            _ => None,
        }
    }
}

impl Default for ApiVersion {
    fn default() -> Self {
        Self::V5_0
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ApiVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (major, minor) = s.split_once('.').unwrap_or((s, "0"));
        let parse = |part: &str| {
            part.parse::<u16>()
                .map_err(|_| Error::argument(format!("'{}' is not a valid API version", s)))
        };
        Ok(Self::new(parse(major)?, parse(minor)?))
    }
}

impl TryFrom<Value> for ApiVersion {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(&value).ok_or_else(|| Error::argument(format!("'{}' is not a valid API version", value)))
    }
}

impl From<ApiVersion> for String {
    fn from(version: ApiVersion) -> Self {
        version.to_string()
    }
}

/// Where API requests go: the cluster MVIP or a single node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
}

impl Endpoint {
    /// The cluster-wide endpoint at `https://<mvip>`.
    pub fn cluster(host: impl Into<String>) -> Self {
        Self {
            scheme: "https".to_string(),
            host: host.into(),
            port: None,
        }
    }

    /// A per-node endpoint at `https://<ip>:442`.
    pub fn node(host: impl Into<String>) -> Self {
        Self {
            scheme: "https".to_string(),
            host: host.into(),
            port: Some(NODE_API_PORT),
        }
    }

    /// Endpoint from a base URL such as `http://127.0.0.1:8080`.
    pub fn from_url(value: &str) -> Result<Self> {
        let parsed = url::Url::parse(value).map_err(|e| Error::argument(format!("invalid URL '{}': {}", value, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::argument(format!("URL '{}' has no host", value)))?;
        Ok(Self {
            scheme: parsed.scheme().to_string(),
            host: host.to_string(),
            port: parsed.port(),
        })
    }

    /// Same host and scheme, node API port.
    pub fn to_node(&self, host: impl Into<String>) -> Self {
        Self {
            scheme: self.scheme.clone(),
            host: host.into(),
            port: Some(NODE_API_PORT),
        }
    }

    pub fn base(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.scheme, self.host, port),
            None => format!("{}://{}", self.scheme, self.host),
        }
    }

    /// JSON-RPC URL for `version`.
    pub fn url(&self, version: ApiVersion) -> String {
        format!("{}/json-rpc/{}", self.base(), version)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => f.write_str(&self.host),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_version_parse_and_order() {
        let v: ApiVersion = "8.4".parse().unwrap();
        assert_eq!(v, ApiVersion::new(8, 4));
        assert!(ApiVersion::V9_0 > v);
        assert!(v > ApiVersion::V8_0);
        assert_eq!(ApiVersion::from_value(&json!(9.0)), Some(ApiVersion::V9_0));
        assert_eq!(ApiVersion::from_value(&json!("7")), Some(ApiVersion::V7_0));
        assert_eq!(ApiVersion::from_value(&json!(null)), None);
        assert!("nine".parse::<ApiVersion>().is_err());
        assert_eq!(ApiVersion::V6_0.to_string(), "6.0");
    }

    #[test]
    fn test_endpoint_urls() {
        assert_eq!(Endpoint::cluster("10.1.1.1").url(ApiVersion::V9_0), "https://10.1.1.1/json-rpc/9.0");
        assert_eq!(Endpoint::node("10.1.1.5").url(ApiVersion::V5_0), "https://10.1.1.5:442/json-rpc/5.0");

        let local = Endpoint::from_url("http://127.0.0.1:8080").unwrap();
        assert_eq!(local.base(), "http://127.0.0.1:8080");
        assert_eq!(local.to_string(), "127.0.0.1:8080");
        assert_eq!(local.to_node("127.0.0.2").base(), "http://127.0.0.2:442");
        assert!(Endpoint::from_url("not a url").is_err());
    }
}
