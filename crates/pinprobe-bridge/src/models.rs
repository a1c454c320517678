//! Boundary models
//!
//! Arguments arrive as untyped JSON maps; they are parsed here into the
//! validated harness types.

use crate::{BridgeError, Result};
use pinprobe_core::{PinningConfigRequest, StackName};
use pinprobe_net::HttpRequest;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

/// Methods the bridge answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Replace the pinning configuration
    SetGlobalPinningConfig,
    /// Read the pinning configuration
    GetGlobalPinningConfig,
    /// Whether the engine stack can pin
    IsEnginePinningSupported,
    /// Run a request on one stack
    Request(StackName),
}

impl FromStr for Method {
    type Err = BridgeError;

    fn from_str(name: &str) -> Result<Self> {
        let method = match name {
            "setGlobalPinningConfig" => Method::SetGlobalPinningConfig,
            "getGlobalPinningConfig" => Method::GetGlobalPinningConfig,
            "isEnginePinningSupported" | "isCronetPinningSupported" => Method::IsEnginePinningSupported,
            "platformRequest" | "androidHttpURLConnection" => Method::Request(StackName::Platform),
            "pooledRequest" | "androidOkHttp" => Method::Request(StackName::Pooled),
            "engineRequest" | "androidCronet" => Method::Request(StackName::Engine),
            "externalRequest" | "androidNativeCurl" => Method::Request(StackName::External),
            other => return Err(BridgeError::NotImplemented(other.to_string())),
        };
        Ok(method)
    }
}

/// Request arguments
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestArgs {
    /// HTTP method, `GET` when absent
    #[serde(default)]
    pub method: Option<String>,
    /// Absolute URL
    #[serde(default)]
    pub url: Option<String>,
    /// Header map; non-string values are rejected
    #[serde(default)]
    pub headers: Option<serde_json::Map<String, Value>>,
    /// Body
    #[serde(default)]
    pub body: Option<String>,
    /// Timeout in milliseconds, 0 or absent for the default
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RequestArgs {
    /// Parse from an argument map
    pub fn from_value(args: Value) -> Result<Self> {
        match args {
            Value::Null => Ok(Self::default()),
            Value::Object(_) => Ok(serde_json::from_value(args)?),
            other => Err(BridgeError::InvalidArguments(format!(
                "Request arguments must be a map, got {}",
                other
            ))),
        }
    }

    /// Validated request
    pub fn into_request(self) -> std::result::Result<HttpRequest, pinprobe_net::Error> {
        let url = self
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| pinprobe_net::Error::InvalidRequest("Missing url".to_string()))?;
        let method = self.method.unwrap_or_else(|| "GET".to_string());
        let mut request = HttpRequest::new(&method, &url, self.timeout_ms.unwrap_or(0))?;
        for (name, value) in self.headers.unwrap_or_default() {
            let Value::String(value) = value else {
                return Err(pinprobe_net::Error::InvalidRequest(format!(
                    "Header '{}' must be a string",
                    name
                )));
            };
            request = request.with_header(&name, &value)?;
        }
        if let Some(body) = self.body {
            request = request.with_body(body);
        }
        Ok(request)
    }
}

/// Configuration arguments: `{pinning: {...}}` or the inner map itself
pub fn config_request(args: Value) -> Result<PinningConfigRequest> {
    let inner = match args {
        Value::Object(mut map) => match map.remove("pinning") {
            Some(pinning) => pinning,
            None => Value::Object(map),
        },
        Value::Null => {
            return Err(BridgeError::InvalidArguments(
                "Missing pinning configuration".to_string(),
            ))
        }
        other => {
            return Err(BridgeError::InvalidArguments(format!(
                "Pinning configuration must be a map, got {}",
                other
            )))
        }
    };
    if !inner.is_object() {
        return Err(BridgeError::InvalidArguments(
            "Pinning configuration must be a map".to_string(),
        ));
    }
    Ok(serde_json::from_value(inner)?)
}
