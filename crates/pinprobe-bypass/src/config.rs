//! Hook selection

use crate::sockaddr::SockaddrLayout;
use crate::{HookError, Result};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};

/// Intercepting proxy destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    /// IPv4 address; IPv6 destinations are mapped onto it
    pub host: Ipv4Addr,
    /// TCP port
    pub port: u16,
}

impl ProxyEndpoint {
    /// Socket address of the proxy
    pub fn socket_addr(self) -> SocketAddrV4 {
        SocketAddrV4::new(self.host, self.port)
    }
}

/// Which hooks to install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BypassConfig {
    /// Force `UseCredential` on session challenges
    pub accept_all_certs: bool,
    /// Force trust evaluation to succeed
    pub trust_evaluation: bool,
    /// Redirect IP connects to this proxy
    pub redirect: Option<ProxyEndpoint>,
    /// Log which request APIs are called
    pub observe: bool,
    /// `sockaddr` layout; the running system's when absent
    pub sockaddr_layout: Option<SockaddrLayout>,
}

impl Default for BypassConfig {
    fn default() -> Self {
        Self {
            accept_all_certs: true,
            trust_evaluation: true,
            redirect: None,
            observe: false,
            sockaddr_layout: None,
        }
    }
}

impl BypassConfig {
    /// Parse and validate JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject unusable proxy endpoints
    pub fn validate(&self) -> Result<()> {
        if let Some(proxy) = self.redirect {
            if proxy.port == 0 {
                return Err(HookError::Config("Proxy port must not be 0".to_string()));
            }
            if proxy.host.is_unspecified() {
                return Err(HookError::Config("Proxy host must not be 0.0.0.0".to_string()));
            }
        }
        Ok(())
    }

    /// Layout to decode `sockaddr` with
    pub fn layout(&self) -> SockaddrLayout {
        self.sockaddr_layout.unwrap_or_else(SockaddrLayout::native)
    }
}
