//! Log-only observation of request APIs
//!
//! Attaching these shows which networking engine a process actually uses.

use crate::interceptor::{InvocationListener, Value};
use crate::sockaddr::{SockaddrLayout, AF_INET};
use crate::symbols;
use crate::TargetSymbol;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Observed entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ObservedApi {
    /// Web view navigation
    WebViewLoadRequest,
    /// Session data task
    SessionDataTask,
    /// Synchronous legacy connection
    ConnectionSendSynchronous,
    /// Core networking connection
    CfUrlConnectionCreate,
    /// Raw IP socket connect, as used by runtimes with their own HTTP stack
    SocketConnect,
}

impl ObservedApi {
    /// Every observed entry point
    pub const ALL: [ObservedApi; 5] = [
        ObservedApi::WebViewLoadRequest,
        ObservedApi::SessionDataTask,
        ObservedApi::ConnectionSendSynchronous,
        ObservedApi::CfUrlConnectionCreate,
        ObservedApi::SocketConnect,
    ];

    /// Hooked export
    pub fn symbol(self) -> TargetSymbol {
        match self {
            ObservedApi::WebViewLoadRequest => symbols::WEBVIEW_LOAD_REQUEST,
            ObservedApi::SessionDataTask => symbols::SESSION_DATA_TASK,
            ObservedApi::ConnectionSendSynchronous => symbols::CONNECTION_SEND_SYNCHRONOUS,
            ObservedApi::CfUrlConnectionCreate => symbols::CF_URL_CONNECTION_CREATE,
            ObservedApi::SocketConnect => symbols::CONNECT,
        }
    }

    /// Log label
    pub fn label(self) -> &'static str {
        match self {
            ObservedApi::WebViewLoadRequest => "WKWebView",
            ObservedApi::SessionDataTask => "cupertino_http",
            ObservedApi::ConnectionSendSynchronous => "NSURLConnection",
            ObservedApi::CfUrlConnectionCreate => "CFURLConnection",
            ObservedApi::SocketConnect => "socket",
        }
    }
}

/// Counts calls to one entry point
#[derive(Debug)]
pub struct ObservationHook {
    api: ObservedApi,
    layout: SockaddrLayout,
    hits: AtomicU64,
}

impl ObservationHook {
    /// Observer for `api`; `layout` decodes connect addresses
    pub fn new(api: ObservedApi, layout: SockaddrLayout) -> Self {
        Self {
            api,
            layout,
            hits: AtomicU64::new(0),
        }
    }

    /// Observed entry point
    pub fn api(&self) -> ObservedApi {
        self.api
    }

    /// Calls seen
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

impl InvocationListener for ObservationHook {
    fn on_enter(&self, symbol: &TargetSymbol, args: &mut [Value]) {
        if self.api == ObservedApi::SocketConnect {
            // only IP sockets count
            let family = args
                .get(1)
                .and_then(Value::as_memory)
                .and_then(|m| m.with_mut(|buf| self.layout.family(buf)));
            if family != Some(AF_INET) && family != Some(self.layout.af_inet6()) {
                return;
            }
        }
        let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
        info!(api = self.api.label(), %symbol, hits, "[{}] {} called", self.api.label(), symbol.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::MemoryRef;
    use crate::sockaddr::encode_v4;
    use std::net::{Ipv4Addr, SocketAddrV4};

    #[test]
    fn test_counts_calls() {
        let hook = ObservationHook::new(ObservedApi::SessionDataTask, SockaddrLayout::Bsd);
        let symbol = ObservedApi::SessionDataTask.symbol();
        hook.on_enter(&symbol, &mut []);
        hook.on_enter(&symbol, &mut [Value::Handle(1)]);
        assert_eq!(hook.hits(), 2);
    }

    #[test]
    fn test_socket_connect_counts_ip_only() {
        let layout = SockaddrLayout::Bsd;
        let hook = ObservationHook::new(ObservedApi::SocketConnect, layout);
        let ip = MemoryRef::new(encode_v4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 80), layout));
        let unix = MemoryRef::new(vec![16u8, 1, 0, 0]);

        hook.on_enter(&symbols::CONNECT, &mut [Value::Int(3), Value::Memory(ip)]);
        hook.on_enter(&symbols::CONNECT, &mut [Value::Int(4), Value::Memory(unix)]);
        assert_eq!(hook.hits(), 1);
    }
}
