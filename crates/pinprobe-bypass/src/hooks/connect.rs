//! Socket connect redirection to an intercepting proxy

use crate::interceptor::{InvocationListener, Value};
use crate::sockaddr::{self, SockaddrLayout};
use crate::TargetSymbol;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Argument index of the `sockaddr` pointer in `connect(fd, addr, len)`
pub const SOCKADDR_ARG: usize = 1;

/// Rewrites every IPv4/IPv6 connect destination to the proxy
#[derive(Debug)]
pub struct ConnectRedirectHook {
    proxy: SocketAddrV4,
    layout: SockaddrLayout,
    redirected: AtomicU64,
}

impl ConnectRedirectHook {
    /// Redirect to `proxy`, reading addresses in `layout`
    pub fn new(proxy: SocketAddrV4, layout: SockaddrLayout) -> Self {
        Self {
            proxy,
            layout,
            redirected: AtomicU64::new(0),
        }
    }

    /// Proxy destination
    pub fn proxy(&self) -> SocketAddrV4 {
        self.proxy
    }

    /// Connections redirected so far
    pub fn redirected(&self) -> u64 {
        self.redirected.load(Ordering::Relaxed)
    }
}

impl InvocationListener for ConnectRedirectHook {
    fn on_enter(&self, _symbol: &TargetSymbol, args: &mut [Value]) {
        let Some(addr) = args.get(SOCKADDR_ARG).and_then(Value::as_memory) else {
            return;
        };
        let rewritten = addr.with_mut(|buf| {
            let before = hex::encode(&buf[..buf.len().min(sockaddr::SOCKADDR_IN6_LEN)]);
            let result = sockaddr::redirect(buf, self.layout, self.proxy);
            if result.is_none() {
                debug!(sockaddr = %before, "connect left alone");
            }
            result
        });
        if let Some((from, to)) = rewritten {
            self.redirected.fetch_add(1, Ordering::Relaxed);
            info!(%from, %to, "connect redirected to proxy");
        }
    }
}
