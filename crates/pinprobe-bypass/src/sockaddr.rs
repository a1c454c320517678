//! In-place `sockaddr` rewriting
//!
//! Two layouts are understood. BSD-derived systems start with a one-byte
//! `sa_len` followed by a one-byte `sa_family` and number `AF_INET6` as 30;
//! Linux starts with a native-endian `u16` family and numbers `AF_INET6` as 10.
//! Ports are big-endian at offset 2. The IPv4 address sits at offset 4, the
//! IPv6 address at offset 8.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// `AF_INET` on every supported layout
pub const AF_INET: u16 = 2;

/// `sizeof(struct sockaddr_in)`
pub const SOCKADDR_IN_LEN: usize = 16;

/// `sizeof(struct sockaddr_in6)`
pub const SOCKADDR_IN6_LEN: usize = 28;

/// Byte layout of the socket address header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SockaddrLayout {
    /// `sa_len` byte, then `sa_family` byte
    Bsd,
    /// `u16` family
    Linux,
}

impl SockaddrLayout {
    /// Layout of the running system
    pub fn native() -> Self {
        if cfg!(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd"
        )) {
            SockaddrLayout::Bsd
        } else {
            SockaddrLayout::Linux
        }
    }

    /// `AF_INET6` for this layout
    pub const fn af_inet6(self) -> u16 {
        match self {
            SockaddrLayout::Bsd => 30,
            SockaddrLayout::Linux => 10,
        }
    }

    /// Address family stored in `buf`
    pub fn family(self, buf: &[u8]) -> Option<u16> {
        match self {
            SockaddrLayout::Bsd => buf.get(1).map(|f| u16::from(*f)),
            SockaddrLayout::Linux => buf.get(..2).map(|b| u16::from_ne_bytes([b[0], b[1]])),
        }
    }

    fn write_header(self, buf: &mut [u8], family: u16, len: usize) {
        match self {
            SockaddrLayout::Bsd => {
                buf[0] = u8::try_from(len).unwrap_or(u8::MAX);
                buf[1] = u8::try_from(family).unwrap_or(u8::MAX);
            }
            SockaddrLayout::Linux => buf[..2].copy_from_slice(&family.to_ne_bytes()),
        }
    }
}

fn port(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[2], buf[3]])
}

/// Decode an IPv4 or IPv6 socket address
pub fn parse(buf: &[u8], layout: SockaddrLayout) -> Option<SocketAddr> {
    let family = layout.family(buf)?;
    if family == AF_INET && buf.len() >= 8 {
        let ip = Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);
        Some(SocketAddr::V4(SocketAddrV4::new(ip, port(buf))))
    } else if family == layout.af_inet6() && buf.len() >= 24 {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&buf[8..24]);
        Some(SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::from(octets), port(buf), 0, 0)))
    } else {
        None
    }
}

/// Point `buf` at `proxy`, keeping its address family
///
/// IPv6 destinations become the IPv4-mapped `::ffff:a.b.c.d` form of the
/// proxy. Returns the original and the new destination, or `None` when the
/// family is neither IPv4 nor IPv6 or the buffer is too short; `buf` is left
/// untouched then.
pub fn redirect(buf: &mut [u8], layout: SockaddrLayout, proxy: SocketAddrV4) -> Option<(SocketAddr, SocketAddr)> {
    let original = parse(buf, layout)?;
    let port = proxy.port().to_be_bytes();
    match original {
        SocketAddr::V4(_) => {
            layout.write_header(buf, AF_INET, SOCKADDR_IN_LEN);
            buf[2..4].copy_from_slice(&port);
            buf[4..8].copy_from_slice(&proxy.ip().octets());
        }
        SocketAddr::V6(_) => {
            layout.write_header(buf, layout.af_inet6(), SOCKADDR_IN6_LEN);
            buf[2..4].copy_from_slice(&port);
            buf[8..18].fill(0);
            buf[18] = 0xff;
            buf[19] = 0xff;
            buf[20..24].copy_from_slice(&proxy.ip().octets());
        }
    }
    let redirected = parse(buf, layout)?;
    Some((original, redirected))
}

/// `sockaddr_in` bytes for `addr`
pub fn encode_v4(addr: SocketAddrV4, layout: SockaddrLayout) -> Vec<u8> {
    let mut buf = vec![0u8; SOCKADDR_IN_LEN];
    layout.write_header(&mut buf, AF_INET, SOCKADDR_IN_LEN);
    buf[2..4].copy_from_slice(&addr.port().to_be_bytes());
    buf[4..8].copy_from_slice(&addr.ip().octets());
    buf
}

/// `sockaddr_in6` bytes for `addr`
pub fn encode_v6(addr: SocketAddrV6, layout: SockaddrLayout) -> Vec<u8> {
    let mut buf = vec![0u8; SOCKADDR_IN6_LEN];
    layout.write_header(&mut buf, layout.af_inet6(), SOCKADDR_IN6_LEN);
    buf[2..4].copy_from_slice(&addr.port().to_be_bytes());
    buf[4..8].copy_from_slice(&addr.flowinfo().to_be_bytes());
    buf[8..24].copy_from_slice(&addr.ip().octets());
    buf[24..28].copy_from_slice(&addr.scope_id().to_ne_bytes());
    buf
}
