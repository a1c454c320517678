use pinprobe_bypass::sockaddr::{self, SockaddrLayout};
use proptest::prelude::*;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

fn layout() -> impl Strategy<Value = SockaddrLayout> {
    prop_oneof![Just(SockaddrLayout::Bsd), Just(SockaddrLayout::Linux)]
}

proptest! {
    #[test]
    fn ipv4_always_lands_on_proxy(layout in layout(), ip in any::<u32>(), port in any::<u16>(),
                                  proxy_ip in 1u32.., proxy_port in 1u16..) {
        let proxy = SocketAddrV4::new(Ipv4Addr::from(proxy_ip), proxy_port);
        let mut buf = sockaddr::encode_v4(SocketAddrV4::new(Ipv4Addr::from(ip), port), layout);
        let (_, to) = sockaddr::redirect(&mut buf, layout, proxy).unwrap();
        prop_assert_eq!(to, SocketAddr::V4(proxy));
        prop_assert_eq!(buf.len(), sockaddr::SOCKADDR_IN_LEN);
    }

    #[test]
    fn ipv6_keeps_family_and_scope(layout in layout(), ip in any::<u128>(), port in any::<u16>(),
                                   scope in any::<u32>(), proxy_ip in 1u32..) {
        let proxy = SocketAddrV4::new(Ipv4Addr::from(proxy_ip), 443);
        let mut buf = sockaddr::encode_v6(SocketAddrV6::new(Ipv6Addr::from(ip), port, 0, scope), layout);
        let tail = buf[24..].to_vec();
        sockaddr::redirect(&mut buf, layout, proxy).unwrap();

        prop_assert_eq!(layout.family(&buf), Some(layout.af_inet6()));
        prop_assert_eq!(&buf[24..], tail.as_slice());
        let mapped = Ipv6Addr::from(<[u8; 16]>::try_from(&buf[8..24]).unwrap());
        prop_assert_eq!(mapped.to_ipv4_mapped(), Some(*proxy.ip()));
    }
}
