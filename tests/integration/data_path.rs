use std::net::Ipv4Addr;

use htun_core::packet::{icmp_echo_request, ipv4_endpoints};
use htun_services::PacketDelivery;

use crate::*;

const GOOGLE_DNS: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);

/// ICMP echo to an outside address: 200, and the packet reaches the uplink.
#[tokio::test]
async fn ping_leaves_through_uplink() {
    let client = Keypair::generate();
    let mut t = tunnel(&[&client]);
    let mut tc = connect(&t.app, &client).await.unwrap();
    let ip = tc.setting().ip;
    assert_eq!(ip, Ipv4Addr::new(192, 168, 4, 2));

    let ping = icmp_echo_request(ip, GOOGLE_DNS, 1, 1, b"hello");
    let (status, reply) = exchange(&t.app, &mut tc, &[ping.clone()]).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(reply.is_empty());

    let sent = t.uplink.try_recv().unwrap();
    assert_eq!(sent.as_ref(), ping.as_slice());
}

/// The data endpoint is also routed without the trailing slash.
#[tokio::test]
async fn base_path_without_slash_is_routed() {
    let client = Keypair::generate();
    let t = tunnel(&[&client]);
    let mut tc = connect(&t.app, &client).await.unwrap();

    let body = tc.encode_batch::<Vec<u8>>(&[]).unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/vpn")
        .header(AUTHORIZATION, tc.data_credentials().to_header())
        .body(Body::from(body))
        .unwrap();
    let (status, reply) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(tc.decode_batch(&reply).unwrap().is_empty());
}

/// Two clients talk to each other through the subnet.
#[tokio::test]
async fn clients_reach_each_other() {
    let a = Keypair::generate();
    let b = Keypair::generate();
    let mut t = tunnel(&[&a, &b]);
    let mut ta = connect(&t.app, &a).await.unwrap();
    let mut tb = connect(&t.app, &b).await.unwrap();
    let (ip_a, ip_b) = (ta.setting().ip, tb.setting().ip);

    let ping = icmp_echo_request(ip_a, ip_b, 9, 1, b"neighbour");
    let (status, _) = exchange(&t.app, &mut ta, &[ping.clone()]).await.unwrap();
    assert_eq!(status, StatusCode::OK);

    let (status, reply) = exchange(&t.app, &mut tb, &[]).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply.len(), 1);
    assert_eq!(reply[0].as_ref(), ping.as_slice());
    assert!(t.uplink.try_recv().is_err());
}

/// Return traffic injected from outside comes back on the next request,
/// capped per response.
#[tokio::test]
async fn queued_packets_are_returned_in_capped_batches() {
    let client = Keypair::generate();
    let mut config = HtunConfig::default();
    config.sessions.max_batch_packets = 2;
    let t = tunnel_with(config, &[&client]);
    let mut tc = connect(&t.app, &client).await.unwrap();
    let ip = tc.setting().ip;

    for seq in 0..5 {
        assert!(t.queues.inject(Bytes::from(icmp_echo_request(GOOGLE_DNS, ip, 3, seq, b""))));
    }

    let mut sizes = Vec::new();
    for _ in 0..4 {
        let (status, reply) = exchange(&t.app, &mut tc, &[]).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        for packet in &reply {
            assert_eq!(ipv4_endpoints(packet), Some((GOOGLE_DNS, ip)));
        }
        sizes.push(reply.len());
    }
    assert_eq!(sizes, vec![2, 2, 1, 0]);
}

/// A client cannot send with another client's source address.
#[tokio::test]
async fn spoofed_source_is_dropped_without_teardown() {
    let a = Keypair::generate();
    let b = Keypair::generate();
    let mut t = tunnel(&[&a, &b]);
    let mut ta = connect(&t.app, &a).await.unwrap();
    let mut tb = connect(&t.app, &b).await.unwrap();
    let ip_b = tb.setting().ip;

    let forged = icmp_echo_request(ip_b, GOOGLE_DNS, 1, 1, b"");
    let (status, _) = exchange(&t.app, &mut ta, &[forged]).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(t.uplink.try_recv().is_err());

    let (status, _) = exchange(&t.app, &mut ta, &[]).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    let (status, reply) = exchange(&t.app, &mut tb, &[]).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(reply.is_empty());
}

/// Flipping any single bit of a body kills the session.
#[tokio::test]
async fn tampered_body_tears_session_down() {
    let client = Keypair::generate();
    let t = tunnel(&[&client]);
    let mut tc = connect(&t.app, &client).await.unwrap();
    let ip = tc.setting().ip;

    let ping = icmp_echo_request(ip, GOOGLE_DNS, 1, 1, b"payload");
    let body = tc.encode_batch(&[ping]).unwrap();
    let mut tampered = body.to_vec();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;

    let (status, reply) = send(&t.app, data_request(&tc.data_credentials(), tampered.into())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(reply.is_empty());

    // Even a well-formed follow-up is refused now.
    let (status, _) = exchange(&t.app, &mut tc, &[]).await.unwrap();
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // The lease is held, so a fresh handshake lands on the same address.
    let again = connect(&t.app, &client).await.unwrap();
    assert_eq!(again.setting().ip, ip);
}

/// Resending a body that was already accepted fails.
#[tokio::test]
async fn replayed_body_is_rejected() {
    let client = Keypair::generate();
    let t = tunnel(&[&client]);
    let mut tc = connect(&t.app, &client).await.unwrap();

    let body = tc.encode_batch::<Vec<u8>>(&[]).unwrap();
    let creds = tc.data_credentials();
    let (status, _) = send(&t.app, data_request(&creds, body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&t.app, data_request(&creds, body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

/// A body for one lease sent under another lease's username is refused.
#[tokio::test]
async fn body_under_wrong_username_is_refused() {
    let a = Keypair::generate();
    let b = Keypair::generate();
    let t = tunnel(&[&a, &b]);
    let mut ta = connect(&t.app, &a).await.unwrap();
    let tb = connect(&t.app, &b).await.unwrap();

    let body = ta.encode_batch::<Vec<u8>>(&[]).unwrap();
    let (status, _) = send(&t.app, data_request(&tb.data_credentials(), body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

/// Packets queued for a client whose session went away are discarded.
#[tokio::test]
async fn queue_is_dropped_with_the_session() {
    let client = Keypair::generate();
    let t = tunnel(&[&client]);
    let tc = connect(&t.app, &client).await.unwrap();
    let ip = tc.setting().ip;

    t.queues.inject(Bytes::from(icmp_echo_request(GOOGLE_DNS, ip, 1, 1, b"")));
    assert_eq!(t.queues.queued(ip), 1);

    let later = std::time::Instant::now() + t.config.sessions.idle_timeout();
    assert_eq!(t.sessions.sweep(later), 1);
    assert_eq!(t.queues.queued(ip), 0);
    assert!(t.queues.drain(ip, 10).is_empty());
}

/// A body over the size limit is refused like any other bad body.
#[tokio::test]
async fn oversized_body_tears_session_down() {
    let client = Keypair::generate();
    let mut config = HtunConfig::default();
    config.server.max_body_bytes = 1024;
    let t = tunnel_with(config, &[&client]);
    let mut tc = connect(&t.app, &client).await.unwrap();
    let ip = tc.setting().ip;

    let bloated = Bytes::from(vec![0u8; 4096]);
    let (status, reply) = send(&t.app, data_request(&tc.data_credentials(), bloated)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(reply.is_empty());

    let (status, _) = exchange(&t.app, &mut tc, &[]).await.unwrap();
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let again = connect(&t.app, &client).await.unwrap();
    assert_eq!(again.setting().ip, ip);
}
