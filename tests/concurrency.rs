use std::sync::Arc;

use bytes::BytesMut;
use telescope_control::core::codec::PacketCodec;
use telescope_control::core::packet::Packet;
use telescope_control::protocol::authority::{HandshakeOutcome, SessionAuthority};
use telescope_control::protocol::handshake::{control_digest, ControlKeys};
use tokio_util::codec::{Decoder, Encoder};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_encode_decode_heavy() {
    use tokio::task::JoinSet;

    let iterations = 5_000usize;
    let payload_sizes = [0usize, 8, 60, 4096, 65536];

    let mut tasks = JoinSet::new();
    for &size in &payload_sizes {
        tasks.spawn(async move {
            let mut codec = PacketCodec;
            let mut buf = BytesMut::new();
            for i in 0..iterations {
                let payload = vec![((i + size) & 0xFF) as u8; size];
                let packet = Packet::new(0x000A, i as u16, payload);
                codec.encode(packet.clone(), &mut buf).unwrap();
                let decoded = codec.decode(&mut buf).unwrap().unwrap();
                assert_eq!(decoded, packet);
                assert!(decoded.checksum_matches());
                assert!(buf.is_empty());
            }
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn racing_handshakes_leave_exactly_one_controller() {
    let keys = ControlKeys::new(b"secret", "station", None).unwrap();
    let authority = Arc::new(SessionAuthority::new(keys));
    let digest = control_digest(b"secret", "station").unwrap();

    let sessions = 64u64;
    for connection in 0..sessions {
        authority.connect(connection, format!("peer-{connection}")).unwrap();
    }

    let mut handles = Vec::new();
    for connection in 0..sessions {
        let authority = Arc::clone(&authority);
        let digest = digest.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            for _ in 0..50 {
                let outcome = authority.submit_digest(connection, &digest).unwrap();
                assert!(matches!(outcome, HandshakeOutcome::Granted { .. }));
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let holders: Vec<_> = authority
        .sessions()
        .unwrap()
        .into_iter()
        .filter(|s| s.privilege.has_control())
        .collect();
    assert_eq!(holders.len(), 1);
    assert_eq!(authority.controller().unwrap(), Some(holders[0].connection));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disconnect_during_handshakes_never_leaves_a_ghost_controller() {
    let keys = ControlKeys::new(b"secret", "station", None).unwrap();
    let authority = Arc::new(SessionAuthority::new(keys));
    let digest = control_digest(b"secret", "station").unwrap();

    for connection in 0..8u64 {
        authority.connect(connection, "peer").unwrap();
    }

    let mut handles = Vec::new();
    for connection in 0..8u64 {
        let authority = Arc::clone(&authority);
        let digest = digest.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            for _ in 0..20 {
                let _ = authority.submit_digest(connection, &digest);
            }
            authority.disconnect(connection).unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(authority.controller().unwrap(), None);
    assert!(authority.sessions().unwrap().is_empty());
}
