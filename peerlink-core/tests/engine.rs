//! Engine behavior across several nodes on an in-memory network.

use std::sync::Arc;
use std::time::Duration;

use peerlink_core::config::DEFAULT_MAX_FILE_SIZE;
use peerlink_core::memory::{MemoryNetwork, MemoryTransport};
use peerlink_core::transfer::{receive_file, write_header, FileHeader};
use peerlink_core::{
    EngineConfig, Error, Keypair, ListenerState, NetworkEngine, Transport, FILE_PROTOCOL,
};
use tokio::io::AsyncWriteExt;

async fn start_node(net: &MemoryNetwork) -> (NetworkEngine, MemoryTransport) {
    let transport = net.add_node().await;
    let engine = NetworkEngine::start(Arc::new(transport.clone()), EngineConfig::default())
        .await
        .expect("engine start");
    (engine, transport)
}

fn addr_of(t: &MemoryTransport) -> String {
    t.peer_addr().expect("listening node").to_string()
}

/// Poll `check` until it returns true or about two seconds pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn send_to_unknown_peer_is_rejected() {
    let net = MemoryNetwork::new();
    let (a, _) = start_node(&net).await;
    let (b, tb) = start_node(&net).await;

    // Reachable at the transport level but never added with `connect`.
    let err = a
        .send_file(&tb.local_id().to_string(), "doc.txt", b"data".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PeerNotFound(id) if id == tb.local_id()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(b.list_files().await.is_empty());
}

#[tokio::test]
async fn send_with_malformed_peer_id_is_rejected() {
    let net = MemoryNetwork::new();
    let (a, _) = start_node(&net).await;
    let err = a
        .send_file("not-a-peer", "doc.txt", vec![1])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPeerId(_)));
}

#[tokio::test]
async fn connect_to_self_never_touches_directory() {
    let net = MemoryNetwork::new();
    let (a, _) = start_node(&net).await;
    let err = a.connect(&a.local_address()).await.unwrap_err();
    assert!(matches!(err, Error::SelfConnection));
    assert!(a.list_peers().await.is_empty());
}

#[tokio::test]
async fn repeated_connect_keeps_one_record() {
    let net = MemoryNetwork::new();
    let (a, _) = start_node(&net).await;
    let (_b, tb) = start_node(&net).await;

    a.connect(&addr_of(&tb)).await.unwrap();
    a.connect(&addr_of(&tb)).await.unwrap();

    let peers = a.list_peers().await;
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].id, tb.local_id());
}

#[tokio::test]
async fn connect_to_unknown_address_is_refused() {
    let net = MemoryNetwork::new();
    let (a, _) = start_node(&net).await;
    let ghost = format!("127.0.0.1:9/p2p/{}", Keypair::generate().node_id());
    assert!(matches!(
        a.connect(&ghost).await,
        Err(Error::ConnectionRefused(_))
    ));
    assert!(matches!(
        a.connect("127.0.0.1:9").await,
        Err(Error::InvalidAddress(_))
    ));
    assert!(a.list_peers().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn connect_gives_up_after_ten_seconds() {
    let net = MemoryNetwork::new();
    let (a, _) = start_node(&net).await;
    let (_b, tb) = start_node(&net).await;
    net.blackhole(tb.listen_addrs()[0]).await;

    let started = tokio::time::Instant::now();
    let err = a.connect(&addr_of(&tb)).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionTimeout { .. }));
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(a.list_peers().await.is_empty());
}

#[tokio::test]
async fn file_arrives_byte_exact() {
    let net = MemoryNetwork::new();
    let (a, _) = start_node(&net).await;
    let (b, tb) = start_node(&net).await;
    a.connect(&addr_of(&tb)).await.unwrap();

    // Larger than the in-memory pipe buffer so the body streams in pieces.
    let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
    a.send_file(&tb.local_id().to_string(), "doc.txt", payload.clone())
        .await
        .unwrap();

    assert!(eventually(|| async { b.file("doc.txt").await.is_some() }).await);
    let record = b.file("doc.txt").await.unwrap();
    assert_eq!(record.name, "doc.txt");
    assert_eq!(record.size, payload.len() as i64);
    assert_eq!(record.from, a.local_id().to_string());
    assert_eq!(record.data, payload);
    // Sender keeps no copy.
    assert!(a.list_files().await.is_empty());
}

#[tokio::test]
async fn same_name_overwrites_previous_file() {
    let net = MemoryNetwork::new();
    let (a, _) = start_node(&net).await;
    let (b, tb) = start_node(&net).await;
    a.connect(&addr_of(&tb)).await.unwrap();
    let peer = tb.local_id().to_string();

    a.send_file(&peer, "notes.txt", b"first version".to_vec())
        .await
        .unwrap();
    assert!(eventually(|| async { b.file("notes.txt").await.is_some() }).await);
    a.send_file(&peer, "notes.txt", b"second".to_vec())
        .await
        .unwrap();
    assert!(
        eventually(|| async {
            b.file("notes.txt").await.map(|f| f.data) == Some(b"second".to_vec())
        })
        .await
    );

    let files = b.list_files().await;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].size, 6);
}

#[tokio::test]
async fn broadcast_reaches_peer_but_not_sender() {
    let net = MemoryNetwork::new();
    let (a, _) = start_node(&net).await;
    let (b, tb) = start_node(&net).await;
    a.connect(&addr_of(&tb)).await.unwrap();

    a.broadcast("hello mesh").await.unwrap();

    assert!(eventually(|| async { b.list_messages().await.len() == 1 }).await);
    let msgs = b.list_messages().await;
    assert_eq!(msgs[0].from, a.local_id().to_string());
    assert_eq!(msgs[0].content, "hello mesh");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(a.list_messages().await.is_empty());
}

#[tokio::test]
async fn broadcast_without_peers_fails() {
    let net = MemoryNetwork::new();
    let (a, _) = start_node(&net).await;
    assert!(matches!(
        a.broadcast("anyone?").await,
        Err(Error::PublishError { .. })
    ));
}

#[tokio::test]
async fn file_receipt_is_announced_over_gossip() {
    let net = MemoryNetwork::new();
    let (a, _) = start_node(&net).await;
    let (_b, tb) = start_node(&net).await;
    a.connect(&addr_of(&tb)).await.unwrap();

    a.send_file(&tb.local_id().to_string(), "photo.png", vec![0xAB; 1024])
        .await
        .unwrap();

    let expected = format!("Received file: photo.png from {}", a.local_id());
    assert!(
        eventually(|| async {
            a.list_messages()
                .await
                .iter()
                .any(|m| m.content == expected && m.from == tb.local_id().to_string())
        })
        .await
    );
}

#[tokio::test]
async fn truncated_transfer_leaves_no_record() {
    let net = MemoryNetwork::new();
    let (b, tb) = start_node(&net).await;
    let raw = net.add_node().await;
    raw.connect(&tb.peer_addr().unwrap()).await.unwrap();

    let mut stream = raw.open_stream(tb.local_id(), FILE_PROTOCOL).await.unwrap();
    let header = FileHeader {
        name: "partial.bin".into(),
        size: 100,
        from: raw.local_id().to_string(),
    };
    write_header(&mut stream, &header).await.unwrap();
    stream.write_all(&[1u8; 40]).await.unwrap();
    stream.shutdown().await.unwrap();
    drop(stream);

    let mut garbage = raw.open_stream(tb.local_id(), FILE_PROTOCOL).await.unwrap();
    garbage.write_all(b"this is not a header\n").await.unwrap();
    garbage.shutdown().await.unwrap();
    drop(garbage);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(b.list_files().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stalled_transfer_times_out_and_leaves_nothing_to_keep() {
    let net = MemoryNetwork::new();
    let (a, _) = start_node(&net).await;
    // A receiver that accepts the stream and never reads from it.
    let stalled = net.add_node().await;
    let mut inbound = stalled.register_protocol(FILE_PROTOCOL).await;
    let holder = tokio::spawn(async move { inbound.recv().await });
    a.connect(&addr_of(&stalled)).await.unwrap();

    let started = tokio::time::Instant::now();
    let err = a
        .send_file(
            &stalled.local_id().to_string(),
            "big.iso",
            vec![0u8; 1024 * 1024],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransferTimeout(d) if d == Duration::from_secs(60)));
    assert!(started.elapsed() >= Duration::from_secs(60));

    // The aborted writer closed its end; reading now yields a truncated body.
    let held = holder.await.unwrap().expect("stream was accepted");
    assert_eq!(held.peer, a.local_id());
    assert!(receive_file(held.stream, DEFAULT_MAX_FILE_SIZE).await.is_none());
}

#[tokio::test]
async fn peer_without_file_protocol_fails_stream_open() {
    let net = MemoryNetwork::new();
    let (a, _) = start_node(&net).await;
    let bare = net.add_node().await;
    a.connect(&addr_of(&bare)).await.unwrap();

    let err = a
        .send_file(&bare.local_id().to_string(), "x", vec![1, 2, 3])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StreamOpenError(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn snapshots_stay_consistent_under_concurrent_writes() {
    let net = MemoryNetwork::new();
    let (a, _) = start_node(&net).await;
    let (b, tb) = start_node(&net).await;
    a.connect(&addr_of(&tb)).await.unwrap();

    let writer = {
        let a = a.clone();
        tokio::spawn(async move {
            for i in 0..100 {
                a.broadcast(&format!("msg-{i}")).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    let mut readers = Vec::new();
    for _ in 0..4 {
        let b = b.clone();
        readers.push(tokio::spawn(async move {
            let mut last = 0;
            for _ in 0..200 {
                let snap = b.list_messages().await;
                assert!(snap.len() >= last, "message log shrank");
                for (i, m) in snap.iter().enumerate() {
                    assert_eq!(m.content, format!("msg-{i}"));
                }
                last = snap.len();
                let _ = b.list_peers().await;
                let _ = b.list_files().await;
                tokio::task::yield_now().await;
            }
        }));
    }
    writer.await.unwrap();
    for r in readers {
        r.await.unwrap();
    }
    assert!(eventually(|| async { b.list_messages().await.len() == 100 }).await);
}

#[tokio::test]
async fn listener_failure_is_observable_and_not_fatal() {
    let net = MemoryNetwork::new();
    let (a, ta) = start_node(&net).await;
    let (_b, tb) = start_node(&net).await;
    assert_eq!(a.listener_state(), ListenerState::Running);

    net.close_subscriptions(ta.local_id()).await;
    let state = tokio::time::timeout(Duration::from_secs(2), a.listener_stopped())
        .await
        .expect("listener should stop");
    assert!(matches!(state, ListenerState::Stopped { .. }));

    // Everything else keeps working.
    a.connect(&addr_of(&tb)).await.unwrap();
    assert_eq!(a.list_peers().await.len(), 1);
    a.broadcast("still here").await.unwrap();
}

#[tokio::test]
async fn local_address_formats() {
    let net = MemoryNetwork::new();
    let (a, ta) = start_node(&net).await;
    assert_eq!(
        a.local_address(),
        format!("{}/p2p/{}", ta.listen_addrs()[0], a.local_id())
    );

    let quiet = net.add_unlistening_node().await;
    let engine = NetworkEngine::start(Arc::new(quiet), EngineConfig::default())
        .await
        .unwrap();
    assert_eq!(engine.local_address(), "");
}

#[tokio::test]
async fn oversized_file_rejected_before_sending() {
    let net = MemoryNetwork::new();
    let small = EngineConfig {
        max_file_size: 1024,
        ..EngineConfig::default()
    };
    let ta = net.add_node().await;
    let a = NetworkEngine::start(Arc::new(ta), small).await.unwrap();
    let (b, tb) = start_node(&net).await;
    a.connect(&addr_of(&tb)).await.unwrap();
    let peer = tb.local_id().to_string();

    let err = a.send_file(&peer, "big.bin", vec![0u8; 1025]).await.unwrap_err();
    assert!(matches!(err, Error::FileTooLarge { size: 1025, max: 1024 }));

    // Exactly at the limit is fine.
    a.send_file(&peer, "ok.bin", vec![0u8; 1024]).await.unwrap();
    assert!(eventually(|| async { b.file("ok.bin").await.is_some() }).await);
    assert!(b.file("big.bin").await.is_none());
}
