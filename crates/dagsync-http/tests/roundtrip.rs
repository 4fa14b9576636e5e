//! End-to-end tests of the HTTP adapter against a live server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use dagsync_core::{Block, BlockId, DagNode, NodeCodec};
use dagsync_http::HttpClient;
use dagsync_store::{BlockStore, MemoryStore, StoreExt};
use dagsync_sync::{
    AllowRemove, CoordinatorConfig, ErrorCode, Meta, Receiver, ReceiverConfig, SyncEngine,
    SyncError, TransferOptions, TransferOutcome, Transport,
};

async fn spawn_server(router: Router) -> (SocketAddr, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .unwrap();
    });
    (addr, shutdown)
}

async fn spawn_receiver(receiver: Receiver<MemoryStore>) -> (HttpClient, CancellationToken) {
    let (addr, shutdown) = spawn_server(dagsync_http::router(Arc::new(receiver))).await;
    (HttpClient::new(format!("http://{addr}/")), shutdown)
}

async fn sample_dag(store: &MemoryStore) -> Vec<Block> {
    let leaves: Vec<Block> = (0..3)
        .map(|i| DagNode::leaf(format!("leaf {i}").into_bytes()).to_block().unwrap())
        .collect();
    let root = DagNode::new(leaves.iter().map(|b| *b.id()).collect(), &b"root"[..])
        .to_block()
        .unwrap();
    let mut blocks = vec![root];
    blocks.extend(leaves);
    for block in &blocks {
        store.put_block(block).await.unwrap();
    }
    blocks
}

fn receiver(store: Arc<MemoryStore>) -> Receiver<MemoryStore> {
    Receiver::new(store, Arc::new(NodeCodec), ReceiverConfig::default())
}

#[tokio::test]
async fn test_push_over_http() {
    let local = Arc::new(MemoryStore::new());
    let blocks = sample_dag(&local).await;
    let remote_store = Arc::new(MemoryStore::new());
    let (client, shutdown) = spawn_receiver(receiver(remote_store.clone())).await;

    let engine = SyncEngine::new(local, Arc::new(NodeCodec), CoordinatorConfig::default());
    let report = engine
        .push(Arc::new(client), blocks[0].id(), TransferOptions::pinned())
        .await
        .unwrap();

    assert_eq!(report.transfer.stored.len(), 4);
    assert_eq!(remote_store.len(), 4);
    assert!(remote_store.is_pinned(blocks[0].id()).await.unwrap());
    shutdown.cancel();
}

#[tokio::test]
async fn test_pull_over_http() {
    let remote_store = Arc::new(MemoryStore::new());
    let blocks = sample_dag(&remote_store).await;
    let (client, shutdown) = spawn_receiver(receiver(remote_store)).await;

    let local = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(local.clone(), Arc::new(NodeCodec), CoordinatorConfig::default());
    engine
        .pull(Arc::new(client), blocks[0].id(), TransferOptions::default())
        .await
        .unwrap();

    for block in &blocks {
        assert_eq!(local.get(block.id()).await.unwrap().unwrap(), *block.data());
    }
    shutdown.cancel();
}

#[tokio::test]
async fn test_remove_maps_to_not_supported() {
    let (client, shutdown) = spawn_receiver(receiver(Arc::new(MemoryStore::new()))).await;

    let err = client
        .remove_dag(&BlockId::of(b"root"), &Meta::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::RemoveNotSupported));
    shutdown.cancel();
}

#[tokio::test]
async fn test_remove_with_hook() {
    let store = Arc::new(MemoryStore::new());
    let root = BlockId::of(b"root");
    store.pin(&root).await.unwrap();
    let (client, shutdown) =
        spawn_receiver(receiver(store.clone()).with_hooks(Arc::new(AllowRemove))).await;

    client.remove_dag(&root, &Meta::new()).await.unwrap();
    assert!(!store.is_pinned(&root).await.unwrap());
    shutdown.cancel();
}

#[tokio::test]
async fn test_push_errors_keep_their_codes() {
    let local = MemoryStore::new();
    let blocks = sample_dag(&local).await;
    let (client, shutdown) = spawn_receiver(receiver(Arc::new(MemoryStore::new()))).await;

    let info = local.dag_info(&NodeCodec, blocks[0].id()).await.unwrap();
    let (session, _) = client
        .open_receive_session(&info, false, &Meta::new())
        .await
        .unwrap();

    let bad = client
        .push_block(&session, blocks[1].id(), bytes::Bytes::from_static(b"tampered"))
        .await;
    assert!(matches!(
        bad,
        TransferOutcome::Fatal { ref cause, .. } if cause.code == ErrorCode::HashMismatch
    ));

    let unknown = client
        .push_block(&"no-such-session".into(), blocks[1].id(), blocks[1].data().clone())
        .await;
    assert!(matches!(
        unknown,
        TransferOutcome::Fatal { ref cause, .. } if cause.code == ErrorCode::NoSuchSession
    ));
    shutdown.cancel();
}

#[tokio::test]
async fn test_get_without_parameters_is_bad_request() {
    let (client, shutdown) = spawn_receiver(receiver(Arc::new(MemoryStore::new()))).await;

    let status = reqwest::get(client.url()).await.unwrap().status();
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    shutdown.cancel();
}

#[tokio::test]
async fn test_server_errors_are_retryable() {
    let router = Router::new().route("/", get(|| async { StatusCode::BAD_GATEWAY }));
    let (addr, shutdown) = spawn_server(router).await;
    let client = HttpClient::new(format!("http://{addr}/"));

    let err = client.fetch_block(&BlockId::of(b"x")).await.unwrap_err();
    assert!(err.is_retryable());
    shutdown.cancel();
}

#[tokio::test]
async fn test_unreachable_peer_is_retryable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = HttpClient::new(format!("http://{addr}/"));
    let outcome = client
        .push_block(&"s".into(), &BlockId::of(b"x"), bytes::Bytes::new())
        .await;
    assert!(matches!(outcome, TransferOutcome::Retryable { .. }));
}

#[tokio::test]
async fn test_configured_block_limit_applies_to_request_body() {
    let big = 5 * 1024 * 1024;
    let limit = 6 * 1024 * 1024;
    let local = Arc::new(MemoryStore::new());
    let block = DagNode::leaf(vec![7u8; big]).to_block().unwrap();
    local.put_block(&block).await.unwrap();

    let remote_store = Arc::new(MemoryStore::new());
    let config = ReceiverConfig {
        max_block_size: limit,
        ..ReceiverConfig::default()
    };
    let peer = Arc::new(Receiver::new(remote_store.clone(), Arc::new(NodeCodec), config));
    let (addr, shutdown) = spawn_server(dagsync_http::router_with_limit(peer, limit)).await;
    let client = Arc::new(HttpClient::new(format!("http://{addr}/")));

    let engine = SyncEngine::new(local, Arc::new(NodeCodec), CoordinatorConfig::default());
    engine
        .push(client, block.id(), TransferOptions::pinned())
        .await
        .unwrap();

    assert!(remote_store.has(block.id()).await.unwrap());
    assert!(remote_store.is_pinned(block.id()).await.unwrap());
    shutdown.cancel();
}
