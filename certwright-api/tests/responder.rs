//! Responder tests over a real socket

use certwright_api::ChallengeServer;
use certwright_tls::ChallengeTokenStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

async fn start() -> (SocketAddr, Arc<ChallengeTokenStore>, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let store = Arc::new(ChallengeTokenStore::new());
    let server = ChallengeServer::bind("127.0.0.1:0".parse().unwrap(), store.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server
            .serve_until(async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });

    (addr, store, tx, handle)
}

#[tokio::test]
async fn test_token_lifecycle() {
    let (addr, store, shutdown, handle) = start().await;
    let url = format!("http://{}/.well-known/acme-challenge/abc", addr);
    let client = reqwest::Client::new();

    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 404);

    store.set("abc", "abc.thumbprint");
    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "abc.thumbprint");

    store.remove("abc");
    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 404);

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_health_and_unknown_paths() {
    let (addr, _store, shutdown, handle) = start().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["status"], "healthy");

    let response = client
        .get(format!("http://{}/index.html", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_bind_conflict() {
    let store = Arc::new(ChallengeTokenStore::new());
    let first = ChallengeServer::bind("127.0.0.1:0".parse().unwrap(), store.clone())
        .await
        .unwrap();
    let addr = first.local_addr().unwrap();

    let err = ChallengeServer::bind(addr, store).await.err().unwrap();
    assert!(matches!(err, certwright_core::Error::Server(_)));
}
