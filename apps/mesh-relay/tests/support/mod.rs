#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use mesh_relay::RelayState;
use tokio::net::TcpListener;

/// Serves a fresh relay on an ephemeral loopback port; returns its websocket url.
pub async fn spawn_relay() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = mesh_relay::serve(listener, RelayState::new()).await;
    });
    format!("ws://{addr}/")
}

pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> T {
    match tokio::time::timeout(Duration::from_secs(10), fut).await {
        Ok(value) => value,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

/// Polls `cond` until it holds.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    within(what, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
}
