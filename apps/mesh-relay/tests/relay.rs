mod support;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use support::{spawn_relay, within};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = within("relay frame", client.next())
            .await
            .expect("relay closed the connection")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client.send(Message::Text(value.to_string())).await.unwrap();
}

async fn join(url: &str) -> (Client, String, Vec<String>) {
    let (mut client, _) = connect_async(url).await.unwrap();
    let welcome = next_json(&mut client).await;
    assert_eq!(welcome["type"], "welcome");
    let id = welcome["id"].as_str().unwrap().to_string();
    let peers = serde_json::from_value(welcome["peers"].clone()).unwrap();
    (client, id, peers)
}

#[tokio::test]
async fn arrivals_are_welcomed_and_announced() {
    let url = spawn_relay().await;
    let (mut a, a_id, a_peers) = join(&url).await;
    assert!(a_peers.is_empty());

    let (_b, b_id, b_peers) = join(&url).await;
    assert_eq!(b_peers, vec![a_id.clone()]);
    assert_eq!(
        next_json(&mut a).await,
        json!({ "type": "addPeer", "src": b_id })
    );

    let (_c, c_id, mut c_peers) = join(&url).await;
    c_peers.sort();
    let mut expected = vec![a_id, b_id];
    expected.sort();
    assert_eq!(c_peers, expected);
    assert_eq!(
        next_json(&mut a).await,
        json!({ "type": "addPeer", "src": c_id })
    );
}

#[tokio::test]
async fn targeted_frames_are_forwarded_with_src() {
    let url = spawn_relay().await;
    let (mut a, a_id, _) = join(&url).await;
    let (mut b, b_id, _) = join(&url).await;
    let _ = next_json(&mut a).await;

    send_json(
        &mut b,
        json!({ "type": "offer", "target": a_id, "offer": { "type": "offer", "sdp": "v=0" } }),
    )
    .await;
    let offer = next_json(&mut a).await;
    assert_eq!(offer["type"], "offer");
    assert_eq!(offer["src"], b_id.as_str());
    assert_eq!(offer["offer"]["sdp"], "v=0");
    assert!(offer.get("target").is_none());

    send_json(
        &mut a,
        json!({ "type": "ice", "target": b_id, "iceCandidate": { "candidate": "candidate:0" } }),
    )
    .await;
    let ice = next_json(&mut b).await;
    assert_eq!(ice["src"], a_id.as_str());
    assert_eq!(ice["iceCandidate"]["candidate"], "candidate:0");
}

#[tokio::test]
async fn bad_frames_are_dropped_without_closing_the_connection() {
    let url = spawn_relay().await;
    let (mut a, a_id, _) = join(&url).await;
    let (mut b, _, _) = join(&url).await;
    let _ = next_json(&mut a).await;

    b.send(Message::Text("{not json".into())).await.unwrap();
    send_json(&mut b, json!({ "type": "offer" })).await;
    send_json(&mut b, json!({ "type": "offer", "target": "nobody" })).await;
    send_json(
        &mut b,
        json!({ "type": "answer", "target": a_id, "answer": { "type": "answer", "sdp": "ok" } }),
    )
    .await;

    let answer = next_json(&mut a).await;
    assert_eq!(answer["type"], "answer");
    assert_eq!(answer["answer"]["sdp"], "ok");
}

#[tokio::test]
async fn departures_are_announced() {
    let url = spawn_relay().await;
    let (mut a, _, _) = join(&url).await;
    let (mut b, b_id, _) = join(&url).await;
    let _ = next_json(&mut a).await;

    b.close(None).await.unwrap();
    assert_eq!(
        next_json(&mut a).await,
        json!({ "type": "removePeer", "src": b_id })
    );
}

#[tokio::test]
async fn health_route_is_a_plain_http_endpoint() {
    let url = spawn_relay().await;
    let health = format!("{}health", url.replacen("ws://", "http://", 1));
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let response = within("health response", client.get(&health).send())
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");
}
