//! Socket-level tests of the relay against a fake upstream and a real
//! HTTP listener.
//!
//! Unlike the real provider, this fake upstream delivers every outbound
//! frame to every connection, join or not, so the tests exercise the
//! relay's own room filtering.

use common::protocol::{MessageData, WireMessage};
use futures::{SinkExt, StreamExt};
use relay::{create_router, AppState, RelayConfig};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

struct Upstream {
    addr: SocketAddr,
    /// Every frame received from any relay connection.
    inbound_rx: mpsc::Receiver<WireMessage>,
    /// Frames pushed to every connection, regardless of joins.
    outbound_tx: broadcast::Sender<WireMessage>,
    /// Signals every open connection to close.
    close: Arc<Notify>,
    /// Pings received across all connections.
    pings: Arc<AtomicUsize>,
}

async fn spawn_upstream() -> Upstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    let (outbound_tx, _) = broadcast::channel(64);
    let outbound = outbound_tx.clone();
    let close = Arc::new(Notify::new());
    let close_signal = close.clone();
    let pings = Arc::new(AtomicUsize::new(0));
    let ping_count = pings.clone();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let inbound_tx = inbound_tx.clone();
            let mut outbound_rx = outbound.subscribe();
            let close_signal = close_signal.clone();
            let ping_count = ping_count.clone();

            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                loop {
                    tokio::select! {
                        msg = ws.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                let wire = WireMessage::parse(&text).unwrap();
                                let _ = inbound_tx.send(wire).await;
                            }
                            Some(Ok(Message::Ping(data))) => {
                                ping_count.fetch_add(1, Ordering::SeqCst);
                                let _ = ws.send(Message::Pong(data)).await;
                            }
                            Some(Ok(_)) => {}
                            _ => break,
                        },
                        out = outbound_rx.recv() => {
                            if let Ok(wire) = out {
                                let text = serde_json::to_string(&wire).unwrap();
                                if ws.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                        }
                        () = close_signal.notified() => {
                            let _ = ws.close(None).await;
                            break;
                        }
                    }
                }
            });
        }
    });

    Upstream {
        addr,
        inbound_rx,
        outbound_tx,
        close,
        pings,
    }
}

async fn spawn_relay_with(config: RelayConfig) -> SocketAddr {
    let state = Arc::new(AppState { config });
    let app = create_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_relay(upstream_addr: SocketAddr) -> SocketAddr {
    spawn_relay_with(RelayConfig::new(format!("ws://{}", upstream_addr))).await
}

async fn expect_inbound(upstream: &mut Upstream) -> WireMessage {
    timeout(Duration::from_secs(5), upstream.inbound_rx.recv())
        .await
        .expect("timed out waiting for upstream frame")
        .expect("upstream channel closed")
}

fn price_message(room: &str, price: f64) -> WireMessage {
    WireMessage::Message {
        room: room.to_string(),
        data: MessageData {
            price: Some(price),
            ..Default::default()
        },
    }
}

type ClientStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn next_json(client: &mut ClientStream) -> serde_json::Value {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for relay frame")
            .expect("relay connection ended")
            .expect("relay connection errored");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn forwards_only_the_bound_token_with_derived_delta() {
    let mut upstream = spawn_upstream().await;
    let relay_addr = spawn_relay(upstream.addr).await;

    let url = format!("ws://{}/ws/price?token=TOKA", relay_addr);
    let (mut client, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    // The relay joins the bound room on the upstream connection.
    let join = expect_inbound(&mut upstream).await;
    assert_eq!(join, WireMessage::join("price:TOKA"));

    // A frame for another token and one for the bound token; only the
    // latter reaches the client.
    upstream.outbound_tx.send(price_message("price:TOKB", 9.0)).unwrap();
    upstream.outbound_tx.send(price_message("price:TOKA", 2.0)).unwrap();

    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "price");
    assert_eq!(frame["data"]["token"], "TOKA");
    assert_eq!(frame["data"]["price"], 2.0);
    assert_eq!(frame["data"]["priceDelta"], 0.0);
    assert!(frame["data"]["timestamp"].is_i64());

    upstream.outbound_tx.send(price_message("price:TOKA", 2.5)).unwrap();
    let frame = next_json(&mut client).await;
    assert_eq!(frame["data"]["price"], 2.5);
    assert_eq!(frame["data"]["priceDelta"], 0.5);

    client.close(None).await.unwrap();
}

#[tokio::test]
async fn downstream_close_leaves_the_room_upstream() {
    let mut upstream = spawn_upstream().await;
    let relay_addr = spawn_relay(upstream.addr).await;

    let url = format!("ws://{}/ws/price?token=TOKA", relay_addr);
    let (mut client, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let join = expect_inbound(&mut upstream).await;
    assert_eq!(join, WireMessage::join("price:TOKA"));

    client.close(None).await.unwrap();

    let leave = expect_inbound(&mut upstream).await;
    assert_eq!(leave, WireMessage::leave("price:TOKA"));
}

#[tokio::test]
async fn upstream_close_sends_terminal_error_downstream() {
    let mut upstream = spawn_upstream().await;
    let relay_addr = spawn_relay(upstream.addr).await;

    let url = format!("ws://{}/ws/price?token=TOKA", relay_addr);
    let (mut client, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    expect_inbound(&mut upstream).await;

    upstream.close.notify_waiters();

    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["data"]["code"], "UPSTREAM_UNAVAILABLE");

    // The downstream side is closed too; no reconnection is attempted.
    loop {
        match timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for close")
        {
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(_)) => break,
        }
    }
}

#[tokio::test]
async fn idle_upstream_is_kept_alive_with_pings() {
    let mut upstream = spawn_upstream().await;
    let config = RelayConfig::new(format!("ws://{}", upstream.addr))
        .with_ping_interval(Duration::from_millis(50));
    let relay_addr = spawn_relay_with(config).await;

    let url = format!("ws://{}/ws/price?token=TOKA", relay_addr);
    let (mut client, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    expect_inbound(&mut upstream).await; // join

    timeout(Duration::from_secs(5), async {
        while upstream.pings.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no keepalive ping reached the upstream");

    client.close(None).await.unwrap();
}

#[tokio::test]
async fn malformed_upstream_url_sends_error_and_closes() {
    let relay_addr = spawn_relay_with(RelayConfig::new("not a url")).await;

    let url = format!("ws://{}/ws/price?token=TOKA", relay_addr);
    let (mut client, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["data"]["code"], "UPSTREAM_UNAVAILABLE");
}

#[tokio::test]
async fn unreachable_upstream_sends_error_and_closes() {
    // Bind and drop a listener to get a port with nothing behind it.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let relay_addr = spawn_relay(dead_addr).await;
    let url = format!("ws://{}/ws/price?token=TOKA", relay_addr);
    let (mut client, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["data"]["code"], "UPSTREAM_UNAVAILABLE");
}
