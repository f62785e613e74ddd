use futures::{SinkExt, StreamExt};
use ocr_relay::config::RelayConfig;
use ocr_relay::models::{OCR_DONE_EVENT, SESSION_EVENT, ServerEvent};
use ocr_relay::services::broadcast::SessionRegistry;
use ocr_relay::{AppState, create_app};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;

async fn serve(sessions: SessionRegistry) -> SocketAddr {
    let (tx, _rx) = mpsc::unbounded_channel();
    let state = AppState::new(tx, sessions, RelayConfig::development());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_app(state)).await.unwrap();
    });
    addr
}

async fn wait_for_sessions(sessions: &SessionRegistry, expected: usize) {
    timeout(Duration::from_secs(5), async {
        while sessions.len().await != expected {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session count never reached {}", expected));
}

async fn next_frame<S>(ws: &mut S) -> ServerEvent
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_session_lifecycle_over_websocket() {
    let sessions = SessionRegistry::new();
    let addr = serve(sessions.clone()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();

    let hello = next_frame(&mut ws).await;
    assert_eq!(hello.event, SESSION_EVENT);
    assert!(uuid::Uuid::parse_str(&hello.data).is_ok(), "{}", hello.data);
    wait_for_sessions(&sessions, 1).await;

    let delivered = sessions
        .broadcast(ServerEvent::new(OCR_DONE_EVENT, "{\"message\":\"done\"}"))
        .await;
    assert_eq!(delivered, 1);
    let done = next_frame(&mut ws).await;
    assert_eq!(done.event, OCR_DONE_EVENT);
    assert_eq!(done.data, "{\"message\":\"done\"}");

    ws.close(None).await.unwrap();
    wait_for_sessions(&sessions, 0).await;
}

#[tokio::test]
async fn test_each_connection_gets_its_own_session() {
    let sessions = SessionRegistry::new();
    let addr = serve(sessions.clone()).await;
    let url = format!("ws://{}/ws", addr);

    let (mut first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let (mut second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    let a = next_frame(&mut first).await;
    let b = next_frame(&mut second).await;
    assert_ne!(a.data, b.data);
    wait_for_sessions(&sessions, 2).await;

    // Dropping the connection without a close frame still unregisters it
    drop(first);
    wait_for_sessions(&sessions, 1).await;

    second.close(None).await.unwrap();
    wait_for_sessions(&sessions, 0).await;
}
