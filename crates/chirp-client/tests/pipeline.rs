//! End-to-end: local WebSocket server -> pipeline -> on-disk SQLite cache.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use chirp_client::{
    ChatConnectionClient, ClientConfig, HttpChatRepository, SessionStorage, SqliteChatCache,
    SqliteSessionStorage, SyncError,
};
use chirp_net::{ConnectionRetryHandler, WebSocketConnector};
use chirp_shared::{ChatEnvelope, ConnectionState};
use chirp_store::{Database, DeliveryStatus};

const WAIT: Duration = Duration::from_secs(5);

fn frame(kind: &str, payload: &str) -> Message {
    let envelope = ChatEnvelope {
        kind: kind.to_string(),
        payload: payload.to_string(),
    };
    Message::Text(envelope.to_frame().unwrap())
}

fn new_message(id: &str) -> Message {
    frame(
        "NEW_MESSAGE",
        &format!(
            r#"{{"id":"{id}","chatId":"chat1","senderId":"alice","content":"hi {id}","createdAt":"2024-05-01T10:00:00Z"}}"#
        ),
    )
}

struct Harness {
    client: ChatConnectionClient,
    db: Arc<Mutex<Database>>,
    _dir: tempfile::TempDir,
}

/// Client wired to a WebSocket server at `ws_addr` and an API that refuses
/// connections, so chat fetches always fail.
fn harness(ws_addr: std::net::SocketAddr) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Mutex::new(
        Database::open_at(&dir.path().join("chirp.db")).unwrap(),
    ));

    let config = ClientConfig {
        ws_url: format!("ws://{ws_addr}/ws/chat"),
        api_url: "http://127.0.0.1:9/api".into(),
        stop_timeout: Duration::ZERO,
        ..ClientConfig::default()
    };

    let cache = Arc::new(SqliteChatCache::new(db.clone()));
    let session = Arc::new(SqliteSessionStorage::new(db.clone()).unwrap());
    let repository = Arc::new(
        HttpChatRepository::new(
            config.api_url.clone(),
            cache.clone(),
            session.observe_auth_info(),
            None,
        )
        .unwrap(),
    );
    let connector = Arc::new(WebSocketConnector::new(
        config.connector_config(None),
        Arc::new(ConnectionRetryHandler::with_limits(
            Duration::from_millis(10),
            Duration::from_millis(50),
        )),
    ));

    Harness {
        client: ChatConnectionClient::new(connector, cache, repository, session, config.sharing()),
        db,
        _dir: dir,
    }
}

#[tokio::test]
async fn events_flow_into_cache_and_failures_do_not_stop_the_pipeline() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
        ws.send(new_message("m1")).await.unwrap();
        ws.send(Message::Text("not json".into())).await.unwrap();
        ws.send(frame("TYPING_STARTED", "{}")).await.unwrap();
        ws.send(frame("NEW_MESSAGE", r#"{"id":42}"#)).await.unwrap();
        ws.send(frame("MESSAGE_DELETED", r#"{"messageId":"m1"}"#)).await.unwrap();
        ws.send(new_message("m2")).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let h = harness(addr);
    let mut failures = h.client.failures();
    let mut messages = h.client.chat_messages();

    let first = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(first.id, "m1");
    assert_eq!(first.delivery_status, DeliveryStatus::Sent);

    let second = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(second.id, "m2");

    // Malformed envelope and malformed payload; the unknown tag is silent.
    for _ in 0..2 {
        let failure = timeout(WAIT, failures.recv()).await.unwrap().unwrap();
        assert!(matches!(*failure, SyncError::Decode(_)));
    }
    assert!(failures.try_recv().is_err());

    let db = h.db.lock().unwrap();
    assert!(db.get_message_by_id("m1").unwrap().is_none());
    assert!(db.get_message_by_id("m2").unwrap().is_some());
    // The chat fetch failed, so the chat row is still missing.
    assert!(db.get_chat_by_id("chat1").unwrap().is_none());
}

#[tokio::test]
async fn send_round_trip_confirms_pending_message() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();

    // Echo each outbound NEW_MESSAGE back as the server-confirmed event.
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            seen_tx.send(text.clone()).unwrap();
            let envelope = ChatEnvelope::from_frame(&text).unwrap();
            let sent: serde_json::Value = serde_json::from_str(&envelope.payload).unwrap();
            let echo = serde_json::json!({
                "id": sent["messageId"],
                "chatId": sent["chatId"],
                "senderId": "me",
                "content": sent["content"],
                "createdAt": "2024-05-01T10:00:00Z",
            });
            ws.send(frame("NEW_MESSAGE", &echo.to_string())).await.unwrap();
        }
    });

    let h = harness(addr);
    let mut messages = h.client.chat_messages();
    let mut state = h.client.connection_state();
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .unwrap()
        .unwrap();

    let pending = h.client.send_message("chat1", "me", "hello").await.unwrap();
    assert_eq!(pending.delivery_status, DeliveryStatus::Pending);

    let raw = timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
    let envelope = ChatEnvelope::from_frame(&raw).unwrap();
    assert_eq!(envelope.kind, "NEW_MESSAGE");

    let confirmed = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(confirmed.id, pending.id);
    assert_eq!(confirmed.delivery_status, DeliveryStatus::Sent);
}

#[tokio::test]
async fn last_subscriber_leaving_closes_the_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<()>();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
        closed_tx.send(()).ok();
    });

    let h = harness(addr);
    let messages = h.client.chat_messages();
    let mut state = h.client.connection_state();
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .unwrap()
        .unwrap();

    drop(messages);
    timeout(WAIT, closed_rx.recv()).await.unwrap();
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Disconnected))
        .await
        .unwrap()
        .unwrap();
}
