//! End-to-end scenarios over the mock transport, on a paused clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chat_types::{ChatId, DeliveryStatus, UserId};
use relaychat_client::{
    ChatClient, ClientConfig, ClientEvent, ConnectionState, EventKind, MockTransport, Session,
    Subscription,
};
use serde_json::json;
use tokio::time::Instant;

const SELF_ID: &str = "u-self";
const PEER_ID: &str = "u-peer";

fn start(transport: &MockTransport) -> ChatClient {
    ChatClient::spawn(
        ClientConfig::new("ws://chat.test/ws/chat/"),
        Session::new(SELF_ID, "token"),
        transport.clone(),
    )
    .unwrap()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn record(client: &ChatClient) -> (Subscription, Arc<Mutex<Vec<ClientEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let sub = client.subscribe_all(move |event| sink.lock().unwrap().push(event.clone()));
    (sub, events)
}

fn sent_contents(transport: &MockTransport) -> Vec<String> {
    transport
        .sent_envelopes()
        .into_iter()
        .filter(|e| e.kind == "message.send")
        .map(|e| e.payload["content"].as_str().unwrap_or_default().to_string())
        .collect()
}

fn inject_peer_message(transport: &MockTransport, id: &str, chat: &str) {
    transport.inject_event(
        "message.new",
        json!({
            "message_id": id,
            "chat_id": chat,
            "sender_id": PEER_ID,
            "message_type": "text",
            "content": format!("body of {id}"),
        }),
    );
}

// =============================================================================
// Send and confirm
// =============================================================================

#[tokio::test(start_paused = true)]
async fn send_then_server_echo_leaves_one_sent_message() {
    let transport = MockTransport::new();
    let client = start(&transport);
    let chat = ChatId::new("C");

    client.connect().await.unwrap();
    client.send_message(&chat, "A").await.unwrap();
    transport.inject_event(
        "message.new",
        json!({"message_id": "S1", "content": "A", "sender_id": SELF_ID, "chat_id": "C"}),
    );
    settle().await;

    let conversation = client.snapshot(&chat).unwrap();
    assert_eq!(conversation.messages().len(), 1);
    let message = &conversation.messages()[0];
    assert_eq!(message.server_id.as_ref().map(|id| id.as_str()), Some("S1"));
    assert_eq!(message.body.text(), Some("A"));
    assert_eq!(message.status, DeliveryStatus::Sent);
    assert!(conversation.messages().iter().all(|m| !m.is_pending()));
}

#[tokio::test(start_paused = true)]
async fn echoed_client_id_confirms_the_right_message() {
    let transport = MockTransport::new();
    let client = start(&transport);
    let chat = ChatId::new("C");
    client.connect().await.unwrap();

    let first = client.send_message(&chat, "same").await.unwrap();
    let second = client.send_message(&chat, "same").await.unwrap();
    transport.inject_event(
        "message.new",
        json!({"message_id": "S2", "content": "same", "sender_id": SELF_ID,
               "chat_id": "C", "client_id": second}),
    );
    settle().await;

    let conversation = client.snapshot(&chat).unwrap();
    assert_eq!(conversation.messages().len(), 2);
    assert!(conversation.find_by_local_id(&first).unwrap().is_pending());
    let confirmed = conversation.find_by_local_id(&second).unwrap();
    assert_eq!(confirmed.server_id.as_ref().map(|id| id.as_str()), Some("S2"));
}

#[tokio::test(start_paused = true)]
async fn duplicate_delivery_is_applied_once() {
    let transport = MockTransport::new();
    let client = start(&transport);
    let chat = ChatId::new("C");
    client.connect().await.unwrap();
    let (_sub, events) = record(&client);

    inject_peer_message(&transport, "S1", "C");
    inject_peer_message(&transport, "S1", "C");
    settle().await;

    let conversation = client.snapshot(&chat).unwrap();
    assert_eq!(conversation.messages().len(), 1);
    assert_eq!(conversation.unread_count(), 1);
    let updates = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.kind() == EventKind::ConversationUpdated)
        .count();
    assert_eq!(updates, 1);
}

// =============================================================================
// Queue and reconnect
// =============================================================================

#[tokio::test(start_paused = true)]
async fn sends_stay_fifo_across_disconnect_and_reconnect() {
    let transport = MockTransport::new();
    let client = start(&transport);
    let chat = ChatId::new("C");

    // Disconnected
    client.send_message(&chat, "1").await.unwrap();

    // Reconnecting
    transport.fail_next_connect("refused");
    let state = client.connect().await.unwrap();
    assert_eq!(state, ConnectionState::Reconnecting { attempt: 1 });
    client.send_message(&chat, "2").await.unwrap();
    assert!(transport.sent_frames().is_empty());

    client
        .wait_for_state(ConnectionState::is_connected)
        .await
        .unwrap();
    client.send_message(&chat, "3").await.unwrap();

    assert_eq!(sent_contents(&transport), vec!["1", "2", "3"]);

    // Lost again mid-session.
    transport.fail_connects(1);
    transport.drop_connection();
    settle().await;
    client.send_message(&chat, "4").await.unwrap();
    client
        .wait_for_state(ConnectionState::is_connected)
        .await
        .unwrap();
    client.send_message(&chat, "5").await.unwrap();

    assert_eq!(sent_contents(&transport), vec!["1", "2", "3", "4", "5"]);
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_then_gives_up_once() {
    let transport = MockTransport::new();
    let client = start(&transport);
    client.connect().await.unwrap();
    let (_sub, events) = record(&client);

    transport.refuse_connections(true);
    let lost_at = Instant::now();
    transport.drop_connection();

    let state = client
        .wait_for_state(|s| *s == ConnectionState::Failed)
        .await
        .unwrap();
    assert_eq!(state, ConnectionState::Failed);
    let waited = lost_at.elapsed();
    assert!(waited >= Duration::from_secs(1 + 2 + 4 + 8 + 16), "gave up after {waited:?}");
    assert!(waited < Duration::from_secs(32), "gave up after {waited:?}");

    let events = events.lock().unwrap().clone();
    let delays: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Reconnecting { attempt, delay } => Some((*attempt, delay.as_secs())),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![(1, 1), (2, 2), (3, 4), (4, 8), (5, 16)]);
    let exhausted: Vec<_> = events
        .iter()
        .filter(|e| e.kind() == EventKind::MaxReconnectReached)
        .collect();
    assert_eq!(exhausted, vec![&ClientEvent::MaxReconnectReached { attempts: 5 }]);

    // One initial connect plus five reconnects, then silence.
    assert_eq!(transport.connect_attempts(), 6);
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(transport.connect_attempts(), 6);
    assert_eq!(client.state(), ConnectionState::Failed);

    // Failed still accepts an explicit connect.
    transport.refuse_connections(false);
    assert_eq!(client.connect().await.unwrap(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn successful_reconnect_resets_attempts() {
    let transport = MockTransport::new();
    let client = start(&transport);
    client.connect().await.unwrap();
    let (_sub, events) = record(&client);

    transport.fail_connects(2);
    transport.drop_connection();
    settle().await;
    client
        .wait_for_state(ConnectionState::is_connected)
        .await
        .unwrap();

    transport.drop_connection();
    settle().await;
    client
        .wait_for_state(ConnectionState::is_connected)
        .await
        .unwrap();

    let attempts: Vec<u32> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Reconnecting { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2, 3, 1]);
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_reconnecting_cancels_retries() {
    let transport = MockTransport::new();
    let client = start(&transport);
    client.connect().await.unwrap();
    let (_sub, events) = record(&client);

    transport.refuse_connections(true);
    transport.drop_connection();
    client
        .wait_for_state(|s| matches!(s, ConnectionState::Reconnecting { .. }))
        .await
        .unwrap();
    let attempts = transport.connect_attempts();

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(transport.connect_attempts(), attempts);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!events
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.kind() == EventKind::MaxReconnectReached));
}

#[tokio::test(start_paused = true)]
async fn disconnect_abandons_a_hanging_connect() {
    let transport = MockTransport::new();
    transport.stall_connects(true);
    let client = start(&transport);

    let connecting = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    client
        .wait_for_state(|s| *s == ConnectionState::Connecting)
        .await
        .unwrap();

    // Well inside the connect timeout.
    let disconnected = tokio::time::timeout(Duration::from_secs(1), client.disconnect()).await;
    assert!(disconnected.is_ok(), "disconnect waited for the connect attempt");
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(
        connecting.await.unwrap().unwrap(),
        ConnectionState::Disconnected
    );

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(transport.connect_attempts(), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn commands_issued_during_a_connect_run_after_it() {
    let transport = MockTransport::new();
    transport.stall_connects(true);
    let client = start(&transport);
    let chat = ChatId::new("C");

    let connecting = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    client
        .wait_for_state(|s| *s == ConnectionState::Connecting)
        .await
        .unwrap();
    let sending = tokio::spawn({
        let client = client.clone();
        let chat = chat.clone();
        async move { client.send_message(&chat, "early").await }
    });
    settle().await;

    transport.stall_connects(false);
    // The stalled attempt times out; the retry after backoff succeeds.
    assert_eq!(
        connecting.await.unwrap().unwrap(),
        ConnectionState::Reconnecting { attempt: 1 }
    );
    sending.await.unwrap().unwrap();
    client
        .wait_for_state(ConnectionState::is_connected)
        .await
        .unwrap();
    settle().await;

    assert_eq!(sent_contents(&transport), vec!["early"]);
}

#[tokio::test(start_paused = true)]
async fn hanging_connect_times_out_into_backoff() {
    let transport = MockTransport::new();
    transport.stall_connects(true);
    let client = start(&transport);
    let (_sub, events) = record(&client);

    let started = Instant::now();
    let state = client.connect().await.unwrap();

    assert_eq!(state, ConnectionState::Reconnecting { attempt: 1 });
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(10), "timed out after {waited:?}");
    assert!(waited < Duration::from_secs(11), "timed out after {waited:?}");
    assert!(events.lock().unwrap().iter().any(|e| matches!(
        e,
        ClientEvent::Error { message, .. } if message.contains("timed out")
    )));

    transport.stall_connects(false);
    client
        .wait_for_state(ConnectionState::is_connected)
        .await
        .unwrap();
    assert_eq!(transport.connect_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn hanging_send_counts_as_a_lost_connection() {
    let transport = MockTransport::new();
    let client = start(&transport);
    let chat = ChatId::new("C");
    client.connect().await.unwrap();

    transport.stall_sends(true);
    client.send_message(&chat, "stuck").await.unwrap();

    assert_eq!(client.state(), ConnectionState::Reconnecting { attempt: 1 });
    assert_eq!(client.queued_len().await.unwrap(), 1);
    assert!(sent_contents(&transport).is_empty());

    transport.stall_sends(false);
    client
        .wait_for_state(ConnectionState::is_connected)
        .await
        .unwrap();
    settle().await;
    assert_eq!(sent_contents(&transport), vec!["stuck"]);
    assert_eq!(client.queued_len().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_runs_only_while_connected() {
    let transport = MockTransport::new();
    let client = start(&transport);
    client.connect().await.unwrap();

    tokio::time::sleep(Duration::from_secs(95)).await;
    assert_eq!(transport.sent_kinds(), vec!["ping", "ping", "ping"]);

    transport.refuse_connections(true);
    transport.drop_connection();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(client.state(), ConnectionState::Failed);
    assert_eq!(transport.sent_kinds().len(), 3);
}

// =============================================================================
// Typing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn keystrokes_debounce_into_one_start_and_one_stop() {
    let transport = MockTransport::new();
    let client = start(&transport);
    let chat = ChatId::new("C");
    client.connect().await.unwrap();

    for _ in 0..6 {
        client.keystroke(&chat).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    client.keystroke(&chat).await.unwrap();
    assert_eq!(transport.sent_kinds(), vec!["typing.start"]);

    tokio::time::sleep(Duration::from_millis(1900)).await;
    assert_eq!(transport.sent_kinds(), vec!["typing.start"]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.sent_kinds(), vec!["typing.start", "typing.stop"]);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.sent_kinds(), vec!["typing.start", "typing.stop"]);
}

#[tokio::test(start_paused = true)]
async fn sending_withdraws_typing() {
    let transport = MockTransport::new();
    let client = start(&transport);
    let chat = ChatId::new("C");
    client.connect().await.unwrap();

    client.keystroke(&chat).await.unwrap();
    client.send_message(&chat, "done").await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(
        transport.sent_kinds(),
        vec!["typing.start", "message.send", "typing.stop"]
    );
}

#[tokio::test(start_paused = true)]
async fn peer_typing_is_tracked_per_conversation() {
    let transport = MockTransport::new();
    let client = start(&transport);
    let chat = ChatId::new("C");
    let peer = UserId::new(PEER_ID);
    client.connect().await.unwrap();

    transport.inject_event("typing.start", json!({"chat_id": "C", "user_id": PEER_ID}));
    settle().await;
    assert!(client.snapshot(&chat).unwrap().is_typing(&peer));
    assert!(client.is_online(&peer));

    transport.inject_event("typing.stop", json!({"chat_id": "C", "user_id": PEER_ID}));
    settle().await;
    assert!(!client.snapshot(&chat).unwrap().is_typing(&peer));
}

// =============================================================================
// Unread
// =============================================================================

#[tokio::test(start_paused = true)]
async fn unread_counts_peer_messages_until_opened() {
    let transport = MockTransport::new();
    let client = start(&transport);
    let chat = ChatId::new("C");
    client.connect().await.unwrap();

    for id in ["S1", "S2", "S3"] {
        inject_peer_message(&transport, id, "C");
    }
    transport.inject_event(
        "message.new",
        json!({"message_id": "S4", "chat_id": "C", "sender_id": SELF_ID, "content": "mine"}),
    );
    settle().await;
    assert_eq!(client.snapshot(&chat).unwrap().unread_count(), 3);

    let request = client.open_conversation(&chat).await.unwrap();
    assert_eq!(client.snapshot(&chat).unwrap().unread_count(), 0);
    assert_eq!(request.up_to.as_ref().map(|id| id.as_str()), Some("S3"));
    assert_eq!(transport.sent_kinds().last().map(String::as_str), Some("message.read"));

    // While open, new peer messages do not count.
    inject_peer_message(&transport, "S5", "C");
    settle().await;
    assert_eq!(client.snapshot(&chat).unwrap().unread_count(), 0);

    client.close_conversation(&chat).await.unwrap();
    inject_peer_message(&transport, "S6", "C");
    settle().await;
    assert_eq!(client.snapshot(&chat).unwrap().unread_count(), 1);
}

// =============================================================================
// Event bus
// =============================================================================

#[tokio::test(start_paused = true)]
async fn unsubscribed_listener_stops_receiving() {
    let transport = MockTransport::new();
    let client = start(&transport);
    client.connect().await.unwrap();
    let hits = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&hits);
    let mut sub = client.subscribe(EventKind::MessageNew, move |_| *counter.lock().unwrap() += 1);

    inject_peer_message(&transport, "S1", "C");
    settle().await;
    sub.unsubscribe();
    inject_peer_message(&transport, "S2", "C");
    settle().await;

    assert_eq!(*hits.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn panicking_listener_does_not_stop_delivery() {
    let transport = MockTransport::new();
    let client = start(&transport);
    client.connect().await.unwrap();
    let _bad = client.subscribe(EventKind::MessageNew, |_| panic!("listener bug"));
    let (_sub, events) = record(&client);

    inject_peer_message(&transport, "S1", "C");
    settle().await;

    assert!(client.state().is_connected());
    assert_eq!(events.lock().unwrap()[0].kind(), EventKind::MessageNew);
}
