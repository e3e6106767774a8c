mod common;

use common::{connection_for, negotiate_body, negotiate_server, MockTransport};
use serde_json::{json, Value};
use signalr_jabbr::jabbr::{JabbrClient, JabbrEvent};
use signalr_jabbr::log::MemorySink;
use signalr_jabbr::{ConnectionState, SignalRError};
use std::sync::Arc;
use wiremock::MockServer;

/// Replies to `Join` with `join_result` and to every `Send` with `true`.
fn chat_server(join_result: Value) -> MockTransport {
    MockTransport::new().responding(move |frame| {
        let id = frame.get("I")?.clone();
        match frame.get("M")?.as_str()? {
            "Join" => Some(json!({"I": id, "R": join_result})),
            "Send" => Some(json!({"I": id, "R": true})),
            "CheckStatus" => Some(json!({"I": id, "R": "ok"})),
            _ => None,
        }
    })
}

async fn client(transport: Arc<MockTransport>) -> (JabbrClient, MemorySink, MockServer) {
    let server = negotiate_server(negotiate_body(Some(30.0), "1.1")).await;
    let (conn, sink, _monitor) = connection_for(&server);
    (JabbrClient::with_connection(conn, transport), sink, server)
}

fn sent_content(frame: &Value) -> &str {
    frame["A"][0]["content"].as_str().unwrap()
}

#[tokio::test]
async fn connect_sets_nick_for_new_users() {
    let transport = Arc::new(chat_server(json!(false)));
    let (client, sink, _server) = client(transport.clone()).await;

    let result = client.connect("bob", "secret").await.unwrap();

    assert_eq!(result, json!(true));
    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0]["H"], json!("chat"));
    assert_eq!(sent[0]["M"], json!("Join"));
    assert_eq!(sent[1]["M"], json!("Send"));
    assert_eq!(sent_content(&sent[1]), "/nick bob secret");
    assert_eq!(sent[1]["A"][0]["id"].as_str().unwrap().len(), 36);
    assert!(sink.lines().iter().any(|l| l.ends_with("Joined hub!")));
}

#[tokio::test]
async fn connect_skips_nick_for_known_users() {
    let transport = Arc::new(chat_server(json!(true)));
    let (client, _sink, _server) = client(transport.clone()).await;

    let result = client.connect("bob", "secret").await.unwrap();

    assert_eq!(result, json!(true));
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(
        client.hub().connection().state(),
        ConnectionState::Connected
    );
}

#[tokio::test]
async fn connect_reports_join_failure() {
    let transport = Arc::new(MockTransport::new().responding(|frame| {
        Some(json!({"I": frame.get("I")?.clone(), "E": "banned"}))
    }));
    let (client, sink, _server) = client(transport).await;

    let result = client.connect("bob", "secret").await;

    assert!(matches!(result, Err(SignalRError::Invocation { message, .. }) if message == "banned"));
    assert!(sink.lines().iter().any(|l| l.contains("Failed to join hub")));
}

#[tokio::test]
async fn pushed_messages_become_events() {
    let transport = Arc::new(chat_server(json!(true)));
    let (client, _sink, _server) = client(transport).await;
    let mut events = client.subscribe();
    client.connect("bob", "secret").await.unwrap();
    client.chat().set_state("name", json!("bob"));

    client.hub().connection().handle_received(json!({
        "H": "chat",
        "M": "addMessage",
        "A": [
            {"User": {"Name": "Bob"}, "Content": "hi @alice", "Id": "m1", "When": "/Date(1354024396123)/"},
            "lobby"
        ]
    }));
    client.hub().connection().handle_received(json!({
        "H": "chat",
        "M": "changeNote",
        "A": [{"Name": "alice", "Note": "away"}, "lobby"]
    }));

    match events.try_recv().unwrap() {
        JabbrEvent::MessageReceived { message, room } => {
            assert_eq!(room, "lobby");
            assert_eq!(message.content, "hi @alice");
            assert_eq!(message.id, "m1");
            assert!(message.is_own);
            assert_eq!(message.when.unwrap().timestamp_millis(), 1_354_024_396_123);
        }
        other => panic!("Expected MessageReceived, got {other:?}"),
    }
    assert_eq!(
        events.try_recv().unwrap(),
        JabbrEvent::ChangeNote {
            user: json!({"Name": "alice", "Note": "away"}),
            room: "lobby".into(),
        }
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn own_messages_follow_nick_changes() {
    let transport = Arc::new(chat_server(json!(true)));
    let (client, _sink, _server) = client(transport).await;
    let mut events = client.subscribe();
    client.connect("bob", "secret").await.unwrap();

    let push_from_bob = || {
        client.hub().connection().handle_received(json!({
            "H": "chat",
            "M": "addMessage",
            "A": [{"User": {"Name": "bob"}, "Content": "hi", "Id": "m1"}, "lobby"]
        }));
    };
    let next_is_own = |events: &mut tokio::sync::broadcast::Receiver<JabbrEvent>| {
        match events.try_recv().unwrap() {
            JabbrEvent::MessageReceived { message, .. } => message.is_own,
            other => panic!("Expected MessageReceived, got {other:?}"),
        }
    };

    push_from_bob();
    assert!(!next_is_own(&mut events));

    client.chat().set_state("name", json!("bob"));
    push_from_bob();
    push_from_bob();
    assert!(next_is_own(&mut events));
    assert!(next_is_own(&mut events));

    client.chat().set_state("name", json!("alice"));
    push_from_bob();
    assert!(!next_is_own(&mut events));
}

#[tokio::test]
async fn room_commands_carry_the_right_room() {
    let transport = Arc::new(chat_server(json!(true)));
    let (client, sink, _server) = client(transport.clone()).await;
    client.connect("bob", "secret").await.unwrap();
    client.chat().set_state("activeRoom", json!("lobby"));

    assert_eq!(client.join_room("rust").await.unwrap(), json!(true));
    assert_eq!(client.leave_room("lobby").await.unwrap(), json!(true));
    client.say("hello", "rust").await.unwrap().await.unwrap();

    let sent = transport.sent();
    let join = &sent[1]["A"][0];
    assert_eq!(join["content"], json!("/join rust"));
    assert_eq!(join["room"], json!("lobby"));
    let leave = &sent[2]["A"][0];
    assert_eq!(leave["content"], json!("/leave lobby"));
    assert_eq!(leave["room"], json!("lobby"));
    let say = &sent[3]["A"][0];
    assert_eq!(say["content"], json!("hello"));
    assert_eq!(say["room"], json!("rust"));
    assert!(sink.lines().iter().any(|l| l.ends_with("Joined rust")));
}

#[tokio::test]
async fn profile_commands() {
    let transport = Arc::new(chat_server(json!(true)));
    let (client, _sink, _server) = client(transport.clone()).await;
    client.connect("bob", "secret").await.unwrap();

    client.set_flag("nz").await.unwrap().await.unwrap();
    client.set_gravatar("bob@example.com").await.unwrap().await.unwrap();
    client.set_note("gone fishing").await.unwrap().await.unwrap();
    let status = client.check_status().await.unwrap().await.unwrap();

    let sent = transport.sent();
    let contents: Vec<&str> = sent[1..4].iter().map(sent_content).collect();
    assert_eq!(
        contents,
        vec!["/flag nz", "/gravatar bob@example.com", "/note gone fishing"]
    );
    assert!(sent[1]["A"][0].get("room").is_none());
    assert_eq!(sent[4]["M"], json!("CheckStatus"));
    assert_eq!(status, json!("ok"));
}

#[tokio::test]
async fn disconnect_stops_the_hub_connection() {
    let transport = Arc::new(chat_server(json!(true)));
    let (client, _sink, _server) = client(transport.clone()).await;
    client.connect("bob", "secret").await.unwrap();

    client.disconnect().await.unwrap();

    assert_eq!(
        client.hub().connection().state(),
        ConnectionState::Disconnected
    );
    let calls = transport.calls();
    assert_eq!(&calls[calls.len() - 2..], &["abort", "stop"]);
}

#[test]
fn version_matches_package() {
    assert_eq!(signalr_jabbr::VERSION, "1.1.0");
}
