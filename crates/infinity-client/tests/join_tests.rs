//! End-to-end join tests against a mock conference node.
//!
//! DNS is scripted to point the conference domain at a local wiremock
//! server; everything after discovery goes over real HTTP.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use common::types::{CallId, ConferenceAddress, ParticipantId};
use infinity_client::config::{EventSourceConfig, HttpConfig};
use infinity_client::dns::DnsResolver;
use infinity_client::errors::{AuthError, NodeError, SessionError, SignalingError};
use infinity_client::http::HttpTransport;
use infinity_client::node::{HttpNodeProbe, NodeSelector};
use infinity_client::{
    ClientConfig, ConferenceEvent, JoinError, JoinErrorKind, JoinOptions, SessionState,
    SignalingClient,
};
use infinity_test_utils::{conference_path, srv_rdata, ScriptedDnsLookup, TestConferenceServer};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

const ALIAS: &str = "meet.alice";

const LOCAL_SDP: &str = "v=0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=ice-ufrag:abcd\r\n\
a=ice-pwd:secretpassword\r\n";

fn address() -> ConferenceAddress {
    ConferenceAddress::parse("meet.alice@example.com").unwrap()
}

/// Client whose DNS points `example.com` at `server`.
fn client_for(server: &TestConferenceServer) -> SignalingClient {
    client_with(server, ClientConfig::default())
}

fn client_with(server: &TestConferenceServer, config: ClientConfig) -> SignalingClient {
    let (host, port) = server.host_port();
    let lookup = ScriptedDnsLookup::new()
        .with_srv("_pexapp._tcp.example.com", vec![srv_rdata(10, 0, port, &host)]);

    let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
    let selector = NodeSelector::new(
        DnsResolver::new(Arc::new(lookup), Duration::from_secs(5)),
        Arc::new(HttpNodeProbe::new(transport.clone())),
        false,
    );
    SignalingClient::with_components(config, selector, transport)
}

#[tokio::test]
async fn test_join_receive_event_and_leave() {
    let participant = ParticipantId::new();
    let server = TestConferenceServer::start(ALIAS).await;
    server.mount_status(200).await;
    server.mount_request_token(participant, 120).await;
    server
        .mount_events(
            "initial-token",
            "id: 1\nevent: message_received\n\
             data: {\"origin\":\"Alice\",\"uuid\":\"a1\",\"type\":\"text/plain\",\"payload\":\"hello\"}\n\n",
        )
        .await;
    server.mount_disconnect(participant).await;
    server.mount_release_token(1).await;

    let client = client_for(&server);
    let mut session = client
        .join(&address(), JoinOptions::new("Bob"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.node(), &server.node_url());
    let credential = session.credential().await.unwrap();
    assert_eq!(credential.participant_id(), participant);
    assert!(credential.chat_enabled());

    let event = tokio::time::timeout(Duration::from_secs(5), session.next_event())
        .await
        .expect("event arrives")
        .unwrap()
        .unwrap();
    match event {
        ConferenceEvent::MessageReceived(message) => {
            assert_eq!(message.sender_name, "Alice");
            assert_eq!(message.payload, "hello");
        }
        other => unreachable!("unexpected event {other:?}"),
    }

    session.leave().await;
    assert_eq!(client.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_join_twice_while_active() {
    let server = TestConferenceServer::start(ALIAS).await;
    server.mount_status(200).await;
    server.mount_request_token(ParticipantId::new(), 120).await;

    let client = client_for(&server);
    let _session = client
        .join(&address(), JoinOptions::new("Bob"), &CancellationToken::new())
        .await
        .unwrap();

    let err = client
        .join(&address(), JoinOptions::new("Bob"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, JoinError::InvalidState));
    assert_eq!(err.kind(), JoinErrorKind::Internal);
}

#[tokio::test]
async fn test_pin_rejection_fails_session() {
    let server = TestConferenceServer::start(ALIAS).await;
    server.mount_status(200).await;
    server
        .mount_token_rejection(json!({"pin": "required", "guest_pin": "required"}))
        .await;

    let client = client_for(&server);
    let err = client
        .join(&address(), JoinOptions::new("Bob"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        JoinError::Auth(AuthError::PinRequired {
            guest_pin_required: true
        })
    ));
    assert_eq!(err.kind(), JoinErrorKind::Rejected);
    assert!(matches!(client.state(), SessionState::Failed(_)));
}

#[tokio::test]
async fn test_node_in_maintenance_is_not_found() {
    let server = TestConferenceServer::start(ALIAS).await;
    server.mount_status(503).await;

    let client = client_for(&server);
    let err = client
        .join(&address(), JoinOptions::new("Bob"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, JoinError::Node(NodeError::NoReachableNode { .. })));
    assert_eq!(err.kind(), JoinErrorKind::NotFound);
}

#[tokio::test]
async fn test_join_cancelled_before_start() {
    let server = TestConferenceServer::start(ALIAS).await;
    server.mount_status(200).await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let client = client_for(&server);
    let err = client
        .join(&address(), JoinOptions::new("Bob"), &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), JoinErrorKind::Cancelled);
    // A cancelled join can be retried.
    assert!(client.state().can_join());
}

#[tokio::test]
async fn test_call_signaling() {
    let participant = ParticipantId::new();
    let call = CallId::new();
    let server = TestConferenceServer::start(ALIAS).await;
    server.mount_status(200).await;
    server.mount_request_token(participant, 120).await;
    server.mount_new_call(participant, call, "v=0 remote").await;
    server.mount_call_action(participant, call, "new_candidate").await;
    server.mount_call_action(participant, call, "ack").await;

    let client = client_for(&server);
    let session = client
        .join(&address(), JoinOptions::new("Bob"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        session.ack(None).await,
        Err(SignalingError::NoCall)
    );

    let remote = session.send(LOCAL_SDP).await.unwrap();
    assert_eq!(remote, "v=0 remote");
    assert_eq!(session.call_id(), Some(call));

    session.ack(None).await.unwrap();
    session
        .submit_candidate(
            "candidate:1 1 udp 2122260223 192.0.2.5 50000 typ host ufrag abcd",
            "0",
        )
        .await
        .unwrap();

    let err = session
        .submit_candidate(
            "candidate:2 1 udp 2122260223 192.0.2.5 50001 typ host ufrag zzzz",
            "0",
        )
        .await
        .unwrap_err();
    assert_eq!(err, SignalingError::UnknownUfrag);

    let candidate_requests = server
        .mock_server()
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path().ends_with("/new_candidate"))
        .map(|r| serde_json::from_slice::<serde_json::Value>(&r.body).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(
        candidate_requests,
        vec![json!({
            "candidate": "candidate:1 1 udp 2122260223 192.0.2.5 50000 typ host ufrag abcd",
            "mid": "0",
            "ufrag": "abcd",
            "pwd": "secretpassword"
        })]
    );
}

fn chat_event(id: u32, payload: &str) -> String {
    format!(
        "id: {id}\nevent: message_received\n\
         data: {{\"origin\":\"Alice\",\"uuid\":\"a1\",\"type\":\"text/plain\",\"payload\":\"{payload}\"}}\n\n"
    )
}

#[tokio::test]
async fn test_resubscribe_after_rejected_stream() {
    let server = TestConferenceServer::start(ALIAS).await;
    server.mount_status(200).await;
    server.mount_request_token(ParticipantId::new(), 120).await;

    let events_path = format!("{}/events", conference_path(ALIAS));
    Mock::given(method("GET"))
        .and(path(events_path.clone()))
        .and(header("last-event-id", "7"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(server.mock_server())
        .await;
    Mock::given(method("GET"))
        .and(path(events_path.clone()))
        .and(header("last-event-id", "7"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(chat_event(8, "second"), "text/event-stream"),
        )
        .mount(server.mock_server())
        .await;
    Mock::given(method("GET"))
        .and(path(events_path.clone()))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(chat_event(7, "first"), "text/event-stream"),
        )
        .up_to_n_times(1)
        .mount(server.mock_server())
        .await;

    let config = ClientConfig::default().with_event_source(EventSourceConfig {
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        max_retries: 3,
        jitter: 0.0,
    });
    let client = client_with(&server, config);
    let mut session = client
        .join(&address(), JoinOptions::new("Bob"), &CancellationToken::new())
        .await
        .unwrap();

    let payload_of = |event: ConferenceEvent| match event {
        ConferenceEvent::MessageReceived(message) => message.payload,
        other => unreachable!("unexpected event {other:?}"),
    };

    let first = tokio::time::timeout(Duration::from_secs(5), session.next_event())
        .await
        .expect("first event arrives")
        .unwrap()
        .unwrap();
    assert_eq!(payload_of(first), "first");

    let rejected = tokio::time::timeout(Duration::from_secs(5), session.next_event())
        .await
        .expect("rejection arrives")
        .unwrap()
        .unwrap_err();
    assert!(rejected.is_auth_failure());
    assert_eq!(session.state(), SessionState::Active);

    session.resubscribe().await.unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), session.next_event())
        .await
        .expect("event after resubscribe arrives")
        .unwrap()
        .unwrap();
    assert_eq!(payload_of(second), "second");

    let resumed_from = server
        .mock_server()
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == events_path)
        .map(|r| {
            r.headers
                .get("last-event-id")
                .map(|v| v.to_str().unwrap().to_string())
        })
        .collect::<Vec<_>>();
    assert_eq!(
        resumed_from.get(..3).unwrap(),
        [None, Some("7".to_string()), Some("7".to_string())]
    );
}

#[tokio::test]
async fn test_expired_credential_is_released_when_activation_fails() {
    let server = TestConferenceServer::start(ALIAS).await;
    server.mount_status(200).await;
    server.mount_request_token(ParticipantId::new(), 0).await;
    server.mount_release_token(1).await;

    let client = client_for(&server);
    let err = client
        .join(&address(), JoinOptions::new("Bob"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        JoinError::Session(SessionError::CredentialExpired)
    ));
    assert!(matches!(client.state(), SessionState::Failed(_)));
    server.mock_server().verify().await;
}
