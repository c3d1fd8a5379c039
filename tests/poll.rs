//! Tests for the Devman long-poll client: reply parsing, the retry loop over
//! transient transport failures, timestamp renegotiation, and fatal statuses.
//!
//! The loop scenarios run against a scripted raw TCP server because the
//! connection-drop cases cannot be expressed with an HTTP-level mock.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::instrument::WithSubscriber;
use tracing_subscriber::layer::SubscriberExt;

use dvmn_notify::devman::{parse_poll_reply, PollClient, PollOutcome, PollReply, RetryPause};
use dvmn_notify::error::NotifyError;
use dvmn_notify::relay;

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

#[test]
fn parse_timeout_reply_carries_timestamp() {
    let body = br#"{"status": "timeout", "timestamp_to_request": 12345}"#;
    match parse_poll_reply(body).unwrap() {
        PollReply::Timeout { timestamp_to_request } => {
            assert_eq!(timestamp_to_request.unwrap().to_string(), "12345");
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[test]
fn parse_timeout_reply_preserves_fractional_timestamp() {
    // Devman sends fractional epoch seconds; the textual form must survive
    // the round trip into the next request's query param.
    let body = br#"{"status": "timeout", "timestamp_to_request": 1587554583.5}"#;
    match parse_poll_reply(body).unwrap() {
        PollReply::Timeout { timestamp_to_request } => {
            assert_eq!(timestamp_to_request.unwrap().to_string(), "1587554583.5");
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[test]
fn parse_timeout_reply_without_timestamp() {
    let body = br#"{"status": "timeout"}"#;
    match parse_poll_reply(body).unwrap() {
        PollReply::Timeout { timestamp_to_request } => assert!(timestamp_to_request.is_none()),
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[test]
fn parse_found_reply_keeps_attempt_order() {
    let body = br#"{"status": "found", "new_attempts": [
        {"is_negative": true, "lesson_title": "Old", "lesson_url": "/old"},
        {"is_negative": false, "lesson_title": "New", "lesson_url": "/new"}
    ]}"#;
    match parse_poll_reply(body).unwrap() {
        PollReply::Found { new_attempts } => {
            assert_eq!(new_attempts.len(), 2);
            assert_eq!(new_attempts.last().unwrap().lesson_title, "New");
            assert!(!new_attempts.last().unwrap().is_negative);
        }
        other => panic!("expected Found, got {other:?}"),
    }
}

#[test]
fn parse_found_attempt_missing_fields_default() {
    let body = br#"{"status": "found", "new_attempts": [{"lesson_title": "T"}]}"#;
    match parse_poll_reply(body).unwrap() {
        PollReply::Found { new_attempts } => {
            let a = &new_attempts[0];
            assert!(!a.is_negative);
            assert_eq!(a.lesson_title, "T");
            assert_eq!(a.lesson_url, "");
        }
        other => panic!("expected Found, got {other:?}"),
    }
}

#[test]
fn parse_unknown_or_absent_status_is_other() {
    for body in [
        br#"{"status": "whatever"}"#.as_slice(),
        br#"{"something": "else"}"#.as_slice(),
        br#"{}"#.as_slice(),
    ] {
        assert!(matches!(parse_poll_reply(body).unwrap(), PollReply::Other));
    }
}

#[test]
fn parse_unparsable_body_is_schema_error() {
    let err = parse_poll_reply(b"<html>bad gateway</html>").unwrap_err();
    assert!(matches!(err, NotifyError::SchemaParse(_)));
}

#[test]
fn retry_pause_defaults_to_immediate() {
    assert_eq!(RetryPause::default().delay(), Duration::ZERO);
    assert_eq!(
        RetryPause::Fixed(Duration::from_millis(250)).delay(),
        Duration::from_millis(250)
    );
}

// ---------------------------------------------------------------------------
// Scripted server for loop scenarios
// ---------------------------------------------------------------------------

enum Action {
    /// Accept, read the request head, close without responding.
    Drop,
    /// Accept, read the request head, reply with status and JSON body.
    Reply(u16, &'static str),
}

/// Serve a fixed script of per-connection actions, forwarding each received
/// request head (request line + headers) for assertions.
async fn scripted_server(script: Vec<Action>) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/api/user_reviews/", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for action in script {
            let (mut sock, _) = listener.accept().await.unwrap();

            let mut head = String::new();
            let mut buf = [0u8; 4096];
            while !head.contains("\r\n\r\n") {
                match sock.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => head.push_str(&String::from_utf8_lossy(&buf[..n])),
                }
            }
            let _ = tx.send(head);

            match action {
                Action::Drop => drop(sock),
                Action::Reply(status, body) => {
                    let response = format!(
                        "HTTP/1.1 {status} OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = sock.write_all(response.as_bytes()).await;
                    let _ = sock.shutdown().await;
                }
            }
        }
    });

    (url, rx)
}

fn poll_client(url: &str) -> PollClient {
    let http = reqwest::Client::new();
    PollClient::new(http, url, "test-token", Duration::from_secs(5))
}

fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
    let mut heads = Vec::new();
    while let Ok(head) = rx.try_recv() {
        heads.push(head);
    }
    heads
}

const FOUND_BODY: &str =
    r#"{"status":"found","new_attempts":[{"is_negative":false,"lesson_title":"T1","lesson_url":"/x"}]}"#;

#[tokio::test]
async fn poll_returns_found_and_sends_auth_header() {
    let (url, mut rx) = scripted_server(vec![Action::Reply(200, FOUND_BODY)]).await;

    let outcome = poll_client(&url).poll().await.unwrap();
    let PollOutcome::Found(attempts) = outcome else {
        panic!("expected Found");
    };
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].lesson_title, "T1");

    let heads = drain(&mut rx);
    assert_eq!(heads.len(), 1);
    assert!(heads[0].starts_with("GET /api/user_reviews/ HTTP/1.1"));
    assert!(heads[0].to_lowercase().contains("authorization: token test-token"));
}

#[tokio::test]
async fn timeout_reply_renegotiates_timestamp_param() {
    let (url, mut rx) = scripted_server(vec![
        Action::Reply(200, r#"{"status":"timeout","timestamp_to_request":12345}"#),
        Action::Reply(200, FOUND_BODY),
    ])
    .await;

    let outcome = poll_client(&url).poll().await.unwrap();
    assert!(matches!(outcome, PollOutcome::Found(_)));

    let heads = drain(&mut rx);
    assert_eq!(heads.len(), 2, "one initial request plus one renegotiated");
    assert!(
        heads[0].starts_with("GET /api/user_reviews/ HTTP/1.1"),
        "first request must carry no params: {}",
        heads[0]
    );
    assert!(
        heads[1].starts_with("GET /api/user_reviews/?timestamp=12345 HTTP/1.1"),
        "second request must carry only the server-supplied timestamp: {}",
        heads[1]
    );
}

#[tokio::test]
async fn transient_errors_retry_until_success() {
    // Three dropped connections, then success: exactly four requests and a
    // debug record per retry.
    let (url, mut rx) = scripted_server(vec![
        Action::Drop,
        Action::Drop,
        Action::Drop,
        Action::Reply(200, FOUND_BODY),
    ])
    .await;

    let (layer, mut log_rx) = relay::channel();
    let subscriber = tracing_subscriber::registry().with(layer);

    let outcome = poll_client(&url)
        .poll()
        .with_subscriber(subscriber)
        .await
        .unwrap();
    assert!(matches!(outcome, PollOutcome::Found(_)));

    assert_eq!(drain(&mut rx).len(), 4);

    let mut retry_records = 0;
    while let Ok(line) = log_rx.try_recv() {
        if line.contains("transient poll error") {
            retry_records += 1;
        }
    }
    assert_eq!(retry_records, 3);
}

#[tokio::test]
async fn http_error_status_is_fatal_for_the_call() {
    let (url, mut rx) =
        scripted_server(vec![Action::Reply(500, r#"{"detail":"boom"}"#)]).await;

    let err = poll_client(&url).poll().await.unwrap_err();
    match &err {
        NotifyError::Upstream { status, .. } => assert_eq!(*status, 500),
        other => panic!("expected Upstream, got {other:?}"),
    }
    assert!(!err.is_transient());
    assert_eq!(err.user_message(), dvmn_notify::error::POLL_FAILED_MESSAGE);
    assert_eq!(drain(&mut rx).len(), 1, "no retry after an HTTP error status");
}

#[tokio::test]
async fn unparsable_success_body_is_fatal_for_the_call() {
    let (url, _rx) = scripted_server(vec![Action::Reply(200, "not json")]).await;

    let err = poll_client(&url).poll().await.unwrap_err();
    assert!(matches!(err, NotifyError::SchemaParse(_)));
    assert_eq!(err.user_message(), dvmn_notify::error::POLL_FAILED_MESSAGE);
}

#[tokio::test]
async fn unknown_status_terminates_with_nothing_new() {
    let (url, _rx) = scripted_server(vec![Action::Reply(200, r#"{"status":"resolved"}"#)]).await;

    let outcome = poll_client(&url).poll().await.unwrap();
    assert!(matches!(outcome, PollOutcome::NothingNew));
}
