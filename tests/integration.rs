//! End-to-end scenarios over real loopback TCP sockets, covering the
//! literal scenarios in §8: local plain delivery, local encrypted delivery,
//! deferred delivery to an offline recipient, and login rejection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use relaymail::auth::AuthStore;
use relaymail::client::{self, ConsoleSink};
use relaymail::protocol::{MailMessage, SmtpMailMessage};
use relaymail::queue::QueueProcessor;
use relaymail::server::{Dispatcher, Listener};
use relaymail::sink::{MailSink, Severity};

async fn free_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// A sink that records every delivery it receives instead of printing it, so
/// tests can assert on the actual content that made it through the pipeline.
#[derive(Clone)]
struct CapturingSink {
    received: Arc<StdMutex<Vec<SmtpMailMessage>>>,
}

impl CapturingSink {
    fn new() -> Self {
        Self {
            received: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    fn received(&self) -> Vec<SmtpMailMessage> {
        self.received.lock().unwrap().clone()
    }
}

impl MailSink for CapturingSink {
    fn show_dialog(&self, _text: &str, _title: &str, _severity: Severity) {}
    fn log(&self, _line: &str) {}

    fn on_mail_received(&self, message: &SmtpMailMessage) {
        self.received.lock().unwrap().push(message.clone());
    }

    fn on_disconnect(&self) {}
    fn on_user_disconnect(&self, _username: &str) {}
}

struct Harness {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    listening: Arc<std::sync::atomic::AtomicBool>,
    shutdown_notify: Arc<tokio::sync::Notify>,
}

async fn start_server(tmp_label: &str) -> Harness {
    let addr = free_addr().await;

    let auth = Arc::new(AuthStore::new());
    auth.add_user("alice", "hunter2").unwrap();
    auth.add_user("bob", "hunter3").unwrap();
    auth.add_user("carol", "hunter4").unwrap();

    let mut hostnames = std::collections::HashSet::new();
    hostnames.insert("localhost".to_string());
    hostnames.insert(addr.ip().to_string());

    let (incoming, outgoing) = relaymail::server::new_queues();
    let dispatcher = Arc::new(Dispatcher::new(hostnames, incoming.clone(), outgoing.clone()));
    let sessions = Arc::new(StdMutex::new(HashMap::new()));

    let dir = std::env::temp_dir().join(format!("relaymail-it-{tmp_label}-{}", std::process::id()));
    let queue_processor = Arc::new(QueueProcessor::new(
        incoming,
        outgoing,
        sessions.clone(),
        dir.join("logs"),
        dir.join("incoming.queue"),
        dir.join("outgoing.queue"),
    ));

    let listener = Listener::new(addr, auth, true, sessions, dispatcher);
    let listening = listener.listening_flag();
    let shutdown_notify = listener.shutdown_notify();

    tokio::spawn(async move {
        let _ = listener.run().await;
    });

    let running = Arc::new(AtomicBool::new(true));
    let running_for_task = running.clone();
    tokio::spawn(async move {
        queue_processor.run(running_for_task).await;
    });

    // Give the listener a moment to bind before the first connect.
    tokio::time::sleep(Duration::from_millis(50)).await;

    Harness {
        addr,
        running,
        listening,
        shutdown_notify,
    }
}

impl Harness {
    fn stop(&self) {
        self.running.store(false, std::sync::atomic::Ordering::SeqCst);
        self.listening.store(false, std::sync::atomic::Ordering::SeqCst);
        self.shutdown_notify.notify_one();
    }
}

#[tokio::test]
async fn scenario_a_local_delivery_plain() {
    let harness = start_server("scenario-a").await;

    let bob_sink = Arc::new(CapturingSink::new());
    let (bob_handle, _bob_task) = client::connect(
        &harness.addr.ip().to_string(),
        harness.addr.port(),
        "bob.example",
        "bob",
        "hunter3",
        bob_sink.clone(),
    )
    .await
    .unwrap();
    assert!(bob_handle.is_connected());

    let (alice_handle, _alice_task) = client::connect(
        &harness.addr.ip().to_string(),
        harness.addr.port(),
        "alice.example",
        "alice",
        "hunter2",
        Arc::new(ConsoleSink),
    )
    .await
    .unwrap();

    let mail = MailMessage::new()
        .with_sender("alice@srv")
        .with_to(vec!["bob@srv".to_string()])
        .with_subject("hi")
        .with_body("hello");
    client::submit(
        &alice_handle,
        "alice@srv".to_string(),
        vec![format!("bob@{}", harness.addr.ip())],
        mail,
    );

    tokio::time::sleep(Duration::from_secs(1)).await;

    let delivered = bob_sink.received();
    assert_eq!(delivered.len(), 1, "bob should have received exactly one message");
    assert_eq!(delivered[0].mail.sender, "alice@srv");
    assert_eq!(delivered[0].mail.subject, "hi");
    assert_eq!(delivered[0].mail.body, "hello");
    assert!(!delivered[0].mail.encrypted);

    harness.stop();
}

#[tokio::test]
async fn scenario_b_local_delivery_encrypted_round_trips_cipher() {
    let harness = start_server("scenario-b").await;

    let bob_sink = Arc::new(CapturingSink::new());
    let (bob_handle, _bob_task) = client::connect(
        &harness.addr.ip().to_string(),
        harness.addr.port(),
        "bob.example",
        "bob",
        "hunter3",
        bob_sink.clone(),
    )
    .await
    .unwrap();
    assert!(bob_handle.is_connected());

    let (alice_handle, _alice_task) = client::connect(
        &harness.addr.ip().to_string(),
        harness.addr.port(),
        "alice.example",
        "alice",
        "hunter2",
        Arc::new(ConsoleSink),
    )
    .await
    .unwrap();

    let mail = MailMessage::new()
        .with_encrypted(true)
        .with_sender("alice@srv")
        .with_to(vec!["bob@srv".to_string()])
        .with_subject("secret")
        .with_body("abc xyz");
    client::submit(
        &alice_handle,
        "alice@srv".to_string(),
        vec![format!("bob@{}", harness.addr.ip())],
        mail,
    );

    tokio::time::sleep(Duration::from_secs(1)).await;

    let delivered = bob_sink.received();
    assert_eq!(delivered.len(), 1, "bob should have received exactly one message");
    assert!(delivered[0].mail.encrypted);
    assert_eq!(delivered[0].mail.sender, "alice@srv");
    // The body crossed two encrypted hops (alice -> server -> bob) and must
    // come out the other side as the original plaintext, not the substituted
    // wire form.
    assert_eq!(delivered[0].mail.body, "abc xyz");

    harness.stop();
}

#[tokio::test]
async fn scenario_e_authentication_rejection_closes_socket() {
    let harness = start_server("scenario-e").await;

    let result = client::connect(
        &harness.addr.ip().to_string(),
        harness.addr.port(),
        "mallory.example",
        "mallory",
        "wrong-password",
        Arc::new(ConsoleSink),
    )
    .await;

    assert!(result.is_err());
    harness.stop();
}

#[tokio::test]
async fn scenario_c_deferred_delivery_retries_until_recipient_logs_in() {
    let harness = start_server("scenario-c").await;

    let (alice_handle, _alice_task) = client::connect(
        &harness.addr.ip().to_string(),
        harness.addr.port(),
        "alice.example",
        "alice",
        "hunter2",
        Arc::new(ConsoleSink),
    )
    .await
    .unwrap();

    let mail = MailMessage::new()
        .with_sender("alice@srv")
        .with_to(vec!["carol@srv".to_string()])
        .with_subject("later")
        .with_body("catch up when you're back");
    client::submit(
        &alice_handle,
        "alice@srv".to_string(),
        vec![format!("carol@{}", harness.addr.ip())],
        mail,
    );

    // carol is offline; give the processor a couple of ticks to retry.
    tokio::time::sleep(Duration::from_millis(800)).await;

    let carol_sink = Arc::new(CapturingSink::new());
    let (_carol_handle, _carol_task) = client::connect(
        &harness.addr.ip().to_string(),
        harness.addr.port(),
        "carol.example",
        "carol",
        "hunter4",
        carol_sink.clone(),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;

    let delivered = carol_sink.received();
    assert_eq!(delivered.len(), 1, "carol should receive the deferred message once logged in");
    assert_eq!(delivered[0].mail.sender, "alice@srv");
    assert_eq!(delivered[0].mail.subject, "later");
    assert_eq!(delivered[0].mail.body, "catch up when you're back");

    harness.stop();
}
