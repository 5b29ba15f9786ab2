//! Session lifecycle tests over the loopback network
//!
//! One device runs a `SessionManager`; the other side is driven directly through
//! the raw loopback transport so every byte on the wire can be checked.

use std::sync::Arc;
use std::time::Duration;

use bluechat_core::{
    BluechatError, Connection, FrameCodec, PeerAddress, SecurityMode, ServiceId, SessionConfig,
    SessionState, TransportProvider,
};
use bluechat_harness::{LoopbackNetwork, LoopbackTransport};
use bluechat_session::{
    spawn_dispatcher, Endpoint, EventReceiver, NotificationSink, SessionEvent, SessionManager,
    CONNECTION_LOST_MESSAGE, CONNECT_FAILED_MESSAGE, WRITE_FAILED_MESSAGE,
};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

const SERVICE: ServiceId = ServiceId::from_u128(0x0000_1101_0000_1000_8000_0080_5f9b_34fb);
const HOST: PeerAddress = PeerAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x01]);
const REMOTE: PeerAddress = PeerAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x02]);
const THIRD: PeerAddress = PeerAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x03]);
const WAIT: Duration = Duration::from_secs(2);

struct Fixture {
    network: LoopbackNetwork,
    host: LoopbackTransport,
    remote: LoopbackTransport,
    manager: SessionManager,
    events: EventReceiver,
}

fn fixture() -> Fixture {
    let network = LoopbackNetwork::new();
    let host = network.device(HOST);
    let remote = network.device(REMOTE);
    let (manager, events) =
        SessionManager::new(Arc::new(host.clone()), SessionConfig::default()).unwrap();
    Fixture {
        network,
        host,
        remote,
        manager,
        events,
    }
}

async fn next_event(events: &mut EventReceiver) -> SessionEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("session event channel closed")
}

async fn assert_quiet(events: &mut EventReceiver) {
    let pending = timeout(Duration::from_millis(100), events.recv()).await;
    assert!(pending.is_err(), "unexpected event: {pending:?}");
}

/// Listen on the host and dial it from the remote, returning the remote's socket
async fn connect_inbound(fx: &mut Fixture) -> Connection {
    fx.manager.start_listening(SERVICE, SecurityMode::Insecure).await;
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::Listening)
    );
    assert!(fx.network.wait_for_listener(HOST, SERVICE, WAIT).await);

    let connection = fx
        .remote
        .connect_to(HOST, SERVICE, SecurityMode::Insecure)
        .await
        .unwrap();
    assert_eq!(next_event(&mut fx.events).await, SessionEvent::ConnectedTo(REMOTE));
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::Connected)
    );
    connection
}

#[tokio::test]
async fn test_listen_exchange_and_recover_after_forced_close() {
    let mut fx = fixture();
    let connection = connect_inbound(&mut fx).await;
    let (_, mut reader, mut writer) = connection.into_split();

    writer.write_all(&[0, 0, 0, 3, 1, 2, 3]).await.unwrap();
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::MessageRead(Bytes::from_static(&[1, 2, 3]))
    );

    fx.manager.write(&[9, 8]).await.unwrap();
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::MessageWritten(Bytes::from_static(&[0, 0, 0, 2, 9, 8]))
    );
    let mut wire = [0u8; 6];
    reader.read_exact(&mut wire).await.unwrap();
    assert_eq!(wire, [0, 0, 0, 2, 9, 8]);

    fx.remote.force_close();

    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::Error(CONNECTION_LOST_MESSAGE.to_string())
    );
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::Listening)
    );
    assert_eq!(fx.manager.state().await, SessionState::Listening);
    assert_eq!(
        fx.manager.endpoint().await,
        Some(Endpoint::new(SERVICE, SecurityMode::Insecure))
    );
    assert!(fx.network.wait_for_listener(HOST, SERVICE, WAIT).await);
}

#[tokio::test]
async fn test_recovered_session_accepts_a_new_peer() {
    let mut fx = fixture();
    let first = connect_inbound(&mut fx).await;
    drop(first);

    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::Error(CONNECTION_LOST_MESSAGE.to_string())
    );
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::Listening)
    );
    assert!(fx.network.wait_for_listener(HOST, SERVICE, WAIT).await);

    let _second = fx
        .remote
        .connect_to(HOST, SERVICE, SecurityMode::Insecure)
        .await
        .unwrap();
    assert_eq!(next_event(&mut fx.events).await, SessionEvent::ConnectedTo(REMOTE));
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::Connected)
    );
    assert_eq!(fx.manager.peer().await, Some(REMOTE));
}

#[tokio::test]
async fn test_repeated_start_listening_keeps_one_listener() {
    let mut fx = fixture();
    fx.manager.start_listening(SERVICE, SecurityMode::Insecure).await;
    fx.manager.start_listening(SERVICE, SecurityMode::Insecure).await;

    for _ in 0..2 {
        assert_eq!(
            next_event(&mut fx.events).await,
            SessionEvent::StateChanged(SessionState::Listening)
        );
    }
    assert!(fx.network.wait_for_listener(HOST, SERVICE, WAIT).await);

    let _connection = fx
        .remote
        .connect_to(HOST, SERVICE, SecurityMode::Insecure)
        .await
        .unwrap();
    assert_eq!(next_event(&mut fx.events).await, SessionEvent::ConnectedTo(REMOTE));
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::Connected)
    );
    assert_quiet(&mut fx.events).await;
}

#[tokio::test]
async fn test_dial_while_connected_is_turned_away() {
    let mut fx = fixture();
    let _first = connect_inbound(&mut fx).await;

    let third = fx.network.device(THIRD);
    match third.connect_to(HOST, SERVICE, SecurityMode::Insecure).await {
        Err(_) => {}
        Ok(connection) => {
            let (_, mut reader, _writer) = connection.into_split();
            let mut buf = [0u8; 1];
            let read = timeout(WAIT, reader.read(&mut buf)).await.unwrap().unwrap();
            assert_eq!(read, 0);
        }
    }

    assert_eq!(fx.manager.peer().await, Some(REMOTE));
    assert_eq!(fx.manager.state().await, SessionState::Connected);
    assert_quiet(&mut fx.events).await;
}

#[tokio::test]
async fn test_second_connect_supersedes_pending_one() {
    let mut fx = fixture();
    let third = fx.network.device(THIRD);
    let mut remote_server = fx
        .remote
        .listen(SERVICE, SecurityMode::Insecure)
        .await
        .unwrap();
    let mut third_server = third.listen(SERVICE, SecurityMode::Insecure).await.unwrap();

    fx.manager.connect(REMOTE, SERVICE, SecurityMode::Insecure).await;
    fx.manager.connect(THIRD, SERVICE, SecurityMode::Insecure).await;

    for _ in 0..2 {
        assert_eq!(
            next_event(&mut fx.events).await,
            SessionEvent::StateChanged(SessionState::Connecting)
        );
    }
    assert_eq!(next_event(&mut fx.events).await, SessionEvent::ConnectedTo(THIRD));
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::Connected)
    );
    let _accepted = timeout(WAIT, third_server.accept()).await.unwrap().unwrap();

    // the superseded dial either never happened or was hung up at once
    if let Ok(Ok(stale)) = timeout(Duration::from_millis(100), remote_server.accept()).await {
        let (_, mut reader, _writer) = stale.into_split();
        let mut buf = [0u8; 1];
        let read = timeout(WAIT, reader.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(read, 0);
    }

    assert_eq!(fx.manager.peer().await, Some(THIRD));
    assert_quiet(&mut fx.events).await;
}

#[tokio::test]
async fn test_listen_failure_stays_listening_silently() {
    let mut fx = fixture();
    fx.host.fail_next_listens(1);

    fx.manager.start_listening(SERVICE, SecurityMode::Insecure).await;
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::Listening)
    );
    assert_quiet(&mut fx.events).await;
    assert_eq!(fx.manager.state().await, SessionState::Listening);
    assert!(!fx.network.is_listening(HOST, SERVICE));

    fx.manager.start_listening(SERVICE, SecurityMode::Insecure).await;
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::Listening)
    );
    assert!(fx.network.wait_for_listener(HOST, SERVICE, WAIT).await);
}

#[tokio::test]
async fn test_write_failure_reports_then_listens() {
    let mut fx = fixture();
    let mut server = fx
        .remote
        .listen(SERVICE, SecurityMode::Insecure)
        .await
        .unwrap();

    fx.manager.connect(REMOTE, SERVICE, SecurityMode::Insecure).await;
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::Connecting)
    );
    let _inbound = timeout(WAIT, server.accept()).await.unwrap().unwrap();
    assert_eq!(next_event(&mut fx.events).await, SessionEvent::ConnectedTo(REMOTE));
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::Connected)
    );

    fx.host.fail_writes(true);
    fx.manager.write(b"into the void").await.unwrap();
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::Error(WRITE_FAILED_MESSAGE.to_string())
    );
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::Listening)
    );
    assert!(fx.network.wait_for_listener(HOST, SERVICE, WAIT).await);
    assert_quiet(&mut fx.events).await;
}

#[tokio::test]
async fn test_stop_abandons_write_blocked_on_slow_peer() {
    let mut fx = fixture();
    // the remote never reads, so a large write fills the link and stalls
    let _connection = connect_inbound(&mut fx).await;

    let manager = &fx.manager;
    let body = vec![0x5a; 1 << 20];
    let (written, ()) = timeout(WAIT, async {
        tokio::join!(manager.write(&body), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            manager.stop().await;
        })
    })
    .await
    .expect("write stayed blocked after stop");
    assert!(written.is_ok());

    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::None)
    );
    assert_quiet(&mut fx.events).await;
}

#[tokio::test]
async fn test_write_outside_connected_is_dropped() {
    let mut fx = fixture();
    fx.manager.write(b"nobody home").await.unwrap();
    assert_eq!(fx.manager.state().await, SessionState::None);
    assert_quiet(&mut fx.events).await;

    fx.manager.start_listening(SERVICE, SecurityMode::Insecure).await;
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::Listening)
    );
    fx.manager.write(b"still nobody").await.unwrap();
    assert_quiet(&mut fx.events).await;
}

#[tokio::test]
async fn test_connect_failure_reports_then_listens() {
    let mut fx = fixture();
    fx.manager.connect(REMOTE, SERVICE, SecurityMode::Secure).await;

    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::Connecting)
    );
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::Error(CONNECT_FAILED_MESSAGE.to_string())
    );
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::Listening)
    );
    assert_eq!(
        fx.manager.endpoint().await,
        Some(Endpoint::new(SERVICE, SecurityMode::Secure))
    );
    assert!(fx.network.wait_for_listener(HOST, SERVICE, WAIT).await);
}

#[tokio::test]
async fn test_outbound_connect_exchanges_frames() {
    let mut fx = fixture();
    let mut server = fx
        .remote
        .listen(SERVICE, SecurityMode::Insecure)
        .await
        .unwrap();

    fx.manager.connect(REMOTE, SERVICE, SecurityMode::Insecure).await;
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::Connecting)
    );

    let inbound = timeout(WAIT, server.accept()).await.unwrap().unwrap();
    assert_eq!(inbound.peer(), HOST);
    assert_eq!(next_event(&mut fx.events).await, SessionEvent::ConnectedTo(REMOTE));
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::Connected)
    );

    let codec = FrameCodec::default();
    let (_, mut reader, mut writer) = inbound.into_split();
    writer
        .write_all(&codec.encode(b"hello host").unwrap())
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::MessageRead(Bytes::from_static(b"hello host"))
    );

    fx.manager.write(b"hello remote").await.unwrap();
    assert!(matches!(
        next_event(&mut fx.events).await,
        SessionEvent::MessageWritten(_)
    ));
    let body = codec.read_frame(&mut reader).await.unwrap().unwrap();
    assert_eq!(&body[..], b"hello remote");
}

#[tokio::test]
async fn test_stop_closes_connection_without_recovery() {
    let mut fx = fixture();
    let connection = connect_inbound(&mut fx).await;
    let (_, mut reader, _writer) = connection.into_split();

    fx.manager.stop().await;
    assert_eq!(
        next_event(&mut fx.events).await,
        SessionEvent::StateChanged(SessionState::None)
    );

    let mut buf = [0u8; 1];
    let read = timeout(WAIT, reader.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(read, 0);
    assert_quiet(&mut fx.events).await;
    assert_eq!(fx.manager.state().await, SessionState::None);
}

#[tokio::test]
async fn test_stop_when_idle_is_a_no_op() {
    let mut fx = fixture();
    fx.manager.stop().await;
    assert_quiet(&mut fx.events).await;
    assert_eq!(fx.manager.state().await, SessionState::None);
}

#[tokio::test]
async fn test_connect_address_rejects_malformed_text() {
    let fx = fixture();
    let result = fx
        .manager
        .connect_address("not-an-address", SERVICE, SecurityMode::Insecure)
        .await;
    assert!(matches!(result, Err(BluechatError::InvalidAddress(_))));
    assert_eq!(fx.manager.state().await, SessionState::None);
}

#[tokio::test]
async fn test_oversized_body_is_returned_to_caller() {
    let network = LoopbackNetwork::new();
    let config = SessionConfig::default().with_header_length(1);
    let (manager, mut events) = SessionManager::new(Arc::new(network.device(HOST)), config).unwrap();
    let remote = network.device(REMOTE);

    manager.start_listening(SERVICE, SecurityMode::Insecure).await;
    assert!(network.wait_for_listener(HOST, SERVICE, WAIT).await);
    let _connection = remote
        .connect_to(HOST, SERVICE, SecurityMode::Insecure)
        .await
        .unwrap();
    while next_event(&mut events).await != SessionEvent::StateChanged(SessionState::Connected) {}

    assert!(manager.write(&[0u8; 256]).await.is_err());
    assert!(manager.write(&[0u8; 255]).await.is_ok());
}

#[derive(Default)]
struct Transcript {
    lines: Vec<String>,
}

impl NotificationSink for Transcript {
    fn state_changed(&mut self, state: SessionState) {
        self.lines.push(format!("state {state}"));
    }

    fn connected_to(&mut self, peer: PeerAddress) {
        self.lines.push(format!("connected {peer}"));
    }

    fn error(&mut self, message: String) {
        self.lines.push(format!("error {message}"));
    }
}

#[tokio::test]
async fn test_dispatcher_sees_error_before_relisten() {
    let network = LoopbackNetwork::new();
    let (manager, events) =
        SessionManager::new(Arc::new(network.device(HOST)), SessionConfig::default()).unwrap();
    let dispatcher = spawn_dispatcher(events, Transcript::default());

    manager.connect(REMOTE, SERVICE, SecurityMode::Insecure).await;
    assert!(network.wait_for_listener(HOST, SERVICE, WAIT).await);
    drop(manager);

    let transcript = timeout(WAIT, dispatcher).await.unwrap().unwrap();
    assert_eq!(
        transcript.lines,
        vec![
            "state CONNECTING".to_string(),
            format!("error {CONNECT_FAILED_MESSAGE}"),
            "state LISTENING".to_string(),
        ]
    );
}
