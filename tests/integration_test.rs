//! Integration tests for veilmux
//!
//! Exercises the full client-server flow over in-memory loopback
//! connections: handshake, multiplexing, flow control, graceful close,
//! session rotation and protocol-violation teardown.

use async_trait::async_trait;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use veilmux::crypto::{CipherPair, CtrCipher, InitMessage};
use veilmux::observe;
use veilmux::transport::{Connection, Connector, TransportError};
use veilmux::tunnel::{BufferPool, Session, SessionRole};
use veilmux::{Config, Dialer, Stream, TunnelError};

const TEST_WINDOW: usize = 4;
const ZERO_SECRET: [u8; 16] = [0u8; 16];
const ZERO_IV: [u8; 16] = [0u8; 16];

fn deadline(millis: u64) -> Option<Instant> {
    Some(Instant::now() + Duration::from_millis(millis))
}

/// Client and server sessions joined by an in-memory duplex channel,
/// keyed with the fixed all-zero secret and IVs.
fn session_pair(window: usize) -> (Arc<Session>, Arc<Session>) {
    let (client_end, server_end) = tokio::io::duplex(1 << 16);
    let client = Session::start(
        Box::new(client_end),
        SessionRole::Client,
        window,
        CipherPair::new(&ZERO_SECRET, &ZERO_IV, &ZERO_IV),
        None,
        Arc::new(BufferPool::default()),
        observe::noop(),
        None,
    );
    let server = Session::start(
        Box::new(server_end),
        SessionRole::Server,
        window,
        CipherPair::new(&ZERO_SECRET, &ZERO_IV, &ZERO_IV),
        None,
        Arc::new(BufferPool::default()),
        observe::noop(),
        None,
    );
    (client, server)
}

/// Read exactly `dest.len()` bytes, failing the test after 5 seconds.
async fn read_full(stream: &Stream, dest: &mut [u8]) {
    let mut total = 0;
    while total < dest.len() {
        let n = stream
            .read(&mut dest[total..], deadline(5000))
            .await
            .expect("read failed");
        assert!(n > 0, "unexpected end of stream");
        total += n;
    }
}

#[tokio::test]
async fn test_single_byte_echo() {
    let (client, server) = session_pair(TEST_WINDOW);
    let mut incoming = server.take_incoming().unwrap();

    let client_stream = client.get_or_create_stream(0);
    client_stream.write(b"A", None).await.unwrap();

    let server_stream = incoming.recv().await.unwrap();
    assert_eq!(server_stream.id(), 0);

    let mut buf = [0u8; 1];
    read_full(&server_stream, &mut buf).await;
    assert_eq!(buf[0], 0x41);

    // And back the other way on the same stream.
    server_stream.write(b"A", None).await.unwrap();
    read_full(&client_stream, &mut buf).await;
    assert_eq!(buf[0], 0x41);
}

#[tokio::test]
async fn test_window_saturation_and_ack_release() {
    let (client, server) = session_pair(TEST_WINDOW);
    let mut incoming = server.take_incoming().unwrap();

    let client_stream = client.get_or_create_stream(0);

    // With a window of 4 the sender can have 4 frames in flight, 4 more
    // queued and one parked in the send loop before a write backs up.
    for i in 0u8..9 {
        client_stream.write(&[i], deadline(2000)).await.unwrap();
    }
    let err = client_stream.write(&[9], deadline(100)).await.unwrap_err();
    assert!(matches!(err, TunnelError::Timeout));

    // Reading drains the receive queue and emits ACK credit, which lets
    // the remaining frames through.
    let server_stream = incoming.recv().await.unwrap();
    let mut received = Vec::new();
    while received.len() < 9 {
        let mut buf = [0u8; 16];
        let n = server_stream.read(&mut buf, deadline(5000)).await.unwrap();
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received, (0u8..9).collect::<Vec<_>>());

    client_stream.write(&[9], deadline(2000)).await.unwrap();
    let mut last = [0u8; 1];
    read_full(&server_stream, &mut last).await;
    assert_eq!(last[0], 9);
}

#[tokio::test]
async fn test_graceful_close_flushes_then_rst() {
    let (client, server) = session_pair(TEST_WINDOW);
    let mut incoming = server.take_incoming().unwrap();

    let client_stream = client.get_or_create_stream(0);
    client_stream.write(b"a", None).await.unwrap();
    client_stream.write(b"b", None).await.unwrap();
    client_stream.close().await;

    // Both buffered bytes arrive before the reset takes effect.
    let server_stream = incoming.recv().await.unwrap();
    let mut buf = [0u8; 2];
    read_full(&server_stream, &mut buf).await;
    assert_eq!(&buf, b"ab");

    let mut rest = [0u8; 4];
    assert_eq!(server_stream.read(&mut rest, deadline(5000)).await.unwrap(), 0);
    assert_eq!(server_stream.read(&mut rest, deadline(5000)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_read_deadline_expires() {
    let (client, _server) = session_pair(TEST_WINDOW);
    let client_stream = client.get_or_create_stream(0);

    let start = Instant::now();
    let mut buf = [0u8; 4];
    let err = client_stream.read(&mut buf, deadline(50)).await.unwrap_err();
    assert!(matches!(err, TunnelError::Timeout));
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[tokio::test]
async fn test_protocol_violation_tears_down_session() {
    let (client_end, mut raw_server_end) = tokio::io::duplex(1 << 16);
    let client = Session::start(
        Box::new(client_end),
        SessionRole::Client,
        TEST_WINDOW,
        CipherPair::new(&ZERO_SECRET, &ZERO_IV, &ZERO_IV),
        None,
        Arc::new(BufferPool::default()),
        observe::noop(),
        None,
    );
    let client_stream = client.get_or_create_stream(0);

    // Inject a frame with an unknown type, encrypted with the keystream
    // the client expects.
    let mut bogus = [9u8, 0, 0, 1];
    CtrCipher::new(&ZERO_SECRET, &ZERO_IV).apply(&mut bogus);
    raw_server_end.write_all(&bogus).await.unwrap();

    let mut buf = [0u8; 4];
    assert_eq!(client_stream.read(&mut buf, deadline(5000)).await.unwrap(), 0);
    assert!(client.is_closed());
    assert!(client_stream.write(b"x", deadline(100)).await.is_err());
}

#[tokio::test]
async fn test_explicit_session_close_cascades() {
    let (client, server) = session_pair(TEST_WINDOW);
    let mut incoming = server.take_incoming().unwrap();

    let client_stream = client.get_or_create_stream(0);
    client_stream.write(b"hi", None).await.unwrap();
    let server_stream = incoming.recv().await.unwrap();
    let mut buf = [0u8; 2];
    read_full(&server_stream, &mut buf).await;

    client.close().await;
    assert!(client.is_closed());

    // Local reads drain to end of stream and writes fail.
    let mut rest = [0u8; 4];
    assert_eq!(client_stream.read(&mut rest, deadline(5000)).await.unwrap(), 0);
    assert!(client_stream.write(b"x", deadline(100)).await.is_err());

    // The far side notices the dropped connection on its next read.
    let gone = server_stream.read(&mut rest, deadline(5000)).await;
    assert!(matches!(gone, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_large_transfer_cycles_window() {
    let (client, server) = session_pair(TEST_WINDOW);
    let mut incoming = server.take_incoming().unwrap();

    // 50 frames against a window of 4 forces several ACK refill cycles.
    let payload: Vec<u8> = (0..50_000).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let client_stream = client.get_or_create_stream(0);
    let writer = tokio::spawn(async move {
        for chunk in payload.chunks(1000) {
            client_stream.write(chunk, None).await.unwrap();
        }
    });

    let server_stream = incoming.recv().await.unwrap();
    let mut received = vec![0u8; expected.len()];
    read_full(&server_stream, &mut received).await;
    assert_eq!(received, expected);

    writer.await.unwrap();
}

#[tokio::test]
async fn test_oversized_write_is_split_into_frames() {
    let (client, server) = session_pair(8);
    let mut incoming = server.take_incoming().unwrap();

    let payload: Vec<u8> = (0..8193).map(|i| (i % 241) as u8).collect();
    let client_stream = client.get_or_create_stream(0);
    let n = client_stream.write(&payload, None).await.unwrap();
    assert_eq!(n, 8193);

    let server_stream = incoming.recv().await.unwrap();
    let mut received = vec![0u8; 8193];
    read_full(&server_stream, &mut received).await;
    assert_eq!(received, payload);
}

// --- full handshake path ----------------------------------------------

fn test_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::rngs::OsRng, 3072).unwrap())
}

/// Hands each dialed connection's far end to an accept loop.
struct DuplexConnector {
    accept_tx: mpsc::UnboundedSender<DuplexStream>,
    connects: Arc<AtomicUsize>,
}

#[async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (near, far) = tokio::io::duplex(1 << 16);
        self.accept_tx
            .send(far)
            .map_err(|_| TransportError::Closed)?;
        Ok(Box::new(near))
    }
}

/// Decrypt the init blob, stand up the server session, echo every stream.
async fn serve_connection(mut conn: DuplexStream, private_key: &RsaPrivateKey) {
    let mut blob = vec![0u8; private_key.size()];
    conn.read_exact(&mut blob).await.unwrap();
    let init = InitMessage::open(private_key, &blob).unwrap();

    // The server's directions mirror the client's IVs.
    let ciphers = CipherPair::new(&init.secret, &init.recv_iv, &init.send_iv);
    let session = Session::start(
        Box::new(conn),
        SessionRole::Server,
        init.window as usize,
        ciphers,
        None,
        Arc::new(BufferPool::default()),
        observe::noop(),
        None,
    );

    let mut incoming = session.take_incoming().unwrap();
    while let Some(stream) = incoming.recv().await {
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                match stream.read(&mut buf, None).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stream.write(&buf[..n], None).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }
}

fn spawn_echo_server() -> (Box<DuplexConnector>, Arc<AtomicUsize>) {
    let (accept_tx, mut accept_rx) = mpsc::unbounded_channel();
    let connects = Arc::new(AtomicUsize::new(0));
    tokio::spawn(async move {
        while let Some(conn) = accept_rx.recv().await {
            tokio::spawn(serve_connection(conn, test_key()));
        }
    });
    let connector = Box::new(DuplexConnector {
        accept_tx,
        connects: Arc::clone(&connects),
    });
    (connector, connects)
}

#[tokio::test]
async fn test_dial_handshake_end_to_end() {
    let (connector, _connects) = spawn_echo_server();
    let mut config = Config::default();
    config.window_size = TEST_WINDOW;
    let dialer = Dialer::new(config, connector, RsaPublicKey::from(test_key())).unwrap();

    let stream = dialer.dial().await.unwrap();
    stream.write(b"ping", None).await.unwrap();

    let mut buf = [0u8; 4];
    read_full(&stream, &mut buf).await;
    assert_eq!(&buf, b"ping");
}

#[tokio::test]
async fn test_session_rotation_shares_then_replaces_connection() {
    let (connector, connects) = spawn_echo_server();
    let mut config = Config::default();
    config.window_size = TEST_WINDOW;
    config.max_streams_per_session = 2;
    let dialer = Dialer::new(config, connector, RsaPublicKey::from(test_key())).unwrap();

    let mut streams = Vec::new();
    for _ in 0..3 {
        streams.push(dialer.dial().await.unwrap());
    }

    // First two streams multiplex over one connection, the third forces a
    // second one; ids restart at zero after rotation.
    assert_eq!(connects.load(Ordering::SeqCst), 2);
    assert_eq!(streams[0].id(), 0);
    assert_eq!(streams[1].id(), 1);
    assert_eq!(streams[2].id(), 0);

    // Every stream still works against its own session.
    for (i, stream) in streams.iter().enumerate() {
        let msg = [i as u8; 3];
        stream.write(&msg, None).await.unwrap();
        let mut buf = [0u8; 3];
        read_full(stream, &mut buf).await;
        assert_eq!(buf, msg);
    }
}
