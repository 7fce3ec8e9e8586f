use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use framelink::{
    default_handlers, AppResult, DispatchStats, Dispatcher, DispatcherConfig, FrameCodec,
    HelloMessage, IncomingFrame, Server, SessionConfig, SessionRegistry, MSG_ECHO,
    MSG_HELLO_WORLD,
};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    dispatcher: Dispatcher,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_rx: mpsc::Receiver<()>,
    accept_task: JoinHandle<AppResult<()>>,
}

impl TestServer {
    async fn start(max_connection: usize) -> AppResult<TestServer> {
        let dispatcher = Dispatcher::start(
            Arc::new(default_handlers()),
            &DispatcherConfig::default(),
        )?;
        let registry = SessionRegistry::new(SessionConfig::default());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);

        let server = Server::new(
            listener,
            registry.clone(),
            dispatcher.handle(),
            Arc::new(Semaphore::new(max_connection)),
            notify_shutdown.clone(),
            shutdown_complete_tx,
        );
        let addr = server.local_addr()?;
        let accept_task = tokio::spawn(async move { server.run().await });

        Ok(TestServer {
            addr,
            registry,
            dispatcher,
            notify_shutdown,
            shutdown_complete_rx,
            accept_task,
        })
    }

    async fn connect(&self) -> AppResult<Client> {
        let (reader, writer) = TcpStream::connect(self.addr).await?.into_split();
        Ok(Client {
            writer,
            replies: FramedRead::new(reader, FrameCodec::default()),
        })
    }

    async fn wait_for_sessions(&self, expected: usize) {
        for _ in 0..500 {
            if self.registry.len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(self.registry.len(), expected);
    }

    async fn shutdown(mut self) -> AppResult<DispatchStats> {
        self.accept_task.abort();
        let _ = self.accept_task.await;
        let _ = self.notify_shutdown.send(());
        timeout(WAIT, self.shutdown_complete_rx.recv())
            .await
            .expect("sessions did not finish");
        self.dispatcher.shutdown()
    }
}

struct Client {
    writer: OwnedWriteHalf,
    replies: FramedRead<OwnedReadHalf, FrameCodec>,
}

impl Client {
    async fn send(&mut self, message_id: u16, body: &[u8]) -> AppResult<()> {
        let frame = FrameCodec::default().encode(message_id, body)?;
        self.writer.write_all(&frame).await?;
        Ok(())
    }

    async fn send_raw(&mut self, bytes: &[u8]) -> AppResult<()> {
        self.writer.write_all(bytes).await?;
        Ok(())
    }

    async fn reply(&mut self) -> Option<AppResult<IncomingFrame>> {
        timeout(WAIT, self.replies.next())
            .await
            .expect("no reply from server")
    }

    async fn expect_reply(&mut self) -> IncomingFrame {
        self.reply()
            .await
            .expect("connection closed")
            .expect("malformed reply")
    }
}

fn frame(message_id: u16, body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u16(message_id);
    buf.put_u16(body.len() as u16);
    buf.put_slice(body);
    buf
}

#[tokio::test]
async fn test_echo_round_trip() -> AppResult<()> {
    let server = TestServer::start(16).await?;
    let mut client = server.connect().await?;

    let body = br#"{"id":1,"data":"hi"}"#;
    client.send(MSG_ECHO, body).await?;

    let reply = client.expect_reply().await;
    assert_eq!(reply.message_id, MSG_ECHO);
    assert_eq!(reply.body, Bytes::from_static(body));

    drop(client);
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_hello_world_json() -> AppResult<()> {
    let server = TestServer::start(16).await?;
    let mut client = server.connect().await?;

    let request = HelloMessage {
        id: 7,
        data: "hello world".to_string(),
    };
    client
        .send(MSG_HELLO_WORLD, &serde_json::to_vec(&request)?)
        .await?;

    let reply = client.expect_reply().await;
    assert_eq!(reply.message_id, MSG_HELLO_WORLD);
    let answer: HelloMessage = serde_json::from_slice(&reply.body)?;
    assert_eq!(answer, request);

    drop(client);
    let stats = server.shutdown().await?;
    assert_eq!(stats.processed, 1);
    Ok(())
}

#[tokio::test]
async fn test_empty_body_then_frame_in_one_segment() -> AppResult<()> {
    let server = TestServer::start(16).await?;
    let mut client = server.connect().await?;

    let mut bytes = frame(MSG_ECHO, b"");
    bytes.extend_from_slice(&frame(MSG_ECHO, b"x"));
    client.send_raw(&bytes).await?;

    let first = client.expect_reply().await;
    assert_eq!(first.message_id, MSG_ECHO);
    assert!(first.body.is_empty());
    let second = client.expect_reply().await;
    assert_eq!(second.body, Bytes::from_static(b"x"));

    drop(client);
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_pipelined_frames_are_answered_in_order() -> AppResult<()> {
    let server = TestServer::start(16).await?;
    let mut client = server.connect().await?;

    let mut bytes = BytesMut::new();
    for body in [&b"one"[..], &b"two"[..], &b"three"[..]] {
        bytes.extend_from_slice(&frame(MSG_ECHO, body));
    }
    client.send_raw(&bytes).await?;

    for expected in [&b"one"[..], &b"two"[..], &b"three"[..]] {
        assert_eq!(client.expect_reply().await.body, Bytes::copy_from_slice(expected));
    }

    drop(client);
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_header_split_across_writes() -> AppResult<()> {
    let server = TestServer::start(16).await?;
    let mut client = server.connect().await?;

    let bytes = frame(MSG_ECHO, b"split");
    for chunk in bytes.chunks(1) {
        client.send_raw(chunk).await?;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(client.expect_reply().await.body, Bytes::from_static(b"split"));

    drop(client);
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_oversize_header_closes_connection() -> AppResult<()> {
    let server = TestServer::start(16).await?;
    let mut client = server.connect().await?;
    server.wait_for_sessions(1).await;

    // declares 2048 bytes, two more than allowed
    client.send_raw(&[0x00, 0x01, 0x08, 0x00]).await?;
    assert!(client.reply().await.is_none());
    server.wait_for_sessions(0).await;

    let stats = server.shutdown().await?;
    assert_eq!(stats.processed, 0);
    Ok(())
}

#[tokio::test]
async fn test_valid_frame_sharing_a_write_with_oversize_header_is_handled() -> AppResult<()> {
    let server = TestServer::start(16).await?;
    let mut client = server.connect().await?;

    let mut bytes = frame(MSG_ECHO, b"valid");
    bytes.extend_from_slice(&[0x00, 0x02, 0x08, 0x00]);
    client.send_raw(&bytes).await?;

    // the echo may lose the race with the close that discards the send queue
    while let Some(reply) = client.reply().await {
        assert_eq!(reply?.body, Bytes::from_static(b"valid"));
    }
    server.wait_for_sessions(0).await;

    let stats = server.shutdown().await?;
    assert_eq!(stats.processed, 1);
    Ok(())
}

#[tokio::test]
async fn test_unknown_message_id_keeps_session_open() -> AppResult<()> {
    let server = TestServer::start(16).await?;
    let mut client = server.connect().await?;

    client.send(999, b"ignored").await?;
    client.send(MSG_ECHO, b"still here").await?;
    let reply = client.expect_reply().await;
    assert_eq!(reply.body, Bytes::from_static(b"still here"));

    drop(client);
    let stats = server.shutdown().await?;
    assert_eq!(stats.unknown, 1);
    Ok(())
}

#[tokio::test]
async fn test_malformed_json_does_not_stop_dispatcher() -> AppResult<()> {
    let server = TestServer::start(16).await?;
    let mut client = server.connect().await?;

    client.send(MSG_HELLO_WORLD, b"not json").await?;
    client.send(MSG_ECHO, b"after").await?;
    assert_eq!(client.expect_reply().await.body, Bytes::from_static(b"after"));

    drop(client);
    let stats = server.shutdown().await?;
    assert_eq!(stats.failed, 1);
    Ok(())
}

#[tokio::test]
async fn test_registry_empties_after_disconnect() -> AppResult<()> {
    let server = TestServer::start(16).await?;
    let first = server.connect().await?;
    let second = server.connect().await?;
    server.wait_for_sessions(2).await;

    drop(first);
    server.wait_for_sessions(1).await;
    drop(second);
    server.wait_for_sessions(0).await;

    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_connection_limit_defers_accept() -> AppResult<()> {
    let server = TestServer::start(1).await?;
    let first = server.connect().await?;
    server.wait_for_sessions(1).await;

    let mut second = server.connect().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.registry.len(), 1);

    drop(first);
    // the released permit lets the pending connection in
    second.send(MSG_ECHO, b"late").await?;
    assert_eq!(second.expect_reply().await.body, Bytes::from_static(b"late"));
    server.wait_for_sessions(1).await;

    drop(second);
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_closes_live_sessions() -> AppResult<()> {
    let server = TestServer::start(16).await?;
    let mut client = server.connect().await?;
    client.send(MSG_ECHO, b"before shutdown").await?;
    assert_eq!(
        client.expect_reply().await.body,
        Bytes::from_static(b"before shutdown")
    );

    let registry = server.registry.clone();
    let stats = server.shutdown().await?;
    assert_eq!(stats.processed, 1);
    assert!(registry.is_empty());
    assert!(client.reply().await.is_none());
    Ok(())
}
