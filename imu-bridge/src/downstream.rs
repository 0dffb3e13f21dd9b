//! The network side of the bridge: a connection to the listener which readings are forwarded to.

use crate::config::Protocol;
use async_trait::async_trait;
use futures::future;
use futures::sink::{self, Sink, SinkExt};
use futures::stream::StreamExt;
use log::{debug, error, info, trace, warn};
use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

/// An error connecting to the listener.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("WebSocket connection failed: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// Something which can open a connection to the listener.
#[async_trait]
pub trait Connector: Display + Send + Sync {
    async fn connect(&self) -> Result<Downstream, NetworkError>;
}

/// The address and transport of the listener.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub queue_capacity: usize,
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

#[async_trait]
impl Connector for Endpoint {
    async fn connect(&self) -> Result<Downstream, NetworkError> {
        match self.protocol {
            Protocol::Ws => self.connect_websocket().await,
            Protocol::Tcp => self.connect_tcp().await,
        }
    }
}

impl Endpoint {
    fn websocket_url(&self) -> Result<Url, NetworkError> {
        let url = format!("ws://{}:{}", self.host, self.port);
        Url::parse(&url).map_err(|source| NetworkError::InvalidUrl { url, source })
    }

    async fn connect_websocket(&self) -> Result<Downstream, NetworkError> {
        let url = self.websocket_url()?;
        let (stream, response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        debug!("WebSocket handshake with {} returned {}", url, response.status());

        let (sink, mut incoming) = stream.split();
        let sink = sink.with(|text: String| future::ok::<_, tungstenite::Error>(Message::text(text)));
        // Reading is also what answers pings, so this has to keep running.
        let incoming = async move {
            while let Some(message) = incoming.next().await {
                match message {
                    Ok(Message::Close(frame)) => {
                        info!("WebSocket closed by peer: {:?}", frame);
                        break;
                    }
                    Ok(message) => trace!("Ignoring incoming message {:?}", message),
                    Err(e) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        };
        Ok(Downstream::spawn(
            self.to_string(),
            sink,
            incoming,
            self.queue_capacity,
        ))
    }

    async fn connect_tcp(&self) -> Result<Downstream, NetworkError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;

        let (mut reader, writer) = stream.into_split();
        let sink = sink::unfold(writer, |mut writer, text: String| async move {
            writer.write_all(text.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            Ok::<_, io::Error>(writer)
        });
        let incoming = async move {
            let mut buffer = [0; 256];
            loop {
                match reader.read(&mut buffer).await {
                    Ok(0) => {
                        info!("TCP connection closed by peer");
                        break;
                    }
                    Ok(length) => trace!("Ignoring {} bytes from peer", length),
                    Err(e) => {
                        warn!("TCP connection error: {}", e);
                        break;
                    }
                }
            }
        };
        Ok(Downstream::spawn(
            self.to_string(),
            sink,
            incoming,
            self.queue_capacity,
        ))
    }
}

/// A live connection to the listener.
///
/// Payloads are queued and sent in order by a single writer task. The connection is considered
/// closed as soon as either a send fails or the peer closes its side. Dropping the `Downstream`
/// stops both tasks.
#[derive(Debug)]
pub struct Downstream {
    peer: String,
    queue: mpsc::Sender<String>,
    closed: watch::Receiver<bool>,
    writer_handle: JoinHandle<()>,
    reader_handle: JoinHandle<()>,
}

impl Downstream {
    /// Start forwarding payloads to the given sink.
    ///
    /// `incoming` should run until the peer closes the connection.
    pub fn spawn<S, F>(peer: String, sink: S, incoming: F, queue_capacity: usize) -> Self
    where
        S: Sink<String> + Send + 'static,
        S::Error: Display,
        F: Future<Output = ()> + Send + 'static,
    {
        let (queue, pending) = mpsc::channel(queue_capacity.max(1));
        let (closed_sender, closed) = watch::channel(false);
        let closed_sender = Arc::new(closed_sender);

        let writer_handle = task::spawn(write_queue(
            peer.clone(),
            sink,
            pending,
            closed_sender.clone(),
        ));
        let reader_handle = task::spawn(async move {
            incoming.await;
            closed_sender.send_replace(true);
        });

        Downstream {
            peer,
            queue,
            closed,
            writer_handle,
            reader_handle,
        }
    }

    /// Queue the given payload to be sent. If the connection is closed or the queue is full the
    /// payload is logged and dropped.
    pub fn forward(&self, payload: String) {
        if self.is_closed() {
            error!("Connection to {} is closed, dropping {}", self.peer, payload);
            return;
        }
        match self.queue.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(payload)) => {
                warn!("Send queue to {} is full, dropping {}", self.peer, payload);
            }
            Err(TrySendError::Closed(payload)) => {
                error!("Connection to {} is closed, dropping {}", self.peer, payload);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        // This only fails if both tasks have gone away, which means the connection is closed anyway.
        let _ = closed.wait_for(|closed| *closed).await;
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl Drop for Downstream {
    fn drop(&mut self) {
        self.writer_handle.abort();
        self.reader_handle.abort();
    }
}

async fn write_queue<S>(
    peer: String,
    sink: S,
    mut pending: mpsc::Receiver<String>,
    closed: Arc<watch::Sender<bool>>,
) where
    S: Sink<String>,
    S::Error: Display,
{
    let mut sink = Box::pin(sink);
    while let Some(payload) = pending.recv().await {
        if let Err(e) = sink.send(payload).await {
            error!("Connection to {} closed during send: {}", peer, e);
            closed.send_replace(true);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc::{unbounded, SendError};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio::time;

    fn endpoint(protocol: Protocol, port: u16) -> Endpoint {
        Endpoint {
            protocol,
            host: "127.0.0.1".to_string(),
            port,
            queue_capacity: 16,
        }
    }

    #[tokio::test]
    async fn forwards_in_order() {
        let (sender, mut receiver) = unbounded();
        let downstream = Downstream::spawn("test".to_string(), sender, future::pending(), 16);

        for i in 0..10 {
            downstream.forward(format!("{{\"i\": {}}}", i));
        }
        for i in 0..10 {
            assert_eq!(receiver.next().await, Some(format!("{{\"i\": {}}}", i)));
        }
        assert!(!downstream.is_closed());
    }

    #[tokio::test]
    async fn full_queue_drops_payloads() {
        // A sink which blocks until the gate is opened.
        let (open_gate, gate) = oneshot::channel::<()>();
        let (sender, mut receiver) = unbounded::<String>();
        let sink = sink::unfold(
            (Some(gate), sender),
            |(gate, sender), payload: String| async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                sender
                    .unbounded_send(payload)
                    .map_err(|e| e.into_send_error())?;
                Ok::<_, SendError>((None, sender))
            },
        );
        let downstream = Downstream::spawn("test".to_string(), sink, future::pending(), 2);

        // The writer task hasn't run yet, so only the first two fit in the queue.
        for i in 1..=5 {
            downstream.forward(i.to_string());
        }
        assert!(!downstream.is_closed());

        open_gate.send(()).unwrap();
        assert_eq!(receiver.next().await.as_deref(), Some("1"));
        assert_eq!(receiver.next().await.as_deref(), Some("2"));

        // Once the queue has drained, payloads flow again.
        downstream.forward("6".to_string());
        assert_eq!(receiver.next().await.as_deref(), Some("6"));
        assert!(receiver.try_next().is_err());
        assert!(!downstream.is_closed());
    }

    #[tokio::test]
    async fn zero_capacity_holds_one_payload() {
        let (sender, mut receiver) = unbounded();
        let downstream = Downstream::spawn("test".to_string(), sender, future::pending(), 0);

        downstream.forward("first".to_string());
        downstream.forward("second".to_string());

        assert_eq!(receiver.next().await.as_deref(), Some("first"));
        assert!(receiver.try_next().is_err());
        assert!(!downstream.is_closed());
    }

    #[tokio::test]
    async fn send_on_closed_connection() {
        let (sender, receiver) = unbounded::<String>();
        drop(receiver);
        let downstream = Downstream::spawn("test".to_string(), sender, future::pending(), 16);

        downstream.forward("lost".to_string());
        downstream.closed().await;
        assert!(downstream.is_closed());

        // Forwarding after the connection has closed just drops the payload.
        downstream.forward("also lost".to_string());
        assert!(downstream.is_closed());
    }

    #[tokio::test]
    async fn peer_closing_marks_closed() {
        let (sender, _receiver) = unbounded();
        let downstream = Downstream::spawn("test".to_string(), sender, future::ready(()), 16);

        downstream.closed().await;
        assert!(downstream.is_closed());
    }

    #[test]
    fn endpoint_display() {
        assert_eq!(endpoint(Protocol::Ws, 8765).to_string(), "ws://127.0.0.1:8765");
        assert_eq!(endpoint(Protocol::Tcp, 9000).to_string(), "tcp://127.0.0.1:9000");
    }

    #[tokio::test]
    async fn invalid_host() {
        let endpoint = Endpoint {
            host: "not a host".to_string(),
            ..endpoint(Protocol::Ws, 8765)
        };
        assert!(matches!(
            endpoint.connect().await,
            Err(NetworkError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn connection_refused() {
        // Find a free port, then stop listening on it.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(endpoint(Protocol::Ws, port).connect().await.is_err());
        assert!(matches!(
            endpoint(Protocol::Tcp, port).connect().await,
            Err(NetworkError::Io(_))
        ));
    }

    #[tokio::test]
    async fn websocket_text_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut websocket = tokio_tungstenite::accept_async(stream).await.unwrap();
            let first = websocket.next().await.unwrap().unwrap();
            let second = websocket.next().await.unwrap().unwrap();
            websocket.close(None).await.unwrap();
            (first, second)
        });

        let downstream = endpoint(Protocol::Ws, port).connect().await.unwrap();
        downstream.forward("{\"r\":1.0}".to_string());
        downstream.forward("{\"r\":2.0}".to_string());

        let (first, second) = server.await.unwrap();
        assert_eq!(first, Message::text("{\"r\":1.0}"));
        assert_eq!(second, Message::text("{\"r\":2.0}"));

        time::timeout(Duration::from_secs(5), downstream.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tcp_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            let first = lines.next_line().await.unwrap();
            let second = lines.next_line().await.unwrap();
            (first, second)
        });

        let downstream = endpoint(Protocol::Tcp, port).connect().await.unwrap();
        downstream.forward("{\"r\":1.0}".to_string());
        downstream.forward("{\"r\":2.0}".to_string());

        let (first, second) = server.await.unwrap();
        assert_eq!(first.as_deref(), Some("{\"r\":1.0}"));
        assert_eq!(second.as_deref(), Some("{\"r\":2.0}"));

        // The server has dropped its end of the connection.
        time::timeout(Duration::from_secs(5), downstream.closed())
            .await
            .unwrap();
    }
}
