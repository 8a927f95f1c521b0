//! RPC client: one persistent connection shared by every caller.
//!
//! Calls are correlated to acks by id. Subscriptions receive their events
//! on a per-stream channel. When the connection drops, every pending call
//! resolves with [`RpcError::ConnectionClosed`] and every subscription ends.
//! The next call after that dials the peer again.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::error::{RpcError, RpcResult};
use crate::frame::{Frame, codec};

type PendingCall = oneshot::Sender<RpcResult<Value>>;
type StreamItem = RpcResult<Value>;

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u64, PendingCall>>,
    subscriptions: Mutex<HashMap<u64, mpsc::UnboundedSender<StreamItem>>>,
    closed: AtomicBool,
}

impl Shared {
    /// Mark the connection dead and release everyone waiting on it.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let pending: Vec<_> = self
            .pending
            .lock()
            .expect("pending lock")
            .drain()
            .collect();
        for (_, tx) in pending {
            let _ = tx.send(Err(RpcError::ConnectionClosed));
        }
        self.subscriptions
            .lock()
            .expect("subscriptions lock")
            .clear();
    }

    fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::Ack { id, error, data } => {
                let waiter = self.pending.lock().expect("pending lock").remove(&id);
                match waiter {
                    Some(tx) => {
                        let result = match error {
                            Some(message) => Err(RpcError::Remote(message)),
                            None => Ok(data),
                        };
                        let _ = tx.send(result);
                    }
                    None => debug!(id, "ack for unknown call"),
                }
            }
            Frame::Event { id, data } => {
                if let Some(tx) = self.subscriptions.lock().expect("subscriptions lock").get(&id) {
                    let _ = tx.send(Ok(data));
                }
            }
            Frame::StreamError { id, error } => {
                if let Some(tx) = self.subscriptions.lock().expect("subscriptions lock").get(&id) {
                    let _ = tx.send(Err(RpcError::Remote(error)));
                }
            }
            Frame::StreamEnd { id } => {
                self.subscriptions
                    .lock()
                    .expect("subscriptions lock")
                    .remove(&id);
            }
            other => debug!(frame = ?other, "ignoring server-bound frame"),
        }
    }
}

/// One live TCP connection and its reader and writer tasks.
struct Connection {
    out: mpsc::UnboundedSender<Frame>,
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    fn start(stream: TcpStream, peer: SocketAddr) -> Self {
        let (mut sink, mut lines) = Framed::new(stream, codec()).split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
        let shared = Arc::new(Shared::default());

        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let line = match frame.encode() {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "dropping unencodable frame");
                        continue;
                    }
                };
                if sink.send(line).await.is_err() {
                    break;
                }
            }
        });

        let reader_shared = Arc::clone(&shared);
        let reader = tokio::spawn(async move {
            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(%peer, error = %e, "rpc read failed");
                        break;
                    }
                };
                match Frame::decode(&line) {
                    Ok(frame) => reader_shared.dispatch(frame),
                    Err(e) => warn!(%peer, error = %e, "ignoring malformed frame"),
                }
            }
            debug!(%peer, "rpc connection closed by peer");
            reader_shared.close();
        });

        Self {
            out: out_tx,
            shared,
            reader,
            writer,
        }
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
        self.shared.close();
    }
}

struct ClientInner {
    peer: SocketAddr,
    next_id: AtomicU64,
    conn: Mutex<Arc<Connection>>,
}

/// Cheaply cloneable handle to an RPC peer.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    /// Open the connection. When it drops, whatever is in flight fails
    /// with `ConnectionClosed` and the next call dials the peer again.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> RpcResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;
        let conn = Connection::start(stream, peer);
        debug!(%peer, "rpc client connected");
        Ok(Self {
            inner: Arc::new(ClientInner {
                peer,
                next_id: AtomicU64::new(1),
                conn: Mutex::new(Arc::new(conn)),
            }),
        })
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn current(&self) -> Arc<Connection> {
        Arc::clone(&self.inner.conn.lock().expect("connection lock"))
    }

    /// Whether the current connection is gone. The next call reconnects.
    pub fn is_closed(&self) -> bool {
        self.current().is_closed()
    }

    /// The live connection, dialing the peer again if the last one dropped.
    async fn connection(&self) -> RpcResult<Arc<Connection>> {
        let conn = self.current();
        if !conn.is_closed() {
            return Ok(conn);
        }

        let peer = self.inner.peer;
        let stream = TcpStream::connect(peer).await?;
        let fresh = Arc::new(Connection::start(stream, peer));
        let mut slot = self.inner.conn.lock().expect("connection lock");
        // Another caller may have reconnected while we were dialing.
        if slot.is_closed() {
            *slot = Arc::clone(&fresh);
            info!(%peer, "rpc client reconnected");
            Ok(fresh)
        } else {
            Ok(Arc::clone(&slot))
        }
    }

    /// Invoke `op` and wait for its acknowledgement. An ack carrying an
    /// error resolves to [`RpcError::Remote`].
    pub async fn call<P, R>(&self, op: &str, payload: &P) -> RpcResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_value(payload)?;
        let conn = self.connection().await?;
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        conn.shared
            .pending
            .lock()
            .expect("pending lock")
            .insert(id, tx);

        // Checked after registering so a concurrent close cannot miss us.
        if conn.is_closed() {
            conn.shared.pending.lock().expect("pending lock").remove(&id);
            return Err(RpcError::ConnectionClosed);
        }

        let frame = Frame::Call {
            id,
            op: op.to_string(),
            payload,
        };
        if conn.out.send(frame).is_err() {
            conn.shared.pending.lock().expect("pending lock").remove(&id);
            return Err(RpcError::ConnectionClosed);
        }

        let data = rx.await.map_err(|_| RpcError::ConnectionClosed)??;
        Ok(serde_json::from_value(data)?)
    }

    /// Open a subscription on `channel`. It lives on the current
    /// connection and ends with it.
    pub async fn subscribe<P>(&self, channel: &str, payload: &P) -> RpcResult<Subscription>
    where
        P: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        let conn = self.connection().await?;
        let id = self.next_id();
        let (tx, rx) = mpsc::unbounded_channel();
        conn.shared
            .subscriptions
            .lock()
            .expect("subscriptions lock")
            .insert(id, tx);

        let frame = Frame::Subscribe {
            id,
            channel: channel.to_string(),
            payload,
        };
        if conn.out.send(frame).is_err() {
            conn.shared
                .subscriptions
                .lock()
                .expect("subscriptions lock")
                .remove(&id);
            return Err(RpcError::ConnectionClosed);
        }

        Ok(Subscription {
            id,
            rx,
            conn,
            active: true,
        })
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<StreamItem>,
    conn: Arc<Connection>,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event or stream error. `None` once the stream has ended or the
    /// connection is gone.
    pub async fn next(&mut self) -> Option<RpcResult<Value>> {
        self.rx.recv().await
    }

    /// Like [`Subscription::next`], decoding the event payload as `T`.
    pub async fn next_event<T: DeserializeOwned>(&mut self) -> Option<RpcResult<T>> {
        let item = self.rx.recv().await?;
        Some(item.and_then(|value| Ok(serde_json::from_value(value)?)))
    }

    /// Cancel the subscription explicitly.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.conn
            .shared
            .subscriptions
            .lock()
            .expect("subscriptions lock")
            .remove(&self.id);
        let _ = self.conn.out.send(Frame::Unsubscribe { id: self.id });
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
