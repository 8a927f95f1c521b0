//! RPC server: dispatches calls and subscriptions to registered handlers.
//!
//! Each accepted connection gets a reader loop and a writer task. Calls are
//! handled concurrently (one task per call) and acknowledged exactly once.
//! Subscriptions run as their own task and are aborted on `unsubscribe` or
//! when the connection drops.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::error::{RpcError, RpcResult};
use crate::frame::{Frame, codec};

type HandlerFuture = Pin<Box<dyn Future<Output = RpcResult<Value>> + Send>>;
type CallHandler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

type StreamFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type StreamHandler = Arc<dyn Fn(Value, EventSink) -> StreamFuture + Send + Sync>;

#[derive(Default)]
struct Routes {
    calls: HashMap<String, CallHandler>,
    streams: HashMap<String, StreamHandler>,
}

/// Pushes events for one subscription back to its subscriber.
#[derive(Clone)]
pub struct EventSink {
    id: u64,
    tx: mpsc::UnboundedSender<Frame>,
}

impl EventSink {
    /// Push one event. Fails with `ConnectionClosed` once the peer is gone.
    pub fn send<T: Serialize>(&self, event: &T) -> RpcResult<()> {
        let data = serde_json::to_value(event)?;
        self.tx
            .send(Frame::Event { id: self.id, data })
            .map_err(|_| RpcError::ConnectionClosed)
    }

    /// Report a stream-level error without ending the stream.
    pub fn error(&self, message: impl Into<String>) -> RpcResult<()> {
        self.tx
            .send(Frame::StreamError {
                id: self.id,
                error: message.into(),
            })
            .map_err(|_| RpcError::ConnectionClosed)
    }

    fn end(&self) {
        let _ = self.tx.send(Frame::StreamEnd { id: self.id });
    }
}

/// Builder and accept loop for an RPC endpoint.
#[derive(Default)]
pub struct RpcServer {
    routes: Routes,
}

impl RpcServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call/ack operation.
    pub fn call<P, R, F, Fut>(mut self, op: &str, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let wrapped: CallHandler = Arc::new(move |payload: Value| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let params: P = serde_json::from_value(payload)?;
                let result = handler(params).await?;
                Ok(serde_json::to_value(result)?)
            })
        });
        self.routes.calls.insert(op.to_string(), wrapped);
        self
    }

    /// Register a subscription channel. The handler runs until it returns,
    /// the subscriber unsubscribes, or the connection drops.
    pub fn stream<P, F, Fut>(mut self, channel: &str, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P, EventSink) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let wrapped: StreamHandler = Arc::new(move |payload: Value, sink: EventSink| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                match serde_json::from_value::<P>(payload) {
                    Ok(params) => handler(params, sink).await,
                    Err(e) => {
                        let _ = sink.error(format!("invalid subscription payload: {e}"));
                    }
                }
            })
        });
        self.routes.streams.insert(channel.to_string(), wrapped);
        self
    }

    /// Accept connections until the listener fails.
    pub async fn serve(self, listener: TcpListener) -> RpcResult<()> {
        let (_tx, rx) = watch::channel(false);
        self.serve_with_shutdown(listener, rx).await
    }

    /// Accept connections until `shutdown` flips to true.
    pub async fn serve_with_shutdown(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> RpcResult<()> {
        let addr = listener.local_addr()?;
        let routes = Arc::new(self.routes);
        info!(%addr, "rpc server listening");
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    tokio::spawn(handle_connection(Arc::clone(&routes), stream, peer));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(%addr, "rpc server stopped");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn handle_connection(routes: Arc<Routes>, stream: TcpStream, peer: SocketAddr) {
    debug!(%peer, "rpc connection opened");
    let (mut sink, mut lines) = Framed::new(stream, codec()).split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();

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

    let mut streams = Subscriptions::default();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(u64, u64)>();

    loop {
        let line = tokio::select! {
            line = lines.next() => line,
            Some((id, seq)) = done_rx.recv() => {
                streams.finished(id, seq);
                continue;
            }
        };
        let Some(line) = line else {
            break;
        };
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(%peer, error = %e, "rpc read failed");
                break;
            }
        };
        let frame = match Frame::decode(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%peer, error = %e, "ignoring malformed frame");
                continue;
            }
        };

        match frame {
            Frame::Call { id, op, payload } => {
                let out = out_tx.clone();
                match routes.calls.get(&op).cloned() {
                    Some(handler) => {
                        tokio::spawn(async move {
                            let reply = match handler(payload).await {
                                Ok(data) => Frame::ok(id, data),
                                Err(RpcError::Remote(message)) => Frame::failed(id, message),
                                Err(e) => Frame::failed(id, e.to_string()),
                            };
                            let _ = out.send(reply);
                        });
                    }
                    None => {
                        debug!(%peer, %op, "unknown operation");
                        let _ = out.send(Frame::failed(
                            id,
                            RpcError::UnknownOperation(op).to_string(),
                        ));
                    }
                }
            }
            Frame::Subscribe {
                id,
                channel,
                payload,
            } => match routes.streams.get(&channel).cloned() {
                Some(handler) => {
                    let events = EventSink {
                        id,
                        tx: out_tx.clone(),
                    };
                    debug!(%peer, %channel, id, "subscription opened");
                    let seq = streams.next_seq();
                    let done = done_tx.clone();
                    let handle = tokio::spawn(async move {
                        handler(payload, events.clone()).await;
                        events.end();
                        let _ = done.send((id, seq));
                    });
                    streams.insert(id, seq, handle);
                }
                None => {
                    let _ = out_tx.send(Frame::StreamError {
                        id,
                        error: RpcError::UnknownOperation(channel).to_string(),
                    });
                    let _ = out_tx.send(Frame::StreamEnd { id });
                }
            },
            Frame::Unsubscribe { id } => {
                if streams.cancel(id) {
                    debug!(%peer, id, "subscription cancelled");
                }
            }
            other => {
                debug!(%peer, frame = ?other, "ignoring client-bound frame");
            }
        }
    }

    streams.abort_all();
    drop(out_tx);
    writer.abort();
    debug!(%peer, "rpc connection closed");
}

/// Stream tasks of one connection, keyed by subscription id. Each task is
/// tagged with a sequence number so a late completion notice for a
/// replaced subscription leaves its successor alone.
#[derive(Default)]
struct Subscriptions {
    next: u64,
    active: HashMap<u64, (u64, JoinHandle<()>)>,
}

impl Subscriptions {
    fn next_seq(&mut self) -> u64 {
        self.next += 1;
        self.next
    }

    /// Track a stream task, aborting any previous task under the same id.
    fn insert(&mut self, id: u64, seq: u64, handle: JoinHandle<()>) {
        if let Some((_, previous)) = self.active.insert(id, (seq, handle)) {
            previous.abort();
        }
    }

    /// Forget a task that ended on its own.
    fn finished(&mut self, id: u64, seq: u64) {
        if self.active.get(&id).is_some_and(|(current, _)| *current == seq) {
            self.active.remove(&id);
        }
    }

    fn cancel(&mut self, id: u64) -> bool {
        match self.active.remove(&id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn abort_all(&mut self) {
        for (_, (_, handle)) in self.active.drain() {
            handle.abort();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle() -> JoinHandle<()> {
        tokio::spawn(std::future::pending())
    }

    #[tokio::test]
    async fn finished_streams_are_forgotten() {
        let mut streams = Subscriptions::default();
        for id in 1..=3 {
            let seq = streams.next_seq();
            streams.insert(id, seq, tokio::spawn(async {}));
            streams.finished(id, seq);
        }
        assert_eq!(streams.len(), 0);
    }

    #[tokio::test]
    async fn stale_notice_keeps_replacement() {
        let mut streams = Subscriptions::default();
        let first = streams.next_seq();
        streams.insert(7, first, idle());
        let second = streams.next_seq();
        streams.insert(7, second, idle());

        streams.finished(7, first);
        assert_eq!(streams.len(), 1);
        assert!(streams.cancel(7));
        assert!(!streams.cancel(7));
    }
}
