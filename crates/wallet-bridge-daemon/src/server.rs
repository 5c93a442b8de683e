//! WebSocket transport for the channel protocol.
//!
//! Every accepted socket is one channel. Inbound text frames are dispatched
//! on their own tasks, so a request waiting on approval never holds up the
//! rest of the channel's traffic. Replies and pushes share one outbound
//! queue per channel.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use wallet_bridge_core::{
    ChannelHandle, ChannelMeta, CommandDispatcher, ErrorReply, PushMessage, Transport,
};

/// Outbound queues of the open sockets.
pub struct ChannelRegistry {
    next_id: AtomicU64,
    outbound: Mutex<HashMap<ChannelHandle, mpsc::UnboundedSender<String>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            outbound: Mutex::new(HashMap::new()),
        }
    }

    fn open(&self) -> (ChannelHandle, mpsc::UnboundedReceiver<String>) {
        let channel = ChannelHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(channel, tx);
        (channel, rx)
    }

    fn close(&self, channel: ChannelHandle) {
        self.lock().remove(&channel);
    }

    /// Queue already encoded text for one channel.
    fn deliver(&self, channel: ChannelHandle, text: String) -> bool {
        self.lock()
            .get(&channel)
            .is_some_and(|tx| tx.send(text).is_ok())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChannelHandle, mpsc::UnboundedSender<String>>> {
        self.outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ChannelRegistry {
    fn send(&self, message: &PushMessage, channels: &[ChannelHandle]) {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(kind = message.kind(), error = %e, "cannot encode push");
                return;
            }
        };
        for channel in channels {
            if !self.deliver(*channel, text.clone()) {
                tracing::debug!(%channel, kind = message.kind(), "push to closed channel dropped");
            }
        }
    }
}

pub async fn run(
    addr: SocketAddr,
    dispatcher: Arc<CommandDispatcher>,
    channels: Arc<ChannelRegistry>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on ws://{}", listener.local_addr()?);
    serve(listener, dispatcher, channels).await
}

pub async fn serve(
    listener: TcpListener,
    dispatcher: Arc<CommandDispatcher>,
    channels: Arc<ChannelRegistry>,
) -> anyhow::Result<()> {
    loop {
        let (stream, client_addr) = listener.accept().await?;
        let dispatcher = dispatcher.clone();
        let channels = channels.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, client_addr, dispatcher, channels).await {
                tracing::warn!("Connection error from {}: {}", client_addr, e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Arc<CommandDispatcher>,
    channels: Arc<ChannelRegistry>,
) -> anyhow::Result<()> {
    let mut origin: Option<String> = None;
    let mut query: BTreeMap<String, String> = BTreeMap::new();
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            origin = request
                .headers()
                .get(ORIGIN)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            query = request
                .uri()
                .query()
                .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
                .unwrap_or_default();
            Ok(response)
        },
    )
    .await?;

    let (channel, outbound) = channels.open();
    let meta = ChannelMeta {
        query,
        ..ChannelMeta::for_channel(channel, origin)
    };
    tracing::debug!(%channel, %addr, "new connection");
    dispatcher.on_open(&meta);

    let result = pump(ws, outbound, &dispatcher, &channels, &meta).await;

    dispatcher.on_close(&meta);
    channels.close(channel);
    tracing::debug!(%channel, %addr, "connection closed");
    result
}

async fn pump(
    ws: tokio_tungstenite::WebSocketStream<TcpStream>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    dispatcher: &Arc<CommandDispatcher>,
    channels: &Arc<ChannelRegistry>,
    meta: &ChannelMeta,
) -> anyhow::Result<()> {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {}", e);
                        return Ok(());
                    }
                    None => return Ok(()),
                };
                match msg {
                    Message::Text(text) => match serde_json::from_str::<Value>(text.as_str()) {
                        Ok(obj) => dispatch(dispatcher.clone(), channels.clone(), meta.clone(), obj),
                        Err(e) => tracing::warn!("Invalid message: {}", e),
                    },
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }

            Some(text) = outbound.recv() => {
                sink.send(Message::Text(text.into())).await?;
            }
        }
    }
}

/// Run one request to completion and queue its reply, if any. A failed
/// request is answered with an [`ErrorReply`].
fn dispatch(
    dispatcher: Arc<CommandDispatcher>,
    channels: Arc<ChannelRegistry>,
    meta: ChannelMeta,
    obj: Value,
) {
    tokio::spawn(async move {
        let Some(channel) = meta.channel_handle else {
            return;
        };
        let kind = obj.get("type").and_then(Value::as_str).map(str::to_string);
        match dispatcher.on_message(obj, &meta).await {
            Ok(Some(reply)) => channels.send(&reply, &[channel]),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(%channel, kind = ?kind, error = %e, "request failed");
                let reply = ErrorReply::new(kind.as_deref(), &e);
                match serde_json::to_string(&reply) {
                    Ok(text) => {
                        if !channels.deliver(channel, text) {
                            tracing::debug!(%channel, "error reply to closed channel dropped");
                        }
                    }
                    Err(e) => tracing::error!(%channel, error = %e, "cannot encode error reply"),
                }
            }
        }
    });
}
