//! Push channel transport.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use super::device::DeviceIdentity;
use super::events::Notification;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TransportError {
  #[error("could not connect to {url}: {message}")]
  Connect { url: String, message: String },

  #[error("connecting to {url} timed out")]
  Timeout { url: String },

  #[error("subscribe handshake failed: {0}")]
  Subscribe(String),
}

/// What a push channel is opened for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
  pub channel: String,
  pub device: DeviceIdentity,
}

impl Subscription {
  /// Handshake frame sent right after the channel opens.
  pub fn frame(&self) -> Value {
    json!({
      "action": "subscribe",
      "channel": self.channel,
      "payload": {
        "device_type": self.device.kind,
        "device_id": self.device.id,
      }
    })
  }
}

/// Inbound side of an open channel
#[derive(Debug)]
pub enum ChannelEvent {
  Message(Notification),
  /// The channel ended, with the reason when known
  Closed(Option<String>),
}

/// An open push channel. Dropping it closes the underlying connection.
pub struct PushChannel {
  rx: mpsc::UnboundedReceiver<ChannelEvent>,
  task: Option<JoinHandle<()>>,
}

impl PushChannel {
  pub fn new(rx: mpsc::UnboundedReceiver<ChannelEvent>) -> Self {
    Self { rx, task: None }
  }

  /// Tie the task feeding this channel to its lifetime.
  pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
    self.task = Some(task);
    self
  }

  /// Next event; a vanished feeder reads as a close.
  pub async fn next(&mut self) -> ChannelEvent {
    self
      .rx
      .recv()
      .await
      .unwrap_or(ChannelEvent::Closed(None))
  }
}

impl Drop for PushChannel {
  fn drop(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }
}

/// Opens push channels.
#[async_trait]
pub trait PushTransport: Send + Sync {
  async fn open(&self, subscription: &Subscription) -> Result<PushChannel, TransportError>;
}

/// WebSocket transport: one connection per channel, JSON text frames.
pub struct WebSocketTransport {
  url: String,
}

impl WebSocketTransport {
  pub fn new(url: impl Into<String>) -> Self {
    Self { url: url.into() }
  }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
  async fn open(&self, subscription: &Subscription) -> Result<PushChannel, TransportError> {
    let connect = tokio_tungstenite::connect_async(self.url.as_str());
    let (stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect)
      .await
      .map_err(|_| TransportError::Timeout {
        url: self.url.clone(),
      })?
      .map_err(|e| TransportError::Connect {
        url: self.url.clone(),
        message: e.to_string(),
      })?;

    let (mut sink, mut source) = stream.split();
    sink
      .send(Message::Text(subscription.frame().to_string()))
      .await
      .map_err(|e| TransportError::Subscribe(e.to_string()))?;
    debug!(url = %self.url, channel = %subscription.channel, "push channel open");

    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
      let reason = loop {
        match source.next().await {
          Some(Ok(Message::Text(text))) => match serde_json::from_str::<Notification>(&text) {
            Ok(event) => {
              if tx.send(ChannelEvent::Message(event)).is_err() {
                return;
              }
            }
            Err(e) => warn!(error = %e, "dropping undecodable push message"),
          },
          Some(Ok(Message::Ping(payload))) => {
            if let Err(e) = sink.send(Message::Pong(payload)).await {
              break Some(e.to_string());
            }
          }
          Some(Ok(Message::Close(frame))) => break frame.map(|f| f.reason.to_string()),
          Some(Ok(other)) => trace!(?other, "ignoring push frame"),
          Some(Err(e)) => break Some(e.to_string()),
          None => break None,
        }
      };
      let _ = tx.send(ChannelEvent::Closed(reason));
    });

    Ok(PushChannel::new(rx).with_task(task))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::realtime::device::DeviceKind;

  #[test]
  fn test_subscribe_frame() {
    let subscription = Subscription {
      channel: "notificacoes".to_string(),
      device: DeviceIdentity {
        id: "device_abc".to_string(),
        kind: DeviceKind::Tablet,
      },
    };

    assert_eq!(
      subscription.frame(),
      json!({
        "action": "subscribe",
        "channel": "notificacoes",
        "payload": {"device_type": "tablet", "device_id": "device_abc"}
      })
    );
  }

  #[tokio::test]
  async fn test_dropped_feeder_reads_as_close() {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut channel = PushChannel::new(rx);
    drop(tx);
    assert!(matches!(channel.next().await, ChannelEvent::Closed(None)));
  }

  #[tokio::test]
  async fn test_drop_aborts_feeder_task() {
    let (_tx, rx) = mpsc::unbounded_channel();
    let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
    let task = tokio::spawn(async move {
      let _alive = alive_tx;
      std::future::pending::<()>().await
    });

    drop(PushChannel::new(rx).with_task(task));
    // The sender is dropped with the aborted task
    assert!(alive_rx.await.is_err());
  }

  #[tokio::test]
  async fn test_unreachable_server_is_a_connect_error() {
    let transport = WebSocketTransport::new("ws://127.0.0.1:9/ws");
    let subscription = Subscription {
      channel: "notificacoes".to_string(),
      device: DeviceIdentity {
        id: "device_abc".to_string(),
        kind: DeviceKind::Web,
      },
    };

    let result = transport.open(&subscription).await;
    assert!(matches!(
      result,
      Err(TransportError::Connect { .. }) | Err(TransportError::Timeout { .. })
    ));
  }
}
