use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

use crate::realtime::Notification;

/// Application events
#[derive(Debug)]
pub enum Event {
  /// Push event received from the server
  Push(Notification),
  /// Push channel acknowledged
  Connected,
  /// Push channel lost (a reconnect is scheduled)
  Disconnected,
  /// Periodic tick for refreshing stale queries
  Tick,
  /// Ctrl-C
  Shutdown,
}

/// Event handler that merges push callbacks, a tick timer and Ctrl-C into
/// one stream
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Tick timer
    let tick_tx = tx.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      // The first tick completes immediately
      interval.tick().await;
      loop {
        interval.tick().await;
        if tick_tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    // Ctrl-C
    let signal_tx = tx.clone();
    tokio::spawn(async move {
      match tokio::signal::ctrl_c().await {
        Ok(()) => {
          let _ = signal_tx.send(Event::Shutdown);
        }
        Err(e) => warn!(error = %e, "could not listen for Ctrl-C"),
      }
    });

    Self { tx, rx }
  }

  /// Sender for callbacks and background tasks
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test(start_paused = true)]
  async fn test_ticks_and_forwarded_events() {
    let mut events = EventHandler::new(Duration::from_secs(30));
    events.sender().send(Event::Connected).unwrap();

    assert!(matches!(events.next().await, Some(Event::Connected)));
    assert!(matches!(events.next().await, Some(Event::Tick)));
  }
}
