//! Reconnecting push client.
//!
//! [`RealtimeClient`] owns at most one live session and at most one pending
//! reconnect timer. Both slots sit behind a single lock, so a reconnect can
//! never race a user-initiated connect.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{Notification, NotificationKind};
use super::transport::{ChannelEvent, PushTransport, Subscription};

/// Events retained in the history, oldest evicted first.
pub const HISTORY_LIMIT: usize = 100;

/// Fixed delay before reconnecting after a channel loss.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

type NotificationCallback = Arc<dyn Fn(&Notification) + Send + Sync>;
type StatusCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  /// Not connected and not trying to be (also while a session awaits its ack)
  Idle,
  Connected,
  /// Channel lost; one reconnect timer is pending
  PendingReconnect,
}

#[derive(Default)]
struct Callbacks {
  on_connect: Option<StatusCallback>,
  on_disconnect: Option<StatusCallback>,
  on_notification: Option<NotificationCallback>,
}

struct State {
  connection: ConnectionState,
  session: Option<JoinHandle<()>>,
  reconnect: Option<JoinHandle<()>>,
  /// Identifies the current session; signals from older sessions are ignored
  generation: u64,
  disposed: bool,
  history: VecDeque<Notification>,
  last_event: Option<Notification>,
}

struct Inner {
  transport: Arc<dyn PushTransport>,
  subscription: Subscription,
  reconnect_delay: Duration,
  callbacks: Mutex<Callbacks>,
  state: Mutex<State>,
}

impl Inner {
  fn state(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn callbacks(&self) -> MutexGuard<'_, Callbacks> {
    self
      .callbacks
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

/// Push notification client with automatic reconnect.
///
/// Dropping the client disposes it: the live channel is closed and any
/// pending reconnect is cancelled.
pub struct RealtimeClient {
  inner: Arc<Inner>,
}

impl RealtimeClient {
  pub fn new(transport: Arc<dyn PushTransport>, subscription: Subscription) -> Self {
    Self {
      inner: Arc::new(Inner {
        transport,
        subscription,
        reconnect_delay: RECONNECT_DELAY,
        callbacks: Mutex::new(Callbacks::default()),
        state: Mutex::new(State {
          connection: ConnectionState::Idle,
          session: None,
          reconnect: None,
          generation: 0,
          disposed: false,
          history: VecDeque::with_capacity(HISTORY_LIMIT),
          last_event: None,
        }),
      }),
    }
  }

  /// Called when the server acknowledges a subscription.
  pub fn on_connect(self, f: impl Fn() + Send + Sync + 'static) -> Self {
    self.inner.callbacks().on_connect = Some(Arc::new(f));
    self
  }

  /// Called when the channel is lost (not on [`disconnect`](Self::disconnect)).
  pub fn on_disconnect(self, f: impl Fn() + Send + Sync + 'static) -> Self {
    self.inner.callbacks().on_disconnect = Some(Arc::new(f));
    self
  }

  /// Called synchronously for every event except the connection ack.
  pub fn on_notification(self, f: impl Fn(&Notification) + Send + Sync + 'static) -> Self {
    self.inner.callbacks().on_notification = Some(Arc::new(f));
    self
  }

  /// Open the channel. No-op while a session is live or after
  /// [`dispose`](Self::dispose).
  pub fn connect(&self) {
    connect(&self.inner);
  }

  /// Close the channel and cancel any pending reconnect.
  pub fn disconnect(&self) {
    let mut state = self.inner.state();
    close(&mut state);
    info!(channel = %self.inner.subscription.channel, "push channel closed");
  }

  /// Disconnect for good; later `connect` calls do nothing.
  pub fn dispose(&self) {
    let mut state = self.inner.state();
    close(&mut state);
    state.disposed = true;
  }

  pub fn is_connected(&self) -> bool {
    self.state() == ConnectionState::Connected
  }

  pub fn state(&self) -> ConnectionState {
    self.inner.state().connection
  }

  /// Received events, oldest first.
  pub fn history(&self) -> Vec<Notification> {
    self.inner.state().history.iter().cloned().collect()
  }

  pub fn last_event(&self) -> Option<Notification> {
    self.inner.state().last_event.clone()
  }

  pub fn clear_history(&self) {
    let mut state = self.inner.state();
    state.history.clear();
    state.last_event = None;
  }
}

impl Drop for RealtimeClient {
  fn drop(&mut self) {
    self.dispose();
  }
}

/// Abort the session and the reconnect timer, and invalidate signals from
/// the aborted session.
fn close(state: &mut State) {
  state.generation = state.generation.wrapping_add(1);
  if let Some(session) = state.session.take() {
    session.abort();
  }
  if let Some(timer) = state.reconnect.take() {
    timer.abort();
  }
  state.connection = ConnectionState::Idle;
}

fn connect(inner: &Arc<Inner>) {
  let mut state = inner.state();
  if state.disposed || state.session.is_some() {
    return;
  }
  if let Some(timer) = state.reconnect.take() {
    timer.abort();
  }

  state.generation = state.generation.wrapping_add(1);
  let generation = state.generation;
  debug!(generation, channel = %inner.subscription.channel, "opening push channel");
  state.session = Some(tokio::spawn(run_session(Arc::clone(inner), generation)));
}

async fn run_session(inner: Arc<Inner>, generation: u64) {
  let reason = match inner.transport.open(&inner.subscription).await {
    Ok(mut channel) => loop {
      match channel.next().await {
        ChannelEvent::Message(event) => handle_event(&inner, generation, event),
        ChannelEvent::Closed(reason) => break reason,
      }
    },
    Err(e) => Some(e.to_string()),
  };
  channel_lost(&inner, generation, reason);
}

fn handle_event(inner: &Arc<Inner>, generation: u64, event: Notification) {
  if event.kind == NotificationKind::ConnectionAck {
    {
      let mut state = inner.state();
      if state.generation != generation || state.connection == ConnectionState::Connected {
        return;
      }
      state.connection = ConnectionState::Connected;
    }
    info!(channel = %inner.subscription.channel, "push channel connected");
    let callback = inner.callbacks().on_connect.clone();
    if let Some(f) = callback {
      f();
    }
    return;
  }

  {
    let mut state = inner.state();
    if state.generation != generation {
      return;
    }
    if state.history.len() == HISTORY_LIMIT {
      state.history.pop_front();
    }
    state.history.push_back(event.clone());
    state.last_event = Some(event.clone());
  }

  debug!(kind = %event.kind, incident_id = ?event.incident_id, "push event");
  let callback = inner.callbacks().on_notification.clone();
  if let Some(f) = callback {
    f(&event);
  }
}

/// Move to pending-reconnect and make sure exactly one timer is armed.
/// The disconnect callback fires only when an acknowledged channel is lost,
/// never for a failed open or retry.
fn channel_lost(inner: &Arc<Inner>, generation: u64, reason: Option<String>) {
  let previous = {
    let mut state = inner.state();
    if state.disposed || state.generation != generation {
      return;
    }
    state.session = None;
    let previous = state.connection;
    state.connection = ConnectionState::PendingReconnect;
    if state.reconnect.is_none() {
      state.reconnect = Some(schedule_reconnect(inner));
    }
    previous
  };

  let reason = reason.as_deref().unwrap_or("closed");
  match previous {
    ConnectionState::Connected => {
      warn!(reason, retry_in = ?inner.reconnect_delay, "push channel lost");
      let callback = inner.callbacks().on_disconnect.clone();
      if let Some(f) = callback {
        f();
      }
    }
    ConnectionState::Idle => {
      warn!(reason, retry_in = ?inner.reconnect_delay, "push channel unavailable")
    }
    ConnectionState::PendingReconnect => debug!(reason, "push reconnect failed"),
  }
}

fn schedule_reconnect(inner: &Arc<Inner>) -> JoinHandle<()> {
  let inner = Arc::clone(inner);
  tokio::spawn(async move {
    tokio::time::sleep(inner.reconnect_delay).await;
    {
      let mut state = inner.state();
      state.reconnect = None;
      if state.disposed || state.connection != ConnectionState::PendingReconnect {
        return;
      }
    }
    debug!("reconnecting push channel");
    connect(&inner);
  })
}
