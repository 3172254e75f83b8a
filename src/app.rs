use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::{CachedIncidentClient, ListParams, SyncAction};
use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::realtime::{DeviceIdentity, RealtimeClient, Subscription, WebSocketTransport};
use crate::render;

/// Live view: prints the incident list, then every push event and the
/// incidents it brings in, until Ctrl-C.
pub struct App {
  /// Application configuration
  config: Config,

  /// Cached incident client
  client: CachedIncidentClient,

  /// Page being watched
  params: ListParams,

  /// How often stale queries are refreshed
  refresh: Duration,

  /// Push channel, while watching
  realtime: Option<RealtimeClient>,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(
    config: Config,
    client: CachedIncidentClient,
    params: ListParams,
    refresh: Duration,
  ) -> Self {
    Self {
      config,
      client,
      params,
      refresh,
      realtime: None,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    let mut events = EventHandler::new(self.refresh);
    self.realtime = Some(self.connect_realtime(events.sender()));

    // Initial data load
    self.refresh_view().await;

    while !self.should_quit {
      match events.next().await {
        Some(event) => self.handle_event(event).await,
        None => break,
      }
    }

    if let Some(realtime) = self.realtime.take() {
      realtime.disconnect();
    }
    info!("watch stopped");
    Ok(())
  }

  fn device_identity(&self) -> DeviceIdentity {
    let path = DeviceIdentity::default_path(&self.config.device)
      .unwrap_or_else(|| PathBuf::from("vigia_device_id"));
    DeviceIdentity::resolve(&path, &self.config.device)
  }

  fn connect_realtime(&self, tx: mpsc::UnboundedSender<Event>) -> RealtimeClient {
    let subscription = Subscription {
      channel: self.config.api.channel.clone(),
      device: self.device_identity(),
    };
    info!(
      url = %self.config.api.realtime_url,
      device_id = %subscription.device.id,
      device_type = %subscription.device.kind,
      "subscribing to push channel"
    );

    let transport = Arc::new(WebSocketTransport::new(self.config.api.realtime_url.clone()));
    let realtime = RealtimeClient::new(transport, subscription)
      .on_connect({
        let tx = tx.clone();
        move || {
          let _ = tx.send(Event::Connected);
        }
      })
      .on_disconnect({
        let tx = tx.clone();
        move || {
          let _ = tx.send(Event::Disconnected);
        }
      })
      .on_notification(move |event| {
        let _ = tx.send(Event::Push(event.clone()));
      });

    realtime.connect();
    realtime
  }

  async fn handle_event(&mut self, event: Event) {
    match event {
      Event::Push(notification) => {
        println!("{}", render::notification(&notification));
        // Applied in order so repeated events stay idempotent
        match self.client.apply_notification(&notification).await {
          Ok(SyncAction::Prepended(incident)) => {
            println!("+ {}", render::incident_row(&incident));
          }
          Ok(action) => debug!(?action, "push event applied"),
          Err(e) => warn!(error = %e, event = %notification.summary(), "could not apply push event"),
        }
      }
      Event::Connected => println!("* connected to {}", self.config.api.channel),
      Event::Disconnected => println!("* connection lost, reconnecting"),
      Event::Tick => {
        self.refresh_view().await;
        self.print_status();
      }
      Event::Shutdown => self.should_quit = true,
    }
  }

  /// Print the connectivity indicator, the push events received since the
  /// last status line, and the state of the watched page.
  fn print_status(&self) {
    let Some(realtime) = &self.realtime else {
      return;
    };
    let received = realtime.history().len();
    let last = realtime.last_event();
    let page = self.client.page_state(&self.params);
    println!(
      "{}",
      render::status(realtime.is_connected(), received, last.as_ref(), &page)
    );
    realtime.clear_history();
  }

  /// Print counts and the watched page. Stale results print as they are
  /// and refresh in the background for the next tick.
  async fn refresh_view(&self) {
    match self.client.counts().await {
      Ok(counts) => println!("{}", render::counts(&counts)),
      Err(e) => warn!(error = %e, "could not load counts"),
    }
    match self.client.list_incidents(&self.params).await {
      Ok(page) => println!("{}", render::page(&page)),
      Err(e) => eprintln!("Error: {:#}", e),
    }
  }
}
