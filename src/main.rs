mod api;
mod app;
mod cache;
mod config;
mod event;
mod logging;
mod query;
mod realtime;
mod render;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::WrapErr, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use api::api_types::ApiOcorrencia;
use api::mapper::status_label;
use api::{CachedIncidentClient, Incident, ListParams, Priority};
use cache::CacheSource;
use config::Config;
use realtime::DeviceIdentity;

#[derive(Parser, Debug)]
#[command(name = "vigia")]
#[command(about = "Real-time incident feed with a local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/vigia/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Debug logging (RUST_LOG takes precedence)
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Watch the incident list and push events (default)
  Watch {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 20)]
    per_page: u32,
    /// Seconds between refreshes of stale data
    #[arg(long, default_value_t = 60)]
    refresh: u64,
  },
  /// Print one page of incidents
  List {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 20)]
    per_page: u32,
    /// Backend status, e.g. "Registrada"
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    crime_type: Option<i64>,
    #[arg(long)]
    neighborhood: Option<i64>,
  },
  /// Show one incident by backend id
  Get { id: i64 },
  /// Incident counts per priority
  Counts,
  /// Register a new incident
  Create {
    #[arg(long)]
    crime_type: i64,
    #[arg(long)]
    neighborhood: i64,
    #[arg(long)]
    description: String,
    #[arg(long)]
    address: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,
    #[arg(long, allow_hyphen_values = true)]
    lng: f64,
    #[arg(long, default_value_t = 0)]
    victims: i64,
    /// Estimated loss
    #[arg(long)]
    loss: Option<f64>,
  },
  /// Mark an incident as resolved
  Resolve { id: i64 },
  /// Delete an incident
  Delete { id: i64 },
  /// Show this installation's device identity
  Device,
  /// Empty the local cache
  ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let log_dir = Config::data_dir().ok().map(|dir| dir.join("logs"));
  let _log_guard = logging::init(log_dir.as_deref(), args.verbose)?;

  let client = CachedIncidentClient::from_config(&config)?;
  if let Err(e) = client.storage().init().await {
    warn!(error = %e, "local cache unavailable, reading from the network only");
  }

  let command = args.command.unwrap_or(Command::Watch {
    page: 1,
    per_page: 20,
    refresh: 60,
  });

  match command {
    Command::Watch {
      page,
      per_page,
      refresh,
    } => {
      let mut app = app::App::new(
        config,
        client,
        ListParams::page(page, per_page),
        Duration::from_secs(refresh.max(1)),
      );
      app.run().await?;
    }
    Command::List {
      page,
      per_page,
      status,
      crime_type,
      neighborhood,
    } => {
      let params = ListParams {
        status,
        id_tipo_crime: crime_type,
        id_bairro: neighborhood,
        ..ListParams::page(page, per_page)
      };
      let page = client.list_incidents(&params).await?;
      println!("{}", render::page(&page));
    }
    Command::Get { id } => {
      let result = client
        .load_incident(id)
        .await
        .wrap_err_with(|| format!("Failed to load incident {}", id))?;
      println!("{}", render::incident_detail(&result.data));
      if result.source == CacheSource::Cache {
        println!("(from local cache)");
      }
    }
    Command::Counts => {
      let counts = client.counts().await?;
      println!("{}", render::counts(&counts));
    }
    Command::Create {
      crime_type,
      neighborhood,
      description,
      address,
      lat,
      lng,
      victims,
      loss,
    } => {
      let record = ApiOcorrencia {
        id_tipo_crime: Some(crime_type),
        id_bairro: Some(neighborhood),
        quantidade_vitimas: Some(victims),
        valor_prejuizo: loss.map(serde_json::Value::from),
        data_ocorrencia: Some(chrono::Local::now().to_rfc3339()),
        ..ApiOcorrencia::default()
      };
      let draft = draft_incident(record, description, address.unwrap_or_default(), lat, lng);
      let created = client
        .create_incident(&draft)
        .await
        .wrap_err("Failed to create incident")?;
      println!("{}", render::incident_detail(&created));
    }
    Command::Resolve { id } => {
      let mut incident = (*client.get_incident(id).await?).clone();
      incident.status = status_label("Resolvida");
      let updated = client
        .update_incident(&incident)
        .await
        .wrap_err_with(|| format!("Failed to resolve incident {}", id))?;
      println!("{}", render::incident_row(&updated));
    }
    Command::Delete { id } => {
      client
        .delete_incident(id)
        .await
        .wrap_err_with(|| format!("Failed to delete incident {}", id))?;
      println!("deleted incident {}", id);
    }
    Command::Device => {
      let path = DeviceIdentity::default_path(&config.device)
        .unwrap_or_else(|| PathBuf::from("vigia_device_id"));
      let identity = DeviceIdentity::resolve(&path, &config.device);
      println!("{} ({})", identity.id, identity.kind);
    }
    Command::ClearCache => {
      client.clear_local().await?;
      println!("cache cleared");
    }
  }

  Ok(())
}

/// An incident that exists only locally, to be sent to the API.
fn draft_incident(
  record: ApiOcorrencia,
  description: String,
  location: String,
  lat: f64,
  lng: f64,
) -> Incident {
  Incident {
    id: String::new(),
    incident_type: String::new(),
    description,
    location,
    zone: String::new(),
    bairro: String::new(),
    lat,
    lng,
    coordinates: [lat, lng],
    priority: Priority::Low,
    status: status_label("Registrada"),
    timestamp: record.data_ocorrencia.clone().unwrap_or_default(),
    api_data: record,
  }
}
