pub mod api;
pub mod charts;
pub mod config;
pub mod dashboard;
pub mod export;
pub mod geocode;
pub mod layer;
pub mod popup;
pub mod projection;
pub mod render;
pub mod server;
pub mod severity;
pub mod types;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the latest figures and write the map layer, chart data and tiles
    Generate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Fetch the latest figures and serve the dashboard
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Generate { config } => {
            info!("Generating dashboard with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;
            let (dashboard, charts) = load_dashboard(&app_config).await?;

            export::write_dashboard(&app_config, &dashboard, &charts)?;
            info!("Generation complete!");
        }
        Commands::Serve { config } => {
            info!("Serving dashboard with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;
            let (dashboard, charts) = load_dashboard(&app_config).await?;

            server::start_server(server::AppState {
                dashboard: Mutex::new(dashboard),
                charts,
                config: app_config,
            })
            .await?;
        }
    }

    Ok(())
}

async fn load_dashboard(
    app_config: &config::AppConfig,
) -> anyhow::Result<(dashboard::DashboardState, charts::JsonChartSink)> {
    let client = api::ApiClient::from_config(&app_config.api)?;
    info!("Fetching statistics from {}", client.base_url());

    let mut state = dashboard::DashboardState::new(app_config);
    let charts = charts::JsonChartSink::new();
    let delay = Duration::from_millis(app_config.charts.last_state_delay_ms);

    let report = dashboard::refresh(&client, &mut state, &charts, delay).await;
    info!("Refresh finished: {:?}", report);

    Ok((state, charts))
}
