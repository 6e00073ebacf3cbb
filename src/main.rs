use anyhow::Result;
use clap::Parser;
use lambda_heatpump::config::Config;
use lambda_heatpump::coordinator::{Coordinator, EngineEvent, Observer};
use lambda_heatpump::external::StaticStateSource;
use lambda_heatpump::modbus::{ModbusClient, ModbusTransport, SimulatedTransport};
use lambda_heatpump::{Overrides, logging};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};

/// Logs period resets; snapshots are summarized from the watch stream
struct ResetLogger;

impl Observer for ResetLogger {
    fn on_event(&self, event: &EngineEvent) {
        if let EngineEvent::PeriodReset { scope, site_id } = event {
            info!("{} period reset on site {}", scope, site_id);
        }
    }
}

#[derive(Parser)]
#[command(name = "lambda-heatpump", version = env!("APP_VERSION"))]
#[command(about = "Modbus-TCP telemetry and control engine for Lambda heat pumps", long_about = None)]
struct Args {
    /// Configuration file; the default locations are searched when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run against the in-memory demo installation
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    logging::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    info!("lambda-heatpump {} starting up", env!("APP_VERSION"));

    let overrides = match config.site.overrides_file.as_deref() {
        Some(path) => Overrides::from_file(path),
        None => Overrides::default(),
    };

    let transport: Box<dyn ModbusTransport> = if args.simulate {
        info!("Running against the simulated register bank");
        config.persistence.file = std::env::temp_dir()
            .join("lambda_heatpump_sim_persist.json")
            .to_string_lossy()
            .into_owned();
        let sim = SimulatedTransport::demo();
        let driver = sim.clone();
        tokio::spawn(async move {
            let mut every = tokio::time::interval(Duration::from_secs(5));
            loop {
                every.tick().await;
                driver.advance_demo();
            }
        });
        Box::new(sim)
    } else {
        Box::new(ModbusClient::new(
            &config.site.host,
            config.site.port,
            config.modbus.connect_timeout(),
        ))
    };

    let states = Arc::new(StaticStateSource::new());
    let mut coordinator = Coordinator::new(config, overrides, transport, states)
        .map_err(|e| anyhow::anyhow!("Failed to create coordinator: {}", e))?;
    coordinator.add_observer(Arc::new(ResetLogger));
    let handle = coordinator.handle();

    let mut snapshots = handle.snapshot_stream();
    let summary_task = tokio::spawn(async move {
        while let Some(snapshot) = snapshots.next().await {
            if snapshot.sequence == 0 {
                continue;
            }
            debug!(
                "Snapshot {}: {} registers, {} derived values{}",
                snapshot.sequence,
                snapshot.raw.len(),
                snapshot.derived.len(),
                if snapshot.stale { " (stale)" } else { "" }
            );
        }
    });

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            signal_handle.shutdown();
        }
    });

    let result = coordinator.run().await;
    summary_task.abort();
    match result {
        Ok(()) => {
            info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Coordinator failed with error: {}", e);
            Err(anyhow::anyhow!("Coordinator error: {}", e))
        }
    }
}
