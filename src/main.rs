//! flowsrv service binary
//!
//! Wires the poll engine, RTU bus worker and TCP gateway together and
//! runs them until SIGINT.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use flowsrv::config::AppConfig;
use flowsrv::error::Result;
use flowsrv::gateway::GatewayServer;
use flowsrv::poll::{NullTriggerInput, PollEngine, TriggerInput};
use flowsrv::rtu::SerialRtuQueue;
use flowsrv::FlowCache;

#[derive(Parser, Debug)]
#[command(name = "flowsrv", about = "Flow-counter polling service and Modbus TCP gateway")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "FLOWSRV_CONFIG")]
    config: Option<PathBuf>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Validate the configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    flowsrv::logging::init_logging(&args.log_level)?;

    let config = AppConfig::load(args.config.as_deref())?;
    if args.validate {
        info!("configuration is valid");
        return Ok(());
    }
    // First run with a fresh config path: persist the defaults
    if let Some(path) = &args.config {
        if !path.exists() {
            config.save(path)?;
        }
    }

    let enabled = config.ports.iter().filter(|p| p.enabled).count();
    info!(
        device = %config.serial.device,
        enabled_ports = enabled,
        "starting flowsrv"
    );

    let config = Arc::new(RwLock::new(config));
    let cache = Arc::new(FlowCache::new());
    let cancel = CancellationToken::new();

    let (completion_tx, completion_rx) = mpsc::channel(16);
    let (_command_tx, command_rx) = mpsc::channel(16);

    let queue = Arc::new(SerialRtuQueue::spawn(
        &config.read().await.serial,
        completion_tx,
        cancel.clone(),
    )?);
    let trigger: Arc<dyn TriggerInput> = Arc::new(NullTriggerInput);

    let engine = PollEngine::new(
        cache.clone(),
        config.clone(),
        queue,
        trigger,
        completion_rx,
        command_rx,
    );
    let engine_cancel = cancel.clone();
    let engine_task = tokio::spawn(async move { engine.run(engine_cancel).await });

    let gateway = GatewayServer::bind(cache, config).await?;
    let gateway_cancel = cancel.clone();
    let gateway_task = tokio::spawn(async move { gateway.run(gateway_cancel).await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    cancel.cancel();

    for (name, task) in [("poll engine", engine_task), ("gateway", gateway_task)] {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{name} exited with error: {e}"),
            Err(e) => error!("{name} task panicked: {e}"),
        }
    }

    info!("flowsrv stopped");
    Ok(())
}
