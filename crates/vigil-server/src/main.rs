use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use vigil_config::{ConfigLoader, VigilConfig};
use vigil_core::SystemClock;
use vigil_logging::init_logging;
use vigil_server::{Engine, NotificationDispatcher, Scheduler};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory containing vigil.toml
    #[arg(short, long, default_value = "config")]
    config_dir: PathBuf,

    /// Print the default configuration and exit
    #[arg(long)]
    print_default_config: bool,

    /// Run every health check and aggregation once, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_default_config {
        println!("{}", VigilConfig::default().to_toml_string()?);
        return Ok(());
    }

    let config = ConfigLoader::new(&args.config_dir).validate()?;
    init_logging(&config.logging)?;

    info!(
        name = %config.system.name,
        version = %config.system.version,
        config_dir = %args.config_dir.display(),
        "Starting Vigil"
    );

    let engine = Arc::new(Engine::from_config(&config, SystemClock::shared()).await?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = NotificationDispatcher::from_config(&config.alerts)?;
    let notify_handle = dispatcher.spawn(engine.bus().subscribe(), shutdown_rx.clone());

    if args.once {
        for (service, result) in engine.evaluator().evaluate_all().await {
            match result {
                Ok(event) => info!(service = %service, status = %event.status, "Health checked"),
                Err(e) => warn!(service = %service, error = %e, "Health check failed"),
            }
        }
        let report = engine.sweep_aggregations().await;
        info!(?report, "Aggregation sweep completed");

        // 释放所有发布端，通知器处理完剩余事件后随总线关闭退出
        drop(engine);
        notify_handle.await?;
        drop(shutdown_tx);
        return Ok(());
    }

    let scheduler = Scheduler::start(engine.clone(), &config.scheduler, shutdown_rx).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    scheduler.shutdown().await?;
    notify_handle.await?;

    info!("Vigil stopped");
    Ok(())
}
