pub mod alarm;
pub mod capture;
pub mod cli;
pub mod detection;
pub mod error;
pub mod media;
pub mod monitor;
pub mod settings;
mod utils;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

use alarm::RodioToneOutput;
use cli::CliArgs;
use detection::ReplayLoader;
use media::DirectoryCamera;
use monitor::{MonitorBackends, MonitorController, MonitorEvent};
use settings::MonitorSettings;

pub fn run(args: CliArgs) -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("areawatch starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(run_monitor(args))
}

async fn run_monitor(args: CliArgs) -> Result<()> {
    let settings = load_settings(&args)?;

    let camera = DirectoryCamera::new(&args.frames)
        .with_frame_period(Duration::from_millis(args.frame_period_ms));
    let controller = MonitorController::new(
        settings,
        MonitorBackends {
            camera: Arc::new(camera),
            model_loader: Arc::new(ReplayLoader::new(&args.script)),
            tone_output: Arc::new(RodioToneOutput::new()),
            model_cache: None,
        },
    );

    let mut events = controller.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => report_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} monitor events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    controller.start_monitoring().await?;

    let run_for = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = run_for => info!("Run duration elapsed"),
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("Interrupted");
        }
    }

    controller.stop_monitoring().await?;

    if let Some(dir) = &args.export_dir {
        let captures = controller.captures();
        for capture in &captures {
            let path = controller.export_capture(&capture.id, dir)?;
            info!("Exported {}", path.display());
        }
        info!("Exported {} captures to {}", captures.len(), dir.display());
    }

    reporter.abort();
    Ok(())
}

fn load_settings(args: &CliArgs) -> Result<MonitorSettings> {
    let mut settings = match &args.config {
        Some(path) => MonitorSettings::load(path)?,
        None => MonitorSettings::default().with_env_overrides(),
    };
    if args.no_alarm {
        settings.alarm_enabled = false;
    }
    if let Some(facing_mode) = args.facing {
        settings.facing_mode = facing_mode;
    }
    Ok(settings)
}

fn report_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::StatusChanged(status) => info!(
            "status: active={} phase={:?} detecting={} alarm={} captures={}{}",
            status.active,
            status.phase,
            status.detecting,
            status.alarm_active,
            status.capture_count,
            if status.is_loading() { " (loading model...)" } else { "" }
        ),
        MonitorEvent::CaptureAdded { id, taken_at } => {
            info!("capture {} taken at {}", id, taken_at.to_rfc3339())
        }
        MonitorEvent::CaptureDeleted { id } => info!("capture {} deleted", id),
        MonitorEvent::ModelLoadFailed { message } => warn!("model load failed: {}", message),
    }
}
