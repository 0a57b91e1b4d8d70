use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use xpad_bridge::config::{default_config_path, BridgeConfig};
use xpad_bridge::driver::{Driver, DriverHandle};
use xpad_bridge::notify::TracingNotifier;
use xpad_bridge::pad::loopback::LoopbackPads;
use xpad_bridge::protocol::ReportFormat;
use xpad_bridge::replay::{self, Replayer};
use xpad_bridge::usb::sim::SimulatedBus;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let config = BridgeConfig::load_or_create(&config_path)?;
    setup_logging_env(config.log_level()?);
    info!("Using config {}", config_path.display());

    let (format, frames, frame_interval) = match &config.replay {
        Some(replay) => (
            replay.format,
            replay::load_capture(&replay.capture)?,
            replay.frame_interval_ms,
        ),
        None => {
            warn!("No [replay] section configured, playing the built-in wired capture");
            (ReportFormat::Wired, replay::demo_capture(ReportFormat::Wired), 250)
        }
    };

    let bus = Arc::new(SimulatedBus::new());
    let pads = Arc::new(LoopbackPads::new());
    let notifier = Arc::new(TracingNotifier::new(config.notifications.enabled));
    let hotplug_events = bus.hotplug_events()?;

    let driver = Arc::new(Driver::new(
        bus.clone(),
        pads.clone(),
        notifier,
        config.driver_settings(),
    ));
    let driver_handle = DriverHandle::spawn(driver, Some(hotplug_events))
        .map_err(|e| eyre!("Failed to start driver: {}", e))?;

    let device = replay::plug_device(&bus, format)?;
    info!("Simulated {} device plugged as {}", format, device);

    let cancel = CancellationToken::new();
    let replayer = Replayer::new(
        bus.clone(),
        device,
        format,
        frames,
        Duration::from_millis(frame_interval.max(1)),
    );
    let replay_task = tokio::spawn(replayer.run(cancel.child_token()));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;
    info!("Ctrl-C received, stopping");

    cancel.cancel();
    match replay_task.await {
        Ok(Ok(stats)) => info!("Replay delivered {} frames", stats.delivered),
        Ok(Err(e)) => error!("Replay failed: {}", e),
        Err(e) => error!("Replay task panicked: {}", e),
    }

    for handle in pads.active_handles()? {
        if let Some(report) = pads.last_report(handle)? {
            info!("Last report on {}: {:04x?}", handle, report.words);
        }
    }

    driver_handle
        .shutdown()
        .await
        .map_err(|e| eyre!("Driver shutdown failed: {}", e))?;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
