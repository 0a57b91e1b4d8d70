//! Driver Handle - start/stop lifecycle for the bridge
//!
//! Spawns the two long-running tasks of a started driver:
//! 1. **Poll task**: periodic ring drain and report forwarding
//! 2. **Hotplug task**: turns transport arrival/removal events into
//!    probe/attach and detach calls
//!
//! Both stop on the shared cancellation token. [`DriverHandle::shutdown`]
//! cancels them, waits for them, and then frees every unit.

use super::poller::run_poll_loop;
use super::{Driver, DriverError};
use crate::usb::HotplugEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct DriverHandle {
    driver: Arc<Driver>,
    cancel: CancellationToken,
    poller: JoinHandle<Result<(), DriverError>>,
    hotplug: Option<JoinHandle<Result<(), DriverError>>>,
}

impl DriverHandle {
    /// Start the driver and spawn its tasks. Must be called inside a tokio
    /// runtime.
    pub fn spawn(
        driver: Arc<Driver>,
        hotplug_events: Option<mpsc::Receiver<HotplugEvent>>,
    ) -> Result<Self, DriverError> {
        info!("Spawning driver tasks");
        driver.start()?;

        let cancel = CancellationToken::new();

        let poll_driver = Arc::clone(&driver);
        let poll_cancel = cancel.child_token();
        let poller = tokio::spawn(async move {
            info!("Poll task started");
            let result = run_poll_loop(poll_driver, poll_cancel).await;
            match &result {
                Ok(()) => info!("Poll task finished"),
                Err(e) => error!("Poll task terminated with error: {}", e),
            }
            result
        });

        let hotplug = hotplug_events.map(|events| {
            let hotplug_driver = Arc::clone(&driver);
            let hotplug_cancel = cancel.child_token();
            tokio::spawn(run_hotplug_loop(hotplug_driver, events, hotplug_cancel))
        });
        debug!("Hotplug task running: {}", hotplug.is_some());

        info!("Driver started");
        Ok(Self {
            driver,
            cancel,
            poller,
            hotplug,
        })
    }

    pub fn driver(&self) -> &Arc<Driver> {
        &self.driver
    }

    /// True once the poll task has exited, normally or not.
    pub fn is_finished(&self) -> bool {
        self.poller.is_finished()
    }

    /// Cancel the tasks, wait for them, then stop the driver. The first task
    /// error, if any, is returned after cleanup has run.
    pub async fn shutdown(self) -> Result<(), DriverError> {
        info!("Shutting down driver");
        self.cancel.cancel();

        let mut first_error = None;
        let mut tasks = vec![("poll", self.poller)];
        if let Some(hotplug) = self.hotplug {
            tasks.push(("hotplug", hotplug));
        }
        for (name, task) in tasks {
            let outcome = match task.await {
                Ok(result) => result,
                Err(e) => Err(DriverError::Task(format!("{} task: {}", name, e))),
            };
            if let Err(e) = outcome {
                warn!("{} task ended with error: {}", name, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        self.driver.stop()?;
        info!("Driver stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn run_hotplug_loop(
    driver: Arc<Driver>,
    mut events: mpsc::Receiver<HotplugEvent>,
    cancel: CancellationToken,
) -> Result<(), DriverError> {
    info!("Hotplug task started");
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            debug!("Hotplug channel closed");
            break;
        };

        debug!("Hotplug event: {:?}", event);
        match driver.handle_hotplug(event) {
            Ok(()) => {}
            Err(DriverError::LockPoisoned(e)) => {
                error!("Hotplug task stopping, registry lock poisoned: {}", e);
                return Err(DriverError::LockPoisoned(e));
            }
            Err(e) => warn!("Hotplug event {:?} not handled: {}", event, e),
        }
    }
    info!("Hotplug task finished");
    Ok(())
}
