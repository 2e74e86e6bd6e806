// WorkerBridge - Carries results from tokio workers back to the interactive side
//
// Background tasks (conversion, update check, update download) never touch
// AppState. They post WorkerEvents through this bridge; the owner of the
// StateManager drains the receiving end and applies them in order.
//
// The bridge provides:
// - Spawning async tasks on the tokio runtime
// - Lossy delivery for high-frequency progress events (try_send)
// - Guaranteed delivery for terminal events (send().await)

use crate::services::conversion::{CompletedProcess, ConversionError};
use crate::services::installer::{DownloadProgress, InstallError, InstalledUpdate};
use crate::services::update::UpdateResult;
use camino::Utf8PathBuf;
use std::future::Future;
use tokio::sync::mpsc;

/// Capacity of the worker event channel
///
/// Progress events beyond this are dropped while the interactive side lags.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Messages posted by background workers
#[derive(Debug)]
pub enum WorkerEvent {
    /// The conversion writing into `output_dir` has finished
    ConversionFinished {
        output_dir: Utf8PathBuf,
        result: Result<CompletedProcess, ConversionError>,
    },

    /// The update check produced its verdict
    UpdateChecked(UpdateResult),

    /// More of the update archive arrived
    DownloadProgress(DownloadProgress),

    /// The update download and unpack finished
    UpdateInstalled(Result<InstalledUpdate, InstallError>),
}

impl WorkerEvent {
    /// Terminal events end a unit of work; the rest are progress reports
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerEvent::DownloadProgress(_))
    }
}

/// Coordinates between tokio workers and the interactive side
///
/// # Example
/// ```ignore
/// let runtime = tokio::runtime::Runtime::new()?;
/// let (bridge, mut events) = WorkerBridge::new(runtime.handle().clone());
///
/// let worker = bridge.clone();
/// bridge.spawn_async(move || async move {
///     let result = checker.check(VERSION).await;
///     worker.deliver(WorkerEvent::UpdateChecked(result)).await;
/// });
///
/// while let Some(event) = events.blocking_recv() {
///     controller.handle_event(event);
/// }
/// ```
#[derive(Clone)]
pub struct WorkerBridge {
    /// Handle to the tokio runtime for spawning async tasks
    tokio_handle: tokio::runtime::Handle,

    /// Bounded to [`EVENT_CHANNEL_CAPACITY`] events to prevent unbounded memory growth
    event_tx: mpsc::Sender<WorkerEvent>,
}

impl WorkerBridge {
    /// Create a new bridge and the receiver its events arrive on
    pub fn new(tokio_handle: tokio::runtime::Handle) -> (Self, mpsc::Receiver<WorkerEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (
            Self {
                tokio_handle,
                event_tx,
            },
            event_rx,
        )
    }

    /// Post an event without waiting
    ///
    /// Used for progress reports, which may be dropped if the channel is full.
    pub fn post(&self, event: WorkerEvent) {
        match self.event_tx.try_send(event) {
            Ok(_) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Worker event channel full - skipping progress update");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Failed to post worker event - receiver has stopped");
            }
        }
    }

    /// Deliver an event, waiting for channel capacity
    ///
    /// Used for terminal events, which must never be dropped.
    pub async fn deliver(&self, event: WorkerEvent) {
        if self.event_tx.send(event).await.is_err() {
            tracing::warn!("Failed to deliver worker event - receiver has stopped");
        }
    }

    /// Spawn an async task on the tokio runtime
    pub fn spawn_async<F, Fut>(&self, future_factory: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tokio_handle.spawn(async move {
            future_factory().await;
        });
    }

    pub fn tokio_handle(&self) -> &tokio::runtime::Handle {
        &self.tokio_handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_spawned_worker_delivers_event() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (bridge, mut events) = WorkerBridge::new(rt.handle().clone());

        let worker = bridge.clone();
        bridge.spawn_async(move || async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            worker
                .deliver(WorkerEvent::UpdateChecked(UpdateResult::UpToDate))
                .await;
        });

        let event = rt.block_on(async {
            tokio::time::timeout(Duration::from_secs(1), events.recv())
                .await
                .unwrap()
        });
        assert!(matches!(
            event,
            Some(WorkerEvent::UpdateChecked(UpdateResult::UpToDate))
        ));

        rt.shutdown_timeout(Duration::from_secs(1));
    }

    #[test]
    fn test_post_drops_when_full() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (bridge, mut events) = WorkerBridge::new(rt.handle().clone());

        for i in 0..(EVENT_CHANNEL_CAPACITY as u64 + 10) {
            bridge.post(WorkerEvent::DownloadProgress(DownloadProgress {
                downloaded: i,
                total: None,
            }));
        }

        let mut received = 0;
        while events.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, EVENT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_post_after_receiver_dropped() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (bridge, events) = WorkerBridge::new(rt.handle().clone());
        drop(events);

        // Must not panic
        bridge.post(WorkerEvent::UpdateChecked(UpdateResult::UpToDate));
    }

    #[test]
    fn test_terminal_events() {
        assert!(WorkerEvent::UpdateChecked(UpdateResult::UpToDate).is_terminal());
        assert!(
            !WorkerEvent::DownloadProgress(DownloadProgress {
                downloaded: 1,
                total: Some(2)
            })
            .is_terminal()
        );
    }
}
