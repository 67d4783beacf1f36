//! Capture device monitoring
//!
//! The watcher notices when the default capture device disappears or changes.
//! The wait loop polls until a device is available again.

use crate::audio::AudioInput;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The device in use is gone or was replaced
    Lost,
    /// A device is available again
    Restored,
}

pub type DeviceSender = mpsc::UnboundedSender<DeviceEvent>;

/// What the watcher reports for a device transition
pub fn transition(previous: Option<&str>, current: Option<&str>) -> Option<DeviceEvent> {
    match (previous, current) {
        (Some(_), None) => Some(DeviceEvent::Lost),
        (Some(a), Some(b)) if a != b => Some(DeviceEvent::Lost),
        _ => None,
    }
}

/// Poll the default device and report loss or change until cancelled
pub fn spawn_watcher(
    input: Arc<dyn AudioInput>,
    interval: Duration,
    events: DeviceSender,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut current = input.default_device();
        debug!("Watching capture device {:?}", current);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
            let device = input.default_device();
            if let Some(event) = transition(current.as_deref(), device.as_deref()) {
                if device.is_none() {
                    info!("****** Default audio device not available ******");
                } else {
                    info!("****** Default audio device changed ******");
                }
                if events.send(event).is_err() {
                    break;
                }
            }
            current = device;
        }
    })
}

/// Poll until a capture device exists, then report it once. The first check
/// is one interval in.
pub fn spawn_wait_for_device(
    input: Arc<dyn AudioInput>,
    interval: Duration,
    events: DeviceSender,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("⏳ Waiting for recording device...");
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(interval) => {}
            }
            if let Some(device) = input.default_device() {
                info!("🎙️ Recording device is ready: {}", device);
                let _ = events.send(DeviceEvent::Restored);
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ChannelInput;

    #[test]
    fn test_transition() {
        assert_eq!(transition(Some("a"), None), Some(DeviceEvent::Lost));
        assert_eq!(transition(Some("a"), Some("b")), Some(DeviceEvent::Lost));
        assert_eq!(transition(Some("a"), Some("a")), None);
        assert_eq!(transition(None, Some("a")), None);
        assert_eq!(transition(None, None), None);
    }

    #[tokio::test]
    async fn test_wait_for_device_reports_once() {
        let input = Arc::new(ChannelInput::new(None));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_wait_for_device(
            input.clone(),
            Duration::from_millis(10),
            tx,
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());

        input.set_device(Some("mic")).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(event, Some(DeviceEvent::Restored));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_present_device_reports_after_interval() {
        let input = Arc::new(ChannelInput::new(Some("mic")));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_wait_for_device(
            input,
            Duration::from_millis(100),
            tx,
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(event, Some(DeviceEvent::Restored));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_watcher_reports_loss() {
        let input = Arc::new(ChannelInput::new(Some("mic")));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = spawn_watcher(input.clone(), Duration::from_millis(10), tx, cancel.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        input.set_device(None).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(event, Some(DeviceEvent::Lost));

        cancel.cancel();
        handle.await.unwrap();
    }
}
