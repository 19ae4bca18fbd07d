//! Encoded-frame fan-out.
//!
//! The pipeline publishes every emitted JPEG here; each MJPEG client holds a
//! subscription with its own bounded queue. A slow client loses frames (its
//! queue fills and publishes to it are skipped), never stalls the pipeline,
//! and always sees the frames it does get in publish order. Closing the hub
//! ends every subscriber's stream cleanly.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};

/// Frames queued per subscriber before publishes to it are skipped.
const SUBSCRIBER_QUEUE_DEPTH: usize = 4;

#[derive(Clone, Default)]
pub struct FrameHub {
    inner: Arc<Mutex<HubInner>>,
}

#[derive(Default)]
struct HubInner {
    subscribers: Vec<SyncSender<Arc<Vec<u8>>>>,
    latest: Option<Arc<Vec<u8>>>,
    closed: bool,
}

impl FrameHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the frame stream. The receiver yields frames in publish
    /// order and disconnects when the hub closes. Late subscribers are
    /// primed with the most recent frame when one exists.
    pub fn subscribe(&self) -> Receiver<Arc<Vec<u8>>> {
        let (tx, rx) = sync_channel(SUBSCRIBER_QUEUE_DEPTH);
        let mut inner = self.inner.lock().expect("frame hub lock");
        if inner.closed {
            // Sender dropped here; the receiver reports disconnect at once.
            return rx;
        }
        if let Some(latest) = &inner.latest {
            let _ = tx.try_send(latest.clone());
        }
        inner.subscribers.push(tx);
        rx
    }

    /// Publish one encoded frame to all subscribers. Full queues skip this
    /// frame for that subscriber; disconnected subscribers are pruned.
    pub fn publish(&self, jpeg: Vec<u8>) {
        let frame = Arc::new(jpeg);
        let mut inner = self.inner.lock().expect("frame hub lock");
        if inner.closed {
            return;
        }
        inner.latest = Some(frame.clone());
        inner
            .subscribers
            .retain(|tx| match tx.try_send(frame.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    /// Close the hub: all subscriber streams end after draining their queues
    /// and later publishes are dropped.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("frame hub lock");
        inner.closed = true;
        inner.subscribers.clear();
    }

    /// Most recently published frame, if any.
    pub fn latest_frame(&self) -> Option<Arc<Vec<u8>>> {
        self.inner.lock().expect("frame hub lock").latest.clone()
    }

    /// True once `close` has been called (no publisher will appear).
    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("frame hub lock").closed
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("frame hub lock").subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_frames_in_publish_order() {
        let hub = FrameHub::new();
        let rx = hub.subscribe();
        hub.publish(vec![1]);
        hub.publish(vec![2]);
        assert_eq!(*rx.recv().unwrap(), vec![1]);
        assert_eq!(*rx.recv().unwrap(), vec![2]);
    }

    #[test]
    fn late_subscriber_is_primed_with_latest_frame() {
        let hub = FrameHub::new();
        hub.publish(vec![7]);
        let rx = hub.subscribe();
        assert_eq!(*rx.recv().unwrap(), vec![7]);
    }

    #[test]
    fn slow_subscriber_drops_frames_but_keeps_order() {
        let hub = FrameHub::new();
        let rx = hub.subscribe();
        for i in 0..20u8 {
            hub.publish(vec![i]);
        }
        let mut seen = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            seen.push(frame[0]);
        }
        assert!(seen.len() <= SUBSCRIBER_QUEUE_DEPTH);
        let mut sorted = seen.clone();
        sorted.sort_unstable();
        assert_eq!(seen, sorted, "delivered frames stay in publish order");
    }

    #[test]
    fn close_ends_subscriber_streams() {
        let hub = FrameHub::new();
        let rx = hub.subscribe();
        hub.publish(vec![1]);
        hub.close();
        hub.publish(vec![2]);
        assert_eq!(*rx.recv().unwrap(), vec![1]);
        assert!(rx.recv().is_err());
    }
}
