use std::sync::Arc;

use tokio::sync::watch;
use wrapguard_core::Frame;

/// The single mandated shared-mutable region (§5): a one-slot mailbox that
/// always holds the most recently published frame, or nothing before the
/// first frame arrives. Publishing overwrites; nobody ever blocks on it.
#[derive(Clone)]
pub struct FrameSlot {
    tx: watch::Sender<Option<Arc<Frame>>>,
}

/// A read-only handle on a `FrameSlot`. Cloning is cheap; many detector
/// stages could in principle share one, though today each machine owns
/// exactly one.
#[derive(Clone)]
pub struct FrameSlotReader {
    rx: watch::Receiver<Option<Arc<Frame>>>,
}

impl FrameSlot {
    pub fn new() -> (Self, FrameSlotReader) {
        let (tx, rx) = watch::channel(None);
        (FrameSlot { tx }, FrameSlotReader { rx })
    }

    /// Overwrites whatever frame was previously published. Never blocks.
    pub fn publish(&self, frame: Frame) {
        self.tx.send_replace(Some(Arc::new(frame)));
    }
}

impl FrameSlotReader {
    /// Returns the current frame without waiting, or `None` if the camera
    /// has not published one yet.
    pub fn current(&self) -> Option<Arc<Frame>> {
        self.rx.borrow().clone()
    }

    /// Waits for a frame newer than the last one this reader observed.
    pub async fn changed(&mut self) -> Option<Arc<Frame>> {
        if self.rx.changed().await.is_err() {
            return None;
        }
        self.rx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::RgbImage;

    fn blank_frame() -> Frame {
        Frame::new(RgbImage::new(4, 4), Utc::now())
    }

    #[test]
    fn reader_sees_none_before_first_publish() {
        let (_slot, reader) = FrameSlot::new();
        assert!(reader.current().is_none());
    }

    #[test]
    fn publish_overwrites_the_previous_frame() {
        let (slot, reader) = FrameSlot::new();
        slot.publish(blank_frame());
        let first = reader.current().unwrap();
        slot.publish(blank_frame());
        let second = reader.current().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
