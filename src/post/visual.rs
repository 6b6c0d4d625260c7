//! Single-slot snapshot handoff for display consumers
//!
//! The sink owns exactly one snapshot buffer. Publishing moves it to the
//! receiver inside a `VisualFrame`; dropping the frame hands it back. While the
//! buffer is queued or still held by the reader, new snapshots are dropped, so
//! the writer never touches samples that are being displayed.

use std::ops::Deref;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use super::block::{Complex32, ConvertedBlock};

/// Default snapshot length in samples
pub const DEFAULT_VISUAL_SAMPLES: usize = 16384 * 2;

/// A published snapshot. Dropping it returns the buffer to the sink.
#[derive(Debug)]
pub struct VisualFrame {
    block: ConvertedBlock,
    recycle: Sender<ConvertedBlock>,
}

impl Deref for VisualFrame {
    type Target = ConvertedBlock;

    fn deref(&self) -> &ConvertedBlock {
        &self.block
    }
}

impl Drop for VisualFrame {
    fn drop(&mut self) {
        let _ = self.recycle.try_send(std::mem::take(&mut self.block));
    }
}

/// Consumer side of the visual handoff
#[derive(Debug, Clone)]
pub struct VisualReceiver {
    frames: Receiver<VisualFrame>,
}

impl VisualReceiver {
    pub fn try_recv(&self) -> Option<VisualFrame> {
        self.frames.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<VisualFrame, RecvTimeoutError> {
        self.frames.recv_timeout(timeout)
    }

    /// True when no snapshot is waiting
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Producer side, owned by the dispatcher
#[derive(Debug)]
pub struct VisualSink {
    frames_tx: Sender<VisualFrame>,
    frames_rx: Receiver<VisualFrame>,
    recycle_tx: Sender<ConvertedBlock>,
    recycle_rx: Receiver<ConvertedBlock>,
    spare: Option<ConvertedBlock>,
}

impl VisualSink {
    pub fn new() -> (Self, VisualReceiver) {
        let (frames_tx, frames_rx) = bounded(1);
        let (recycle_tx, recycle_rx) = bounded(1);
        let receiver = VisualReceiver {
            frames: frames_rx.clone(),
        };
        let sink = Self {
            frames_tx,
            frames_rx,
            recycle_tx,
            recycle_rx,
            spare: Some(ConvertedBlock::default()),
        };
        (sink, receiver)
    }

    /// Publish up to `max_samples` of `samples` if the slot is free.
    ///
    /// Returns false when the previous snapshot has not been drained yet; the
    /// new snapshot is then silently dropped.
    pub fn offer(
        &mut self,
        frequency: i64,
        sample_rate: u32,
        samples: &[Complex32],
        max_samples: usize,
    ) -> bool {
        if !self.frames_tx.is_empty() {
            return false;
        }

        let mut block = match self.spare.take() {
            Some(block) => block,
            None => match self.recycle_rx.try_recv() {
                Ok(block) => block,
                // Reader still holds the buffer
                Err(_) => return false,
            },
        };

        let count = samples.len().min(max_samples);
        if block.samples.capacity() < count {
            block.samples.reserve(count - block.samples.len());
        }
        block.assign(frequency, sample_rate, &samples[..count]);

        let frame = VisualFrame {
            block,
            recycle: self.recycle_tx.clone(),
        };
        // A rejected frame recycles its buffer on drop
        self.frames_tx.try_send(frame).is_ok()
    }

    /// Discard any undelivered snapshot and release the buffer
    pub fn shutdown(&mut self) {
        while self.frames_rx.try_recv().is_ok() {}
        while self.recycle_rx.try_recv().is_ok() {}
        self.spare = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: usize) -> Vec<Complex32> {
        (0..n).map(|i| Complex32::new(i as f32, -(i as f32))).collect()
    }

    #[test]
    fn test_second_offer_dropped_until_drained() {
        let (mut sink, rx) = VisualSink::new();

        assert!(sink.offer(1, 10, &samples(8), 4));
        assert!(!sink.offer(2, 10, &samples(8), 4));

        let frame = rx.try_recv().expect("first snapshot");
        assert_eq!(frame.frequency, 1);
        assert_eq!(frame.samples, samples(4));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_busy_while_reader_holds_frame() {
        let (mut sink, rx) = VisualSink::new();
        assert!(sink.offer(1, 10, &samples(4), 16));

        let frame = rx.try_recv().expect("snapshot");
        assert!(!sink.offer(2, 10, &samples(4), 16));

        drop(frame);
        assert!(sink.offer(3, 10, &samples(4), 16));
        assert_eq!(rx.try_recv().expect("snapshot").frequency, 3);
    }

    #[test]
    fn test_buffer_capacity_is_reused() {
        let (mut sink, rx) = VisualSink::new();
        assert!(sink.offer(1, 10, &samples(1000), 1000));
        let frame = rx.try_recv().expect("snapshot");
        let capacity = frame.samples.capacity();
        drop(frame);

        assert!(sink.offer(1, 10, &samples(10), 1000));
        let frame = rx.try_recv().expect("snapshot");
        assert_eq!(frame.len(), 10);
        assert_eq!(frame.samples.capacity(), capacity);
    }

    #[test]
    fn test_short_block_copies_what_is_there() {
        let (mut sink, rx) = VisualSink::new();
        assert!(sink.offer(1, 10, &samples(3), DEFAULT_VISUAL_SAMPLES));
        assert_eq!(rx.try_recv().expect("snapshot").len(), 3);
    }

    #[test]
    fn test_shutdown_discards_pending_snapshot() {
        let (mut sink, rx) = VisualSink::new();
        assert!(sink.offer(1, 10, &samples(3), 3));
        sink.shutdown();
        assert!(rx.is_empty());
    }
}
