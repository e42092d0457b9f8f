//! # Sample Channel
//!
//! FIFO handoff of decoded heart rates from the session thread to a consumer.
//! Backed by an unbounded crossbeam channel so the producer never blocks and
//! the consumer drains on its own schedule.
//!
//! Each consumer gets its own channel; a single channel is not a broadcast.

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::cell::Cell;

/// A decoded heart rate. `sequence` starts at 1 and grows by one per sample
/// for the lifetime of a session, reconnects included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateSample {
    pub value: u16,
    pub sequence: u64,
}

/// Producer half, owned by the session manager
#[derive(Debug, Clone)]
pub struct SampleSender {
    tx: Sender<HeartRateSample>,
}

/// Consumer half
#[derive(Debug)]
pub struct SampleReceiver {
    rx: Receiver<HeartRateSample>,
    closed: Cell<bool>,
}

pub fn sample_channel() -> (SampleSender, SampleReceiver) {
    let (tx, rx) = unbounded();
    (
        SampleSender { tx },
        SampleReceiver {
            rx,
            closed: Cell::new(false),
        },
    )
}

impl SampleSender {
    /// Never blocks. Returns `false` only once the consumer is gone.
    pub fn push(&self, sample: HeartRateSample) -> bool {
        match self.tx.send(sample) {
            Ok(()) => true,
            Err(_) => {
                log::debug!("Sample consumer dropped, discarding #{}", sample.sequence);
                false
            }
        }
    }
}

impl SampleReceiver {
    /// Drain everything queued right now, oldest first. Empty when nothing arrived.
    pub fn try_pop_all(&self) -> Vec<HeartRateSample> {
        let mut samples = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(sample) => samples.push(sample),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed.set(true);
                    break;
                }
            }
        }
        samples
    }

    /// True once a drain found the producer gone and nothing left queued
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}
