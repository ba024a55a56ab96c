//! Bounded ingestion queue between the HTTP producers and the processing loop.
//!
//! Producers never block: a full queue rejects the newest sample. The consumer
//! half is not `Clone`, so at most one processing loop can ever drain it.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::config::{MAX_QUEUE_CAPACITY, check_capacity};
use crate::error::ConfigError;
use crate::model::Sample;

/// Outcome of a non-blocking enqueue.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Backpressure: the queue is at capacity.
    Full,
    /// The consumer has shut down.
    Closed,
}

impl Admission {
    pub fn is_accepted(self) -> bool {
        self == Admission::Accepted
    }
}

#[derive(Clone)]
pub struct QueueProducer {
    tx: Sender<Sample>,
}

pub struct QueueConsumer {
    rx: Receiver<Sample>,
}

/// Create a queue holding at most `capacity` pending samples.
pub fn ingest_queue(capacity: usize) -> Result<(QueueProducer, QueueConsumer), ConfigError> {
    check_capacity("queue", capacity, MAX_QUEUE_CAPACITY)?;
    let (tx, rx) = bounded(capacity);
    Ok((QueueProducer { tx }, QueueConsumer { rx }))
}

impl QueueProducer {
    pub fn try_enqueue(&self, sample: Sample) -> Admission {
        match self.tx.try_send(sample) {
            Ok(()) => Admission::Accepted,
            Err(TrySendError::Full(_)) => Admission::Full,
            Err(TrySendError::Disconnected(_)) => Admission::Closed,
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }
}

impl QueueConsumer {
    /// Block for the next sample. `None` once every producer is gone and the
    /// queue is drained.
    pub fn recv(&self) -> Option<Sample> {
        self.rx.recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
