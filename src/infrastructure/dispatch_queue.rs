//! Dispatch Queue
//!
//! Capacity-bounded, type-discriminated message queue. It is the only
//! channel between the scheduler and the workers: tasks flow out as PUSH or
//! PULL messages, completions come back as RESULT messages.
//!
//! Each message kind has its own bounded lane so a consumer only ever sees
//! the kind it asked for, and a full lane applies backpressure to the sender.

use crate::domain::entities::{DispatchMessage, MessageKind};
use crate::error::QueueError;
use tokio::sync::{mpsc, watch, Mutex};

struct Lane {
    tx: mpsc::Sender<DispatchMessage>,
    rx: Mutex<mpsc::Receiver<DispatchMessage>>,
}

impl Lane {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

/// Shared work-distribution and result-reporting queue.
pub struct DispatchQueue {
    push: Lane,
    pull: Lane,
    result: Lane,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl DispatchQueue {
    /// Create a queue sized for one scheduling cycle.
    ///
    /// A cycle dispatches at most one lane's worth of tasks per mode and
    /// waits for all of their results before moving on, so no lane ever
    /// holds more than its bound.
    pub fn new(push_capacity: usize, pull_capacity: usize) -> Self {
        let (closed_tx, closed_rx) = watch::channel(false);
        Self {
            push: Lane::new(push_capacity),
            pull: Lane::new(pull_capacity),
            result: Lane::new(push_capacity + pull_capacity),
            closed_tx,
            closed_rx,
        }
    }

    fn lane(&self, kind: MessageKind) -> &Lane {
        match kind {
            MessageKind::Push => &self.push,
            MessageKind::Pull => &self.pull,
            MessageKind::Result => &self.result,
        }
    }

    /// Enqueue a message on the lane of its kind, waiting for capacity.
    pub async fn send(&self, message: DispatchMessage) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        let lane = self.lane(message.kind());
        let mut closed = self.closed_rx.clone();

        tokio::select! {
            sent = lane.tx.send(message) => sent.map_err(|_| QueueError::Closed),
            _ = closed.wait_for(|c| *c) => Err(QueueError::Closed),
        }
    }

    /// Receive the next message of `kind`, blocking until one arrives or the
    /// queue is closed.
    pub async fn recv(&self, kind: MessageKind) -> Result<DispatchMessage, QueueError> {
        let mut closed = self.closed_rx.clone();
        if *closed.borrow() {
            return Err(QueueError::Closed);
        }

        tokio::select! {
            message = async {
                let mut rx = self.lane(kind).rx.lock().await;
                rx.recv().await
            } => message.ok_or(QueueError::Closed),
            _ = closed.wait_for(|c| *c) => Err(QueueError::Closed),
        }
    }

    /// Close the queue. Pending and future sends and receives fail.
    pub fn close(&self) {
        if !self.closed_tx.send_replace(true) {
            tracing::info!("dispatch queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Most messages a lane can hold.
    pub fn bound(&self, kind: MessageKind) -> usize {
        self.lane(kind).tx.max_capacity()
    }
}
