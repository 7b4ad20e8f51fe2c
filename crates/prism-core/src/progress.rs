//! Per-batch progress events with snapshot-on-subscribe.
//!
//! Every subscriber sees the events of items that already finished, then the
//! live tail, then exactly one terminal `complete` event. Publishing and
//! subscribing take the same lock, so the snapshot and the tail neither
//! overlap nor leave a gap.

use futures_util::stream::{self, Stream};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;

use crate::job::{BatchSummary, ItemFailure, ItemResult};

/// Events per item: started, one per stage, and a terminal event.
const EVENTS_PER_ITEM: usize = 10;
const MIN_CAPACITY: usize = 16;

/// A progress event on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    Started {
        item_id: String,
        current_file: String,
        percentage: u8,
    },
    Progress {
        item_id: String,
        current_file: String,
        percentage: u8,
        stage: String,
    },
    Completed {
        item_id: String,
        current_file: String,
        percentage: u8,
        result: ItemResult,
    },
    Failed {
        item_id: String,
        current_file: String,
        percentage: u8,
        error: ItemFailure,
    },
    #[serde(rename = "complete")]
    BatchFinished(BatchSummary),
}

impl ProgressEvent {
    pub fn item_id(&self) -> Option<&str> {
        match self {
            ProgressEvent::Started { item_id, .. }
            | ProgressEvent::Progress { item_id, .. }
            | ProgressEvent::Completed { item_id, .. }
            | ProgressEvent::Failed { item_id, .. } => Some(item_id),
            ProgressEvent::BatchFinished(_) => None,
        }
    }

    /// Completed or Failed.
    pub fn is_item_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Completed { .. } | ProgressEvent::Failed { .. }
        )
    }

    pub fn is_batch_finished(&self) -> bool {
        matches!(self, ProgressEvent::BatchFinished(_))
    }
}

#[derive(Default)]
struct Snapshot {
    finished_items: Vec<ProgressEvent>,
    summary: Option<BatchSummary>,
}

/// Fan-out of one batch's events.
pub struct ProgressBroadcaster {
    sender: broadcast::Sender<ProgressEvent>,
    snapshot: Mutex<Snapshot>,
}

impl ProgressBroadcaster {
    /// Size the channel so a subscriber can hold a whole batch's events.
    pub fn new(item_count: usize) -> Self {
        let capacity = (item_count * EVENTS_PER_ITEM + 1).max(MIN_CAPACITY);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            snapshot: Mutex::new(Snapshot::default()),
        }
    }

    pub fn publish(&self, event: ProgressEvent) {
        let mut snapshot = self.snapshot.lock();
        if snapshot.summary.is_some() {
            tracing::warn!("Dropping progress event published after batch finished");
            return;
        }
        if event.is_item_terminal() {
            snapshot.finished_items.push(event.clone());
        }
        if let ProgressEvent::BatchFinished(summary) = &event {
            snapshot.summary = Some(summary.clone());
        }
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        let snapshot = self.snapshot.lock();
        let mut backlog: VecDeque<ProgressEvent> = snapshot.finished_items.iter().cloned().collect();
        let receiver = match &snapshot.summary {
            Some(summary) => {
                backlog.push_back(ProgressEvent::BatchFinished(summary.clone()));
                None
            }
            None => Some(self.sender.subscribe()),
        };
        Subscription {
            backlog,
            receiver,
            done: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.snapshot.lock().summary.is_some()
    }

    pub fn summary(&self) -> Option<BatchSummary> {
        self.snapshot.lock().summary.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A single-pass, finite view of a batch's events.
pub struct Subscription {
    backlog: VecDeque<ProgressEvent>,
    receiver: Option<broadcast::Receiver<ProgressEvent>>,
    done: bool,
}

impl Subscription {
    /// Next event, or `None` after the batch-finished event.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.done {
            return None;
        }
        if let Some(event) = self.backlog.pop_front() {
            self.done = event.is_batch_finished();
            return Some(event);
        }
        let Some(receiver) = self.receiver.as_mut() else {
            self.done = true;
            return None;
        };
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    self.done = event.is_batch_finished();
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Progress subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }

    /// Drain every remaining event.
    pub async fn collect(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send {
        stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }
}
