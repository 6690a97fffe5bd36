//! Fan-out of decoded data notifications to subscribers.
//!
//! Subscribers are kept per measurement type in copy-on-write lists: the
//! notification path clones an `Arc` snapshot under a short read lock and
//! publishes without holding it, so subscribers may be added or removed
//! concurrently with a dispatch.
//!
//! Each subscriber owns a bounded queue.  Publishing never waits: a batch
//! that finds the queue full is dropped for that subscriber and counted.  One
//! slot is held back so the link-loss error always fits.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use log::{debug, info, warn};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::PmdError;
use crate::parse::{decode_frame, DataFrame, DecodeContext};
use crate::protocol::MeasurementType;
use crate::types::MeasurementEvent;

type Item = Result<MeasurementEvent, PmdError>;

/// Batches a subscriber may have queued before new ones are dropped.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

#[derive(Clone)]
struct Subscriber {
    id: u64,
    sink: mpsc::Sender<Item>,
}

type Registry = RwLock<HashMap<MeasurementType, Arc<Vec<Subscriber>>>>;

fn unregister(registry: &Registry, measurement: MeasurementType, id: u64) {
    let mut map = registry.write().unwrap_or_else(PoisonError::into_inner);
    let Some(current) = map.get(&measurement) else {
        return;
    };
    let remaining: Vec<Subscriber> = current.iter().filter(|s| s.id != id).cloned().collect();
    if remaining.is_empty() {
        map.remove(&measurement);
    } else {
        map.insert(measurement, Arc::new(remaining));
    }
}

/// Routes each data notification to the subscribers of its measurement type.
pub struct StreamDispatcher {
    registry: Arc<Registry>,
    next_id: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
    overflowed: AtomicU64,
}

impl Default for StreamDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDispatcher {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            overflowed: AtomicU64::new(0),
        }
    }

    /// Register a new subscriber for `measurement`.
    ///
    /// The subscription stays registered until it is dropped or the link is
    /// lost.
    pub fn subscribe(&self, measurement: MeasurementType) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sink, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY + 1);
        let mut map = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut list = map
            .get(&measurement)
            .map(|l| l.as_ref().clone())
            .unwrap_or_default();
        list.push(Subscriber { id, sink });
        map.insert(measurement, Arc::new(list));
        debug!("{measurement}: subscriber {id} registered");

        Subscription {
            id,
            measurement,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn subscriber_count(&self, measurement: MeasurementType) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&measurement)
            .map_or(0, |l| l.len())
    }

    /// Frames that could not be decoded since the dispatcher was created.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Decoded batches discarded because a subscriber's queue was full.
    pub fn overflowed_batches(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }

    /// Parse, decode and publish one data notification.
    ///
    /// `context` supplies the negotiated settings for the frame's measurement
    /// type.  Undecodable frames are logged and dropped.
    pub fn dispatch<F>(&self, data: &[u8], context: F)
    where
        F: FnOnce(MeasurementType) -> DecodeContext,
    {
        let count = self.received.fetch_add(1, Ordering::Relaxed) + 1;

        let frame = match DataFrame::parse(data) {
            Ok(frame) => frame,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("PMD data: dropping malformed notification ({e})");
                return;
            }
        };

        if count <= 3 || count % 500 == 0 {
            info!(
                "PMD data #{count}: {} frame type 0x{:02x}, {} payload bytes",
                frame.measurement,
                frame.frame_type,
                frame.payload.len()
            );
        }

        let batch = match decode_frame(&frame, &context(frame.measurement)) {
            Ok(batch) => batch,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("{}: dropping frame: {e}", frame.measurement);
                return;
            }
        };
        if batch.is_empty() {
            return;
        }

        self.publish(MeasurementEvent {
            measurement: frame.measurement,
            timestamp: frame.timestamp,
            frame_type: frame.frame_type,
            batch,
        });
    }

    fn publish(&self, event: MeasurementEvent) {
        let snapshot = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.measurement)
            .cloned();
        let Some(subscribers) = snapshot else {
            return;
        };
        for subscriber in subscribers.iter() {
            // the last slot belongs to close_all
            if !subscriber.sink.is_closed() && subscriber.sink.capacity() <= 1 {
                self.overflow(&event, subscriber.id);
                continue;
            }
            match subscriber.sink.try_send(Ok(event.clone())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => self.overflow(&event, subscriber.id),
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        "{}: subscriber {} already closed",
                        event.measurement, subscriber.id
                    );
                }
            }
        }
    }

    fn overflow(&self, event: &MeasurementEvent, subscriber: u64) {
        let total = self.overflowed.fetch_add(1, Ordering::Relaxed) + 1;
        if total == 1 || total % 500 == 0 {
            warn!(
                "{}: subscriber {subscriber} is not keeping up ({total} batch(es) dropped)",
                event.measurement
            );
        }
    }

    /// Deliver `error` to every subscriber and deregister all of them.
    pub fn close_all(&self, error: PmdError) {
        let map = std::mem::take(
            &mut *self
                .registry
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (measurement, subscribers) in map {
            debug!("{measurement}: closing {} subscriber(s)", subscribers.len());
            for subscriber in subscribers.iter() {
                if subscriber.sink.try_send(Err(error.clone())).is_err() {
                    debug!("{measurement}: subscriber {} missed the close", subscriber.id);
                }
            }
        }
    }
}

/// A live registration for one measurement type.
///
/// Yields decoded events in notification order.  A link loss yields one
/// `Err` and then ends the stream.  Dropping the subscription deregisters it.
pub struct Subscription {
    id: u64,
    measurement: MeasurementType,
    rx: mpsc::Receiver<Item>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn measurement(&self) -> MeasurementType {
        self.measurement
    }

    pub async fn recv(&mut self) -> Option<Item> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            unregister(&registry, self.measurement, self.id);
        }
    }
}
