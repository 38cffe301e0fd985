//! In-memory broker implementation.
//!
//! Development and test stand-in for a real queue transport. It honors the
//! contract the rest of the core depends on: one exclusive lock per sequence
//! number, merge-on-write deferral properties, ordered non-destructive peek,
//! and clean failure when operating on an already-finalized message.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Broker, Delivery, MessageLease, PeekedMessage, Subscription};
use crate::domain::{DeadLetterReason, MessageState, SequenceNumber, TrackedProperties};
use crate::error::DeferqError;
use crate::observability::BrokerCounts;

/// One live message as the broker tracks it.
#[derive(Debug, Clone)]
struct MessageRecord {
    payload: serde_json::Value,
    state: MessageState,
    properties: TrackedProperties,
    locked: bool,
}

/// A message that ended up on the dead-letter channel.
#[derive(Debug, Clone)]
pub struct DeadLetteredMessage {
    pub seq: SequenceNumber,
    pub reason: DeadLetterReason,
    /// Properties as they were at dead-lettering time; dead-lettering itself
    /// modifies nothing.
    pub properties: TrackedProperties,
}

struct BrokerState {
    /// Live (non-finalized) messages. BTreeMap keeps peek in sequence order.
    messages: BTreeMap<SequenceNumber, MessageRecord>,

    /// Sent before any subscription existed; flushed on subscribe.
    undelivered: VecDeque<SequenceNumber>,

    completed: Vec<SequenceNumber>,
    dead_lettered: Vec<DeadLetteredMessage>,

    next_seq: i64,
    delivery_tx: Option<mpsc::UnboundedSender<Delivery>>,
}

impl BrokerState {
    fn allocate_seq(&mut self) -> SequenceNumber {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        seq
    }

    fn release_lock(&mut self, seq: SequenceNumber) {
        if let Some(record) = self.messages.get_mut(&seq) {
            record.locked = false;
        }
    }
}

/// In-memory broker.
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                messages: BTreeMap::new(),
                undelivered: VecDeque::new(),
                completed: Vec::new(),
                dead_lettered: Vec::new(),
                next_seq: 1,
                delivery_tx: None,
            })),
        }
    }

    /// Produce one message. Delivered immediately if a subscription is
    /// active, otherwise queued until one is.
    pub async fn send(&self, payload: serde_json::Value) -> SequenceNumber {
        let (seq, outgoing) = {
            let mut state = self.state.lock().unwrap();
            let seq = state.allocate_seq();
            state.messages.insert(
                seq,
                MessageRecord {
                    payload: payload.clone(),
                    state: MessageState::Active,
                    properties: TrackedProperties::default(),
                    locked: false,
                },
            );

            match state.delivery_tx.clone() {
                Some(tx) => {
                    let delivery = make_delivery(&mut state, &self.state, seq);
                    (seq, delivery.map(|d| (tx, d)))
                }
                None => {
                    state.undelivered.push_back(seq);
                    (seq, None)
                }
            }
        };

        if let Some((tx, delivery)) = outgoing {
            // Dropping a failed send drops the lease, which releases the
            // lock; do not hold the state lock across it.
            let lost = tx.send(delivery).is_err();
            if lost {
                let mut state = self.state.lock().unwrap();
                state.delivery_tx = None;
                state.undelivered.push_back(seq);
            }
        }

        seq
    }

    /// End the subscription: `Subscription::next` returns `None` once
    /// already-sent deliveries are consumed.
    pub async fn close(&self) {
        self.state.lock().unwrap().delivery_tx = None;
    }

    pub async fn counts(&self) -> BrokerCounts {
        let state = self.state.lock().unwrap();
        let mut counts = BrokerCounts {
            completed: state.completed.len(),
            dead_lettered: state.dead_lettered.len(),
            ..BrokerCounts::default()
        };
        for record in state.messages.values() {
            match record.state {
                MessageState::Active => counts.active += 1,
                MessageState::Deferred => counts.deferred += 1,
            }
        }
        counts
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetteredMessage> {
        self.state.lock().unwrap().dead_lettered.clone()
    }

    pub async fn completed(&self) -> Vec<SequenceNumber> {
        self.state.lock().unwrap().completed.clone()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock the record and wrap it in a delivery. Caller must hold the state
/// lock; returns `None` if the message is no longer live.
fn make_delivery(
    state: &mut BrokerState,
    shared: &Arc<Mutex<BrokerState>>,
    seq: SequenceNumber,
) -> Option<Delivery> {
    let record = state.messages.get_mut(&seq)?;
    record.locked = true;
    Some(Delivery {
        seq,
        payload: record.payload.clone(),
        handle: Box::new(InMemoryLease {
            seq,
            state: Arc::clone(shared),
            disposed: false,
        }),
    })
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn subscribe(&self) -> Result<Subscription, DeferqError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let pending = {
            let mut state = self.state.lock().unwrap();
            state.delivery_tx = Some(tx.clone());
            let backlog: Vec<SequenceNumber> = state.undelivered.drain(..).collect();

            let mut pending = Vec::with_capacity(backlog.len());
            for seq in backlog {
                if let Some(delivery) = make_delivery(&mut state, &self.state, seq) {
                    pending.push(delivery);
                }
            }
            pending
        };

        for delivery in pending {
            // rx is alive in this scope, the send cannot fail
            let _ = tx.send(delivery);
        }

        Ok(Subscription::new(rx))
    }

    async fn peek(&self, max: usize) -> Result<Vec<PeekedMessage>, DeferqError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .messages
            .iter()
            .take(max)
            .map(|(&seq, record)| PeekedMessage {
                seq,
                state: record.state,
                properties: record.properties.clone(),
            })
            .collect())
    }

    async fn receive_deferred(
        &self,
        seq: SequenceNumber,
    ) -> Result<Box<dyn MessageLease>, DeferqError> {
        let mut state = self.state.lock().unwrap();
        let Some(record) = state.messages.get_mut(&seq) else {
            // Already completed or dead-lettered.
            return Err(DeferqError::RaceLoss(seq));
        };
        if record.locked {
            return Err(DeferqError::RaceLoss(seq));
        }
        if record.state != MessageState::Deferred {
            return Err(DeferqError::broker(
                "receive_deferred",
                format!("message {seq} is not deferred"),
            ));
        }
        record.locked = true;

        Ok(Box::new(InMemoryLease {
            seq,
            state: Arc::clone(&self.state),
            disposed: false,
        }))
    }
}

/// Lease implementation for `InMemoryBroker`.
struct InMemoryLease {
    seq: SequenceNumber,
    state: Arc<Mutex<BrokerState>>,
    disposed: bool,
}

impl std::fmt::Debug for InMemoryLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLease")
            .field("seq", &self.seq)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageLease for InMemoryLease {
    fn seq(&self) -> SequenceNumber {
        self.seq
    }

    async fn defer(self: Box<Self>, props: TrackedProperties) -> Result<(), DeferqError> {
        let mut this = self;
        this.disposed = true;
        let mut state = this.state.lock().unwrap();
        let Some(record) = state.messages.get_mut(&this.seq) else {
            return Err(DeferqError::RaceLoss(this.seq));
        };
        record.state = MessageState::Deferred;
        record.properties.merge(&props);
        record.locked = false;
        Ok(())
    }

    async fn complete(self: Box<Self>) -> Result<(), DeferqError> {
        let mut this = self;
        this.disposed = true;
        let mut state = this.state.lock().unwrap();
        if state.messages.remove(&this.seq).is_none() {
            return Err(DeferqError::RaceLoss(this.seq));
        }
        state.completed.push(this.seq);
        Ok(())
    }

    async fn dead_letter(self: Box<Self>, reason: DeadLetterReason) -> Result<(), DeferqError> {
        let mut this = self;
        this.disposed = true;
        let mut state = this.state.lock().unwrap();
        let Some(record) = state.messages.remove(&this.seq) else {
            return Err(DeferqError::RaceLoss(this.seq));
        };
        let entry = DeadLetteredMessage {
            seq: this.seq,
            reason,
            properties: record.properties,
        };
        state.dead_lettered.push(entry);
        Ok(())
    }
}

impl Drop for InMemoryLease {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        // Abandoned without disposition: release the lock only.
        if let Ok(mut state) = self.state.lock() {
            state.release_lock(self.seq);
        }
    }
}
