// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! In-process stream broker
//!
//! Mirrors the parts of JetStream the worker relies on: named streams with
//! subject patterns, publish acks, single-message pulls with a wait bound,
//! and ack / nak bookkeeping with optional redelivery. Used by the test
//! suites and for running the pipeline without a NATS server.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

use super::{Delivery, MessageSource, StreamBackend, StreamDescriptor, StreamError};

/// A message accepted by [`MemoryBroker::publish`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Bytes,
}

struct PendingMessage {
    sequence: u64,
    subject: String,
    payload: Bytes,
    deliveries: u32,
}

#[derive(Default)]
struct BrokerState {
    streams: Vec<StreamDescriptor>,
    pending: VecDeque<PendingMessage>,
    published: Vec<PublishedMessage>,
    acked: Vec<u64>,
    nacked: Vec<u64>,
    next_sequence: u64,
    empty_fetches: u64,
    unavailable: bool,
    fail_publish: bool,
    max_deliver: u32,
}

#[derive(Default)]
struct Inner {
    state: Mutex<BrokerState>,
    arrivals: Notify,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, BrokerState> {
        // A panic while holding the lock only happens in a failing test
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    /// Broker without streams where naked messages are not redelivered
    pub fn new() -> Self {
        let broker = Self::default();
        broker.inner.state().max_deliver = 1;
        broker
    }

    /// Broker that already holds `descriptor`
    pub fn with_stream(descriptor: StreamDescriptor) -> Self {
        let broker = Self::new();
        broker.inner.state().streams.push(descriptor);
        broker
    }

    /// Allow each message to be delivered up to `max_deliver` times
    pub fn with_max_deliver(self, max_deliver: u32) -> Self {
        self.inner.state().max_deliver = max_deliver.max(1);
        self
    }

    /// Queue an inbound message for the consumer, returning its sequence
    pub fn enqueue(&self, subject: impl Into<String>, payload: impl Into<Bytes>) -> u64 {
        let sequence = {
            let mut state = self.inner.state();
            state.next_sequence += 1;
            let sequence = state.next_sequence;
            state.pending.push_back(PendingMessage {
                sequence,
                subject: subject.into(),
                payload: payload.into(),
                deliveries: 0,
            });
            sequence
        };
        self.inner.arrivals.notify_waiters();
        sequence
    }

    /// Simulate a lost connection to the messaging backend
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.state().unavailable = unavailable;
    }

    /// Make every publish fail
    pub fn set_publish_failure(&self, fail: bool) {
        self.inner.state().fail_publish = fail;
    }

    pub fn streams(&self) -> Vec<StreamDescriptor> {
        self.inner.state().streams.clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner.state().published.clone()
    }

    /// Sequences of acknowledged messages, in ack order
    pub fn acked(&self) -> Vec<u64> {
        self.inner.state().acked.clone()
    }

    /// Sequences of negatively acknowledged messages, in nak order
    pub fn nacked(&self) -> Vec<u64> {
        self.inner.state().nacked.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.state().pending.len()
    }

    /// Number of pulls that timed out without a message
    pub fn empty_fetches(&self) -> u64 {
        self.inner.state().empty_fetches
    }

    fn take_next(&self) -> Result<Option<MemoryDelivery>, StreamError> {
        let mut state = self.inner.state();
        if state.unavailable {
            return Err(StreamError::Fetch("broker unavailable".to_string()));
        }
        Ok(state.pending.pop_front().map(|message| MemoryDelivery {
            inner: Arc::clone(&self.inner),
            sequence: message.sequence,
            subject: message.subject,
            payload: message.payload,
            deliveries: message.deliveries + 1,
        }))
    }
}

/// NATS-style subject matching where `*` matches exactly one token and a
/// trailing `>` matches one or more tokens.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(token)) if !token.is_empty() => {}
            (Some(expected), Some(token)) if expected == token => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[async_trait]
impl StreamBackend for MemoryBroker {
    async fn stream_names(&self) -> Result<Vec<String>, StreamError> {
        let state = self.inner.state();
        if state.unavailable {
            return Err(StreamError::Unavailable("broker unavailable".to_string()));
        }
        Ok(state.streams.iter().map(|s| s.name.clone()).collect())
    }

    async fn create_stream(&self, descriptor: &StreamDescriptor) -> Result<(), StreamError> {
        let mut state = self.inner.state();
        if state.unavailable {
            return Err(StreamError::Unavailable("broker unavailable".to_string()));
        }
        if state.streams.iter().any(|s| s.name == descriptor.name) {
            return Err(StreamError::Create {
                name: descriptor.name.clone(),
                reason: "stream name already in use".to_string(),
            });
        }
        state.streams.push(descriptor.clone());
        Ok(())
    }

    async fn publish(&self, subject: String, payload: Bytes) -> Result<(), StreamError> {
        let mut state = self.inner.state();
        let reason = if state.unavailable {
            Some("broker unavailable")
        } else if state.fail_publish {
            Some("publish rejected")
        } else if !state
            .streams
            .iter()
            .any(|s| s.subjects.iter().any(|p| subject_matches(p, &subject)))
        {
            Some("no stream accepts this subject")
        } else {
            None
        };

        if let Some(reason) = reason {
            return Err(StreamError::Publish {
                subject,
                reason: reason.to_string(),
            });
        }

        state.published.push(PublishedMessage { subject, payload });
        Ok(())
    }
}

#[async_trait]
impl MessageSource for MemoryBroker {
    async fn fetch_one(&self, timeout: Duration) -> Result<Option<Box<dyn Delivery>>, StreamError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking so an enqueue in between is not missed
            let arrival = self.inner.arrivals.notified();
            if let Some(delivery) = self.take_next()? {
                return Ok(Some(Box::new(delivery)));
            }
            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                self.inner.state().empty_fetches += 1;
                return Ok(None);
            }
        }
    }
}

struct MemoryDelivery {
    inner: Arc<Inner>,
    sequence: u64,
    subject: String,
    payload: Bytes,
    deliveries: u32,
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(&self) -> Result<(), StreamError> {
        let mut state = self.inner.state();
        if state.unavailable {
            return Err(StreamError::Ack("broker unavailable".to_string()));
        }
        state.acked.push(self.sequence);
        Ok(())
    }

    async fn nak(&self) -> Result<(), StreamError> {
        let redeliver = {
            let mut state = self.inner.state();
            if state.unavailable {
                return Err(StreamError::Ack("broker unavailable".to_string()));
            }
            state.nacked.push(self.sequence);
            if self.deliveries < state.max_deliver {
                state.pending.push_back(PendingMessage {
                    sequence: self.sequence,
                    subject: self.subject.clone(),
                    payload: self.payload.clone(),
                    deliveries: self.deliveries,
                });
                true
            } else {
                false
            }
        };
        if redeliver {
            self.inner.arrivals.notify_waiters();
        }
        Ok(())
    }
}
