//! Bounded-buffer payloads for the MQTT publisher and storage backend.
//!
//! Both queues share the same overflow policy: drop the oldest entry when
//! the bound is exceeded, and drop any individual entry once its retry
//! count exceeds the configured limit.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::reading::Reading;

/// A message pending publication to the MQTT broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub topic: String,
    pub payload: Value,
    pub retain: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
    pub retry_count: u32,
}

impl QueuedMessage {
    pub fn new(topic: impl Into<String>, payload: Value, retain: bool, enqueued_at: OffsetDateTime) -> Self {
        Self {
            topic: topic.into(),
            payload,
            retain,
            enqueued_at,
            retry_count: 0,
        }
    }

    pub fn exceeds_retry_limit(&self, limit: u32) -> bool {
        self.retry_count > limit
    }
}

/// A reading pending write to the storage backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedReading {
    pub reading: Reading,
    pub device_id: String,
    pub vehicle_id: Option<String>,
    pub device_type: String,
    pub retry_count: u32,
}

impl BufferedReading {
    pub fn new(
        reading: Reading,
        device_id: impl Into<String>,
        vehicle_id: Option<String>,
        device_type: impl Into<String>,
    ) -> Self {
        Self {
            reading,
            device_id: device_id.into(),
            vehicle_id,
            device_type: device_type.into(),
            retry_count: 0,
        }
    }

    pub fn exceeds_retry_limit(&self, limit: u32) -> bool {
        self.retry_count > limit
    }
}

/// A fixed-capacity FIFO that drops the oldest entry on overflow. Shared by
/// the MQTT publisher's outbound queue and the storage backend's outage
/// buffer.
#[derive(Debug)]
pub struct BoundedRingBuffer<T> {
    capacity: usize,
    items: std::collections::VecDeque<T>,
    dropped: u64,
}

impl<T> BoundedRingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: std::collections::VecDeque::with_capacity(capacity),
            dropped: 0,
        }
    }

    /// Push an item, dropping the oldest if the buffer is already at
    /// capacity. Returns `true` unconditionally: callers treat buffering as
    /// success from the producer's perspective.
    pub fn push(&mut self, item: T) -> bool {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
            self.dropped += 1;
        }
        self.items.push_back(item);
        true
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
