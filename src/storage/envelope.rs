//! Replicated Value Envelope
//!
//! Every write exchanged between nodes is wrapped in a `StoredEnvelope`
//! carrying the timestamp assigned by the ingress node. Replicas store the
//! encoded envelope as the engine value, so conflicting writes can be
//! ordered the same way on every node.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Malformed envelope: {0}")]
    Decode(#[from] bincode::Error),
    #[error("Envelope tombstone flag disagrees with its value")]
    Inconsistent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEnvelope {
    /// Microseconds since the Unix epoch, assigned at the ingress node.
    pub timestamp: u64,
    pub tombstone: bool,
    /// `None` exactly when `tombstone` is set.
    pub value: Option<Vec<u8>>,
}

impl StoredEnvelope {
    pub fn value(timestamp: u64, value: Vec<u8>) -> Self {
        Self {
            timestamp,
            tombstone: false,
            value: Some(value),
        }
    }

    pub fn tombstone(timestamp: u64) -> Self {
        Self {
            timestamp,
            tombstone: true,
            value: None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self = bincode::deserialize(bytes)?;
        if envelope.tombstone != envelope.value.is_none() {
            return Err(EnvelopeError::Inconsistent);
        }
        Ok(envelope)
    }

    /// Last-writer-wins precedence.
    ///
    /// A greater timestamp wins. On equal timestamps a tombstone beats a
    /// value, and two values are ordered by their bytes so every replica
    /// picks the same winner. An envelope never supersedes an identical one.
    pub fn supersedes(&self, other: &StoredEnvelope) -> bool {
        match self.timestamp.cmp(&other.timestamp) {
            CmpOrdering::Greater => true,
            CmpOrdering::Less => false,
            CmpOrdering::Equal => match (&self.value, &other.value) {
                (None, Some(_)) => true,
                (Some(_), None) | (None, None) => false,
                (Some(mine), Some(theirs)) => mine > theirs,
            },
        }
    }
}

/// Issues strictly increasing write timestamps for one ingress node.
#[derive(Debug, Default)]
pub struct Timestamper {
    last: AtomicU64,
}

impl Timestamper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wall-clock microseconds, bumped past the previous value if the clock
    /// has not advanced (or went backwards).
    pub fn next(&self) -> u64 {
        let now = now_micros();
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        now.max(previous.saturating_add(1))
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
