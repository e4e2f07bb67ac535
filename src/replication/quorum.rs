//! Quorum Accounting
//!
//! `QuorumParams` validates the per-request `ack`/`from` pair. A
//! `QuorumContext` folds replica outcomes, in whatever order they arrive,
//! through a method-specific `QuorumMerge` chosen once when the request is
//! classified:
//! - `WriteQuorum` decides as soon as `ack` replicas stored the envelope.
//! - `ReadQuorum` decides once `ack` replicas answered (hit or miss) and
//!   resolves the value by last-writer-wins.
//!
//! Both decide early as failed once too many replicas are unusable for the
//! quorum to ever be met.

use reqwest::StatusCode;

use super::error::CoordinatorError;
use super::proxy::ProxyOutcome;
use crate::storage::envelope::StoredEnvelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumParams {
    pub ack: usize,
    pub from: usize,
}

impl QuorumParams {
    /// Parses the optional query values. `from` defaults to the cluster size
    /// and `ack` to a majority of `from`. Requires `1 <= ack <= from <= cluster_size`.
    pub fn resolve(
        ack: Option<&str>,
        from: Option<&str>,
        cluster_size: usize,
    ) -> Result<Self, CoordinatorError> {
        let from = match from {
            Some(raw) => parse_count("from", raw)?,
            None => cluster_size,
        };
        let ack = match ack {
            Some(raw) => parse_count("ack", raw)?,
            None => from / 2 + 1,
        };

        if ack == 0 || ack > from || from > cluster_size {
            return Err(CoordinatorError::InvalidQuorum {
                ack,
                from,
                cluster_size,
            });
        }
        Ok(Self { ack, from })
    }
}

fn parse_count(name: &'static str, raw: &str) -> Result<usize, CoordinatorError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| CoordinatorError::MalformedParam {
            name,
            value: raw.to_string(),
        })
}

/// What one replica contributed to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaOutcome {
    /// The replica applied the write.
    Stored,
    /// The replica returned its envelope.
    Found(StoredEnvelope),
    /// The replica has no record of the key.
    Missing,
    /// Unreachable, overloaded, short-circuited, or answered unusably.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict<T> {
    Met(T),
    Unreachable { usable: usize, required: usize },
}

pub trait QuorumMerge {
    type Output;

    /// Usable outcomes needed to meet the quorum.
    fn required(&self) -> usize;

    /// Interprets a peer's answer for this kind of operation.
    fn interpret(&self, outcome: ProxyOutcome) -> ReplicaOutcome;

    /// Folds one outcome in; returns a verdict once the quorum is decided.
    fn offer(&mut self, outcome: ReplicaOutcome) -> Option<Verdict<Self::Output>>;
}

#[derive(Debug)]
pub struct WriteQuorum {
    params: QuorumParams,
    acked: usize,
    failed: usize,
}

impl WriteQuorum {
    pub fn new(params: QuorumParams) -> Self {
        Self {
            params,
            acked: 0,
            failed: 0,
        }
    }
}

impl QuorumMerge for WriteQuorum {
    type Output = ();

    fn required(&self) -> usize {
        self.params.ack
    }

    fn interpret(&self, outcome: ProxyOutcome) -> ReplicaOutcome {
        match outcome {
            ProxyOutcome::Response { status, .. }
                if status == StatusCode::CREATED || status == StatusCode::ACCEPTED =>
            {
                ReplicaOutcome::Stored
            }
            _ => ReplicaOutcome::Failed,
        }
    }

    fn offer(&mut self, outcome: ReplicaOutcome) -> Option<Verdict<()>> {
        match outcome {
            ReplicaOutcome::Stored => self.acked += 1,
            _ => self.failed += 1,
        }

        if self.acked >= self.params.ack {
            Some(Verdict::Met(()))
        } else if self.failed > self.params.from - self.params.ack {
            Some(Verdict::Unreachable {
                usable: self.acked,
                required: self.params.ack,
            })
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub struct ReadQuorum {
    params: QuorumParams,
    usable: usize,
    unusable: usize,
    latest: Option<StoredEnvelope>,
}

impl ReadQuorum {
    pub fn new(params: QuorumParams) -> Self {
        Self {
            params,
            usable: 0,
            unusable: 0,
            latest: None,
        }
    }
}

impl QuorumMerge for ReadQuorum {
    /// The winning envelope, or `None` if no replica held one.
    type Output = Option<StoredEnvelope>;

    fn required(&self) -> usize {
        self.params.ack
    }

    fn interpret(&self, outcome: ProxyOutcome) -> ReplicaOutcome {
        match outcome {
            ProxyOutcome::Response { status, body } if status == StatusCode::OK => {
                match StoredEnvelope::decode(&body) {
                    Ok(envelope) => ReplicaOutcome::Found(envelope),
                    Err(e) => {
                        tracing::warn!("Replica returned an undecodable envelope: {}", e);
                        ReplicaOutcome::Failed
                    }
                }
            }
            ProxyOutcome::Response { status, .. } if status == StatusCode::NOT_FOUND => {
                ReplicaOutcome::Missing
            }
            _ => ReplicaOutcome::Failed,
        }
    }

    fn offer(&mut self, outcome: ReplicaOutcome) -> Option<Verdict<Self::Output>> {
        match outcome {
            ReplicaOutcome::Found(envelope) => {
                self.usable += 1;
                let newer = match &self.latest {
                    Some(latest) => envelope.supersedes(latest),
                    None => true,
                };
                if newer {
                    self.latest = Some(envelope);
                }
            }
            ReplicaOutcome::Missing => self.usable += 1,
            ReplicaOutcome::Stored | ReplicaOutcome::Failed => self.unusable += 1,
        }

        if self.usable >= self.params.ack {
            Some(Verdict::Met(self.latest.take()))
        } else if self.unusable > self.params.from - self.params.ack {
            Some(Verdict::Unreachable {
                usable: self.usable,
                required: self.params.ack,
            })
        } else {
            None
        }
    }
}

/// Per-request quorum state. Once decided, further outcomes are ignored.
#[derive(Debug)]
pub struct QuorumContext<M> {
    merge: M,
    responses: usize,
    decided: bool,
}

impl<M: QuorumMerge> QuorumContext<M> {
    pub fn new(merge: M) -> Self {
        Self {
            merge,
            responses: 0,
            decided: false,
        }
    }

    pub fn interpret(&self, outcome: ProxyOutcome) -> ReplicaOutcome {
        self.merge.interpret(outcome)
    }

    /// Returns the verdict the first time the quorum is decided, `None`
    /// before that and afterwards.
    pub fn offer(&mut self, outcome: ReplicaOutcome) -> Option<Verdict<M::Output>> {
        if self.decided {
            return None;
        }
        self.responses += 1;
        let verdict = self.merge.offer(outcome);
        self.decided = verdict.is_some();
        verdict
    }

    pub fn required(&self) -> usize {
        self.merge.required()
    }

    pub fn responses(&self) -> usize {
        self.responses
    }

    pub fn is_decided(&self) -> bool {
        self.decided
    }
}
