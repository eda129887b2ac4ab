use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{HostError, HostResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(u64);

impl From<u64> for WorkerId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<WorkerId> for u64 {
    fn from(id: WorkerId) -> Self {
        id.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct WorkerIdGenerator {
    next_value: u64,
}

impl WorkerIdGenerator {
    pub fn new() -> Self {
        Self { next_value: 1 }
    }

    pub fn next(&mut self) -> HostResult<WorkerId> {
        let value = self.next_value;
        self.next_value = value
            .checked_add(1)
            .ok_or_else(|| HostError::internal("worker ID overflow"))?;
        Ok(value.into())
    }
}

impl Default for WorkerIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Correlation id pairing an outbound call with its responses. Freshly
/// generated for every call, never reused within a worker's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecuteId(Uuid);

impl ExecuteId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ExecuteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
