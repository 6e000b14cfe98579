//! Operation context handed to fetches and cache reads.

use std::time::{Duration, Instant};
use uuid::Uuid;

/// Opaque per-operation context.
///
/// Carries an operation id for log correlation and an optional deadline that
/// bounds how long the operation is willing to wait on a fetch.
#[derive(Debug, Clone)]
pub struct OperationContext {
    op_id: Uuid,
    deadline: Option<Instant>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self {
            op_id: Uuid::now_v7(),
            deadline: None,
        }
    }

    /// Context for work the cache starts on its own (refreshes, retries).
    pub fn background() -> Self {
        Self::new()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn op_id(&self) -> Uuid {
        self.op_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(remaining) if remaining.is_zero())
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}
