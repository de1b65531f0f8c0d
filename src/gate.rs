//! Single in-flight submission guard.
//!
//! Each mutating action owns one gate. While a permit is held the action is
//! disabled; dropping the permit (on success, failure, or cancellation of the
//! awaiting future) re-enables it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::WorkflowError;

#[derive(Debug, Clone)]
pub struct SubmissionGate {
    action: &'static str,
    in_flight: Arc<AtomicBool>,
}

impl SubmissionGate {
    pub fn new(action: &'static str) -> Self {
        Self {
            action,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn action(&self) -> &'static str {
        self.action
    }

    /// Whether the action can currently be triggered.
    pub fn is_enabled(&self) -> bool {
        !self.in_flight.load(Ordering::Acquire)
    }

    /// Claim the gate, or report that a submission is already running.
    pub fn try_acquire(&self) -> Result<SubmissionPermit, WorkflowError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(action = self.action, "Submission already in flight");
            return Err(WorkflowError::SubmissionInFlight {
                action: self.action,
            });
        }
        Ok(SubmissionPermit {
            in_flight: Arc::clone(&self.in_flight),
        })
    }
}

/// Held for the duration of one submission.
#[derive(Debug)]
pub struct SubmissionPermit {
    in_flight: Arc<AtomicBool>,
}

impl Drop for SubmissionPermit {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}
