//! Error types for the marketplace portal.

use std::time::Duration;

use serde::Serialize;

use crate::ledger::{ChoiceId, TemplateId};
use crate::onboarding::OnboardingStatus;
use crate::session::MarketRole;

/// Top-level error type for the portal.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Contract stream errors. Never fatal: the affected stream degrades to
/// stale-empty and the others keep flowing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("Unexpected close from {template}: {reason}")]
    UnexpectedClose { template: TemplateId, reason: String },
}

/// Errors returned by the ledger when exercising a choice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("No contract with key {key} for choice {choice}")]
    KeyNotFound { choice: ChoiceId, key: String },

    #[error("Party {party} is not authorized to exercise {choice}")]
    Unauthorized { choice: ChoiceId, party: String },

    #[error("Choice {choice} rejected: {reason}")]
    Rejected { choice: ChoiceId, reason: String },

    #[error("Choice {choice} timed out after {timeout:?}")]
    Timeout { choice: ChoiceId, timeout: Duration },

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the user-facing workflow actions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("Cannot {action} while onboarding status is {status}")]
    NotReady {
        action: &'static str,
        status: OnboardingStatus,
    },

    #[error("A {action} submission is already in flight")]
    SubmissionInFlight { action: &'static str },

    #[error("Action {action} is not available to the {role} role")]
    Unsupported {
        action: &'static str,
        role: MarketRole,
    },

    #[error("Invalid input for {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Failure domains for presentation-layer handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureDomain {
    Auth,
    Ledger,
    Workflow,
    Input,
}

/// Structured failure payload handed to whoever triggered an action.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActionFailure {
    pub domain: FailureDomain,
    pub code: &'static str,
    pub retryable: bool,
    pub message: String,
}

impl ActionFailure {
    fn new(
        domain: FailureDomain,
        code: &'static str,
        retryable: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            domain,
            code,
            retryable,
            message: message.into(),
        }
    }
}

impl LedgerError {
    fn to_action_failure(&self) -> ActionFailure {
        match self {
            Self::KeyNotFound { .. } => ActionFailure::new(
                FailureDomain::Ledger,
                "ledger.key_not_found",
                false,
                self.to_string(),
            ),
            Self::Unauthorized { .. } => ActionFailure::new(
                FailureDomain::Auth,
                "auth.not_authorized",
                false,
                self.to_string(),
            ),
            Self::Rejected { .. } => ActionFailure::new(
                FailureDomain::Ledger,
                "ledger.rejected",
                false,
                self.to_string(),
            ),
            Self::Timeout { .. } => ActionFailure::new(
                FailureDomain::Ledger,
                "ledger.timeout",
                true,
                self.to_string(),
            ),
            Self::Unavailable(_) => ActionFailure::new(
                FailureDomain::Ledger,
                "ledger.unavailable",
                true,
                self.to_string(),
            ),
        }
    }
}

impl WorkflowError {
    /// Map a workflow failure into the structured surface for presentation.
    pub fn to_action_failure(&self) -> ActionFailure {
        match self {
            Self::NotReady { .. } => ActionFailure::new(
                FailureDomain::Workflow,
                "workflow.not_ready",
                false,
                self.to_string(),
            ),
            Self::SubmissionInFlight { .. } => ActionFailure::new(
                FailureDomain::Workflow,
                "workflow.in_flight",
                true,
                self.to_string(),
            ),
            Self::Unsupported { .. } => ActionFailure::new(
                FailureDomain::Workflow,
                "workflow.unsupported",
                false,
                self.to_string(),
            ),
            Self::InvalidInput { .. } => ActionFailure::new(
                FailureDomain::Input,
                "input.invalid",
                false,
                self.to_string(),
            ),
            Self::Ledger(err) => err.to_action_failure(),
        }
    }
}

/// Result type alias for the portal.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_missing_key_as_non_retryable() {
        let err = WorkflowError::from(LedgerError::KeyNotFound {
            choice: ChoiceId::AcceptInvitation(MarketRole::Broker),
            key: "(operator, broker)".to_string(),
        });
        let failure = err.to_action_failure();

        assert_eq!(failure.domain, FailureDomain::Ledger);
        assert_eq!(failure.code, "ledger.key_not_found");
        assert!(!failure.retryable);
        assert!(failure.message.contains("BrokerInvitation_Accept"));
    }

    #[test]
    fn maps_authorization_failures_to_auth_domain() {
        let err = WorkflowError::from(LedgerError::Unauthorized {
            choice: ChoiceId::UpdateProfile(MarketRole::Custodian),
            party: "mallory".to_string(),
        });
        let failure = err.to_action_failure();

        assert_eq!(failure.domain, FailureDomain::Auth);
        assert_eq!(failure.code, "auth.not_authorized");
    }

    #[test]
    fn ledger_rejections_are_not_retryable() {
        let err = WorkflowError::from(LedgerError::Rejected {
            choice: ChoiceId::AcceptInvitation(MarketRole::Investor),
            reason: "party is already registered".to_string(),
        });
        let failure = err.to_action_failure();

        assert_eq!(failure.code, "ledger.rejected");
        assert!(!failure.retryable);
    }

    #[test]
    fn in_flight_submissions_are_retryable() {
        let failure = WorkflowError::SubmissionInFlight {
            action: "accept_invitation",
        }
        .to_action_failure();

        assert_eq!(failure.domain, FailureDomain::Workflow);
        assert!(failure.retryable);
    }

    #[test]
    fn serializes_action_failure() {
        let failure = WorkflowError::NotReady {
            action: "accept_invitation",
            status: OnboardingStatus::Loading,
        }
        .to_action_failure();
        let value = serde_json::to_value(&failure).expect("valid json");

        assert_eq!(value["domain"], "workflow");
        assert_eq!(value["code"], "workflow.not_ready");
        assert_eq!(value["retryable"], false);
    }

    #[test]
    fn stream_close_mentions_template() {
        let err = StreamError::UnexpectedClose {
            template: TemplateId::CustodianRelationship,
            reason: "socket reset".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unexpected close from Marketplace.Custodian:CustodianRelationship: socket reset"
        );
    }
}
