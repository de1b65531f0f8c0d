//! Invitation acceptance: the one action that moves a party toward
//! `Registered`. The status change itself is observed later on the
//! registration stream.

use std::time::Duration;

use serde_json::json;

use crate::error::WorkflowError;
use crate::gate::SubmissionGate;
use crate::ledger::{ChoiceArgs, ChoiceId, LedgerCommands, exercise_with_timeout};
use crate::onboarding::OnboardingStatus;
use crate::profile::ProfileDraft;
use crate::session::SessionContext;

#[derive(Debug, Clone)]
pub struct InvitationAcceptance {
    gate: SubmissionGate,
}

impl Default for InvitationAcceptance {
    fn default() -> Self {
        Self::new()
    }
}

impl InvitationAcceptance {
    pub fn new() -> Self {
        Self {
            gate: SubmissionGate::new("accept invitation"),
        }
    }

    /// Whether the accept control should be enabled for `status`.
    pub fn is_enabled(&self, status: OnboardingStatus, session: &SessionContext) -> bool {
        self.gate.is_enabled() && status.accepts_invitation(session.role())
    }

    /// Exercise the role's accept choice with the draft's name and location.
    ///
    /// Refused unless `status` allows acceptance; a second call while one is
    /// in flight returns `SubmissionInFlight` without touching the ledger.
    pub async fn accept<C: LedgerCommands + ?Sized>(
        &self,
        ledger: &C,
        session: &SessionContext,
        status: OnboardingStatus,
        draft: &ProfileDraft,
        timeout: Duration,
    ) -> Result<(), WorkflowError> {
        if !status.accepts_invitation(session.role()) {
            return Err(WorkflowError::NotReady {
                action: self.gate.action(),
                status,
            });
        }
        let _permit = self.gate.try_acquire()?;

        let mut args = ChoiceArgs::new();
        args.insert("name".to_string(), json!(draft.name.value));
        args.insert("location".to_string(), json!(draft.location.value));

        exercise_with_timeout(
            ledger,
            ChoiceId::AcceptInvitation(session.role()),
            session.self_key(),
            args,
            timeout,
        )
        .await?;
        Ok(())
    }
}
