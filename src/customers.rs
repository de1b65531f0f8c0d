//! Broker customer invitations.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use crate::aggregate::AggregatedRoleState;
use crate::error::WorkflowError;
use crate::gate::SubmissionGate;
use crate::ledger::{ChoiceArgs, ChoiceId, LedgerCommands, PartyId, exercise_with_timeout};
use crate::session::{MarketRole, SessionContext};

/// A registered investor the broker can still invite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerOption {
    pub party: PartyId,
    pub name: String,
}

/// Registered investors that are neither customers of this broker nor
/// already invited, in registry order.
pub fn customer_options(state: &AggregatedRoleState) -> Vec<CustomerOption> {
    let taken: HashSet<&PartyId> = state
        .broker_customers()
        .map(|c| &c.broker_customer)
        .chain(state.broker_customer_invitations().map(|i| &i.broker_customer))
        .collect();

    state
        .investor_registry()
        .filter(|investor| !taken.contains(&investor.party))
        .map(|investor| CustomerOption {
            party: investor.party.clone(),
            name: investor.name.clone(),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct CustomerInvites {
    gate: SubmissionGate,
}

impl Default for CustomerInvites {
    fn default() -> Self {
        Self::new()
    }
}

impl CustomerInvites {
    pub fn new() -> Self {
        Self {
            gate: SubmissionGate::new("invite customer"),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.gate.is_enabled()
    }

    /// Invite `customer` to become a customer of this broker. The party may
    /// come from `customer_options` or be typed in directly.
    pub async fn invite<C: LedgerCommands + ?Sized>(
        &self,
        ledger: &C,
        session: &SessionContext,
        customer: &PartyId,
        timeout: Duration,
    ) -> Result<(), WorkflowError> {
        if session.role() != MarketRole::Broker {
            return Err(WorkflowError::Unsupported {
                action: self.gate.action(),
                role: session.role(),
            });
        }
        if customer.is_blank() {
            return Err(WorkflowError::InvalidInput {
                field: "brokerCustomer",
                reason: "party id must not be empty".to_string(),
            });
        }
        let _permit = self.gate.try_acquire()?;

        let mut args = ChoiceArgs::new();
        args.insert(
            "brokerCustomer".to_string(),
            json!(customer.as_str().trim()),
        );

        exercise_with_timeout(
            ledger,
            ChoiceId::InviteCustomer,
            session.self_key(),
            args,
            timeout,
        )
        .await?;
        Ok(())
    }
}
