//! Ledger-access boundary.
//!
//! The portal consumes two capabilities from whatever talks to the ledger:
//! live contract streams and keyed choice exercise. The transport behind
//! them is not this crate's concern; `memory` provides an in-process
//! implementation used by tests and the demo command.

pub mod memory;
pub mod stream;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::LedgerError;

pub use self::memory::InMemoryLedger;
pub use self::stream::{
    CloseHandler, PayloadSnapshot, StreamEvent, StreamSnapshot, Subscription,
};
pub use self::types::{
    AssetDeposit, BrokerCustomer, BrokerCustomerInvitation, ChoiceArgs, ChoiceId, Contract,
    ContractId, ContractKey, ContractPayload, ContractQuery, CustodianRelationship,
    ExchangeParticipant, Invitation, PartyId, QueryFilter, Registration, TemplateId,
};

/// Live, self-correcting feeds of the current contract set per query.
pub trait LedgerStreams: Send + Sync {
    /// Open a stream. `on_close` runs if the stream closes unexpectedly.
    fn subscribe(&self, query: ContractQuery, on_close: Option<CloseHandler>) -> Subscription;
}

/// Keyed choice exercise.
#[async_trait]
pub trait LedgerCommands: Send + Sync {
    async fn exercise_by_key(
        &self,
        choice: ChoiceId,
        key: ContractKey,
        args: ChoiceArgs,
    ) -> Result<(), LedgerError>;
}

/// Both ledger capabilities.
pub trait Ledger: LedgerStreams + LedgerCommands {}

impl<T: LedgerStreams + LedgerCommands + ?Sized> Ledger for T {}

/// Exercise a choice with an upper bound on how long the caller waits.
///
/// Exactly one attempt is made; expiry is reported as `LedgerError::Timeout`.
pub async fn exercise_with_timeout<C: LedgerCommands + ?Sized>(
    ledger: &C,
    choice: ChoiceId,
    key: ContractKey,
    args: ChoiceArgs,
    timeout: Duration,
) -> Result<(), LedgerError> {
    let key_display = key.to_string();
    tracing::info!(choice = %choice, key = %key_display, "Exercising choice");

    let result = match tokio::time::timeout(timeout, ledger.exercise_by_key(choice, key, args))
        .await
    {
        Ok(result) => result,
        Err(_) => Err(LedgerError::Timeout { choice, timeout }),
    };

    match &result {
        Ok(()) => tracing::info!(choice = %choice, key = %key_display, "Choice exercised"),
        Err(e) => tracing::error!(choice = %choice, key = %key_display, "Choice failed: {}", e),
    }
    result
}
