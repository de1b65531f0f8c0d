//! In-process ledger.
//!
//! Holds the active contract set, publishes whole-set snapshots to every
//! matching subscription on each change, and implements the handful of
//! choices the portal exercises. Streams can be paused (held in `loading`),
//! closed with a reason, and exercises can be delayed or made to fail, so
//! the reconciliation layer can be driven through its degraded paths.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::ledger::stream::{CloseHandler, PayloadSnapshot, Subscription};
use crate::ledger::types::{
    BrokerCustomerInvitation, ChoiceArgs, ChoiceId, Contract, ContractId, ContractKey,
    ContractPayload, ContractQuery, PartyId, Registration, TemplateId,
};
use crate::ledger::{LedgerCommands, LedgerStreams};
use crate::session::MarketRole;

/// A recorded choice exercise, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseRecord {
    pub choice: ChoiceId,
    pub key: ContractKey,
    pub args: ChoiceArgs,
    pub succeeded: bool,
}

struct Feed {
    query: ContractQuery,
    sender: watch::Sender<PayloadSnapshot>,
}

#[derive(Default)]
struct LedgerState {
    contracts: Vec<Contract>,
    feeds: Vec<Feed>,
    paused: HashSet<TemplateId>,
    injected_failures: VecDeque<LedgerError>,
    exercise_delay: Option<Duration>,
    exercises: Vec<ExerciseRecord>,
}

impl LedgerState {
    fn snapshot_for(&self, query: &ContractQuery) -> PayloadSnapshot {
        PayloadSnapshot::loaded(
            self.contracts
                .iter()
                .filter(|c| query.matches(&c.payload))
                .cloned()
                .collect(),
        )
    }

    fn publish(&mut self, template: TemplateId) {
        if self.paused.contains(&template) {
            return;
        }
        self.feeds.retain(|feed| !feed.sender.is_closed());
        for feed in self.feeds.iter().filter(|f| f.query.template == template) {
            feed.sender.send_replace(self.snapshot_for(&feed.query));
        }
    }

    fn insert(&mut self, payload: ContractPayload) -> ContractId {
        let id = ContractId::new(Uuid::new_v4().to_string());
        let template = payload.template();
        self.contracts.push(Contract {
            id: id.clone(),
            payload,
            created_at: Utc::now(),
        });
        self.publish(template);
        id
    }

    fn remove(&mut self, id: &ContractId) -> Option<Contract> {
        let index = self.contracts.iter().position(|c| &c.id == id)?;
        let contract = self.contracts.remove(index);
        self.publish(contract.payload.template());
        Some(contract)
    }

    fn find_by_key(&self, template: TemplateId, key: &ContractKey) -> Option<&Contract> {
        self.contracts.iter().find(|c| {
            c.payload.template() == template && c.payload.key().as_ref() == Some(key)
        })
    }

    fn apply_choice(
        &mut self,
        choice: ChoiceId,
        key: &ContractKey,
        args: &ChoiceArgs,
    ) -> Result<(), LedgerError> {
        match choice {
            ChoiceId::UpdateProfile(role) => {
                let existing = self
                    .find_by_key(TemplateId::Registration(role), key)
                    .cloned()
                    .ok_or_else(|| key_not_found(choice, key))?;
                let ContractPayload::Registration(mut registration) = existing.payload else {
                    return Err(rejected(choice, "keyed contract is not a registration"));
                };
                registration.name = string_arg(choice, args, "newName")?;
                registration.location = string_arg(choice, args, "newLocation")?;
                self.remove(&existing.id);
                self.insert(ContractPayload::Registration(registration));
                Ok(())
            }
            ChoiceId::AcceptInvitation(role) => {
                let name = string_arg(choice, args, "name")?;
                let location = string_arg(choice, args, "location")?;
                let (operator, party) = operator_and_party(choice, key)?;

                let invitation = self.find_by_key(TemplateId::Invitation(role), key).cloned();
                if invitation.is_none() && role.requires_invitation() {
                    return Err(key_not_found(choice, key));
                }
                if self
                    .find_by_key(TemplateId::Registration(role), key)
                    .is_some()
                {
                    return Err(rejected(choice, "party is already registered"));
                }
                if let Some(invitation) = invitation {
                    self.remove(&invitation.id);
                }
                self.insert(ContractPayload::Registration(Registration {
                    operator,
                    party,
                    role,
                    name,
                    location,
                }));
                Ok(())
            }
            ChoiceId::InviteCustomer => {
                let (operator, broker) = operator_and_party(choice, key)?;
                if self
                    .find_by_key(TemplateId::Registration(MarketRole::Broker), key)
                    .is_none()
                {
                    return Err(key_not_found(choice, key));
                }
                let customer = PartyId::new(string_arg(choice, args, "brokerCustomer")?);
                self.insert(ContractPayload::BrokerCustomerInvitation(
                    BrokerCustomerInvitation {
                        operator,
                        broker,
                        broker_customer: customer,
                    },
                ));
                Ok(())
            }
        }
    }
}

fn key_not_found(choice: ChoiceId, key: &ContractKey) -> LedgerError {
    LedgerError::KeyNotFound {
        choice,
        key: key.to_string(),
    }
}

fn rejected(choice: ChoiceId, reason: impl Into<String>) -> LedgerError {
    LedgerError::Rejected {
        choice,
        reason: reason.into(),
    }
}

fn string_arg(choice: ChoiceId, args: &ChoiceArgs, name: &str) -> Result<String, LedgerError> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| rejected(choice, format!("missing argument '{name}'")))
}

fn operator_and_party(
    choice: ChoiceId,
    key: &ContractKey,
) -> Result<(PartyId, PartyId), LedgerError> {
    match key.parties() {
        [operator, party] => Ok((operator.clone(), party.clone())),
        _ => Err(rejected(choice, format!("malformed key {key}"))),
    }
}

/// In-process ledger implementing both ledger capabilities.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a contract and publish the new set to its subscribers.
    pub fn create(&self, payload: ContractPayload) -> ContractId {
        self.lock().insert(payload)
    }

    /// Archive a contract. Returns false if it was not active.
    pub fn archive(&self, id: &ContractId) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn active_contracts(&self, template: TemplateId) -> Vec<Contract> {
        self.lock()
            .contracts
            .iter()
            .filter(|c| c.payload.template() == template)
            .cloned()
            .collect()
    }

    /// Hold a template's streams in their current state; new subscribers
    /// stay `loading` until `resume`.
    pub fn pause(&self, template: TemplateId) {
        self.lock().paused.insert(template);
    }

    pub fn resume(&self, template: TemplateId) {
        let mut state = self.lock();
        state.paused.remove(&template);
        state.publish(template);
    }

    /// Close every open stream of a template, reporting `reason`.
    pub fn close_streams(&self, template: TemplateId, reason: &str) {
        let mut state = self.lock();
        let feeds = std::mem::take(&mut state.feeds);
        let (closing, keep): (Vec<_>, Vec<_>) = feeds
            .into_iter()
            .partition(|feed| feed.query.template == template);
        state.feeds = keep;
        for feed in closing {
            let mut last = feed.sender.borrow().clone();
            last.last_error = Some(reason.to_string());
            feed.sender.send_replace(last);
        }
    }

    /// Make the next exercise fail with `error` instead of running.
    pub fn fail_next_exercise(&self, error: LedgerError) {
        self.lock().injected_failures.push_back(error);
    }

    /// Delay every exercise, to keep a submission in flight.
    pub fn set_exercise_delay(&self, delay: Option<Duration>) {
        self.lock().exercise_delay = delay;
    }

    pub fn exercises(&self) -> Vec<ExerciseRecord> {
        self.lock().exercises.clone()
    }

    /// Number of live (not yet dropped) subscriptions for a template.
    pub fn open_streams(&self, template: TemplateId) -> usize {
        let mut state = self.lock();
        state.feeds.retain(|feed| !feed.sender.is_closed());
        state
            .feeds
            .iter()
            .filter(|feed| feed.query.template == template)
            .count()
    }
}

impl LedgerStreams for InMemoryLedger {
    fn subscribe(&self, query: ContractQuery, on_close: Option<CloseHandler>) -> Subscription {
        let mut state = self.lock();
        let initial = if state.paused.contains(&query.template) {
            PayloadSnapshot::loading()
        } else {
            state.snapshot_for(&query)
        };
        let (sender, receiver) = watch::channel(initial);
        state.feeds.push(Feed {
            query: query.clone(),
            sender,
        });
        tracing::debug!(template = %query.template, "Opened contract stream");
        Subscription::new(query, receiver, on_close)
    }
}

#[async_trait]
impl LedgerCommands for InMemoryLedger {
    async fn exercise_by_key(
        &self,
        choice: ChoiceId,
        key: ContractKey,
        args: ChoiceArgs,
    ) -> Result<(), LedgerError> {
        let delay = self.lock().exercise_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        let result = match state.injected_failures.pop_front() {
            Some(error) => Err(error),
            None => state.apply_choice(choice, &key, &args),
        };
        state.exercises.push(ExerciseRecord {
            choice,
            key,
            args,
            succeeded: result.is_ok(),
        });
        result
    }
}
