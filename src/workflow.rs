//! Per-role composition of the reconciliation pieces.
//!
//! `RoleWorkflow` owns a session's stream subscriptions and is the single
//! writer of its aggregated state. Stream events are applied one at a time
//! through `next_update`. The user actions live on [`WorkflowActions`], an
//! owned handle that only touches the ledger and its own local state, so a
//! caller can keep applying updates while a mutation is awaiting the ledger.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;

use crate::aggregate::{AggregatedRoleState, RoleSubscriptions, StateAggregator, StreamKind};
use crate::catalog::{self, ProviderEntry};
use crate::config::WorkflowConfig;
use crate::customers::{self, CustomerInvites, CustomerOption};
use crate::error::WorkflowError;
use crate::invitation::InvitationAcceptance;
use crate::ledger::{Ledger, PartyId, StreamEvent};
use crate::onboarding::{OnboardingStatus, Screen};
use crate::profile::ProfileSync;
use crate::registry::RegistryLookup;
use crate::session::SessionContext;

pub struct RoleWorkflow<L: Ledger + ?Sized> {
    aggregator: StateAggregator,
    status: watch::Sender<OnboardingStatus>,
    actions: WorkflowActions<L>,
    providers: Vec<ProviderEntry>,
}

impl<L: Ledger + ?Sized> RoleWorkflow<L> {
    /// Subscribe to the session role's streams. Every slot starts loading.
    pub fn start(ledger: Arc<L>, session: SessionContext, config: &WorkflowConfig) -> Self {
        let subscriptions = RoleSubscriptions::for_role(&session);
        let aggregator = StateAggregator::subscribe(ledger.as_ref(), &session, &subscriptions);
        tracing::info!(
            party = %session.party(),
            role = %session.role(),
            "Started role workflow"
        );

        let (status, status_rx) = watch::channel(OnboardingStatus::evaluate(aggregator.state()));
        Self {
            aggregator,
            status,
            actions: WorkflowActions {
                profile: ProfileSync::new(session.clone()),
                session,
                ledger,
                status: status_rx,
                invitation: InvitationAcceptance::new(),
                customers: CustomerInvites::new(),
                mutation_timeout: config.mutation_timeout,
            },
            providers: Vec::new(),
        }
    }

    /// An owned handle to the user actions. Clones share in-flight guards,
    /// the profile draft, and the live onboarding status.
    pub fn actions(&self) -> WorkflowActions<L> {
        self.actions.clone()
    }

    /// Wait for and apply the next stream event. Returns the stream that
    /// changed, or `None` once no subscription remains.
    pub async fn next_update(&mut self) -> Option<StreamKind> {
        let (kind, event) = self.aggregator.next_event().await?;
        self.apply(kind, event);
        Some(kind)
    }

    /// Apply every event that is already available without waiting.
    pub fn drain_ready(&mut self) -> usize {
        let mut applied = 0;
        while let Some(Some((kind, event))) = self.aggregator.next_event().now_or_never() {
            self.apply(kind, event);
            applied += 1;
        }
        applied
    }

    /// Apply updates until `status` is reached. Returns false if the streams
    /// end first.
    pub async fn wait_for_status(&mut self, status: OnboardingStatus) -> bool {
        while self.status() != status {
            if self.next_update().await.is_none() {
                return false;
            }
        }
        true
    }

    fn apply(&mut self, kind: StreamKind, event: StreamEvent) {
        let before = self.status();
        self.aggregator.apply(kind, event);

        if kind == StreamKind::Registration
            && !self.aggregator.state().is_stream_loading(StreamKind::Registration)
        {
            self.actions
                .profile
                .observe(self.aggregator.state().registrations());
        }
        if matches!(
            kind,
            StreamKind::ExchangeParticipants
                | StreamKind::CustodianRelationships
                | StreamKind::CustodianRegistry
                | StreamKind::ExchangeRegistry
        ) {
            self.rebuild_providers();
        }

        let after = self.status();
        if before != after {
            self.status.send_replace(after);
            tracing::info!(
                party = %self.actions.session.party(),
                from = %before,
                to = %after,
                "Onboarding status changed"
            );
        }
    }

    fn rebuild_providers(&mut self) {
        let state = self.aggregator.state();
        self.providers = catalog::build(
            state.exchange_participants(),
            state.custodian_relationships(),
            self.aggregator.registry(),
        );
    }

    pub fn session(&self) -> &SessionContext {
        &self.actions.session
    }

    pub fn state(&self) -> &AggregatedRoleState {
        self.aggregator.state()
    }

    pub fn registry(&self) -> &RegistryLookup {
        self.aggregator.registry()
    }

    pub fn status(&self) -> OnboardingStatus {
        OnboardingStatus::evaluate(self.aggregator.state())
    }

    pub fn screen(&self) -> Screen {
        self.status().screen(self.actions.session.role())
    }

    pub fn providers(&self) -> &[ProviderEntry] {
        &self.providers
    }

    /// The registered name, or the raw party id before registration.
    pub fn display_name(&self) -> String {
        self.state()
            .registrations()
            .next()
            .map(|r| r.name.clone())
            .unwrap_or_else(|| self.actions.session.party().to_string())
    }

    pub fn customer_options(&self) -> Vec<CustomerOption> {
        customers::customer_options(self.state())
    }

    /// The editable profile draft. Clones share the same draft.
    pub fn profile(&self) -> &ProfileSync {
        &self.actions.profile
    }

    pub fn can_accept_invitation(&self) -> bool {
        self.actions.can_accept_invitation()
    }

    pub fn can_commit_profile(&self) -> bool {
        self.actions.can_commit_profile()
    }

    pub fn can_invite_customer(&self) -> bool {
        self.actions.can_invite_customer()
    }

    /// Discard local profile edits in favour of the ledger's values.
    pub fn reload_profile(&self) {
        self.actions.profile.reload(self.state().registrations().next());
    }

    pub async fn commit_profile(&self) -> Result<(), WorkflowError> {
        self.actions.commit_profile().await
    }

    pub async fn accept_invitation(&self) -> Result<(), WorkflowError> {
        self.actions.accept_invitation().await
    }

    pub async fn invite_customer(&self, customer: &PartyId) -> Result<(), WorkflowError> {
        self.actions.invite_customer(customer).await
    }

    /// Stop all subscriptions. No further updates are applied afterwards.
    pub fn shutdown(&mut self) {
        self.aggregator.unsubscribe_all();
        tracing::info!(party = %self.actions.session.party(), "Stopped role workflow");
    }
}

/// The mutating user actions of one session.
///
/// Holds no borrow of the [`RoleWorkflow`] it came from: the onboarding
/// status is read from a watch channel the workflow updates as it applies
/// stream events.
pub struct WorkflowActions<L: Ledger + ?Sized> {
    session: SessionContext,
    ledger: Arc<L>,
    status: watch::Receiver<OnboardingStatus>,
    profile: ProfileSync,
    invitation: InvitationAcceptance,
    customers: CustomerInvites,
    mutation_timeout: Duration,
}

impl<L: Ledger + ?Sized> Clone for WorkflowActions<L> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            ledger: Arc::clone(&self.ledger),
            status: self.status.clone(),
            profile: self.profile.clone(),
            invitation: self.invitation.clone(),
            customers: self.customers.clone(),
            mutation_timeout: self.mutation_timeout,
        }
    }
}

impl<L: Ledger + ?Sized> WorkflowActions<L> {
    /// Status as of the last update the workflow applied.
    pub fn status(&self) -> OnboardingStatus {
        *self.status.borrow()
    }

    pub fn profile(&self) -> &ProfileSync {
        &self.profile
    }

    pub fn can_accept_invitation(&self) -> bool {
        self.invitation.is_enabled(self.status(), &self.session)
    }

    pub fn can_commit_profile(&self) -> bool {
        self.status() == OnboardingStatus::Registered && self.profile.can_commit()
    }

    pub fn can_invite_customer(&self) -> bool {
        self.customers.is_enabled()
    }

    /// Send the profile draft to the ledger. Only available once registered.
    pub async fn commit_profile(&self) -> Result<(), WorkflowError> {
        let status = self.status();
        if status != OnboardingStatus::Registered {
            return Err(WorkflowError::NotReady {
                action: "commit profile",
                status,
            });
        }
        self.profile
            .commit(self.ledger.as_ref(), self.mutation_timeout)
            .await
    }

    /// Accept the pending invitation with the current draft. The move to
    /// `Registered` shows up on a later update.
    pub async fn accept_invitation(&self) -> Result<(), WorkflowError> {
        let (draft, revision) = self.profile.snapshot();
        self.invitation
            .accept(
                self.ledger.as_ref(),
                &self.session,
                self.status(),
                &draft,
                self.mutation_timeout,
            )
            .await?;
        self.profile.mark_clean_if(revision);
        Ok(())
    }

    pub async fn invite_customer(&self, customer: &PartyId) -> Result<(), WorkflowError> {
        self.customers
            .invite(
                self.ledger.as_ref(),
                &self.session,
                customer,
                self.mutation_timeout,
            )
            .await
    }
}
