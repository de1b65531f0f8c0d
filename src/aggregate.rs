//! Composition of a role's independent contract streams into one state.
//!
//! Every stream is applied in receipt order and replaces its own slot
//! wholesale. Streams are never merged with each other; cross-stream joins
//! happen downstream, keyed by `PartyId`. A stream that closes unexpectedly
//! is logged, recorded as a fault, and its slot becomes stale-empty while the
//! remaining streams keep updating.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use tokio_stream::StreamMap;

use crate::error::StreamError;
use crate::ledger::{
    AssetDeposit, BrokerCustomer, BrokerCustomerInvitation, CloseHandler, ContractPayload,
    ContractQuery, CustodianRelationship, ExchangeParticipant, Invitation, LedgerStreams,
    PartyId, PayloadSnapshot, Registration, StreamEvent, TemplateId,
};
use crate::registry::RegistryLookup;
use crate::session::{MarketRole, SessionContext};

/// Named slot in the aggregated state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Registration,
    Invitations,
    CustodianRelationships,
    ClientRelationships,
    ExchangeParticipants,
    Deposits,
    CustodianRegistry,
    ExchangeRegistry,
    InvestorRegistry,
    BrokerCustomers,
    BrokerCustomerInvitations,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Invitations => "invitations",
            Self::CustodianRelationships => "custodian_relationships",
            Self::ClientRelationships => "client_relationships",
            Self::ExchangeParticipants => "exchange_participants",
            Self::Deposits => "deposits",
            Self::CustodianRegistry => "custodian_registry",
            Self::ExchangeRegistry => "exchange_registry",
            Self::InvestorRegistry => "investor_registry",
            Self::BrokerCustomers => "broker_customers",
            Self::BrokerCustomerInvitations => "broker_customer_invitations",
        }
    }

    pub fn is_registry(self) -> bool {
        matches!(
            self,
            Self::CustodianRegistry | Self::ExchangeRegistry | Self::InvestorRegistry
        )
    }

    /// Whether a payload belongs in this slot.
    pub fn accepts(self, payload: &ContractPayload) -> bool {
        match payload {
            ContractPayload::Registration(r) => match self {
                Self::Registration => true,
                Self::CustodianRegistry => r.role == MarketRole::Custodian,
                Self::ExchangeRegistry => r.role == MarketRole::Exchange,
                Self::InvestorRegistry => r.role == MarketRole::Investor,
                _ => false,
            },
            ContractPayload::Invitation(_) => self == Self::Invitations,
            ContractPayload::CustodianRelationship(_) => {
                matches!(self, Self::CustodianRelationships | Self::ClientRelationships)
            }
            ContractPayload::ExchangeParticipant(_) => self == Self::ExchangeParticipants,
            ContractPayload::AssetDeposit(_) => self == Self::Deposits,
            ContractPayload::BrokerCustomer(_) => self == Self::BrokerCustomers,
            ContractPayload::BrokerCustomerInvitation(_) => {
                self == Self::BrokerCustomerInvitations
            }
        }
    }
}

/// The stream set one role subscribes to.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleSubscriptions {
    entries: Vec<(StreamKind, ContractQuery)>,
}

impl RoleSubscriptions {
    pub fn for_role(session: &SessionContext) -> Self {
        let me = session.party();
        let role = session.role();
        let mut entries = vec![
            (
                StreamKind::Registration,
                ContractQuery::new(TemplateId::Registration(role)).with_party("party", me),
            ),
            (
                StreamKind::Invitations,
                ContractQuery::new(TemplateId::Invitation(role)).with_party("party", me),
            ),
            (
                StreamKind::CustodianRegistry,
                ContractQuery::new(TemplateId::Registration(MarketRole::Custodian)),
            ),
            (
                StreamKind::ExchangeRegistry,
                ContractQuery::new(TemplateId::Registration(MarketRole::Exchange)),
            ),
        ];

        match role {
            MarketRole::Broker => {
                entries.extend([
                    custodian_relationships(me),
                    own_deposits(me),
                    exchange_grants(me),
                    investor_registry(),
                    (
                        StreamKind::BrokerCustomers,
                        ContractQuery::new(TemplateId::BrokerCustomer).with_party("broker", me),
                    ),
                    (
                        StreamKind::BrokerCustomerInvitations,
                        ContractQuery::new(TemplateId::BrokerCustomerInvitation)
                            .with_party("broker", me),
                    ),
                ]);
            }
            MarketRole::Investor => {
                entries.extend([
                    custodian_relationships(me),
                    own_deposits(me),
                    exchange_grants(me),
                ]);
            }
            MarketRole::Exchange => {
                entries.extend([
                    custodian_relationships(me),
                    own_deposits(me),
                    investor_registry(),
                ]);
            }
            MarketRole::Custodian => {
                entries.extend([
                    (
                        StreamKind::ClientRelationships,
                        ContractQuery::new(TemplateId::CustodianRelationship)
                            .with_party("custodian", me),
                    ),
                    (
                        StreamKind::Deposits,
                        ContractQuery::new(TemplateId::AssetDeposit).with_party("provider", me),
                    ),
                    investor_registry(),
                ]);
            }
        }

        Self { entries }
    }

    pub fn kinds(&self) -> impl Iterator<Item = StreamKind> + '_ {
        self.entries.iter().map(|(kind, _)| *kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(StreamKind, ContractQuery)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn custodian_relationships(me: &PartyId) -> (StreamKind, ContractQuery) {
    (
        StreamKind::CustodianRelationships,
        ContractQuery::new(TemplateId::CustodianRelationship).with_party("party", me),
    )
}

fn own_deposits(me: &PartyId) -> (StreamKind, ContractQuery) {
    (
        StreamKind::Deposits,
        ContractQuery::new(TemplateId::AssetDeposit).with_party("owner", me),
    )
}

fn exchange_grants(me: &PartyId) -> (StreamKind, ContractQuery) {
    (
        StreamKind::ExchangeParticipants,
        ContractQuery::new(TemplateId::ExchangeParticipant).with_party("participant", me),
    )
}

fn investor_registry() -> (StreamKind, ContractQuery) {
    (
        StreamKind::InvestorRegistry,
        ContractQuery::new(TemplateId::Registration(MarketRole::Investor)),
    )
}

/// A recorded unexpected stream closure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamFault {
    pub kind: StreamKind,
    pub template: TemplateId,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// One role's view of the ledger at the last observed moment.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatedRoleState {
    streams: BTreeMap<StreamKind, PayloadSnapshot>,
    faults: Vec<StreamFault>,
}

impl AggregatedRoleState {
    /// Empty state with every subscribed slot loading.
    pub fn loading(kinds: impl IntoIterator<Item = StreamKind>) -> Self {
        Self {
            streams: kinds
                .into_iter()
                .map(|kind| (kind, PayloadSnapshot::loading()))
                .collect(),
            faults: Vec::new(),
        }
    }

    /// True iff at least one constituent stream is loading.
    pub fn is_loading(&self) -> bool {
        self.streams.values().any(|snapshot| snapshot.loading)
    }

    pub fn snapshot(&self, kind: StreamKind) -> Option<&PayloadSnapshot> {
        self.streams.get(&kind)
    }

    /// Whether one slot is still loading. Unsubscribed slots never load.
    pub fn is_stream_loading(&self, kind: StreamKind) -> bool {
        self.streams.get(&kind).is_some_and(|s| s.loading)
    }

    pub fn kinds(&self) -> impl Iterator<Item = StreamKind> + '_ {
        self.streams.keys().copied()
    }

    pub fn faults(&self) -> &[StreamFault] {
        &self.faults
    }

    pub fn has_faults(&self) -> bool {
        !self.faults.is_empty()
    }

    /// Replace one slot wholesale, dropping payloads that do not belong there.
    pub fn replace(&mut self, kind: StreamKind, mut snapshot: PayloadSnapshot) {
        let before = snapshot.contracts.len();
        snapshot.contracts.retain(|c| kind.accepts(&c.payload));
        let dropped = before - snapshot.contracts.len();
        if dropped > 0 {
            tracing::warn!(
                stream = kind.as_str(),
                "Dropped {} contracts of an unexpected type",
                dropped
            );
        }
        self.streams.insert(kind, snapshot);
    }

    pub fn record_fault(&mut self, kind: StreamKind, error: &StreamError) {
        let StreamError::UnexpectedClose { template, reason } = error;
        self.streams
            .insert(kind, PayloadSnapshot::stale(reason.clone()));
        self.faults.push(StreamFault {
            kind,
            template: *template,
            reason: reason.clone(),
            at: Utc::now(),
        });
    }

    /// Contracts of a settled slot. A loading snapshot contributes nothing.
    fn payloads(&self, kind: StreamKind) -> impl Iterator<Item = &ContractPayload> {
        self.streams
            .get(&kind)
            .filter(|snapshot| !snapshot.loading)
            .into_iter()
            .flat_map(|snapshot| snapshot.contracts.iter().map(|c| &c.payload))
    }

    fn registrations_in(&self, kind: StreamKind) -> impl Iterator<Item = &Registration> {
        self.payloads(kind).filter_map(|p| match p {
            ContractPayload::Registration(r) => Some(r),
            _ => None,
        })
    }

    /// This party's own registration contracts.
    pub fn registrations(&self) -> impl Iterator<Item = &Registration> {
        self.registrations_in(StreamKind::Registration)
    }

    pub fn invitations(&self) -> impl Iterator<Item = &Invitation> {
        self.payloads(StreamKind::Invitations).filter_map(|p| match p {
            ContractPayload::Invitation(i) => Some(i),
            _ => None,
        })
    }

    pub fn custodian_relationships(&self) -> impl Iterator<Item = &CustodianRelationship> {
        self.payloads(StreamKind::CustodianRelationships)
            .filter_map(|p| match p {
                ContractPayload::CustodianRelationship(r) => Some(r),
                _ => None,
            })
    }

    pub fn client_relationships(&self) -> impl Iterator<Item = &CustodianRelationship> {
        self.payloads(StreamKind::ClientRelationships)
            .filter_map(|p| match p {
                ContractPayload::CustodianRelationship(r) => Some(r),
                _ => None,
            })
    }

    pub fn exchange_participants(&self) -> impl Iterator<Item = &ExchangeParticipant> {
        self.payloads(StreamKind::ExchangeParticipants)
            .filter_map(|p| match p {
                ContractPayload::ExchangeParticipant(e) => Some(e),
                _ => None,
            })
    }

    pub fn deposits(&self) -> impl Iterator<Item = &AssetDeposit> {
        self.payloads(StreamKind::Deposits).filter_map(|p| match p {
            ContractPayload::AssetDeposit(d) => Some(d),
            _ => None,
        })
    }

    pub fn custodian_registry(&self) -> impl Iterator<Item = &Registration> {
        self.registrations_in(StreamKind::CustodianRegistry)
    }

    pub fn exchange_registry(&self) -> impl Iterator<Item = &Registration> {
        self.registrations_in(StreamKind::ExchangeRegistry)
    }

    pub fn investor_registry(&self) -> impl Iterator<Item = &Registration> {
        self.registrations_in(StreamKind::InvestorRegistry)
    }

    pub fn broker_customers(&self) -> impl Iterator<Item = &BrokerCustomer> {
        self.payloads(StreamKind::BrokerCustomers)
            .filter_map(|p| match p {
                ContractPayload::BrokerCustomer(c) => Some(c),
                _ => None,
            })
    }

    pub fn broker_customer_invitations(&self) -> impl Iterator<Item = &BrokerCustomerInvitation> {
        self.payloads(StreamKind::BrokerCustomerInvitations)
            .filter_map(|p| match p {
                ContractPayload::BrokerCustomerInvitation(i) => Some(i),
                _ => None,
            })
    }
}

/// Owns a role's subscriptions and folds their events into
/// [`AggregatedRoleState`].
pub struct StateAggregator {
    state: AggregatedRoleState,
    registry: RegistryLookup,
    events: StreamMap<StreamKind, BoxStream<'static, StreamEvent>>,
}

impl StateAggregator {
    /// Open every subscription in `subscriptions`. Each stream gets a close
    /// handler that logs and lets the others continue.
    pub fn subscribe<S: LedgerStreams + ?Sized>(
        ledger: &S,
        session: &SessionContext,
        subscriptions: &RoleSubscriptions,
    ) -> Self {
        let mut events = StreamMap::new();
        for (kind, query) in subscriptions.iter() {
            let kind = *kind;
            let party = session.party().clone();
            let on_close: CloseHandler = Arc::new(move |error: &StreamError| {
                tracing::warn!(
                    stream = kind.as_str(),
                    party = %party,
                    "{}; continuing with stale-empty data",
                    error
                );
            });
            let subscription = ledger.subscribe(query.clone(), Some(on_close));
            events.insert(kind, subscription.into_events());
        }
        tracing::debug!(
            role = %session.role(),
            streams = subscriptions.len(),
            "Subscribed role streams"
        );

        Self {
            state: AggregatedRoleState::loading(subscriptions.kinds()),
            registry: RegistryLookup::default(),
            events,
        }
    }

    pub fn state(&self) -> &AggregatedRoleState {
        &self.state
    }

    pub fn registry(&self) -> &RegistryLookup {
        &self.registry
    }

    /// Wait for the next event from any stream. `None` once every stream has
    /// ended or been unsubscribed. Cancel-safe.
    pub async fn next_event(&mut self) -> Option<(StreamKind, StreamEvent)> {
        self.events.next().await
    }

    /// Fold one event into the state.
    pub fn apply(&mut self, kind: StreamKind, event: StreamEvent) {
        match event {
            StreamEvent::Snapshot(snapshot) => {
                tracing::debug!(
                    stream = kind.as_str(),
                    loading = snapshot.loading,
                    contracts = snapshot.contracts.len(),
                    "Applying snapshot"
                );
                self.state.replace(kind, snapshot);
            }
            StreamEvent::Closed(error) => self.state.record_fault(kind, &error),
        }
        if kind.is_registry() {
            self.registry = RegistryLookup::from_state(&self.state);
        }
    }

    /// Stop one stream. Its last data stays in the state.
    pub fn unsubscribe(&mut self, kind: StreamKind) -> bool {
        self.events.remove(&kind).is_some()
    }

    /// Stop every stream; no further events are delivered.
    pub fn unsubscribe_all(&mut self) {
        self.events.clear();
    }

    pub fn open_streams(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ledger::{Contract, ContractId, InMemoryLedger};

    fn session(role: MarketRole) -> SessionContext {
        SessionContext::new("operator", "me", role)
    }

    fn contract(payload: ContractPayload) -> Contract {
        Contract {
            id: ContractId::new("cid"),
            payload,
            created_at: Utc::now(),
        }
    }

    fn registration(party: &str, role: MarketRole) -> ContractPayload {
        ContractPayload::Registration(Registration {
            operator: "operator".into(),
            party: party.into(),
            role,
            name: format!("{party} name"),
            location: "Paris".to_string(),
        })
    }

    fn stale_error(template: TemplateId) -> StreamError {
        StreamError::UnexpectedClose {
            template,
            reason: "closed".to_string(),
        }
    }

    #[test]
    fn loading_is_or_over_streams() {
        let kinds = [StreamKind::Registration, StreamKind::Invitations];
        let mut state = AggregatedRoleState::loading(kinds);
        assert!(state.is_loading());

        state.replace(StreamKind::Registration, PayloadSnapshot::loaded(Vec::new()));
        assert!(state.is_loading());

        state.replace(StreamKind::Invitations, PayloadSnapshot::loaded(Vec::new()));
        assert!(!state.is_loading());

        state.replace(StreamKind::Invitations, PayloadSnapshot::loading());
        assert!(state.is_loading());
    }

    #[test]
    fn empty_state_is_not_loading() {
        assert!(!AggregatedRoleState::default().is_loading());
    }

    #[test]
    fn fault_degrades_only_the_affected_stream() {
        let kinds = [StreamKind::Registration, StreamKind::CustodianRelationships];
        let mut state = AggregatedRoleState::loading(kinds);
        state.replace(
            StreamKind::Registration,
            PayloadSnapshot::loaded(vec![contract(registration("me", MarketRole::Broker))]),
        );

        state.record_fault(
            StreamKind::CustodianRelationships,
            &stale_error(TemplateId::CustodianRelationship),
        );

        assert!(!state.is_loading());
        assert_eq!(state.registrations().count(), 1);
        assert_eq!(state.custodian_relationships().count(), 0);
        assert_eq!(state.faults().len(), 1);
        assert_eq!(state.faults()[0].kind, StreamKind::CustodianRelationships);
        assert_eq!(
            state
                .snapshot(StreamKind::CustodianRelationships)
                .and_then(|s| s.last_error.as_deref()),
            Some("closed")
        );
    }

    #[test]
    fn loading_snapshot_contracts_are_not_exposed() {
        let kinds = [StreamKind::Registration, StreamKind::CustodianRegistry];
        let mut state = AggregatedRoleState::loading(kinds);
        let cached = PayloadSnapshot {
            loading: true,
            contracts: vec![contract(registration("me", MarketRole::Broker))],
            last_error: None,
        };
        state.replace(StreamKind::Registration, cached.clone());
        state.replace(StreamKind::CustodianRegistry, cached);

        assert_eq!(state.registrations().count(), 0);
        assert_eq!(state.custodian_registry().count(), 0);
        assert_eq!(
            state.snapshot(StreamKind::Registration).map(|s| s.len()),
            Some(1)
        );

        state.replace(
            StreamKind::Registration,
            PayloadSnapshot::loaded(vec![contract(registration("me", MarketRole::Broker))]),
        );
        assert_eq!(state.registrations().count(), 1);
    }

    #[test]
    fn replace_drops_payloads_of_the_wrong_type() {
        let mut state = AggregatedRoleState::loading([StreamKind::CustodianRegistry]);
        state.replace(
            StreamKind::CustodianRegistry,
            PayloadSnapshot::loaded(vec![
                contract(registration("c1", MarketRole::Custodian)),
                contract(registration("x1", MarketRole::Exchange)),
            ]),
        );

        let parties: Vec<_> = state.custodian_registry().map(|r| r.party.clone()).collect();
        assert_eq!(parties, vec![PartyId::from("c1")]);
    }

    #[test]
    fn broker_subscribes_to_customer_streams() {
        let kinds: Vec<_> = RoleSubscriptions::for_role(&session(MarketRole::Broker))
            .kinds()
            .collect();
        assert!(kinds.contains(&StreamKind::BrokerCustomers));
        assert!(kinds.contains(&StreamKind::BrokerCustomerInvitations));
        assert!(kinds.contains(&StreamKind::InvestorRegistry));
    }

    #[test]
    fn custodian_sees_clients_not_providers() {
        let kinds: Vec<_> = RoleSubscriptions::for_role(&session(MarketRole::Custodian))
            .kinds()
            .collect();
        assert!(kinds.contains(&StreamKind::ClientRelationships));
        assert!(!kinds.contains(&StreamKind::CustodianRelationships));
        assert!(!kinds.contains(&StreamKind::ExchangeParticipants));
    }

    #[tokio::test]
    async fn aggregator_applies_initial_snapshots() {
        let ledger = InMemoryLedger::new();
        ledger.create(registration("custodianA", MarketRole::Custodian));
        let session = session(MarketRole::Investor);
        let subscriptions = RoleSubscriptions::for_role(&session);

        let mut aggregator = StateAggregator::subscribe(&ledger, &session, &subscriptions);
        assert!(aggregator.state().is_loading());

        for _ in 0..subscriptions.len() {
            let (kind, event) = aggregator.next_event().await.expect("initial snapshot");
            aggregator.apply(kind, event);
        }

        assert!(!aggregator.state().is_loading());
        assert_eq!(
            aggregator
                .registry()
                .lookup(MarketRole::Custodian, &"custodianA".into()),
            Some("custodianA name")
        );
    }

    #[tokio::test]
    async fn closed_stream_does_not_block_others() {
        let ledger = InMemoryLedger::new();
        let session = session(MarketRole::Investor);
        let subscriptions = RoleSubscriptions::for_role(&session);
        let mut aggregator = StateAggregator::subscribe(&ledger, &session, &subscriptions);
        for _ in 0..subscriptions.len() {
            let (kind, event) = aggregator.next_event().await.expect("initial snapshot");
            aggregator.apply(kind, event);
        }

        ledger.close_streams(TemplateId::CustodianRelationship, "connection reset");
        ledger.create(registration("me", MarketRole::Investor));

        let mut saw_fault = false;
        let mut saw_registration = false;
        while !(saw_fault && saw_registration) {
            let (kind, event) = aggregator.next_event().await.expect("event");
            aggregator.apply(kind, event);
            saw_fault |= aggregator.state().has_faults();
            saw_registration |= aggregator.state().registrations().count() == 1;
        }

        assert_eq!(aggregator.state().faults()[0].reason, "connection reset");
        assert_eq!(aggregator.state().registrations().count(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_one_stream() {
        let ledger = InMemoryLedger::new();
        let session = session(MarketRole::Investor);
        let subscriptions = RoleSubscriptions::for_role(&session);
        let mut aggregator = StateAggregator::subscribe(&ledger, &session, &subscriptions);

        assert!(aggregator.unsubscribe(StreamKind::Deposits));
        assert!(!aggregator.unsubscribe(StreamKind::Deposits));

        assert_eq!(aggregator.open_streams(), subscriptions.len() - 1);
        assert_eq!(ledger.open_streams(TemplateId::AssetDeposit), 0);
        assert_eq!(ledger.open_streams(TemplateId::CustodianRelationship), 1);

        let mut delivered = Vec::new();
        for _ in 0..subscriptions.len() - 1 {
            let (kind, event) = aggregator.next_event().await.expect("initial snapshot");
            delivered.push(kind);
            aggregator.apply(kind, event);
        }
        assert!(!delivered.contains(&StreamKind::Deposits));
        assert!(aggregator.state().is_stream_loading(StreamKind::Deposits));
    }

    #[tokio::test]
    async fn unsubscribe_all_stops_delivery() {
        let ledger = InMemoryLedger::new();
        let session = session(MarketRole::Exchange);
        let subscriptions = RoleSubscriptions::for_role(&session);
        let mut aggregator = StateAggregator::subscribe(&ledger, &session, &subscriptions);

        aggregator.unsubscribe_all();

        assert!(aggregator.next_event().await.is_none());
        assert_eq!(
            ledger.open_streams(TemplateId::Registration(MarketRole::Exchange)),
            0
        );
    }
}
