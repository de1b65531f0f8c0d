//! Party display-name lookup joined from the registry streams.

use std::collections::HashMap;

use crate::aggregate::AggregatedRoleState;
use crate::ledger::{PartyId, Registration};
use crate::session::MarketRole;

/// PartyId → registered name, per role. Rebuilt whenever a registry stream
/// updates; lookups never block and a miss is not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryLookup {
    names: HashMap<MarketRole, HashMap<PartyId, String>>,
}

impl RegistryLookup {
    pub fn from_registrations<'a>(registrations: impl IntoIterator<Item = &'a Registration>) -> Self {
        let mut names: HashMap<MarketRole, HashMap<PartyId, String>> = HashMap::new();
        for registration in registrations {
            names
                .entry(registration.role)
                .or_default()
                .insert(registration.party.clone(), registration.name.clone());
        }
        Self { names }
    }

    /// Build from every registry stream present in the aggregated state.
    pub fn from_state(state: &AggregatedRoleState) -> Self {
        Self::from_registrations(
            state
                .custodian_registry()
                .chain(state.exchange_registry())
                .chain(state.investor_registry()),
        )
    }

    pub fn lookup(&self, role: MarketRole, party: &PartyId) -> Option<&str> {
        self.names
            .get(&role)
            .and_then(|by_party| by_party.get(party))
            .map(String::as_str)
    }

    /// `"Name (party)"` when registered, otherwise the raw party id.
    pub fn display(&self, role: MarketRole, party: &PartyId) -> String {
        match self.lookup(role, party) {
            Some(name) => format!("{name} ({party})"),
            None => party.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
