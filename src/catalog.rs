//! Provider list shown on the holdings and workflow screens.

use std::fmt;

use serde::Serialize;

use crate::ledger::{CustodianRelationship, ExchangeParticipant, PartyId};
use crate::registry::RegistryLookup;
use crate::session::MarketRole;

/// Role a provider holds toward the current party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderRole {
    Custodian,
    Exchange,
}

impl ProviderRole {
    pub fn market_role(self) -> MarketRole {
        match self {
            Self::Custodian => MarketRole::Custodian,
            Self::Exchange => MarketRole::Exchange,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Custodian => "Custodian",
            Self::Exchange => "Exchange",
        }
    }
}

impl fmt::Display for ProviderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// A counterparty providing custody or exchange access. Unique by
/// `(party, role)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderEntry {
    pub party: PartyId,
    pub label: String,
    pub role: ProviderRole,
}

impl ProviderEntry {
    fn new(party: &PartyId, role: ProviderRole, lookup: &RegistryLookup) -> Self {
        let label = format!("{} | {}", lookup.display(role.market_role(), party), role);
        Self {
            party: party.clone(),
            label,
            role,
        }
    }
}

/// Build the provider list: exchange grants first, then custodian
/// relationships, each in input order. Every input contract yields exactly
/// one entry whether or not its counterparty has been resolved yet.
pub fn build<'a>(
    exchange_grants: impl IntoIterator<Item = &'a ExchangeParticipant>,
    custodian_relationships: impl IntoIterator<Item = &'a CustodianRelationship>,
    lookup: &RegistryLookup,
) -> Vec<ProviderEntry> {
    let exchanges = exchange_grants
        .into_iter()
        .map(|grant| ProviderEntry::new(&grant.exchange, ProviderRole::Exchange, lookup));
    let custodians = custodian_relationships.into_iter().map(|relationship| {
        ProviderEntry::new(&relationship.custodian, ProviderRole::Custodian, lookup)
    });
    exchanges.chain(custodians).collect()
}
