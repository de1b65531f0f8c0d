//! Ledger identifiers and the closed set of contract payloads the portal reads.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::MarketRole;

/// Opaque, globally unique ledger participant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(String);

impl PartyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartyId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PartyId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&PartyId> for PartyId {
    fn from(value: &PartyId) -> Self {
        value.clone()
    }
}

/// Identifies one contract instance. A new id is minted whenever a choice
/// consumes and recreates a contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(String);

impl ContractId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered tuple of parties addressing a contract without its contract id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractKey(Vec<PartyId>);

impl ContractKey {
    pub fn new(parties: Vec<PartyId>) -> Self {
        Self(parties)
    }

    pub fn operator_party(operator: &PartyId, party: &PartyId) -> Self {
        Self(vec![operator.clone(), party.clone()])
    }

    pub fn parties(&self) -> &[PartyId] {
        &self.0
    }
}

impl fmt::Display for ContractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, party) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(party.as_str())?;
        }
        f.write_str(")")
    }
}

/// Contract-type selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateId {
    Registration(MarketRole),
    Invitation(MarketRole),
    CustodianRelationship,
    ExchangeParticipant,
    AssetDeposit,
    BrokerCustomer,
    BrokerCustomerInvitation,
}

impl TemplateId {
    pub fn qualified_name(&self) -> String {
        match self {
            Self::Registration(role) => {
                format!("Marketplace.Registry:Registered{}", role.template_stem())
            }
            Self::Invitation(role) => format!(
                "Marketplace.{stem}:{stem}Invitation",
                stem = role.template_stem()
            ),
            Self::CustodianRelationship => {
                "Marketplace.Custodian:CustodianRelationship".to_string()
            }
            Self::ExchangeParticipant => {
                "Marketplace.ExchangeParticipant:ExchangeParticipant".to_string()
            }
            Self::AssetDeposit => "DA.Finance.Asset:AssetDeposit".to_string(),
            Self::BrokerCustomer => "Marketplace.BrokerCustomer:BrokerCustomer".to_string(),
            Self::BrokerCustomerInvitation => {
                "Marketplace.BrokerCustomer:BrokerCustomerInvitation".to_string()
            }
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// Ledger choices the portal exercises by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceId {
    UpdateProfile(MarketRole),
    AcceptInvitation(MarketRole),
    InviteCustomer,
}

impl ChoiceId {
    /// Template the choice is exercised against.
    pub fn template(&self) -> TemplateId {
        match self {
            Self::UpdateProfile(role) => TemplateId::Registration(*role),
            Self::AcceptInvitation(role) => TemplateId::Invitation(*role),
            Self::InviteCustomer => TemplateId::Registration(MarketRole::Broker),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::UpdateProfile(role) => {
                format!("Registered{}_UpdateProfile", role.template_stem())
            }
            Self::AcceptInvitation(role) => {
                format!("{}Invitation_Accept", role.template_stem())
            }
            Self::InviteCustomer => "Broker_InviteCustomer".to_string(),
        }
    }
}

impl fmt::Display for ChoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Flat record of named choice arguments.
pub type ChoiceArgs = BTreeMap<String, serde_json::Value>;

/// A party's registration in the marketplace registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub operator: PartyId,
    pub party: PartyId,
    pub role: MarketRole,
    pub name: String,
    pub location: String,
}

/// Operator invitation for a party to take on a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub operator: PartyId,
    pub party: PartyId,
    pub role: MarketRole,
}

/// A custodian holding assets on behalf of `party`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustodianRelationship {
    pub operator: PartyId,
    pub custodian: PartyId,
    pub party: PartyId,
}

/// An exchange granting `participant` the right to trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeParticipant {
    pub operator: PartyId,
    pub exchange: PartyId,
    pub participant: PartyId,
}

/// An asset position held by `owner` with `provider`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDeposit {
    pub operator: PartyId,
    pub owner: PartyId,
    pub provider: PartyId,
    pub asset: String,
    pub quantity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerCustomer {
    pub operator: PartyId,
    pub broker: PartyId,
    pub broker_customer: PartyId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerCustomerInvitation {
    pub operator: PartyId,
    pub broker: PartyId,
    pub broker_customer: PartyId,
}

/// One variant per contract type the portal subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "template", rename_all = "snake_case")]
pub enum ContractPayload {
    Registration(Registration),
    Invitation(Invitation),
    CustodianRelationship(CustodianRelationship),
    ExchangeParticipant(ExchangeParticipant),
    AssetDeposit(AssetDeposit),
    BrokerCustomer(BrokerCustomer),
    BrokerCustomerInvitation(BrokerCustomerInvitation),
}

impl ContractPayload {
    pub fn template(&self) -> TemplateId {
        match self {
            Self::Registration(r) => TemplateId::Registration(r.role),
            Self::Invitation(i) => TemplateId::Invitation(i.role),
            Self::CustodianRelationship(_) => TemplateId::CustodianRelationship,
            Self::ExchangeParticipant(_) => TemplateId::ExchangeParticipant,
            Self::AssetDeposit(_) => TemplateId::AssetDeposit,
            Self::BrokerCustomer(_) => TemplateId::BrokerCustomer,
            Self::BrokerCustomerInvitation(_) => TemplateId::BrokerCustomerInvitation,
        }
    }

    /// Contract key, for templates that define one.
    pub fn key(&self) -> Option<ContractKey> {
        match self {
            Self::Registration(r) => Some(ContractKey::operator_party(&r.operator, &r.party)),
            Self::Invitation(i) => Some(ContractKey::operator_party(&i.operator, &i.party)),
            _ => None,
        }
    }

    /// Whether every filter field equals the payload's field of the same name.
    pub fn matches(&self, filter: &QueryFilter) -> bool {
        if filter.is_empty() {
            return true;
        }
        let value = match serde_json::to_value(self) {
            Ok(value) => value,
            Err(_) => return false,
        };
        filter
            .iter()
            .all(|(field, expected)| value.get(field) == Some(expected))
    }
}

/// Field-equality filter applied to a template's contracts.
pub type QueryFilter = BTreeMap<String, serde_json::Value>;

/// Template selector plus optional filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractQuery {
    pub template: TemplateId,
    pub filter: QueryFilter,
}

impl ContractQuery {
    pub fn new(template: TemplateId) -> Self {
        Self {
            template,
            filter: QueryFilter::new(),
        }
    }

    pub fn with_party(mut self, field: &str, party: &PartyId) -> Self {
        self.filter.insert(
            field.to_string(),
            serde_json::Value::String(party.as_str().to_string()),
        );
        self
    }

    pub fn matches(&self, payload: &ContractPayload) -> bool {
        payload.template() == self.template && payload.matches(&self.filter)
    }
}

/// A read-only copy of one active ledger contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract<T = ContractPayload> {
    pub id: ContractId,
    pub payload: T,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(party: &str, role: MarketRole) -> ContractPayload {
        ContractPayload::Registration(Registration {
            operator: "operator".into(),
            party: party.into(),
            role,
            name: "Acme".to_string(),
            location: "Zurich".to_string(),
        })
    }

    #[test]
    fn template_names_follow_role_stem() {
        assert_eq!(
            TemplateId::Registration(MarketRole::Broker).qualified_name(),
            "Marketplace.Registry:RegisteredBroker"
        );
        assert_eq!(
            TemplateId::Invitation(MarketRole::Custodian).qualified_name(),
            "Marketplace.Custodian:CustodianInvitation"
        );
        assert_eq!(
            ChoiceId::UpdateProfile(MarketRole::Exchange).name(),
            "RegisteredExchange_UpdateProfile"
        );
        assert_eq!(
            ChoiceId::AcceptInvitation(MarketRole::Broker).name(),
            "BrokerInvitation_Accept"
        );
    }

    #[test]
    fn query_filters_by_field_and_template() {
        let alice = PartyId::from("alice");
        let query = ContractQuery::new(TemplateId::Registration(MarketRole::Broker))
            .with_party("party", &alice);

        assert!(query.matches(&registration("alice", MarketRole::Broker)));
        assert!(!query.matches(&registration("bob", MarketRole::Broker)));
        assert!(!query.matches(&registration("alice", MarketRole::Investor)));
    }

    #[test]
    fn filter_uses_camel_case_field_names() {
        let payload = ContractPayload::BrokerCustomer(BrokerCustomer {
            operator: "operator".into(),
            broker: "broker".into(),
            broker_customer: "carol".into(),
        });
        let query = ContractQuery::new(TemplateId::BrokerCustomer)
            .with_party("brokerCustomer", &PartyId::from("carol"));
        assert!(query.matches(&payload));
    }

    #[test]
    fn keyed_templates_expose_operator_party_key() {
        let key = registration("alice", MarketRole::Broker)
            .key()
            .expect("registrations are keyed");
        assert_eq!(key.to_string(), "(operator, alice)");

        let relationship = ContractPayload::CustodianRelationship(CustodianRelationship {
            operator: "operator".into(),
            custodian: "custodian".into(),
            party: "alice".into(),
        });
        assert!(relationship.key().is_none());
    }
}
