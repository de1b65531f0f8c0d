//! Session identity threaded through every workflow entry point.
//!
//! The operator and self party are never read from ambient state; each
//! component receives the `SessionContext` it acts on behalf of.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::helpers::normalize_variant;
use crate::error::ConfigError;
use crate::ledger::{ContractKey, PartyId};

/// Workflow persona, determining which contract types and screens apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRole {
    Broker,
    Exchange,
    Custodian,
    Investor,
}

impl MarketRole {
    pub const ALL: [MarketRole; 4] = [
        MarketRole::Broker,
        MarketRole::Exchange,
        MarketRole::Custodian,
        MarketRole::Investor,
    ];

    pub fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match normalize_variant(value).as_str() {
            "broker" | "broker_role" => Ok(Self::Broker),
            "exchange" | "exchange_role" => Ok(Self::Exchange),
            "custodian" | "custodian_role" => Ok(Self::Custodian),
            "investor" | "investor_role" => Ok(Self::Investor),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!(
                    "expected 'broker', 'exchange', 'custodian', or 'investor', got '{value}'"
                ),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Broker => "broker",
            Self::Exchange => "exchange",
            Self::Custodian => "custodian",
            Self::Investor => "investor",
        }
    }

    /// Template-name stem used by the ledger model (`RegisteredBroker`, ...).
    pub fn template_stem(self) -> &'static str {
        match self {
            Self::Broker => "Broker",
            Self::Exchange => "Exchange",
            Self::Custodian => "Custodian",
            Self::Investor => "Investor",
        }
    }

    /// Whether an invitation contract must exist before the role can register.
    ///
    /// Investors may ask the operator to register them directly.
    pub fn requires_invitation(self) -> bool {
        !matches!(self, Self::Investor)
    }
}

impl fmt::Display for MarketRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who this session acts as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionContext {
    operator: PartyId,
    party: PartyId,
    role: MarketRole,
}

impl SessionContext {
    pub fn new(operator: impl Into<PartyId>, party: impl Into<PartyId>, role: MarketRole) -> Self {
        Self {
            operator: operator.into(),
            party: party.into(),
            role,
        }
    }

    pub fn operator(&self) -> &PartyId {
        &self.operator
    }

    pub fn party(&self) -> &PartyId {
        &self.party
    }

    pub fn role(&self) -> MarketRole {
        self.role
    }

    /// The `(operator, self)` composite key addressing this party's role contracts.
    pub fn self_key(&self) -> ContractKey {
        ContractKey::operator_party(&self.operator, &self.party)
    }
}
