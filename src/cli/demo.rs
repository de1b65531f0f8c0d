//! `marketplace-portal demo` - drive one role through onboarding against an
//! in-memory ledger seeded with a small marketplace.

use std::sync::Arc;

use serde::Serialize;

use crate::catalog::ProviderEntry;
use crate::config::WorkflowConfig;
use crate::error::{Result, StreamError};
use crate::ledger::{
    ContractPayload, CustodianRelationship, ExchangeParticipant, InMemoryLedger, Invitation,
    PartyId, Registration, TemplateId,
};
use crate::onboarding::OnboardingStatus;
use crate::session::{MarketRole, SessionContext};
use crate::workflow::RoleWorkflow;

/// What the demo observed, in order.
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub role: MarketRole,
    pub statuses: Vec<OnboardingStatus>,
    pub display_name: String,
    pub providers: Vec<ProviderEntry>,
    pub invited_customers: Vec<PartyId>,
}

impl DemoReport {
    fn record(&mut self, status: OnboardingStatus) {
        if self.statuses.last() != Some(&status) {
            println!("  status: {status}");
            self.statuses.push(status);
        }
    }
}

/// Run invite → accept → registered → profile update for `role`.
pub async fn run_demo(role: MarketRole, config: &WorkflowConfig) -> Result<DemoReport> {
    println!("Marketplace portal demo ({role})");
    println!("================================\n");

    let ledger = Arc::new(InMemoryLedger::new());
    let operator = PartyId::from("operator");
    let me = PartyId::new(format!("{role}-demo"));
    seed_marketplace(&ledger, &operator, &me, role);

    let session = SessionContext::new(&operator, &me, role);
    let mut workflow = RoleWorkflow::start(Arc::clone(&ledger), session, config);
    let mut report = DemoReport {
        role,
        statuses: Vec::new(),
        display_name: String::new(),
        providers: Vec::new(),
        invited_customers: Vec::new(),
    };
    report.record(workflow.status());

    while workflow.status() == OnboardingStatus::Loading {
        if workflow.next_update().await.is_none() {
            return Err(streams_ended(role));
        }
    }
    report.record(workflow.status());

    workflow.profile().set_name(format!("Demo {}", role.template_stem()));
    workflow.profile().set_location("Zurich");
    workflow.accept_invitation().await?;
    if !workflow.wait_for_status(OnboardingStatus::Registered).await {
        return Err(streams_ended(role));
    }
    report.record(workflow.status());
    println!("  registered as: {}", workflow.display_name());

    workflow.profile().set_location("Geneva");
    workflow.commit_profile().await?;
    workflow.drain_ready();
    println!(
        "  profile: {} / {}",
        workflow.display_name(),
        workflow
            .state()
            .registrations()
            .next()
            .map(|r| r.location.as_str())
            .unwrap_or("-")
    );

    if role == MarketRole::Broker {
        let options = workflow.customer_options();
        println!("  customer options: {}", options.len());
        if let Some(option) = options.first() {
            workflow.invite_customer(&option.party).await?;
            report.invited_customers.push(option.party.clone());
            workflow.drain_ready();
            println!(
                "  invited {} ({} options left)",
                option.name,
                workflow.customer_options().len()
            );
        }
    }

    for provider in workflow.providers() {
        println!("  provider: {}", provider.label);
    }
    for fault in workflow.state().faults() {
        println!("  degraded stream {}: {}", fault.kind.as_str(), fault.reason);
    }

    report.display_name = workflow.display_name();
    report.providers = workflow.providers().to_vec();
    workflow.shutdown();
    Ok(report)
}

fn streams_ended(role: MarketRole) -> crate::error::Error {
    StreamError::UnexpectedClose {
        template: TemplateId::Registration(role),
        reason: "all streams ended before onboarding completed".to_string(),
    }
    .into()
}

fn seed_marketplace(ledger: &InMemoryLedger, operator: &PartyId, me: &PartyId, role: MarketRole) {
    let register = |party: &str, role: MarketRole, name: &str, location: &str| {
        ledger.create(ContractPayload::Registration(Registration {
            operator: operator.clone(),
            party: party.into(),
            role,
            name: name.to_string(),
            location: location.to_string(),
        }));
    };
    register("custodian-acme", MarketRole::Custodian, "Acme Custody", "Geneva");
    register("exchange-board", MarketRole::Exchange, "Big Board", "New York");
    register("investor-ivy", MarketRole::Investor, "Ivy Capital", "Oslo");
    register("investor-ian", MarketRole::Investor, "Ian Partners", "Dublin");

    if role.requires_invitation() {
        ledger.create(ContractPayload::Invitation(Invitation {
            operator: operator.clone(),
            party: me.clone(),
            role,
        }));
    }

    match role {
        MarketRole::Broker | MarketRole::Investor => {
            ledger.create(ContractPayload::ExchangeParticipant(ExchangeParticipant {
                operator: operator.clone(),
                exchange: "exchange-board".into(),
                participant: me.clone(),
            }));
            ledger.create(ContractPayload::CustodianRelationship(CustodianRelationship {
                operator: operator.clone(),
                custodian: "custodian-acme".into(),
                party: me.clone(),
            }));
        }
        MarketRole::Exchange => {
            ledger.create(ContractPayload::CustodianRelationship(CustodianRelationship {
                operator: operator.clone(),
                custodian: "custodian-acme".into(),
                party: me.clone(),
            }));
        }
        MarketRole::Custodian => {
            ledger.create(ContractPayload::CustodianRelationship(CustodianRelationship {
                operator: operator.clone(),
                custodian: me.clone(),
                party: "investor-ivy".into(),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_completes_for_every_role() {
        for role in MarketRole::ALL {
            let report = run_demo(role, &WorkflowConfig::default())
                .await
                .expect("demo");

            assert_eq!(report.statuses.first(), Some(&OnboardingStatus::Loading));
            assert_eq!(report.statuses.last(), Some(&OnboardingStatus::Registered));
            assert_eq!(report.display_name, format!("Demo {}", role.template_stem()));
        }
    }

    #[tokio::test]
    async fn broker_demo_invites_a_customer_and_lists_providers() {
        let report = run_demo(MarketRole::Broker, &WorkflowConfig::default())
            .await
            .expect("demo");

        assert_eq!(report.invited_customers, vec![PartyId::from("investor-ivy")]);
        let labels: Vec<_> = report.providers.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "Big Board (exchange-board) | Exchange",
                "Acme Custody (custodian-acme) | Custodian",
            ]
        );
    }
}
