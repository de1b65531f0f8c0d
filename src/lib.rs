//! Marketplace portal core.
//!
//! Reconciles a role's independently updating ledger contract streams into
//! one aggregated state, derives the onboarding status from it, and issues
//! the keyed ledger mutations (profile update, invitation acceptance,
//! customer invitation) the presentation layer exposes as actions.

pub mod aggregate;
pub mod bootstrap;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod customers;
pub mod error;
pub mod gate;
pub mod invitation;
pub mod ledger;
pub mod onboarding;
pub mod profile;
pub mod registry;
pub mod session;
pub mod settings;
pub mod workflow;

pub use config::Config;
pub use error::{Error, Result};
pub use workflow::{RoleWorkflow, WorkflowActions};
