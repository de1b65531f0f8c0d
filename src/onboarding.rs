//! Onboarding status derived from the registration and invitation streams.

use std::fmt;

use serde::Serialize;

use crate::aggregate::{AggregatedRoleState, StreamKind};
use crate::session::MarketRole;

/// Where a party stands in role onboarding. Computed, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStatus {
    Loading,
    NeedsInvite,
    InviteReady,
    Registered,
}

impl OnboardingStatus {
    /// Evaluate the status from the current snapshot.
    ///
    /// A present registration wins over everything else, so a registered
    /// party is never held on the loading screen by a slow invitation feed.
    pub fn evaluate(state: &AggregatedRoleState) -> Self {
        match state.snapshot(StreamKind::Registration) {
            None => return Self::Loading,
            Some(snapshot) if snapshot.loading => return Self::Loading,
            Some(_) => {}
        }
        if state.registrations().next().is_some() {
            return Self::Registered;
        }
        if state.is_stream_loading(StreamKind::Invitations) {
            return Self::Loading;
        }
        if state.invitations().next().is_some() {
            Self::InviteReady
        } else {
            Self::NeedsInvite
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::NeedsInvite => "needs_invite",
            Self::InviteReady => "invite_ready",
            Self::Registered => "registered",
        }
    }

    /// Whether the accept action may be issued for `role` in this status.
    ///
    /// Roles that do not need an invitation may request registration
    /// directly from `NeedsInvite`.
    pub fn accepts_invitation(self, role: MarketRole) -> bool {
        match self {
            Self::InviteReady => true,
            Self::NeedsInvite => !role.requires_invitation(),
            Self::Loading | Self::Registered => false,
        }
    }

    /// Screen to present for this status.
    pub fn screen(self, role: MarketRole) -> Screen {
        match self {
            Self::Loading => Screen::Loading,
            Self::NeedsInvite => Screen::InvitePending {
                manual_entry: !role.requires_invitation(),
            },
            Self::InviteReady => Screen::AcceptInvite,
            Self::Registered => Screen::Workspace,
        }
    }
}

impl fmt::Display for OnboardingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow screen gated by onboarding status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum Screen {
    Loading,
    /// Waiting for an operator invitation. `manual_entry` is set when the
    /// role may submit its profile without one.
    InvitePending { manual_entry: bool },
    AcceptInvite,
    Workspace,
}
