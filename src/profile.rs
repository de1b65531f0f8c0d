//! Local profile draft and its synchronization with the registration contract.
//!
//! The draft is seeded from the ledger once, on the first observation of the
//! registration contract. After that only the user changes it: later ledger
//! refreshes never overwrite it, and a failed commit leaves it untouched.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use crate::error::WorkflowError;
use crate::gate::SubmissionGate;
use crate::ledger::{ChoiceArgs, ChoiceId, LedgerCommands, Registration, exercise_with_timeout};
use crate::session::SessionContext;

/// A form value plus the metadata the presentation layer renders it with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditableField {
    pub value: String,
    pub label: String,
    pub placeholder: String,
    pub input_type: String,
}

impl EditableField {
    pub fn new(
        value: impl Into<String>,
        label: impl Into<String>,
        placeholder: impl Into<String>,
        input_type: impl Into<String>,
    ) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
            placeholder: placeholder.into(),
            input_type: input_type.into(),
        }
    }

    pub fn text(label: &str, placeholder: &str) -> Self {
        Self::new("", label, placeholder, "text")
    }
}

/// Which profile field an edit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileField {
    Name,
    Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileDraft {
    pub name: EditableField,
    pub location: EditableField,
}

impl Default for ProfileDraft {
    fn default() -> Self {
        Self {
            name: EditableField::text("Name", "Your legal name"),
            location: EditableField::text("Location", "Your current location"),
        }
    }
}

impl ProfileDraft {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        let mut draft = Self::default();
        draft.name.value = name.into();
        draft.location.value = location.into();
        draft
    }

    fn field_mut(&mut self, field: ProfileField) -> &mut EditableField {
        match field {
            ProfileField::Name => &mut self.name,
            ProfileField::Location => &mut self.location,
        }
    }

    /// Copy the authoritative values, keeping field metadata.
    fn copy_from(&mut self, registration: &Registration) {
        self.name.value = registration.name.clone();
        self.location.value = registration.location.clone();
    }
}

#[derive(Debug, Default)]
struct ProfileState {
    draft: ProfileDraft,
    dirty: bool,
    revision: u64,
    seeded: bool,
    seed_count: u32,
    registration_seen: bool,
}

impl ProfileState {
    fn touch(&mut self) {
        self.dirty = true;
        self.revision += 1;
    }
}

/// Per-session profile draft with a one-time seed and a guarded commit.
#[derive(Debug, Clone)]
pub struct ProfileSync {
    session: SessionContext,
    state: Arc<Mutex<ProfileState>>,
    gate: SubmissionGate,
}

impl ProfileSync {
    pub fn new(session: SessionContext) -> Self {
        Self {
            session,
            state: Arc::new(Mutex::new(ProfileState::default())),
            gate: SubmissionGate::new("commit profile"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProfileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed the current registration contracts.
    ///
    /// Seeds the draft on the first empty to non-empty transition; returns
    /// true when that seed happened on this call. A draft the user already
    /// edited is kept and the seed is marked as spent.
    pub fn observe<'a>(&self, mut registrations: impl Iterator<Item = &'a Registration>) -> bool {
        let first = registrations.next();
        let mut state = self.lock();
        match (state.registration_seen, first) {
            (false, Some(registration)) => {
                state.registration_seen = true;
                if state.seeded {
                    return false;
                }
                state.seeded = true;
                if state.dirty {
                    tracing::debug!(
                        party = %self.session.party(),
                        "Registration observed after local edits; keeping draft"
                    );
                    return false;
                }
                state.draft.copy_from(registration);
                state.seed_count += 1;
                tracing::debug!(party = %self.session.party(), "Seeded profile draft");
                true
            }
            (true, None) => {
                state.registration_seen = false;
                tracing::warn!(
                    party = %self.session.party(),
                    role = %self.session.role(),
                    "Registration contract disappeared after being observed"
                );
                false
            }
            _ => false,
        }
    }

    pub fn set_field(&self, field: ProfileField, value: impl Into<String>) {
        let mut state = self.lock();
        state.draft.field_mut(field).value = value.into();
        state.touch();
    }

    pub fn set_name(&self, value: impl Into<String>) {
        self.set_field(ProfileField::Name, value);
    }

    pub fn set_location(&self, value: impl Into<String>) {
        self.set_field(ProfileField::Location, value);
    }

    /// Discard local edits and reload the draft from `authoritative`, or
    /// from the field defaults if there is no registration yet.
    pub fn reload(&self, authoritative: Option<&Registration>) {
        let mut state = self.lock();
        state.draft = ProfileDraft::default();
        if let Some(registration) = authoritative {
            state.draft.copy_from(registration);
        }
        state.dirty = false;
        state.revision += 1;
    }

    pub fn draft(&self) -> ProfileDraft {
        self.lock().draft.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    pub fn has_seeded(&self) -> bool {
        self.lock().seeded
    }

    pub fn seed_count(&self) -> u32 {
        self.lock().seed_count
    }

    /// Draft together with the revision it was read at.
    pub fn snapshot(&self) -> (ProfileDraft, u64) {
        let state = self.lock();
        (state.draft.clone(), state.revision)
    }

    /// Mark the draft clean if nothing was edited since `revision`.
    pub fn mark_clean_if(&self, revision: u64) -> bool {
        let mut state = self.lock();
        if state.revision == revision {
            state.dirty = false;
            true
        } else {
            false
        }
    }

    /// Whether a commit can be triggered right now.
    pub fn can_commit(&self) -> bool {
        self.gate.is_enabled()
    }

    /// Send the current draft as one keyed `UpdateProfile` exercise.
    ///
    /// On success the draft keeps its content and becomes clean, unless it
    /// was edited while the exercise was in flight. On failure nothing local
    /// changes and the caller may retry.
    pub async fn commit<C: LedgerCommands + ?Sized>(
        &self,
        ledger: &C,
        timeout: Duration,
    ) -> Result<(), WorkflowError> {
        let _permit = self.gate.try_acquire()?;
        let (draft, revision) = self.snapshot();

        let mut args = ChoiceArgs::new();
        args.insert("newName".to_string(), json!(draft.name.value));
        args.insert("newLocation".to_string(), json!(draft.location.value));

        exercise_with_timeout(
            ledger,
            ChoiceId::UpdateProfile(self.session.role()),
            self.session.self_key(),
            args,
            timeout,
        )
        .await?;

        if !self.mark_clean_if(revision) {
            tracing::debug!("Profile edited during commit; draft stays dirty");
        }
        Ok(())
    }
}
