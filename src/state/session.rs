use thiserror::Error;

use crate::dto::session::GameState;

/// Lifecycle of a session coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Coordinator spawned, nothing loaded yet.
    Uninitialized,
    /// Loading durable state; admissions are held until this completes.
    Bootstrapping,
    /// Ready, no participant has claimed the session yet.
    NoHost,
    /// Ready, host is known and permanent.
    HostAssigned,
}

/// Rejected phase changes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhaseError {
    /// Bootstrap was already started.
    #[error("cannot start bootstrap from {0:?}")]
    NotUninitialized(SessionPhase),
    /// The operation only applies while bootstrapping.
    #[error("cannot finish bootstrap from {0:?}")]
    NotBootstrapping(SessionPhase),
    /// A host was elected earlier.
    #[error("host already assigned to `{0}`")]
    HostAlreadyAssigned(String),
}

/// Identity fields and game-state of one session.
///
/// `host` is sticky: once set it never changes, and `campaign_id` can only be set
/// after it.
#[derive(Debug, Clone)]
pub struct SessionState {
    phase: SessionPhase,
    host: Option<String>,
    campaign_id: Option<String>,
    /// Shared game-state of the session.
    pub game_state: GameState,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Fresh state awaiting bootstrap.
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Uninitialized,
            host: None,
            campaign_id: None,
            game_state: GameState::default(),
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Elected host, if any.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Campaign derived from the host, if resolved.
    pub fn campaign_id(&self) -> Option<&str> {
        self.campaign_id.as_deref()
    }

    /// True iff `identity_id` is the session host.
    pub fn is_host(&self, identity_id: &str) -> bool {
        self.host.as_deref() == Some(identity_id)
    }

    /// Enter the bootstrap critical section.
    pub fn begin_bootstrap(&mut self) -> Result<(), PhaseError> {
        match self.phase {
            SessionPhase::Uninitialized => {
                self.phase = SessionPhase::Bootstrapping;
                Ok(())
            }
            other => Err(PhaseError::NotUninitialized(other)),
        }
    }

    /// Leave the bootstrap critical section; the resulting phase follows the host.
    pub fn finish_bootstrap(&mut self) -> Result<SessionPhase, PhaseError> {
        if self.phase != SessionPhase::Bootstrapping {
            return Err(PhaseError::NotBootstrapping(self.phase));
        }
        self.phase = if self.host.is_some() {
            SessionPhase::HostAssigned
        } else {
            SessionPhase::NoHost
        };
        Ok(self.phase)
    }

    /// Restore a host read from durable storage during bootstrap.
    pub fn restore_host(&mut self, host: String) -> Result<(), PhaseError> {
        if self.phase != SessionPhase::Bootstrapping {
            return Err(PhaseError::NotBootstrapping(self.phase));
        }
        self.host = Some(host);
        Ok(())
    }

    /// Elect `identity_id` as host. Only the first call succeeds.
    pub fn assign_host(&mut self, identity_id: &str) -> Result<(), PhaseError> {
        if let Some(existing) = &self.host {
            return Err(PhaseError::HostAlreadyAssigned(existing.clone()));
        }
        self.host = Some(identity_id.to_owned());
        if self.phase == SessionPhase::NoHost {
            self.phase = SessionPhase::HostAssigned;
        }
        Ok(())
    }

    /// Take over a host found in durable storage after an election made without it.
    ///
    /// The stored host was elected first, so it replaces the in-memory one and the
    /// campaign is derived again. Returns true when the host changed.
    pub fn adopt_stored_host(&mut self, host: String) -> bool {
        if self.host.as_deref() == Some(host.as_str()) {
            return false;
        }
        self.host = Some(host);
        self.campaign_id = None;
        if self.phase == SessionPhase::NoHost {
            self.phase = SessionPhase::HostAssigned;
        }
        true
    }

    /// Record the campaign; ignored while no host is known.
    pub fn set_campaign(&mut self, campaign_id: String) -> bool {
        if self.host.is_none() {
            return false;
        }
        self.campaign_id = Some(campaign_id);
        true
    }
}
