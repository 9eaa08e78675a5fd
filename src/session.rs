//! Commissioner session lifecycle
//!
//! The controller tracks the petition state machine of a single session:
//! `Disabled -> Petitioning -> Active -> Resigning -> Disabled`, with every
//! failure folding back to `Disabled`. While `Active`, a keepalive is due
//! every `keepalive_interval`; keepalives never overlap, and a rejected or
//! failed keepalive ends the session.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Default seconds between keepalives
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(40);

/// Longest commissioner id the petition accepts, in bytes
pub const MAX_COMMISSIONER_ID_LENGTH: usize = 64;

/// Lifecycle states of a commissioner session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disabled,
    Petitioning,
    Active,
    Resigning,
}

/// Petition/keepalive/resign state machine plus the session identity.
#[derive(Debug)]
pub struct SessionController {
    state: SessionState,
    commissioner_id: String,
    session_id: u16,
    border_agent_addr: String,
    border_agent_port: u16,
    keepalive_interval: Duration,
    next_keepalive: Option<Instant>,
    keepalive_in_flight: bool,
}

impl SessionController {
    pub fn new(commissioner_id: String, keepalive_interval: Duration) -> Result<Self> {
        if commissioner_id.len() > MAX_COMMISSIONER_ID_LENGTH {
            return Err(Error::InvalidArgs(format!(
                "commissioner id exceeds {} bytes",
                MAX_COMMISSIONER_ID_LENGTH
            )));
        }
        Ok(Self {
            state: SessionState::Disabled,
            commissioner_id,
            session_id: 0,
            border_agent_addr: String::new(),
            border_agent_port: 0,
            keepalive_interval,
            next_keepalive: None,
            keepalive_in_flight: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn commissioner_id(&self) -> &str {
        &self.commissioner_id
    }

    /// The assigned session id; only defined while `Active`.
    pub fn session_id(&self) -> Result<u16> {
        if self.is_active() {
            Ok(self.session_id)
        } else {
            Err(Error::InvalidState("the commissioner is not active".into()))
        }
    }

    pub fn border_agent(&self) -> (&str, u16) {
        (&self.border_agent_addr, self.border_agent_port)
    }

    /// Enter `Petitioning`. At most one petition may be pending.
    pub fn begin_petition(&mut self, ba_addr: &str, ba_port: u16) -> Result<()> {
        if self.state != SessionState::Disabled {
            return Err(Error::InvalidState(format!(
                "cannot petition from {:?}",
                self.state
            )));
        }
        self.state = SessionState::Petitioning;
        self.border_agent_addr = ba_addr.to_string();
        self.border_agent_port = ba_port;
        log::info!("petitioning Border Agent {}:{}", ba_addr, ba_port);
        Ok(())
    }

    /// The Border Agent accepted the petition.
    pub fn petition_accepted(&mut self, session_id: u16, now: Instant) {
        self.state = SessionState::Active;
        self.session_id = session_id;
        self.keepalive_in_flight = false;
        self.next_keepalive = Some(now + self.keepalive_interval);
        log::info!("petition accepted, session id {}", session_id);
    }

    /// Petition rejected, timed out, or failed below CoAP; fold back.
    pub fn petition_failed(&mut self) {
        log::warn!("petition failed, session disabled");
        self.disable();
    }

    /// Clamp the keepalive interval to a timeout negotiated by the network.
    pub fn set_keepalive_timeout(&mut self, timeout: Duration) {
        if self.keepalive_interval > timeout {
            log::debug!(
                "keepalive interval clamped from {:?} to {:?}",
                self.keepalive_interval,
                timeout
            );
            self.keepalive_interval = timeout;
        }
    }

    /// Whether a keepalive should be sent now.
    pub fn keepalive_due(&self, now: Instant) -> bool {
        self.is_active()
            && !self.keepalive_in_flight
            && self.next_keepalive.is_some_and(|at| now >= at)
    }

    /// Record that a keepalive left; no other keepalive may start until the
    /// outcome is reported.
    pub fn begin_keepalive(&mut self) {
        debug_assert!(!self.keepalive_in_flight);
        self.keepalive_in_flight = true;
    }

    pub fn keepalive_succeeded(&mut self, now: Instant) {
        self.keepalive_in_flight = false;
        self.next_keepalive = Some(now + self.keepalive_interval);
    }

    /// The network rejected the keepalive or the transport gave up.
    pub fn keepalive_failed(&mut self) {
        log::warn!("keepalive failed, session lost");
        self.disable();
    }

    /// Enter `Resigning`; the caller sends the final keepalive.
    pub fn begin_resign(&mut self) -> Result<()> {
        if self.state != SessionState::Active {
            return Err(Error::InvalidState("the commissioner is not active".into()));
        }
        self.state = SessionState::Resigning;
        Ok(())
    }

    /// Resignation concluded, successfully or not.
    pub fn resigned(&mut self) {
        log::info!("session resigned");
        self.disable();
    }

    fn disable(&mut self) {
        self.state = SessionState::Disabled;
        self.session_id = 0;
        self.next_keepalive = None;
        self.keepalive_in_flight = false;
    }
}
