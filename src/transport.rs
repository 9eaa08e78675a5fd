//! Transport seam
//!
//! The secure session (DTLS-secured CoAP with MeshCoP payloads) lives
//! outside this crate; the engine drives it through [`TransportSession`].
//! Requests block the calling thread until a response arrives, the
//! retransmission budget runs out, or the user aborts. Unsolicited messages
//! are handed back as [`TransportEvent`]s on a queue, except for the two
//! queries the transport needs answered synchronously to pick a DTLS
//! credential or finish a joiner handshake; those go through
//! [`JoinerAdmission`].

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::Result;
use crate::events::TransportEvent;
use crate::joiner::{JoinerId, JoinerInfo, JoinerRegistry, JoinerType};
use crate::tlv::Tlv;

/// CoAP URI paths of the management messages this crate issues.
pub mod uri {
    pub const PETITION: &str = "/c/lp";
    pub const KEEP_ALIVE: &str = "/c/la";
    pub const ACTIVE_GET: &str = "/c/ag";
    pub const ACTIVE_SET: &str = "/c/as";
    pub const PENDING_GET: &str = "/c/pg";
    pub const PENDING_SET: &str = "/c/ps";
    pub const COMMISSIONER_GET: &str = "/c/cg";
    pub const COMMISSIONER_SET: &str = "/c/cs";
    pub const BBR_GET: &str = "/c/bg";
    pub const BBR_SET: &str = "/c/bs";
    pub const ANNOUNCE_BEGIN: &str = "/c/ab";
    pub const PANID_QUERY: &str = "/c/pq";
    pub const ENERGY_SCAN: &str = "/c/es";
    pub const REENROLL: &str = "/c/re";
    pub const DOMAIN_RESET: &str = "/c/rt";
    pub const MIGRATE: &str = "/c/mg";
    pub const MLR: &str = "/n/mr";
    pub const TOKEN: &str = "/t/ct";
}

/// Outcome of a petition exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PetitionResponse {
    /// Raw State TLV value (`tlv::state::*`)
    pub state: u8,
    /// Assigned session id; meaningful on accept
    pub session_id: u16,
    /// On reject, the id of the commissioner already holding the session;
    /// empty when there is none
    pub existing_commissioner_id: String,
}

/// The secure session the engine and dispatcher share.
///
/// Implementations run their own I/O worker; the methods here are submitted
/// from the application thread and block until the worker completes them.
pub trait TransportSession: Send {
    /// Open the DTLS session and run the petition exchange.
    fn petition(
        &mut self,
        ba_addr: &str,
        ba_port: u16,
        commissioner_id: &str,
    ) -> Result<PetitionResponse>;

    /// One CoAP request/response exchange. `dst_addr` of `None` targets the
    /// connected Border Agent; a destination routes the request into the
    /// mesh. The transport binds the exchange to the petitioned session.
    fn send_request(
        &mut self,
        uri_path: &str,
        payload: Vec<Tlv>,
        dst_addr: Option<&str>,
    ) -> Result<Vec<Tlv>>;

    /// COM_TOK.req against a CCM Registrar; returns the signed token.
    fn request_token(&mut self, registrar_addr: &str, registrar_port: u16) -> Result<Vec<u8>>;

    /// Install a validated signed token for subsequent sessions.
    fn install_token(&mut self, signed_token: Vec<u8>);

    /// Cancel every in-flight exchange; each pending call fails with
    /// `Cancelled` exactly once. Idempotent.
    fn abort_all(&mut self);

    /// Queue for unsolicited events, drained on the application thread.
    fn set_event_sender(&mut self, sender: Sender<TransportEvent>);

    /// Hooks answered synchronously from the I/O worker.
    fn set_admission(&mut self, admission: Arc<JoinerAdmission>);
}

/// Backend used when no secure-session stack has been linked.
///
/// Session and dataset state machines run normally; anything that would
/// touch the network reports `TransportFailed`.
#[derive(Debug, Default)]
pub struct DisconnectedTransport;

impl DisconnectedTransport {
    fn unavailable<T>() -> Result<T> {
        Err(crate::error::Error::TransportFailed(
            "no secure-session backend is linked".into(),
        ))
    }
}

impl TransportSession for DisconnectedTransport {
    fn petition(
        &mut self,
        _ba_addr: &str,
        _ba_port: u16,
        _commissioner_id: &str,
    ) -> Result<PetitionResponse> {
        Self::unavailable()
    }

    fn send_request(
        &mut self,
        _uri_path: &str,
        _payload: Vec<Tlv>,
        _dst_addr: Option<&str>,
    ) -> Result<Vec<Tlv>> {
        Self::unavailable()
    }

    fn request_token(&mut self, _addr: &str, _port: u16) -> Result<Vec<u8>> {
        Self::unavailable()
    }

    fn install_token(&mut self, _signed_token: Vec<u8>) {}
    fn abort_all(&mut self) {}
    fn set_event_sender(&mut self, _sender: Sender<TransportEvent>) {}
    fn set_admission(&mut self, _admission: Arc<JoinerAdmission>) {}
}

/// Vendor data a joiner presents when it asks to be commissioned.
#[derive(Debug, Clone, Default)]
pub struct CommissioningRequest {
    pub joiner_type: JoinerType,
    pub joiner_id: JoinerId,
    pub vendor_name: String,
    pub vendor_model: String,
    pub vendor_sw_version: String,
    pub vendor_stack_version: Vec<u8>,
    pub provisioning_url: String,
    pub vendor_data: Vec<u8>,
}

/// Decides whether a joiner may be commissioned.
pub type CommissioningHandler = Box<dyn FnMut(&JoinerInfo, &CommissioningRequest) -> bool + Send>;

/// Synchronous admission hooks shared between the engine and the transport.
///
/// `joiner_info` selects the DTLS credential for an incoming joiner;
/// `handle_commissioning` runs the operator's accept/reject policy and, on
/// accept, marks the entry commissioned. Both are called from the I/O
/// worker, so the registry sits behind a lock with poison recovery.
pub struct JoinerAdmission {
    registry: Arc<RwLock<JoinerRegistry>>,
    handler: Mutex<CommissioningHandler>,
}

impl JoinerAdmission {
    /// The default policy of an on-mesh commissioner: accept every joiner.
    pub fn new(registry: Arc<RwLock<JoinerRegistry>>) -> Self {
        Self {
            registry,
            handler: Mutex::new(Box::new(|_, _| true)),
        }
    }

    pub fn set_handler(&self, handler: CommissioningHandler) {
        match self.handler.lock() {
            Ok(mut guard) => *guard = handler,
            Err(poisoned) => *poisoned.into_inner() = handler,
        }
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, JoinerRegistry> {
        match self.registry.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("joiner registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_registry(&self) -> std::sync::RwLockWriteGuard<'_, JoinerRegistry> {
        match self.registry.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("joiner registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// The exact or wildcard entry for a candidate joiner, if any.
    pub fn joiner_info(&self, joiner_type: JoinerType, joiner_id: &JoinerId) -> Option<JoinerInfo> {
        self.read_registry().find(joiner_type, joiner_id).cloned()
    }

    /// Run the commissioning policy for a joiner request.
    ///
    /// A joiner with no registry entry is rejected outright; there is no
    /// credential it could have authenticated with.
    pub fn handle_commissioning(&self, request: &CommissioningRequest) -> bool {
        let Some(info) = self.joiner_info(request.joiner_type, &request.joiner_id) else {
            log::warn!(
                "rejecting unknown joiner (type={}, id={})",
                request.joiner_type,
                hex::encode(request.joiner_id)
            );
            return false;
        };
        let accepted = {
            let mut handler = match self.handler.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            handler(&info, request)
        };
        if accepted {
            self.write_registry()
                .mark_commissioned(request.joiner_type, &request.joiner_id);
            log::info!(
                "joiner (type={}, id={}) commissioned",
                request.joiner_type,
                hex::encode(request.joiner_id)
            );
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joiner::{compute_joiner_id, JoinerCredential};

    fn registry_with(eui64: u64) -> Arc<RwLock<JoinerRegistry>> {
        let mut registry = JoinerRegistry::new();
        registry
            .insert(JoinerInfo {
                joiner_type: JoinerType::MeshCoP,
                eui64,
                credential: JoinerCredential::Pskd("J01NME".into()),
                provisioning_url: String::new(),
                is_commissioned: false,
            })
            .unwrap();
        Arc::new(RwLock::new(registry))
    }

    fn request_for(eui64: u64) -> CommissioningRequest {
        CommissioningRequest {
            joiner_type: JoinerType::MeshCoP,
            joiner_id: compute_joiner_id(eui64),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_policy_accepts_and_marks() {
        let registry = registry_with(0x77);
        let admission = JoinerAdmission::new(registry.clone());

        assert!(admission.handle_commissioning(&request_for(0x77)));
        assert!(registry
            .read()
            .unwrap()
            .is_commissioned(JoinerType::MeshCoP, 0x77));
    }

    #[test]
    fn test_unknown_joiner_rejected() {
        let admission = JoinerAdmission::new(registry_with(0x77));
        assert!(!admission.handle_commissioning(&request_for(0x99)));
    }

    #[test]
    fn test_user_handler_can_reject() {
        let registry = registry_with(0x77);
        let admission = JoinerAdmission::new(registry.clone());
        admission.set_handler(Box::new(|_, _| false));

        assert!(!admission.handle_commissioning(&request_for(0x77)));
        assert!(!registry
            .read()
            .unwrap()
            .is_commissioned(JoinerType::MeshCoP, 0x77));
    }
}
