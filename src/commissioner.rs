//! Commissioner engine
//!
//! The stateful controller behind the public surface: it owns the four
//! cached datasets, the joiner registry and the session controller, and
//! turns every operation into MGMT_* exchanges through the transport. All
//! mutations are transactional against the network: local caches advance
//! only after the leader accepted the corresponding SET.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv6Addr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::border_agent::{find_border_agent, BorderAgent, BorderAgentDiscovery};
use crate::crypto::Crypto;
use crate::dataset::{
    ActiveOperationalDataset, BbrDataset, Channel, ChannelMask, ChannelMaskEntry,
    CommissionerDataset, PendingOperationalDataset, SecurityPolicy, Timestamp,
};
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, TransportEvent};
use crate::joiner::{
    add_joiner_to_steering, compute_joiner_id, JoinerCredential, JoinerInfo, JoinerRegistry,
    JoinerType,
};
use crate::session::{SessionController, SessionState};
use crate::tlv::{self, meshcop, network, state, Tlv};
use crate::transport::{uri, CommissioningHandler, JoinerAdmission, TransportSession};

/// Anycast locator of the Primary Backbone Router
pub const PRIMARY_BBR_ALOC16: u16 = 0xFC38;

/// Commissioner id presented when the operator configured none
pub const DEFAULT_COMMISSIONER_ID: &str = "meshcop-commissioner";

/// MLR.rsp status meaning the registration was applied
pub const MLR_STATUS_SUCCESS: u8 = 0;

/// Energy scan result for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnergyReport {
    pub channel_mask: ChannelMask,
    pub energy_list: Vec<u8>,
}

/// ML-EID of an anycast locator inside the given mesh-local prefix.
pub fn mesh_local_addr(mesh_local_prefix: &[u8; 8], aloc16: u16) -> String {
    let mut octets = [0u8; 16];
    octets[..8].copy_from_slice(mesh_local_prefix);
    octets[8..14].copy_from_slice(&[0x00, 0x00, 0x00, 0xFF, 0xFE, 0x00]);
    octets[14..].copy_from_slice(&aloc16.to_be_bytes());
    Ipv6Addr::from(octets).to_string()
}

/// The commissioner application engine.
pub struct Commissioner {
    session: SessionController,
    transport: Box<dyn TransportSession>,
    crypto: Box<dyn Crypto>,

    active_dataset: ActiveOperationalDataset,
    pending_dataset: PendingOperationalDataset,
    commissioner_dataset: CommissionerDataset,
    bbr_dataset: BbrDataset,

    registry: Arc<RwLock<JoinerRegistry>>,
    admission: Arc<JoinerAdmission>,
    events: EventDispatcher,

    pan_id_conflicts: HashMap<u16, ChannelMask>,
    energy_reports: BTreeMap<String, EnergyReport>,
    border_agents: Vec<BorderAgent>,

    is_ccm_mode: bool,
    domain_name: String,
    signed_token: Vec<u8>,

    on_session_lost: Option<Box<dyn FnMut(&Error) + Send>>,
}

impl Commissioner {
    pub fn new(
        commissioner_id: &str,
        is_ccm_mode: bool,
        domain_name: &str,
        keepalive_interval: Duration,
        mut transport: Box<dyn TransportSession>,
        crypto: Box<dyn Crypto>,
    ) -> Result<Self> {
        let commissioner_id = if commissioner_id.is_empty() {
            DEFAULT_COMMISSIONER_ID
        } else {
            commissioner_id
        };
        let session = SessionController::new(commissioner_id.to_string(), keepalive_interval)?;
        let registry = Arc::new(RwLock::new(JoinerRegistry::new()));
        let admission = Arc::new(JoinerAdmission::new(registry.clone()));
        let (event_tx, events) = EventDispatcher::channel();
        transport.set_event_sender(event_tx);
        transport.set_admission(admission.clone());

        Ok(Self {
            session,
            transport,
            crypto,
            active_dataset: ActiveOperationalDataset::default(),
            pending_dataset: PendingOperationalDataset::default(),
            commissioner_dataset: CommissionerDataset::default(),
            bbr_dataset: BbrDataset::default(),
            registry,
            admission,
            events,
            pan_id_conflicts: HashMap::new(),
            energy_reports: BTreeMap::new(),
            border_agents: Vec::new(),
            is_ccm_mode,
            domain_name: domain_name.to_string(),
            signed_token: Vec::new(),
            on_session_lost: None,
        })
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    pub fn is_active(&self) -> bool {
        self.session.is_active()
    }

    pub fn is_ccm_mode(&self) -> bool {
        self.is_ccm_mode
    }

    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Petition, then pull the network's datasets into the cache.
    ///
    /// On rejection the rival commissioner's id lands in
    /// `existing_commissioner_id`, not in the error.
    pub fn start(
        &mut self,
        existing_commissioner_id: &mut String,
        ba_addr: &str,
        ba_port: u16,
    ) -> Result<()> {
        let result = self
            .petition(existing_commissioner_id, ba_addr, ba_port)
            .and_then(|()| self.pull_network_data());
        if result.is_err() && !self.is_active() {
            self.stop();
        }
        result
    }

    /// Resign if active; always drop in-flight requests.
    pub fn stop(&mut self) {
        if self.is_active() {
            if let Err(err) = self.resign() {
                log::warn!("resign failed: {}", err);
            }
        } else {
            self.abort_requests();
        }
    }

    fn petition(
        &mut self,
        existing_commissioner_id: &mut String,
        ba_addr: &str,
        ba_port: u16,
    ) -> Result<()> {
        self.session.begin_petition(ba_addr, ba_port)?;
        let commissioner_id = self.session.commissioner_id().to_string();
        match self.transport.petition(ba_addr, ba_port, &commissioner_id) {
            Ok(response) if response.state == state::ACCEPT => {
                existing_commissioner_id.clear();
                existing_commissioner_id.push_str(&response.existing_commissioner_id);
                self.session
                    .petition_accepted(response.session_id, Instant::now());
                Ok(())
            }
            Ok(response) => {
                existing_commissioner_id.clear();
                existing_commissioner_id.push_str(&response.existing_commissioner_id);
                self.session.petition_failed();
                Err(Error::Rejected {
                    status: response.state,
                })
            }
            Err(err) => {
                self.session.petition_failed();
                Err(err)
            }
        }
    }

    /// Send the final keepalive and fold the session back to `Disabled`.
    pub fn resign(&mut self) -> Result<()> {
        self.session.begin_resign()?;
        let result = self.transport.send_request(
            uri::KEEP_ALIVE,
            vec![Tlv::u8_value(meshcop::STATE, state::REJECT)],
            None,
        );
        // Disabled regardless of what the network answered.
        self.session.resigned();
        result.map(|_| ())
    }

    /// Cancel all in-flight exchanges; the session state is untouched.
    pub fn abort_requests(&mut self) {
        self.transport.abort_all();
    }

    /// Drive keepalives and drain pending events. Call periodically from
    /// the application thread.
    pub fn tick(&mut self) {
        self.process_events();
        if self.session.keepalive_due(Instant::now()) {
            self.send_keepalive();
        }
    }

    fn send_keepalive(&mut self) {
        self.session.begin_keepalive();
        let result = self
            .transport
            .send_request(
                uri::KEEP_ALIVE,
                vec![Tlv::u8_value(meshcop::STATE, state::ACCEPT)],
                None,
            )
            .and_then(|response| require_accept(&response));
        match result {
            Ok(()) => self.session.keepalive_succeeded(Instant::now()),
            Err(err) => {
                self.session.keepalive_failed();
                if let Some(handler) = self.on_session_lost.as_mut() {
                    handler(&err);
                }
            }
        }
    }

    /// Clamp the keepalive interval to a timeout the network negotiated.
    pub fn set_keepalive_timeout(&mut self, timeout: Duration) {
        self.session.set_keepalive_timeout(timeout);
    }

    /// Notification for a session ended by a failed or rejected keepalive.
    pub fn set_session_lost_handler(&mut self, handler: Box<dyn FnMut(&Error) + Send>) {
        self.on_session_lost = Some(handler);
    }

    /// Replace the accept-everything commissioning policy.
    pub fn set_commissioning_handler(&mut self, handler: CommissioningHandler) {
        self.admission.set_handler(handler);
    }

    /// The admission hooks the transport consults; exposed for transports
    /// constructed after the engine.
    pub fn admission(&self) -> Arc<JoinerAdmission> {
        self.admission.clone()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::InvalidState("the commissioner is not active".into()))
        }
    }

    fn ensure_ccm(&self) -> Result<()> {
        if self.is_ccm_mode {
            Ok(())
        } else {
            Err(Error::InvalidState(
                "the commissioner is not in CCM mode".into(),
            ))
        }
    }

    // ========================================================================
    // Border Agent discovery
    // ========================================================================

    pub fn discover(&mut self, discovery: &mut dyn BorderAgentDiscovery) -> Result<&[BorderAgent]> {
        self.border_agents = discovery.discover()?;
        Ok(&self.border_agents)
    }

    pub fn border_agents(&self) -> &[BorderAgent] {
        &self.border_agents
    }

    pub fn border_agent(&self, network_name: &str) -> Option<&BorderAgent> {
        find_border_agent(&self.border_agents, network_name)
    }

    // ========================================================================
    // Dataset transfer
    // ========================================================================

    /// Fetch commissioner, BBR (CCM only), active and pending datasets with
    /// all-bits flags and install them in the cache.
    pub fn pull_network_data(&mut self) -> Result<()> {
        let comm = self.get_commissioner_dataset(0xFFFF)?;
        let bbr = if self.is_ccm_mode {
            Some(self.fetch_bbr_dataset(0xFFFF)?)
        } else {
            None
        };
        let active = self.fetch_active_dataset(0xFFFF)?;
        let pending = self.fetch_pending_dataset(0xFFFF)?;

        self.commissioner_dataset.merge(&comm);
        if let Some(bbr) = bbr {
            self.bbr_dataset = bbr;
        }
        self.active_dataset = active;
        self.pending_dataset = pending;
        Ok(())
    }

    fn fetch_active_dataset(&mut self, flags: u16) -> Result<ActiveOperationalDataset> {
        let payload = get_payload(ActiveOperationalDataset::get_tlv_types(flags));
        let response = self.transport.send_request(uri::ACTIVE_GET, payload, None)?;
        ActiveOperationalDataset::from_tlvs(&response)
    }

    fn fetch_pending_dataset(&mut self, flags: u16) -> Result<PendingOperationalDataset> {
        let payload = get_payload(PendingOperationalDataset::get_tlv_types(flags));
        let response = self.transport.send_request(uri::PENDING_GET, payload, None)?;
        PendingOperationalDataset::from_tlvs(&response)
    }

    fn fetch_bbr_dataset(&mut self, flags: u16) -> Result<BbrDataset> {
        let payload = get_payload(BbrDataset::get_tlv_types(flags));
        let response = self.transport.send_request(uri::BBR_GET, payload, None)?;
        BbrDataset::from_tlvs(&response)
    }

    /// MGMT_ACTIVE_GET naming the TLVs of `flags`; merges into the cache.
    pub fn get_active_dataset(&mut self, flags: u16) -> Result<ActiveOperationalDataset> {
        self.ensure_active()?;
        let dataset = self.fetch_active_dataset(flags)?;
        self.active_dataset.merge(&dataset);
        Ok(dataset)
    }

    pub fn set_active_dataset(&mut self, dataset: &ActiveOperationalDataset) -> Result<()> {
        self.ensure_active()?;
        if dataset.is_present(ActiveOperationalDataset::NETWORK_NAME_BIT)
            && dataset.network_name.len() > 16
        {
            return Err(Error::InvalidArgs("network name exceeds 16 bytes".into()));
        }
        let response = self
            .transport
            .send_request(uri::ACTIVE_SET, dataset.to_tlvs(), None)?;
        require_accept(&response)?;
        self.active_dataset.merge(dataset);
        Ok(())
    }

    pub fn get_pending_dataset(&mut self, flags: u16) -> Result<PendingOperationalDataset> {
        self.ensure_active()?;
        let dataset = self.fetch_pending_dataset(flags)?;
        self.pending_dataset.merge(&dataset);
        Ok(dataset)
    }

    /// Every pending write must carry the delay timer.
    pub fn set_pending_dataset(&mut self, dataset: &PendingOperationalDataset) -> Result<()> {
        self.ensure_active()?;
        if !dataset.is_present(PendingOperationalDataset::DELAY_TIMER_BIT) {
            return Err(Error::InvalidArgs(
                "pending dataset writes require a delay timer".into(),
            ));
        }
        let response = self
            .transport
            .send_request(uri::PENDING_SET, dataset.to_tlvs(), None)?;
        require_accept(&response)?;
        self.pending_dataset.merge(dataset);
        Ok(())
    }

    /// MGMT_COMMISSIONER_GET. The result is not merged: this commissioner is
    /// itself the source of the commissioner dataset.
    pub fn get_commissioner_dataset(&mut self, flags: u16) -> Result<CommissionerDataset> {
        self.ensure_active()?;
        let payload = get_payload(CommissionerDataset::get_tlv_types(flags));
        let response = self
            .transport
            .send_request(uri::COMMISSIONER_GET, payload, None)?;
        CommissionerDataset::from_tlvs(&response)
    }

    pub fn set_commissioner_dataset(&mut self, dataset: &CommissionerDataset) -> Result<()> {
        self.ensure_active()?;
        self.send_commissioner_set(dataset.clone())
    }

    fn send_commissioner_set(&mut self, mut dataset: CommissionerDataset) -> Result<()> {
        dataset.sanitize_for_set();
        let response = self
            .transport
            .send_request(uri::COMMISSIONER_SET, dataset.to_tlvs(), None)?;
        require_accept(&response)?;
        self.commissioner_dataset.merge(&dataset);
        Ok(())
    }

    pub fn get_bbr_dataset(&mut self, flags: u16) -> Result<BbrDataset> {
        self.ensure_active()?;
        self.ensure_ccm()?;
        let dataset = self.fetch_bbr_dataset(flags)?;
        self.bbr_dataset.merge(&dataset);
        Ok(dataset)
    }

    pub fn set_bbr_dataset(&mut self, dataset: &BbrDataset) -> Result<()> {
        self.ensure_active()?;
        self.ensure_ccm()?;
        let response = self
            .transport
            .send_request(uri::BBR_SET, dataset.to_tlvs(), None)?;
        require_accept(&response)?;
        self.bbr_dataset.merge(dataset);
        Ok(())
    }

    /// Snapshot of the cached datasets.
    pub fn cached_active_dataset(&self) -> &ActiveOperationalDataset {
        &self.active_dataset
    }

    pub fn cached_pending_dataset(&self) -> &PendingOperationalDataset {
        &self.pending_dataset
    }

    pub fn cached_commissioner_dataset(&self) -> &CommissionerDataset {
        &self.commissioner_dataset
    }

    pub fn cached_bbr_dataset(&self) -> &BbrDataset {
        &self.bbr_dataset
    }

    // ========================================================================
    // Commissioner dataset fields
    // ========================================================================

    pub fn get_session_id(&self) -> Result<u16> {
        self.session.session_id()
    }

    pub fn get_border_agent_locator(&self) -> Result<u16> {
        self.ensure_active()?;
        if !self
            .commissioner_dataset
            .is_present(CommissionerDataset::BORDER_AGENT_LOCATOR_BIT)
        {
            return Err(Error::NotFound(
                "cannot find Border Agent Locator in Commissioner Dataset".into(),
            ));
        }
        Ok(self.commissioner_dataset.border_agent_locator)
    }

    pub fn get_steering_data(&self, joiner_type: JoinerType) -> Result<Vec<u8>> {
        self.ensure_active()?;
        let (bit, value, what) = match joiner_type {
            JoinerType::MeshCoP => (
                CommissionerDataset::STEERING_DATA_BIT,
                &self.commissioner_dataset.steering_data,
                "Steering Data",
            ),
            JoinerType::Ae => (
                CommissionerDataset::AE_STEERING_DATA_BIT,
                &self.commissioner_dataset.ae_steering_data,
                "AE Steering Data",
            ),
            JoinerType::Nmkp => (
                CommissionerDataset::NMKP_STEERING_DATA_BIT,
                &self.commissioner_dataset.nmkp_steering_data,
                "NMKP Steering Data",
            ),
        };
        if !self.commissioner_dataset.is_present(bit) {
            return Err(Error::NotFound(format!(
                "cannot find {} in Commissioner Dataset",
                what
            )));
        }
        Ok(value.clone())
    }

    pub fn get_joiner_udp_port(&self, joiner_type: JoinerType) -> Result<u16> {
        self.ensure_active()?;
        let (bit, value, what) = match joiner_type {
            JoinerType::MeshCoP => (
                CommissionerDataset::JOINER_UDP_PORT_BIT,
                self.commissioner_dataset.joiner_udp_port,
                "Joiner UDP Port",
            ),
            JoinerType::Ae => (
                CommissionerDataset::AE_UDP_PORT_BIT,
                self.commissioner_dataset.ae_udp_port,
                "AE UDP Port",
            ),
            JoinerType::Nmkp => (
                CommissionerDataset::NMKP_UDP_PORT_BIT,
                self.commissioner_dataset.nmkp_udp_port,
                "NMKP UDP Port",
            ),
        };
        if !self.commissioner_dataset.is_present(bit) {
            return Err(Error::NotFound(format!(
                "cannot find {} in Commissioner Dataset",
                what
            )));
        }
        Ok(value)
    }

    pub fn set_joiner_udp_port(&mut self, joiner_type: JoinerType, udp_port: u16) -> Result<()> {
        self.ensure_active()?;
        let mut dataset = self.commissioner_dataset.clone();
        *joiner_udp_port_field(&mut dataset, joiner_type) = udp_port;
        self.send_commissioner_set(dataset)
    }

    // ========================================================================
    // Joiner admission
    // ========================================================================

    /// Admit one joiner: cover its id in the type's steering data, push the
    /// new commissioner dataset, then register the credential.
    pub fn enable_joiner(
        &mut self,
        joiner_type: JoinerType,
        eui64: u64,
        credential: JoinerCredential,
        provisioning_url: &str,
    ) -> Result<()> {
        self.ensure_active()?;
        if self.read_registry().contains(joiner_type, eui64) {
            return Err(Error::AlreadyExists(format!(
                "joiner (type={}, eui64={:#018X}) has already been enabled",
                joiner_type, eui64
            )));
        }

        let joiner_id = compute_joiner_id(eui64);
        let mut dataset = self.commissioner_dataset.clone();
        add_joiner_to_steering(steering_field(&mut dataset, joiner_type), &joiner_id);
        self.send_commissioner_set(dataset)?;

        self.write_registry().insert(JoinerInfo {
            joiner_type,
            eui64,
            credential,
            provisioning_url: provisioning_url.to_string(),
            is_commissioned: false,
        })
    }

    /// Drop one joiner and rebuild the type's steering data from the
    /// survivors; the Bloom filter cannot forget a member in place.
    pub fn disable_joiner(&mut self, joiner_type: JoinerType, eui64: u64) -> Result<()> {
        self.ensure_active()?;
        let mut remaining = self.read_registry().clone();
        if remaining.remove(joiner_type, eui64).is_none() {
            return Err(Error::NotFound(format!(
                "joiner (type={}, eui64={:#018X}) is not enabled",
                joiner_type, eui64
            )));
        }

        let mut dataset = self.commissioner_dataset.clone();
        *steering_field(&mut dataset, joiner_type) = remaining.rebuild_steering(joiner_type);
        self.send_commissioner_set(dataset)?;

        self.write_registry().remove(joiner_type, eui64);
        Ok(())
    }

    /// Admit every joiner of the type through an all-ones filter, keyed to a
    /// single wildcard credential.
    pub fn enable_all_joiners(
        &mut self,
        joiner_type: JoinerType,
        credential: JoinerCredential,
        provisioning_url: &str,
    ) -> Result<()> {
        self.ensure_active()?;
        let mut dataset = self.commissioner_dataset.clone();
        *steering_field(&mut dataset, joiner_type) = vec![0xFF];
        self.send_commissioner_set(dataset)?;

        let mut registry = self.write_registry();
        registry.remove_all(joiner_type);
        registry.insert(JoinerInfo {
            joiner_type,
            eui64: 0,
            credential,
            provisioning_url: provisioning_url.to_string(),
            is_commissioned: false,
        })
    }

    pub fn disable_all_joiners(&mut self, joiner_type: JoinerType) -> Result<()> {
        self.ensure_active()?;
        let mut dataset = self.commissioner_dataset.clone();
        *steering_field(&mut dataset, joiner_type) = vec![0x00];
        self.send_commissioner_set(dataset)?;

        self.write_registry().remove_all(joiner_type);
        Ok(())
    }

    /// Whether the joiner completed commissioning. Meaningful for MeshCoP
    /// joiners only; CCM joiners enroll without the commissioner.
    pub fn is_joiner_commissioned(&self, joiner_type: JoinerType, eui64: u64) -> bool {
        self.read_registry().is_commissioned(joiner_type, eui64)
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

    // ========================================================================
    // Active / pending operational fields
    // ========================================================================

    pub fn get_active_timestamp(&self) -> Result<Timestamp> {
        self.cached_active_field(
            ActiveOperationalDataset::ACTIVE_TIMESTAMP_BIT,
            "Active Timestamp",
        )?;
        Ok(self.active_dataset.active_timestamp)
    }

    /// The channel can move under us through a pending dataset, so this
    /// always refreshes the Active Operational Dataset first.
    pub fn get_channel(&mut self) -> Result<Channel> {
        self.refresh_active()?;
        self.cached_active_field(ActiveOperationalDataset::CHANNEL_BIT, "Channel")?;
        Ok(self.active_dataset.channel)
    }

    pub fn set_channel(&mut self, channel: Channel, delay: Duration) -> Result<()> {
        let mut pending = PendingOperationalDataset::default();
        pending.active.channel = channel;
        pending.active.present_flags |= ActiveOperationalDataset::CHANNEL_BIT;
        self.set_pending_with_delay(pending, delay)
    }

    pub fn get_channel_mask(&self) -> Result<ChannelMask> {
        self.cached_active_field(ActiveOperationalDataset::CHANNEL_MASK_BIT, "Channel Mask")?;
        Ok(self.active_dataset.channel_mask.clone())
    }

    pub fn set_channel_mask(&mut self, channel_mask: ChannelMask) -> Result<()> {
        let mut dataset = ActiveOperationalDataset::default();
        dataset.channel_mask = channel_mask;
        dataset.present_flags |= ActiveOperationalDataset::CHANNEL_MASK_BIT;
        self.set_active_dataset(&dataset)
    }

    pub fn get_extended_pan_id(&self) -> Result<[u8; 8]> {
        self.cached_active_field(
            ActiveOperationalDataset::EXTENDED_PAN_ID_BIT,
            "Extended PAN ID",
        )?;
        Ok(self.active_dataset.extended_pan_id)
    }

    pub fn set_extended_pan_id(&mut self, extended_pan_id: [u8; 8]) -> Result<()> {
        let mut dataset = ActiveOperationalDataset::default();
        dataset.extended_pan_id = extended_pan_id;
        dataset.present_flags |= ActiveOperationalDataset::EXTENDED_PAN_ID_BIT;
        self.set_active_dataset(&dataset)
    }

    pub fn get_mesh_local_prefix(&mut self) -> Result<[u8; 8]> {
        self.refresh_active()?;
        self.cached_active_field(
            ActiveOperationalDataset::MESH_LOCAL_PREFIX_BIT,
            "Mesh-Local Prefix",
        )?;
        Ok(self.active_dataset.mesh_local_prefix)
    }

    pub fn set_mesh_local_prefix(&mut self, prefix: [u8; 8], delay: Duration) -> Result<()> {
        let mut pending = PendingOperationalDataset::default();
        pending.active.mesh_local_prefix = prefix;
        pending.active.present_flags |= ActiveOperationalDataset::MESH_LOCAL_PREFIX_BIT;
        self.set_pending_with_delay(pending, delay)
    }

    pub fn get_network_master_key(&mut self) -> Result<[u8; 16]> {
        self.refresh_active()?;
        self.cached_active_field(
            ActiveOperationalDataset::NETWORK_MASTER_KEY_BIT,
            "Network Master Key",
        )?;
        Ok(self.active_dataset.network_master_key)
    }

    pub fn set_network_master_key(&mut self, master_key: [u8; 16], delay: Duration) -> Result<()> {
        let mut pending = PendingOperationalDataset::default();
        pending.active.network_master_key = master_key;
        pending.active.present_flags |= ActiveOperationalDataset::NETWORK_MASTER_KEY_BIT;
        self.set_pending_with_delay(pending, delay)
    }

    pub fn get_network_name(&self) -> Result<String> {
        self.cached_active_field(ActiveOperationalDataset::NETWORK_NAME_BIT, "Network Name")?;
        Ok(self.active_dataset.network_name.clone())
    }

    pub fn set_network_name(&mut self, network_name: &str) -> Result<()> {
        let mut dataset = ActiveOperationalDataset::default();
        dataset.network_name = network_name.to_string();
        dataset.present_flags |= ActiveOperationalDataset::NETWORK_NAME_BIT;
        self.set_active_dataset(&dataset)
    }

    pub fn get_pan_id(&mut self) -> Result<u16> {
        self.refresh_active()?;
        self.cached_active_field(ActiveOperationalDataset::PAN_ID_BIT, "PAN ID")?;
        Ok(self.active_dataset.pan_id)
    }

    pub fn set_pan_id(&mut self, pan_id: u16, delay: Duration) -> Result<()> {
        let mut pending = PendingOperationalDataset::default();
        pending.active.pan_id = pan_id;
        pending.active.present_flags |= ActiveOperationalDataset::PAN_ID_BIT;
        self.set_pending_with_delay(pending, delay)
    }

    pub fn get_pskc(&self) -> Result<[u8; 16]> {
        self.cached_active_field(ActiveOperationalDataset::PSKC_BIT, "PSKc")?;
        Ok(self.active_dataset.pskc)
    }

    pub fn set_pskc(&mut self, pskc: [u8; 16]) -> Result<()> {
        let mut dataset = ActiveOperationalDataset::default();
        dataset.pskc = pskc;
        dataset.present_flags |= ActiveOperationalDataset::PSKC_BIT;
        self.set_active_dataset(&dataset)
    }

    pub fn get_security_policy(&self) -> Result<SecurityPolicy> {
        self.cached_active_field(
            ActiveOperationalDataset::SECURITY_POLICY_BIT,
            "Security Policy",
        )?;
        Ok(self.active_dataset.security_policy.clone())
    }

    pub fn set_security_policy(&mut self, security_policy: SecurityPolicy) -> Result<()> {
        let mut dataset = ActiveOperationalDataset::default();
        dataset.security_policy = security_policy;
        dataset.present_flags |= ActiveOperationalDataset::SECURITY_POLICY_BIT;
        self.set_active_dataset(&dataset)
    }

    fn refresh_active(&mut self) -> Result<()> {
        self.ensure_active()?;
        let dataset = self.fetch_active_dataset(0xFFFF)?;
        self.active_dataset.merge(&dataset);
        Ok(())
    }

    fn cached_active_field(&self, bit: u16, what: &str) -> Result<()> {
        self.ensure_active()?;
        if !self.active_dataset.is_present(bit) {
            return Err(Error::NotFound(format!(
                "cannot find valid {} in Active Operational Dataset",
                what
            )));
        }
        Ok(())
    }

    fn set_pending_with_delay(
        &mut self,
        mut pending: PendingOperationalDataset,
        delay: Duration,
    ) -> Result<()> {
        pending.delay_timer = u32::try_from(delay.as_millis())
            .map_err(|_| Error::InvalidArgs("delay timer exceeds u32 milliseconds".into()))?;
        pending.active.present_flags |= PendingOperationalDataset::DELAY_TIMER_BIT;
        self.set_pending_dataset(&pending)
    }

    // ========================================================================
    // BBR dataset fields (CCM)
    // ========================================================================

    pub fn get_tri_hostname(&self) -> Result<String> {
        self.cached_bbr_field(BbrDataset::TRI_HOSTNAME_BIT, "TRI Hostname")?;
        Ok(self.bbr_dataset.tri_hostname.clone())
    }

    pub fn set_tri_hostname(&mut self, hostname: &str) -> Result<()> {
        let mut dataset = BbrDataset::default();
        dataset.tri_hostname = hostname.to_string();
        dataset.present_flags |= BbrDataset::TRI_HOSTNAME_BIT;
        self.set_bbr_dataset(&dataset)
    }

    pub fn get_registrar_hostname(&self) -> Result<String> {
        self.cached_bbr_field(BbrDataset::REGISTRAR_HOSTNAME_BIT, "Registrar Hostname")?;
        Ok(self.bbr_dataset.registrar_hostname.clone())
    }

    pub fn set_registrar_hostname(&mut self, hostname: &str) -> Result<()> {
        let mut dataset = BbrDataset::default();
        dataset.registrar_hostname = hostname.to_string();
        dataset.present_flags |= BbrDataset::REGISTRAR_HOSTNAME_BIT;
        self.set_bbr_dataset(&dataset)
    }

    /// Read-only: the BBR advertises the registrar address itself.
    pub fn get_registrar_ipv6_addr(&self) -> Result<String> {
        self.cached_bbr_field(
            BbrDataset::REGISTRAR_IPV6_ADDR_BIT,
            "Registrar IPv6 Address",
        )?;
        Ok(self.bbr_dataset.registrar_ipv6_addr.clone())
    }

    fn cached_bbr_field(&self, bit: u16, what: &str) -> Result<()> {
        self.ensure_active()?;
        self.ensure_ccm()?;
        if !self.bbr_dataset.is_present(bit) {
            return Err(Error::NotFound(format!(
                "cannot find valid {} in BBR Dataset",
                what
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Network diagnostics
    // ========================================================================

    pub fn announce_begin(
        &mut self,
        channel_mask: u32,
        count: u8,
        period: Duration,
        dst_addr: &str,
    ) -> Result<()> {
        self.ensure_active()?;
        let payload = vec![
            channel_mask_tlv(channel_mask),
            Tlv::u8_value(meshcop::COUNT, count),
            Tlv::u16_value(meshcop::PERIOD, duration_as_u16_ms(period)?),
        ];
        self.transport
            .send_request(uri::ANNOUNCE_BEGIN, payload, Some(dst_addr))?;
        Ok(())
    }

    /// Ask `dst_addr` (possibly a multicast scope) to report PAN-ID
    /// conflicts; answers arrive as events and land in
    /// [`Commissioner::pan_id_conflicts`].
    pub fn pan_id_query(&mut self, channel_mask: u32, pan_id: u16, dst_addr: &str) -> Result<()> {
        self.ensure_active()?;
        let payload = vec![
            channel_mask_tlv(channel_mask),
            Tlv::u16_value(meshcop::PAN_ID, pan_id),
        ];
        self.transport
            .send_request(uri::PANID_QUERY, payload, Some(dst_addr))?;
        Ok(())
    }

    pub fn has_pan_id_conflict(&self, pan_id: u16) -> bool {
        self.pan_id_conflicts.contains_key(&pan_id)
    }

    pub fn pan_id_conflicts(&self) -> &HashMap<u16, ChannelMask> {
        &self.pan_id_conflicts
    }

    pub fn energy_scan(
        &mut self,
        channel_mask: u32,
        count: u8,
        period: u16,
        scan_duration: u16,
        dst_addr: &str,
    ) -> Result<()> {
        self.ensure_active()?;
        let payload = vec![
            channel_mask_tlv(channel_mask),
            Tlv::u8_value(meshcop::COUNT, count),
            Tlv::u16_value(meshcop::PERIOD, period),
            Tlv::u16_value(meshcop::SCAN_DURATION, scan_duration),
        ];
        self.transport
            .send_request(uri::ENERGY_SCAN, payload, Some(dst_addr))?;
        Ok(())
    }

    pub fn energy_report(&self, peer_addr: &str) -> Option<&EnergyReport> {
        self.energy_reports.get(peer_addr)
    }

    pub fn energy_reports(&self) -> &BTreeMap<String, EnergyReport> {
        &self.energy_reports
    }

    /// MLR.req to the Primary BBR, resolved through the mesh-local prefix
    /// and the fixed BBR anycast locator.
    pub fn register_multicast_listener(
        &mut self,
        multicast_addrs: &[String],
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_active()?;
        let mut addr_bytes = Vec::with_capacity(multicast_addrs.len() * 16);
        for addr in multicast_addrs {
            let parsed: Ipv6Addr = addr
                .parse()
                .map_err(|_| Error::InvalidArgs(format!("bad IPv6 address: {}", addr)))?;
            addr_bytes.extend_from_slice(&parsed.octets());
        }

        let prefix = self.get_mesh_local_prefix()?;
        let pbbr_addr = mesh_local_addr(&prefix, PRIMARY_BBR_ALOC16);

        let payload = vec![
            Tlv::new(network::IPV6_ADDRESSES, addr_bytes),
            Tlv::u32_value(network::TIMEOUT, timeout.as_secs() as u32),
        ];
        let response = self
            .transport
            .send_request(uri::MLR, payload, Some(&pbbr_addr))?;

        let status = tlv::find(&response, network::STATUS)
            .ok_or_else(|| Error::TransportFailed("MLR response carries no Status TLV".into()))?
            .value_as_u8()?;
        if status != MLR_STATUS_SUCCESS {
            return Err(Error::Rejected { status });
        }
        Ok(())
    }

    // ========================================================================
    // CCM commands
    // ========================================================================

    /// COM_TOK.req against the domain Registrar; the token is kept for
    /// subsequent petitions.
    pub fn request_token(&mut self, registrar_addr: &str, registrar_port: u16) -> Result<Vec<u8>> {
        self.ensure_ccm()?;
        let token = self.transport.request_token(registrar_addr, registrar_port)?;
        self.signed_token = token.clone();
        Ok(token)
    }

    /// Validate an operator-supplied token and install it into the
    /// transport for subsequent sessions.
    pub fn set_token(&mut self, signed_token: Vec<u8>, signer_cert: &[u8]) -> Result<()> {
        self.ensure_ccm()?;
        self.crypto.verify_cose_token(&signed_token, signer_cert)?;
        self.transport.install_token(signed_token.clone());
        self.signed_token = signed_token;
        Ok(())
    }

    pub fn token(&self) -> &[u8] {
        &self.signed_token
    }

    pub fn reenroll(&mut self, dst_addr: &str) -> Result<()> {
        self.ccm_command(uri::REENROLL, Vec::new(), dst_addr)
    }

    pub fn domain_reset(&mut self, dst_addr: &str) -> Result<()> {
        self.ccm_command(uri::DOMAIN_RESET, Vec::new(), dst_addr)
    }

    pub fn migrate(&mut self, dst_addr: &str, designated_network: &str) -> Result<()> {
        if designated_network.len() > 16 {
            return Err(Error::InvalidArgs("network name exceeds 16 bytes".into()));
        }
        let payload = vec![Tlv::new(
            meshcop::NETWORK_NAME,
            designated_network.as_bytes().to_vec(),
        )];
        self.ccm_command(uri::MIGRATE, payload, dst_addr)
    }

    fn ccm_command(&mut self, uri_path: &str, payload: Vec<Tlv>, dst_addr: &str) -> Result<()> {
        self.ensure_active()?;
        self.ensure_ccm()?;
        let response = self.transport.send_request(uri_path, payload, Some(dst_addr))?;
        // single-shot commands answer with a State TLV only on rejection
        if let Some(t) = tlv::find(&response, meshcop::STATE) {
            let value = t.value_as_u8()?;
            if value != state::ACCEPT {
                return Err(Error::Rejected { status: value });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Event handling
    // ========================================================================

    /// Drain the transport event queue on the application thread.
    pub fn process_events(&mut self) {
        while let Some(event) = self.events.try_next() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::DatasetChanged => self.handle_dataset_changed(),
            TransportEvent::PanIdConflict {
                peer_addr,
                channel_mask,
                pan_id,
            } => {
                log::info!("PAN ID conflict for {:#06X} reported by {}", pan_id, peer_addr);
                self.pan_id_conflicts.insert(pan_id, channel_mask);
            }
            TransportEvent::EnergyReport {
                peer_addr,
                channel_mask,
                energy_list,
            } => {
                log::info!("energy report from {}", peer_addr);
                self.energy_reports.insert(
                    peer_addr,
                    EnergyReport {
                        channel_mask,
                        energy_list,
                    },
                );
            }
        }
    }

    /// The operational datasets moved under us: re-fetch both with all-bits
    /// flags. Transient failures are logged; the next change re-triggers.
    fn handle_dataset_changed(&mut self) {
        if !self.is_active() {
            return;
        }
        match self.fetch_active_dataset(0xFFFF) {
            Ok(dataset) => self.active_dataset = dataset,
            Err(err) => log::warn!("re-fetching Active Operational Dataset failed: {}", err),
        }
        match self.fetch_pending_dataset(0xFFFF) {
            Ok(dataset) => self.pending_dataset = dataset,
            Err(err) => log::warn!("re-fetching Pending Operational Dataset failed: {}", err),
        }
    }
}

fn get_payload(tlv_types: Vec<u8>) -> Vec<Tlv> {
    if tlv_types.is_empty() {
        Vec::new()
    } else {
        vec![Tlv::new(meshcop::GET, tlv_types)]
    }
}

fn require_accept(response: &[Tlv]) -> Result<()> {
    let state_tlv = tlv::find(response, meshcop::STATE)
        .ok_or_else(|| Error::TransportFailed("response carries no State TLV".into()))?;
    let value = state_tlv.value_as_u8()?;
    if value != state::ACCEPT {
        return Err(Error::Rejected { status: value });
    }
    Ok(())
}

fn channel_mask_tlv(mask: u32) -> Tlv {
    let entries = [ChannelMaskEntry {
        page: 0,
        masks: mask,
    }];
    Tlv::new(
        meshcop::CHANNEL_MASK,
        crate::dataset::encode_channel_mask(&entries),
    )
}

fn duration_as_u16_ms(period: Duration) -> Result<u16> {
    u16::try_from(period.as_millis())
        .map_err(|_| Error::InvalidArgs("period exceeds u16 milliseconds".into()))
}

fn steering_field(dataset: &mut CommissionerDataset, joiner_type: JoinerType) -> &mut Vec<u8> {
    match joiner_type {
        JoinerType::MeshCoP => {
            dataset.present_flags |= CommissionerDataset::STEERING_DATA_BIT;
            &mut dataset.steering_data
        }
        JoinerType::Ae => {
            dataset.present_flags |= CommissionerDataset::AE_STEERING_DATA_BIT;
            &mut dataset.ae_steering_data
        }
        JoinerType::Nmkp => {
            dataset.present_flags |= CommissionerDataset::NMKP_STEERING_DATA_BIT;
            &mut dataset.nmkp_steering_data
        }
    }
}

fn joiner_udp_port_field(dataset: &mut CommissionerDataset, joiner_type: JoinerType) -> &mut u16 {
    match joiner_type {
        JoinerType::MeshCoP => {
            dataset.present_flags |= CommissionerDataset::JOINER_UDP_PORT_BIT;
            &mut dataset.joiner_udp_port
        }
        JoinerType::Ae => {
            dataset.present_flags |= CommissionerDataset::AE_UDP_PORT_BIT;
            &mut dataset.ae_udp_port
        }
        JoinerType::Nmkp => {
            dataset.present_flags |= CommissionerDataset::NMKP_UDP_PORT_BIT;
            &mut dataset.nmkp_udp_port
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joiner::steering_covers;
    use crate::transport::{CommissioningRequest, PetitionResponse};
    use std::collections::VecDeque;
    use std::sync::mpsc::Sender;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeInner {
        petition: Option<Result<PetitionResponse>>,
        responses: HashMap<String, VecDeque<Result<Vec<Tlv>>>>,
        requests: Vec<(String, Vec<Tlv>, Option<String>)>,
        token: Option<Result<Vec<u8>>>,
        installed_token: Option<Vec<u8>>,
        aborted: bool,
        event_tx: Option<Sender<TransportEvent>>,
    }

    #[derive(Clone, Default)]
    struct FakeTransport(Arc<Mutex<FakeInner>>);

    impl FakeTransport {
        fn script_petition(&self, response: Result<PetitionResponse>) {
            self.0.lock().unwrap().petition = Some(response);
        }

        fn script(&self, uri_path: &str, response: Result<Vec<Tlv>>) {
            self.0
                .lock()
                .unwrap()
                .responses
                .entry(uri_path.to_string())
                .or_default()
                .push_back(response);
        }

        fn sent_to(&self, uri_path: &str) -> Vec<(Vec<Tlv>, Option<String>)> {
            self.0
                .lock()
                .unwrap()
                .requests
                .iter()
                .filter(|(uri, _, _)| uri == uri_path)
                .map(|(_, tlvs, dst)| (tlvs.clone(), dst.clone()))
                .collect()
        }

        fn emit(&self, event: TransportEvent) {
            let inner = self.0.lock().unwrap();
            inner.event_tx.as_ref().unwrap().send(event).unwrap();
        }
    }

    impl TransportSession for FakeTransport {
        fn petition(
            &mut self,
            _ba_addr: &str,
            _ba_port: u16,
            _commissioner_id: &str,
        ) -> Result<PetitionResponse> {
            let mut inner = self.0.lock().unwrap();
            if inner.aborted {
                return Err(Error::Cancelled);
            }
            inner.petition.take().unwrap_or(Ok(PetitionResponse {
                state: state::ACCEPT,
                session_id: 1,
                existing_commissioner_id: String::new(),
            }))
        }

        fn send_request(
            &mut self,
            uri_path: &str,
            payload: Vec<Tlv>,
            dst_addr: Option<&str>,
        ) -> Result<Vec<Tlv>> {
            let mut inner = self.0.lock().unwrap();
            inner.requests.push((
                uri_path.to_string(),
                payload,
                dst_addr.map(str::to_string),
            ));
            if inner.aborted {
                return Err(Error::Cancelled);
            }
            inner
                .responses
                .get_mut(uri_path)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Ok(vec![Tlv::u8_value(meshcop::STATE, state::ACCEPT)]))
        }

        fn request_token(&mut self, _addr: &str, _port: u16) -> Result<Vec<u8>> {
            self.0
                .lock()
                .unwrap()
                .token
                .take()
                .unwrap_or(Ok(b"signed-token".to_vec()))
        }

        fn install_token(&mut self, signed_token: Vec<u8>) {
            self.0.lock().unwrap().installed_token = Some(signed_token);
        }

        fn abort_all(&mut self) {
            self.0.lock().unwrap().aborted = true;
        }

        fn set_event_sender(&mut self, sender: Sender<TransportEvent>) {
            self.0.lock().unwrap().event_tx = Some(sender);
        }

        fn set_admission(&mut self, _admission: Arc<JoinerAdmission>) {}
    }

    struct AcceptingCrypto;
    impl Crypto for AcceptingCrypto {
        fn verify_cose_token(&self, _token: &[u8], _cert: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    fn engine(fake: &FakeTransport, ccm: bool) -> Commissioner {
        Commissioner::new(
            "tester",
            ccm,
            if ccm { "TestDomain" } else { "" },
            Duration::from_secs(40),
            Box::new(fake.clone()),
            Box::new(AcceptingCrypto),
        )
        .unwrap()
    }

    fn active_response(pan_id: u16, channel: u16) -> Vec<Tlv> {
        let mut dataset = ActiveOperationalDataset::default();
        dataset.pan_id = pan_id;
        dataset.channel = Channel {
            page: 0,
            number: channel,
        };
        dataset.mesh_local_prefix = [0xFD, 0, 0xDB, 0x08, 0, 0, 0, 0];
        dataset.present_flags = ActiveOperationalDataset::PAN_ID_BIT
            | ActiveOperationalDataset::CHANNEL_BIT
            | ActiveOperationalDataset::MESH_LOCAL_PREFIX_BIT;
        dataset.to_tlvs()
    }

    fn commissioner_response(session_id: u16) -> Vec<Tlv> {
        let mut dataset = CommissionerDataset::default();
        dataset.session_id = session_id;
        dataset.border_agent_locator = 0x0400;
        dataset.steering_data = vec![0x00];
        dataset.present_flags = CommissionerDataset::SESSION_ID_BIT
            | CommissionerDataset::BORDER_AGENT_LOCATOR_BIT
            | CommissionerDataset::STEERING_DATA_BIT;
        dataset.to_tlvs()
    }

    /// Petition and pull with canned responses, leaving the engine Active.
    fn start_engine(fake: &FakeTransport, ccm: bool) -> Commissioner {
        let mut commissioner = engine(fake, ccm);
        fake.script(uri::COMMISSIONER_GET, Ok(commissioner_response(1)));
        fake.script(uri::ACTIVE_GET, Ok(active_response(0xFACE, 19)));
        fake.script(uri::PENDING_GET, Ok(Vec::new()));
        if ccm {
            fake.script(uri::BBR_GET, Ok(Vec::new()));
        }
        let mut existing = String::new();
        commissioner.start(&mut existing, "fd00::ba", 49191).unwrap();
        commissioner
    }

    #[test]
    fn test_start_pulls_network_data() {
        let fake = FakeTransport::default();
        let commissioner = start_engine(&fake, false);

        assert!(commissioner.is_active());
        assert_eq!(commissioner.get_session_id().unwrap(), 1);
        assert_eq!(commissioner.cached_active_dataset().pan_id, 0xFACE);
        assert_eq!(
            commissioner.cached_commissioner_dataset().border_agent_locator,
            0x0400
        );
        assert_eq!(commissioner.get_border_agent_locator().unwrap(), 0x0400);
    }

    #[test]
    fn test_petition_reject_reports_rival() {
        let fake = FakeTransport::default();
        let mut commissioner = engine(&fake, false);
        fake.script_petition(Ok(PetitionResponse {
            state: state::REJECT,
            session_id: 0,
            existing_commissioner_id: "alpha".into(),
        }));

        let mut existing = String::new();
        let err = commissioner
            .start(&mut existing, "fd00::ba", 49191)
            .unwrap_err();
        assert!(matches!(err, Error::Rejected { .. }));
        assert_eq!(existing, "alpha");
        assert_eq!(commissioner.session_state(), SessionState::Disabled);
    }

    #[test]
    fn test_pull_failure_after_petition_surfaces() {
        let fake = FakeTransport::default();
        let mut commissioner = engine(&fake, false);
        fake.script(
            uri::COMMISSIONER_GET,
            Err(Error::Timeout("no response".into())),
        );

        let mut existing = String::new();
        let err = commissioner
            .start(&mut existing, "fd00::ba", 49191)
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_operations_require_active_session() {
        let fake = FakeTransport::default();
        let mut commissioner = engine(&fake, false);

        assert!(matches!(
            commissioner.get_channel(),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            commissioner.enable_joiner(
                JoinerType::MeshCoP,
                1,
                JoinerCredential::Pskd("PSKD01".into()),
                ""
            ),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            commissioner.energy_scan(0x07FFF800, 2, 32, 16, "ff02::1"),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_enable_joiner_updates_steering_and_registry() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);
        let eui64 = 0x0011_2233_4455_6677;

        commissioner
            .enable_joiner(
                JoinerType::MeshCoP,
                eui64,
                JoinerCredential::Pskd("J01NME".into()),
                "",
            )
            .unwrap();

        let sets = fake.sent_to(uri::COMMISSIONER_SET);
        assert_eq!(sets.len(), 1);
        let sent = CommissionerDataset::from_tlvs(&sets[0].0).unwrap();
        // server-assigned fields never travel in a SET
        assert!(!sent.is_present(CommissionerDataset::SESSION_ID_BIT));
        assert!(!sent.is_present(CommissionerDataset::BORDER_AGENT_LOCATOR_BIT));
        // the Bloom filter covers the joiner id
        assert!(steering_covers(
            &sent.steering_data,
            &compute_joiner_id(eui64)
        ));
        assert!(steering_covers(
            &commissioner.get_steering_data(JoinerType::MeshCoP).unwrap(),
            &compute_joiner_id(eui64)
        ));

        // duplicate enables are refused without a second SET
        let err = commissioner
            .enable_joiner(
                JoinerType::MeshCoP,
                eui64,
                JoinerCredential::Pskd("J01NME".into()),
                "",
            )
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(fake.sent_to(uri::COMMISSIONER_SET).len(), 1);
    }

    #[test]
    fn test_joiner_commissioned_after_accept() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);
        let eui64 = 0x0011_2233_4455_6677;
        commissioner
            .enable_joiner(
                JoinerType::MeshCoP,
                eui64,
                JoinerCredential::Pskd("J01NME".into()),
                "",
            )
            .unwrap();
        assert!(!commissioner.is_joiner_commissioned(JoinerType::MeshCoP, eui64));

        // the transport asks for credentials, then runs the default policy
        let admission = commissioner.admission();
        let request = CommissioningRequest {
            joiner_type: JoinerType::MeshCoP,
            joiner_id: compute_joiner_id(eui64),
            ..Default::default()
        };
        assert!(admission.handle_commissioning(&request));
        assert!(commissioner.is_joiner_commissioned(JoinerType::MeshCoP, eui64));
    }

    #[test]
    fn test_enable_joiner_failure_keeps_state() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);
        fake.script(
            uri::COMMISSIONER_SET,
            Err(Error::TransportFailed("dtls torn down".into())),
        );

        let err = commissioner
            .enable_joiner(
                JoinerType::MeshCoP,
                0xAB,
                JoinerCredential::Pskd("PSKD01".into()),
                "",
            )
            .unwrap_err();
        assert!(matches!(err, Error::TransportFailed(_)));
        // neither the registry nor the cached steering advanced
        assert!(!commissioner.is_joiner_commissioned(JoinerType::MeshCoP, 0xAB));
        assert_eq!(
            commissioner.get_steering_data(JoinerType::MeshCoP).unwrap(),
            vec![0x00]
        );
    }

    #[test]
    fn test_wildcard_admission() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);

        commissioner
            .enable_all_joiners(
                JoinerType::MeshCoP,
                JoinerCredential::Pskd("J01NME".into()),
                "",
            )
            .unwrap();
        assert_eq!(
            commissioner.get_steering_data(JoinerType::MeshCoP).unwrap(),
            vec![0xFF]
        );

        // any joiner id of the type resolves to the wildcard credential
        let admission = commissioner.admission();
        let info = admission
            .joiner_info(JoinerType::MeshCoP, &compute_joiner_id(0x1234_5678))
            .unwrap();
        assert_eq!(info.credential, JoinerCredential::Pskd("J01NME".into()));
        assert!(admission
            .joiner_info(JoinerType::Ae, &compute_joiner_id(0x1234_5678))
            .is_none());
    }

    #[test]
    fn test_disable_joiner_rebuilds_steering() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);
        for eui in [0x0Au64, 0x0B] {
            commissioner
                .enable_joiner(
                    JoinerType::MeshCoP,
                    eui,
                    JoinerCredential::Pskd("PSKD01".into()),
                    "",
                )
                .unwrap();
        }

        commissioner
            .disable_joiner(JoinerType::MeshCoP, 0x0B)
            .unwrap();

        let steering = commissioner.get_steering_data(JoinerType::MeshCoP).unwrap();
        let mut expected = Vec::new();
        add_joiner_to_steering(&mut expected, &compute_joiner_id(0x0A));
        assert_eq!(steering, expected);

        assert!(matches!(
            commissioner.disable_joiner(JoinerType::MeshCoP, 0x0B),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_disable_all_joiners_zeroes_steering() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);
        commissioner
            .enable_all_joiners(
                JoinerType::MeshCoP,
                JoinerCredential::Pskd("PSKD01".into()),
                "",
            )
            .unwrap();

        commissioner.disable_all_joiners(JoinerType::MeshCoP).unwrap();
        assert_eq!(
            commissioner.get_steering_data(JoinerType::MeshCoP).unwrap(),
            vec![0x00]
        );
        let admission = commissioner.admission();
        assert!(admission
            .joiner_info(JoinerType::MeshCoP, &compute_joiner_id(1))
            .is_none());
    }

    #[test]
    fn test_set_channel_goes_through_pending_with_delay() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);

        commissioner
            .set_channel(Channel { page: 0, number: 15 }, Duration::from_secs(30))
            .unwrap();

        let sets = fake.sent_to(uri::PENDING_SET);
        assert_eq!(sets.len(), 1);
        let sent = PendingOperationalDataset::from_tlvs(&sets[0].0).unwrap();
        assert!(sent.is_present(ActiveOperationalDataset::CHANNEL_BIT));
        assert_eq!(sent.active.channel.number, 15);
        assert!(sent.is_present(PendingOperationalDataset::DELAY_TIMER_BIT));
        assert_eq!(sent.delay_timer, 30_000);

        // the channel is not applied until the leader commits
        fake.script(uri::ACTIVE_GET, Ok(active_response(0xFACE, 19)));
        assert_eq!(commissioner.get_channel().unwrap().number, 19);

        // after the delay the leader serves the new channel
        fake.script(uri::ACTIVE_GET, Ok(active_response(0xFACE, 15)));
        assert_eq!(commissioner.get_channel().unwrap().number, 15);
    }

    #[test]
    fn test_zero_delay_still_sends_delay_timer() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);
        commissioner.set_pan_id(0xBEEF, Duration::ZERO).unwrap();

        let sets = fake.sent_to(uri::PENDING_SET);
        let sent = PendingOperationalDataset::from_tlvs(&sets[0].0).unwrap();
        assert!(sent.is_present(PendingOperationalDataset::DELAY_TIMER_BIT));
        assert_eq!(sent.delay_timer, 0);
    }

    #[test]
    fn test_set_pending_without_delay_rejected() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);
        let mut pending = PendingOperationalDataset::default();
        pending.active.pan_id = 1;
        pending.active.present_flags = ActiveOperationalDataset::PAN_ID_BIT;

        assert!(matches!(
            commissioner.set_pending_dataset(&pending),
            Err(Error::InvalidArgs(_))
        ));
        assert!(fake.sent_to(uri::PENDING_SET).is_empty());
    }

    #[test]
    fn test_rejected_set_leaves_cache() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);
        fake.script(
            uri::ACTIVE_SET,
            Ok(vec![Tlv::u8_value(meshcop::STATE, state::REJECT)]),
        );

        let err = commissioner.set_network_name("NewName").unwrap_err();
        assert_eq!(err.rejected_status(), Some(state::REJECT));
        assert!(!commissioner
            .cached_active_dataset()
            .is_present(ActiveOperationalDataset::NETWORK_NAME_BIT));
    }

    #[test]
    fn test_pull_merge_clears_absent_steering() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);
        commissioner
            .enable_all_joiners(JoinerType::Ae, JoinerCredential::Certificate(vec![]), "")
            .unwrap();
        assert!(commissioner.get_steering_data(JoinerType::Ae).is_ok());

        // second pull: server sets session id 42 and omits AE steering data
        fake.script(uri::COMMISSIONER_GET, Ok(commissioner_response(42)));
        fake.script(uri::ACTIVE_GET, Ok(active_response(0xFACE, 19)));
        fake.script(uri::PENDING_GET, Ok(Vec::new()));
        commissioner.pull_network_data().unwrap();

        assert_eq!(commissioner.cached_commissioner_dataset().session_id, 42);
        assert!(matches!(
            commissioner.get_steering_data(JoinerType::Ae),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_mlr_targets_primary_bbr_and_maps_status() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);

        fake.script(uri::ACTIVE_GET, Ok(active_response(0xFACE, 19)));
        fake.script(
            uri::MLR,
            Ok(vec![Tlv::u8_value(network::STATUS, MLR_STATUS_SUCCESS)]),
        );
        commissioner
            .register_multicast_listener(&["ff04::123".into()], Duration::from_secs(300))
            .unwrap();
        let sent = fake.sent_to(uri::MLR);
        assert_eq!(
            sent[0].1.as_deref(),
            Some("fd00:db08::ff:fe00:fc38")
        );

        // non-zero status surfaces as a rejection and nothing is cached
        fake.script(uri::ACTIVE_GET, Ok(active_response(0xFACE, 19)));
        fake.script(uri::MLR, Ok(vec![Tlv::u8_value(network::STATUS, 2)]));
        let err = commissioner
            .register_multicast_listener(&["ff04::123".into()], Duration::from_secs(300))
            .unwrap_err();
        assert_eq!(err.rejected_status(), Some(2));
    }

    #[test]
    fn test_mlr_rejects_bad_address() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);
        let err = commissioner
            .register_multicast_listener(&["not-an-address".into()], Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgs(_)));
        assert!(fake.sent_to(uri::MLR).is_empty());
    }

    #[test]
    fn test_abort_mid_scan_is_cancelled() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);

        commissioner.abort_requests();
        let err = commissioner
            .energy_scan(0x07FFF800, 2, 32, 16, "ff02::1")
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(commissioner.energy_reports().is_empty());
        // the session itself is untouched
        assert!(commissioner.is_active());
    }

    #[test]
    fn test_energy_and_conflict_events_fill_maps() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);

        fake.emit(TransportEvent::EnergyReport {
            peer_addr: "fd00:db8::7".into(),
            channel_mask: vec![ChannelMaskEntry {
                page: 0,
                masks: 0x0000_F800,
            }],
            energy_list: vec![0x9F, 0xA2],
        });
        fake.emit(TransportEvent::PanIdConflict {
            peer_addr: "fd00:db8::7".into(),
            channel_mask: vec![],
            pan_id: 0xDEAD,
        });
        commissioner.process_events();

        assert_eq!(
            commissioner.energy_report("fd00:db8::7").unwrap().energy_list,
            vec![0x9F, 0xA2]
        );
        assert!(commissioner.has_pan_id_conflict(0xDEAD));
        assert!(!commissioner.has_pan_id_conflict(0xBEEF));
    }

    #[test]
    fn test_dataset_changed_refetches() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);
        assert_eq!(commissioner.cached_active_dataset().pan_id, 0xFACE);

        fake.script(uri::ACTIVE_GET, Ok(active_response(0xB00F, 21)));
        fake.script(uri::PENDING_GET, Ok(Vec::new()));
        fake.emit(TransportEvent::DatasetChanged);
        commissioner.process_events();

        assert_eq!(commissioner.cached_active_dataset().pan_id, 0xB00F);
        assert_eq!(commissioner.cached_active_dataset().channel.number, 21);
    }

    #[test]
    fn test_keepalive_rejection_loses_session() {
        let fake = FakeTransport::default();
        let mut commissioner = engine(&fake, false);
        // short interval so the tick below is already due
        commissioner.session =
            SessionController::new("tester".into(), Duration::from_millis(1)).unwrap();
        fake.script(uri::COMMISSIONER_GET, Ok(commissioner_response(1)));
        fake.script(uri::ACTIVE_GET, Ok(active_response(0xFACE, 19)));
        fake.script(uri::PENDING_GET, Ok(Vec::new()));
        let mut existing = String::new();
        commissioner.start(&mut existing, "fd00::ba", 49191).unwrap();

        let lost = Arc::new(Mutex::new(false));
        let lost_flag = lost.clone();
        commissioner.set_session_lost_handler(Box::new(move |_| {
            *lost_flag.lock().unwrap() = true;
        }));

        fake.script(
            uri::KEEP_ALIVE,
            Ok(vec![Tlv::u8_value(meshcop::STATE, state::REJECT)]),
        );
        std::thread::sleep(Duration::from_millis(5));
        commissioner.tick();

        assert!(!commissioner.is_active());
        assert!(*lost.lock().unwrap());
        let keepalives = fake.sent_to(uri::KEEP_ALIVE);
        assert_eq!(keepalives.len(), 1);
        assert_eq!(
            tlv::find(&keepalives[0].0, meshcop::STATE).unwrap().value,
            vec![state::ACCEPT]
        );
    }

    #[test]
    fn test_resign_sends_reject_state() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);
        commissioner.resign().unwrap();

        assert_eq!(commissioner.session_state(), SessionState::Disabled);
        let keepalives = fake.sent_to(uri::KEEP_ALIVE);
        assert_eq!(
            tlv::find(&keepalives[0].0, meshcop::STATE).unwrap().value,
            vec![state::REJECT]
        );
    }

    #[test]
    fn test_ccm_operations_gated() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, false);

        assert!(matches!(
            commissioner.get_tri_hostname(),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            commissioner.reenroll("fd00::1"),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            commissioner.request_token("fd00::2", 5684),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_ccm_flows() {
        let fake = FakeTransport::default();
        let mut commissioner = start_engine(&fake, true);

        commissioner.set_tri_hostname("tri.example.net").unwrap();
        assert_eq!(commissioner.get_tri_hostname().unwrap(), "tri.example.net");

        let token = commissioner.request_token("fd00::2", 5684).unwrap();
        assert_eq!(token, b"signed-token");
        assert_eq!(commissioner.token(), b"signed-token");

        commissioner
            .set_token(b"operator-token".to_vec(), b"-----BEGIN CERT-----")
            .unwrap();
        assert_eq!(commissioner.token(), b"operator-token");
        assert_eq!(
            fake.0.lock().unwrap().installed_token.as_deref(),
            Some(b"operator-token".as_slice())
        );

        commissioner.reenroll("fd00::99").unwrap();
        commissioner.domain_reset("fd00::99").unwrap();
        commissioner.migrate("fd00::99", "OtherNet").unwrap();
        let migrates = fake.sent_to(uri::MIGRATE);
        assert_eq!(
            tlv::find(&migrates[0].0, meshcop::NETWORK_NAME).unwrap().value,
            b"OtherNet".to_vec()
        );
    }

    #[test]
    fn test_mesh_local_addr_formats_aloc() {
        let prefix = [0xFD, 0x00, 0x0D, 0xB8, 0, 0, 0, 0];
        assert_eq!(
            mesh_local_addr(&prefix, PRIMARY_BBR_ALOC16),
            "fd00:db8::ff:fe00:fc38"
        );
    }
}
