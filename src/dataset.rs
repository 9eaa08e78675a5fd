//! Commissioning datasets
//!
//! The four datasets a commissioner caches are sparse records: every field
//! has a bit in `present_flags` and is meaningful only while its bit is set.
//! Merging overlays present fields of a source onto a destination; the
//! Commissioner Dataset additionally treats steering data and joiner UDP
//! ports as absence-meaningful, mirroring the GET-response semantics where
//! the leader omits a field that has been cleared mesh-wide.

use crate::error::{Error, Result};
use crate::tlv::{self, meshcop, Tlv};

/// Seconds + ticks + authoritative bit, packed into 8 bytes on the wire.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    /// 48-bit seconds value
    pub seconds: u64,
    /// 15-bit sub-second ticks
    pub ticks: u16,
    pub authoritative: bool,
}

impl Timestamp {
    pub fn new(seconds: u64, ticks: u16, authoritative: bool) -> Self {
        Self {
            seconds,
            ticks,
            authoritative,
        }
    }

    pub fn encode(&self) -> [u8; 8] {
        let value = ((self.seconds & 0xFFFF_FFFF_FFFF) << 16)
            | (u64::from(self.ticks & 0x7FFF) << 1)
            | u64::from(self.authoritative);
        value.to_be_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let bytes: [u8; 8] = buf
            .try_into()
            .map_err(|_| Error::InvalidArgs("timestamp TLV must be 8 bytes".into()))?;
        let value = u64::from_be_bytes(bytes);
        Ok(Self {
            seconds: value >> 16,
            ticks: ((value >> 1) & 0x7FFF) as u16,
            authoritative: (value & 1) != 0,
        })
    }
}

/// A channel page and channel number.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub page: u8,
    pub number: u16,
}

/// One page worth of a channel mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMaskEntry {
    pub page: u8,
    pub masks: u32,
}

/// Channel mask entries, one per channel page.
pub type ChannelMask = Vec<ChannelMaskEntry>;

pub(crate) fn encode_channel_mask(mask: &[ChannelMaskEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(mask.len() * 6);
    for entry in mask {
        out.push(entry.page);
        out.push(4);
        out.extend_from_slice(&entry.masks.to_be_bytes());
    }
    out
}

fn decode_channel_mask(buf: &[u8]) -> Result<ChannelMask> {
    let mut entries = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        if pos + 2 > buf.len() {
            return Err(Error::InvalidArgs("truncated channel mask entry".into()));
        }
        let page = buf[pos];
        let len = buf[pos + 1] as usize;
        pos += 2;
        if len != 4 || pos + len > buf.len() {
            return Err(Error::InvalidArgs("bad channel mask entry length".into()));
        }
        let masks = u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]);
        entries.push(ChannelMaskEntry { page, masks });
        pos += len;
    }
    Ok(entries)
}

/// Key rotation time plus policy flag bits.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub rotation_time: u16,
    pub flags: Vec<u8>,
}

/// The Active Operational Dataset of S3.1.
///
/// `present_flags` also carries the two pending-only bits so that
/// [`PendingOperationalDataset`] can reuse the whole record.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActiveOperationalDataset {
    pub active_timestamp: Timestamp,
    pub channel: Channel,
    pub channel_mask: ChannelMask,
    pub extended_pan_id: [u8; 8],
    pub mesh_local_prefix: [u8; 8],
    pub network_master_key: [u8; 16],
    pub network_name: String,
    pub pan_id: u16,
    pub pskc: [u8; 16],
    pub security_policy: SecurityPolicy,
    pub present_flags: u16,
}

impl ActiveOperationalDataset {
    pub const ACTIVE_TIMESTAMP_BIT: u16 = 1 << 0;
    pub const CHANNEL_BIT: u16 = 1 << 1;
    pub const CHANNEL_MASK_BIT: u16 = 1 << 2;
    pub const EXTENDED_PAN_ID_BIT: u16 = 1 << 3;
    pub const MESH_LOCAL_PREFIX_BIT: u16 = 1 << 4;
    pub const NETWORK_MASTER_KEY_BIT: u16 = 1 << 5;
    pub const NETWORK_NAME_BIT: u16 = 1 << 6;
    pub const PAN_ID_BIT: u16 = 1 << 7;
    pub const PSKC_BIT: u16 = 1 << 8;
    pub const SECURITY_POLICY_BIT: u16 = 1 << 9;

    /// Every Active-dataset bit.
    pub const ALL_BITS: u16 = 0x03FF;

    pub fn is_present(&self, bit: u16) -> bool {
        self.present_flags & bit != 0
    }

    /// Field-wise overlay: present fields of `src` replace ours.
    pub fn merge(&mut self, src: &Self) {
        macro_rules! overlay {
            ($bit:expr, $field:ident) => {
                if src.present_flags & $bit != 0 {
                    self.$field = src.$field.clone();
                    self.present_flags |= $bit;
                }
            };
        }
        overlay!(Self::ACTIVE_TIMESTAMP_BIT, active_timestamp);
        overlay!(Self::CHANNEL_BIT, channel);
        overlay!(Self::CHANNEL_MASK_BIT, channel_mask);
        overlay!(Self::EXTENDED_PAN_ID_BIT, extended_pan_id);
        overlay!(Self::MESH_LOCAL_PREFIX_BIT, mesh_local_prefix);
        overlay!(Self::NETWORK_MASTER_KEY_BIT, network_master_key);
        overlay!(Self::NETWORK_NAME_BIT, network_name);
        overlay!(Self::PAN_ID_BIT, pan_id);
        overlay!(Self::PSKC_BIT, pskc);
        overlay!(Self::SECURITY_POLICY_BIT, security_policy);
    }

    /// TLV types requested by a GET with the given dataset flags.
    pub fn get_tlv_types(flags: u16) -> Vec<u8> {
        let mut types = Vec::new();
        let table = [
            (Self::ACTIVE_TIMESTAMP_BIT, meshcop::ACTIVE_TIMESTAMP),
            (Self::CHANNEL_BIT, meshcop::CHANNEL),
            (Self::CHANNEL_MASK_BIT, meshcop::CHANNEL_MASK),
            (Self::EXTENDED_PAN_ID_BIT, meshcop::EXTENDED_PAN_ID),
            (Self::MESH_LOCAL_PREFIX_BIT, meshcop::MESH_LOCAL_PREFIX),
            (Self::NETWORK_MASTER_KEY_BIT, meshcop::NETWORK_MASTER_KEY),
            (Self::NETWORK_NAME_BIT, meshcop::NETWORK_NAME),
            (Self::PAN_ID_BIT, meshcop::PAN_ID),
            (Self::PSKC_BIT, meshcop::PSKC),
            (Self::SECURITY_POLICY_BIT, meshcop::SECURITY_POLICY),
        ];
        for (bit, typ) in table {
            if flags & bit != 0 {
                types.push(typ);
            }
        }
        types
    }

    /// Serialize the present fields.
    pub fn to_tlvs(&self) -> Vec<Tlv> {
        let mut tlvs = Vec::new();
        if self.is_present(Self::ACTIVE_TIMESTAMP_BIT) {
            tlvs.push(Tlv::new(
                meshcop::ACTIVE_TIMESTAMP,
                self.active_timestamp.encode().to_vec(),
            ));
        }
        if self.is_present(Self::CHANNEL_BIT) {
            let mut value = vec![self.channel.page];
            value.extend_from_slice(&self.channel.number.to_be_bytes());
            tlvs.push(Tlv::new(meshcop::CHANNEL, value));
        }
        if self.is_present(Self::CHANNEL_MASK_BIT) {
            tlvs.push(Tlv::new(
                meshcop::CHANNEL_MASK,
                encode_channel_mask(&self.channel_mask),
            ));
        }
        if self.is_present(Self::EXTENDED_PAN_ID_BIT) {
            tlvs.push(Tlv::new(
                meshcop::EXTENDED_PAN_ID,
                self.extended_pan_id.to_vec(),
            ));
        }
        if self.is_present(Self::MESH_LOCAL_PREFIX_BIT) {
            tlvs.push(Tlv::new(
                meshcop::MESH_LOCAL_PREFIX,
                self.mesh_local_prefix.to_vec(),
            ));
        }
        if self.is_present(Self::NETWORK_MASTER_KEY_BIT) {
            tlvs.push(Tlv::new(
                meshcop::NETWORK_MASTER_KEY,
                self.network_master_key.to_vec(),
            ));
        }
        if self.is_present(Self::NETWORK_NAME_BIT) {
            tlvs.push(Tlv::new(
                meshcop::NETWORK_NAME,
                self.network_name.as_bytes().to_vec(),
            ));
        }
        if self.is_present(Self::PAN_ID_BIT) {
            tlvs.push(Tlv::u16_value(meshcop::PAN_ID, self.pan_id));
        }
        if self.is_present(Self::PSKC_BIT) {
            tlvs.push(Tlv::new(meshcop::PSKC, self.pskc.to_vec()));
        }
        if self.is_present(Self::SECURITY_POLICY_BIT) {
            let mut value = self.security_policy.rotation_time.to_be_bytes().to_vec();
            value.extend_from_slice(&self.security_policy.flags);
            tlvs.push(Tlv::new(meshcop::SECURITY_POLICY, value));
        }
        tlvs
    }

    /// Decode a TLV set into a dataset, setting only the bits of fields seen.
    ///
    /// Types outside the dataset are ignored; they belong to the carrier
    /// message, not the dataset.
    pub fn from_tlvs(tlvs: &[Tlv]) -> Result<Self> {
        let mut dataset = Self::default();
        for t in tlvs {
            match t.typ {
                meshcop::ACTIVE_TIMESTAMP => {
                    dataset.active_timestamp = Timestamp::decode(&t.value)?;
                    dataset.present_flags |= Self::ACTIVE_TIMESTAMP_BIT;
                }
                meshcop::CHANNEL => {
                    let [page, hi, lo] = t.value.as_slice() else {
                        return Err(Error::InvalidArgs("channel TLV must be 3 bytes".into()));
                    };
                    dataset.channel = Channel {
                        page: *page,
                        number: u16::from_be_bytes([*hi, *lo]),
                    };
                    dataset.present_flags |= Self::CHANNEL_BIT;
                }
                meshcop::CHANNEL_MASK => {
                    dataset.channel_mask = decode_channel_mask(&t.value)?;
                    dataset.present_flags |= Self::CHANNEL_MASK_BIT;
                }
                meshcop::EXTENDED_PAN_ID => {
                    dataset.extended_pan_id = t.value.as_slice().try_into().map_err(|_| {
                        Error::InvalidArgs("extended PAN ID TLV must be 8 bytes".into())
                    })?;
                    dataset.present_flags |= Self::EXTENDED_PAN_ID_BIT;
                }
                meshcop::MESH_LOCAL_PREFIX => {
                    dataset.mesh_local_prefix = t.value.as_slice().try_into().map_err(|_| {
                        Error::InvalidArgs("mesh-local prefix TLV must be a /64".into())
                    })?;
                    dataset.present_flags |= Self::MESH_LOCAL_PREFIX_BIT;
                }
                meshcop::NETWORK_MASTER_KEY => {
                    dataset.network_master_key = t.value.as_slice().try_into().map_err(|_| {
                        Error::InvalidArgs("network master key TLV must be 16 bytes".into())
                    })?;
                    dataset.present_flags |= Self::NETWORK_MASTER_KEY_BIT;
                }
                meshcop::NETWORK_NAME => {
                    let name = String::from_utf8(t.value.clone())
                        .map_err(|_| Error::InvalidArgs("network name is not UTF-8".into()))?;
                    if name.len() > 16 {
                        return Err(Error::InvalidArgs("network name exceeds 16 bytes".into()));
                    }
                    dataset.network_name = name;
                    dataset.present_flags |= Self::NETWORK_NAME_BIT;
                }
                meshcop::PAN_ID => {
                    dataset.pan_id = t.value_as_u16()?;
                    dataset.present_flags |= Self::PAN_ID_BIT;
                }
                meshcop::PSKC => {
                    dataset.pskc = t
                        .value
                        .as_slice()
                        .try_into()
                        .map_err(|_| Error::InvalidArgs("PSKc TLV must be 16 bytes".into()))?;
                    dataset.present_flags |= Self::PSKC_BIT;
                }
                meshcop::SECURITY_POLICY => {
                    if t.value.len() < 2 {
                        return Err(Error::InvalidArgs("security policy TLV too short".into()));
                    }
                    dataset.security_policy = SecurityPolicy {
                        rotation_time: u16::from_be_bytes([t.value[0], t.value[1]]),
                        flags: t.value[2..].to_vec(),
                    };
                    dataset.present_flags |= Self::SECURITY_POLICY_BIT;
                }
                _ => {}
            }
        }
        Ok(dataset)
    }
}

/// The Pending Operational Dataset: the Active fields plus a pending
/// timestamp and the delay timer after which the leader commits.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingOperationalDataset {
    pub active: ActiveOperationalDataset,
    pub pending_timestamp: Timestamp,
    /// Milliseconds until the leader applies this dataset
    pub delay_timer: u32,
}

impl PendingOperationalDataset {
    pub const PENDING_TIMESTAMP_BIT: u16 = 1 << 10;
    pub const DELAY_TIMER_BIT: u16 = 1 << 11;

    pub const ALL_BITS: u16 = ActiveOperationalDataset::ALL_BITS
        | Self::PENDING_TIMESTAMP_BIT
        | Self::DELAY_TIMER_BIT;

    pub fn is_present(&self, bit: u16) -> bool {
        self.active.present_flags & bit != 0
    }

    pub fn merge(&mut self, src: &Self) {
        self.active.merge(&src.active);
        if src.is_present(Self::PENDING_TIMESTAMP_BIT) {
            self.pending_timestamp = src.pending_timestamp;
            self.active.present_flags |= Self::PENDING_TIMESTAMP_BIT;
        }
        if src.is_present(Self::DELAY_TIMER_BIT) {
            self.delay_timer = src.delay_timer;
            self.active.present_flags |= Self::DELAY_TIMER_BIT;
        }
    }

    pub fn get_tlv_types(flags: u16) -> Vec<u8> {
        let mut types = ActiveOperationalDataset::get_tlv_types(flags);
        if flags & Self::PENDING_TIMESTAMP_BIT != 0 {
            types.push(meshcop::PENDING_TIMESTAMP);
        }
        if flags & Self::DELAY_TIMER_BIT != 0 {
            types.push(meshcop::DELAY_TIMER);
        }
        types
    }

    pub fn to_tlvs(&self) -> Vec<Tlv> {
        let mut tlvs = self.active.to_tlvs();
        if self.is_present(Self::PENDING_TIMESTAMP_BIT) {
            tlvs.push(Tlv::new(
                meshcop::PENDING_TIMESTAMP,
                self.pending_timestamp.encode().to_vec(),
            ));
        }
        if self.is_present(Self::DELAY_TIMER_BIT) {
            tlvs.push(Tlv::u32_value(meshcop::DELAY_TIMER, self.delay_timer));
        }
        tlvs
    }

    pub fn from_tlvs(tlvs: &[Tlv]) -> Result<Self> {
        let mut dataset = Self {
            active: ActiveOperationalDataset::from_tlvs(tlvs)?,
            ..Self::default()
        };
        if let Some(t) = tlv::find(tlvs, meshcop::PENDING_TIMESTAMP) {
            dataset.pending_timestamp = Timestamp::decode(&t.value)?;
            dataset.active.present_flags |= Self::PENDING_TIMESTAMP_BIT;
        }
        if let Some(t) = tlv::find(tlvs, meshcop::DELAY_TIMER) {
            dataset.delay_timer = t.value_as_u32()?;
            dataset.active.present_flags |= Self::DELAY_TIMER_BIT;
        }
        Ok(dataset)
    }
}

/// The network-wide joiner admission state.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommissionerDataset {
    /// RLOC-derived locator of the serving Border Agent; server-assigned
    pub border_agent_locator: u16,
    /// Commissioner session id; server-assigned
    pub session_id: u16,
    pub steering_data: Vec<u8>,
    pub ae_steering_data: Vec<u8>,
    pub nmkp_steering_data: Vec<u8>,
    pub joiner_udp_port: u16,
    pub ae_udp_port: u16,
    pub nmkp_udp_port: u16,
    pub present_flags: u16,
}

impl CommissionerDataset {
    pub const BORDER_AGENT_LOCATOR_BIT: u16 = 1 << 0;
    pub const SESSION_ID_BIT: u16 = 1 << 1;
    pub const STEERING_DATA_BIT: u16 = 1 << 2;
    pub const AE_STEERING_DATA_BIT: u16 = 1 << 3;
    pub const NMKP_STEERING_DATA_BIT: u16 = 1 << 4;
    pub const JOINER_UDP_PORT_BIT: u16 = 1 << 5;
    pub const AE_UDP_PORT_BIT: u16 = 1 << 6;
    pub const NMKP_UDP_PORT_BIT: u16 = 1 << 7;

    pub const ALL_BITS: u16 = 0x00FF;

    pub fn is_present(&self, bit: u16) -> bool {
        self.present_flags & bit != 0
    }

    /// Strip the server-assigned fields before a SET request.
    pub fn sanitize_for_set(&mut self) {
        self.present_flags &= !(Self::SESSION_ID_BIT | Self::BORDER_AGENT_LOCATOR_BIT);
    }

    /// Overlay `src` onto `self`.
    ///
    /// The locator and session id merge monotonically; steering data and
    /// joiner UDP ports are removed when absent in `src`, since a GET
    /// response omits fields that were cleared mesh-wide.
    pub fn merge(&mut self, src: &Self) {
        if src.is_present(Self::BORDER_AGENT_LOCATOR_BIT) {
            self.border_agent_locator = src.border_agent_locator;
            self.present_flags |= Self::BORDER_AGENT_LOCATOR_BIT;
        }
        if src.is_present(Self::SESSION_ID_BIT) {
            self.session_id = src.session_id;
            self.present_flags |= Self::SESSION_ID_BIT;
        }
        macro_rules! overlay_or_clear {
            ($bit:expr, $field:ident) => {
                if src.present_flags & $bit != 0 {
                    self.$field = src.$field.clone();
                    self.present_flags |= $bit;
                } else {
                    self.present_flags &= !$bit;
                }
            };
        }
        overlay_or_clear!(Self::STEERING_DATA_BIT, steering_data);
        overlay_or_clear!(Self::AE_STEERING_DATA_BIT, ae_steering_data);
        overlay_or_clear!(Self::NMKP_STEERING_DATA_BIT, nmkp_steering_data);
        overlay_or_clear!(Self::JOINER_UDP_PORT_BIT, joiner_udp_port);
        overlay_or_clear!(Self::AE_UDP_PORT_BIT, ae_udp_port);
        overlay_or_clear!(Self::NMKP_UDP_PORT_BIT, nmkp_udp_port);
    }

    pub fn get_tlv_types(flags: u16) -> Vec<u8> {
        let table = [
            (Self::BORDER_AGENT_LOCATOR_BIT, meshcop::BORDER_AGENT_LOCATOR),
            (Self::SESSION_ID_BIT, meshcop::COMMISSIONER_SESSION_ID),
            (Self::STEERING_DATA_BIT, meshcop::STEERING_DATA),
            (Self::AE_STEERING_DATA_BIT, meshcop::AE_STEERING_DATA),
            (Self::NMKP_STEERING_DATA_BIT, meshcop::NMKP_STEERING_DATA),
            (Self::JOINER_UDP_PORT_BIT, meshcop::JOINER_UDP_PORT),
            (Self::AE_UDP_PORT_BIT, meshcop::AE_UDP_PORT),
            (Self::NMKP_UDP_PORT_BIT, meshcop::NMKP_UDP_PORT),
        ];
        let mut types = Vec::new();
        for (bit, typ) in table {
            if flags & bit != 0 {
                types.push(typ);
            }
        }
        types
    }

    pub fn to_tlvs(&self) -> Vec<Tlv> {
        let mut tlvs = Vec::new();
        if self.is_present(Self::BORDER_AGENT_LOCATOR_BIT) {
            tlvs.push(Tlv::u16_value(
                meshcop::BORDER_AGENT_LOCATOR,
                self.border_agent_locator,
            ));
        }
        if self.is_present(Self::SESSION_ID_BIT) {
            tlvs.push(Tlv::u16_value(
                meshcop::COMMISSIONER_SESSION_ID,
                self.session_id,
            ));
        }
        if self.is_present(Self::STEERING_DATA_BIT) {
            tlvs.push(Tlv::new(meshcop::STEERING_DATA, self.steering_data.clone()));
        }
        if self.is_present(Self::AE_STEERING_DATA_BIT) {
            tlvs.push(Tlv::new(
                meshcop::AE_STEERING_DATA,
                self.ae_steering_data.clone(),
            ));
        }
        if self.is_present(Self::NMKP_STEERING_DATA_BIT) {
            tlvs.push(Tlv::new(
                meshcop::NMKP_STEERING_DATA,
                self.nmkp_steering_data.clone(),
            ));
        }
        if self.is_present(Self::JOINER_UDP_PORT_BIT) {
            tlvs.push(Tlv::u16_value(meshcop::JOINER_UDP_PORT, self.joiner_udp_port));
        }
        if self.is_present(Self::AE_UDP_PORT_BIT) {
            tlvs.push(Tlv::u16_value(meshcop::AE_UDP_PORT, self.ae_udp_port));
        }
        if self.is_present(Self::NMKP_UDP_PORT_BIT) {
            tlvs.push(Tlv::u16_value(meshcop::NMKP_UDP_PORT, self.nmkp_udp_port));
        }
        tlvs
    }

    pub fn from_tlvs(tlvs: &[Tlv]) -> Result<Self> {
        let mut dataset = Self::default();
        for t in tlvs {
            match t.typ {
                meshcop::BORDER_AGENT_LOCATOR => {
                    dataset.border_agent_locator = t.value_as_u16()?;
                    dataset.present_flags |= Self::BORDER_AGENT_LOCATOR_BIT;
                }
                meshcop::COMMISSIONER_SESSION_ID => {
                    dataset.session_id = t.value_as_u16()?;
                    dataset.present_flags |= Self::SESSION_ID_BIT;
                }
                meshcop::STEERING_DATA => {
                    dataset.steering_data = t.value.clone();
                    dataset.present_flags |= Self::STEERING_DATA_BIT;
                }
                meshcop::AE_STEERING_DATA => {
                    dataset.ae_steering_data = t.value.clone();
                    dataset.present_flags |= Self::AE_STEERING_DATA_BIT;
                }
                meshcop::NMKP_STEERING_DATA => {
                    dataset.nmkp_steering_data = t.value.clone();
                    dataset.present_flags |= Self::NMKP_STEERING_DATA_BIT;
                }
                meshcop::JOINER_UDP_PORT => {
                    dataset.joiner_udp_port = t.value_as_u16()?;
                    dataset.present_flags |= Self::JOINER_UDP_PORT_BIT;
                }
                meshcop::AE_UDP_PORT => {
                    dataset.ae_udp_port = t.value_as_u16()?;
                    dataset.present_flags |= Self::AE_UDP_PORT_BIT;
                }
                meshcop::NMKP_UDP_PORT => {
                    dataset.nmkp_udp_port = t.value_as_u16()?;
                    dataset.present_flags |= Self::NMKP_UDP_PORT_BIT;
                }
                _ => {}
            }
        }
        Ok(dataset)
    }
}

/// Backbone Router dataset, CCM networks only.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BbrDataset {
    pub tri_hostname: String,
    pub registrar_hostname: String,
    pub registrar_ipv6_addr: String,
    pub present_flags: u16,
}

impl BbrDataset {
    pub const TRI_HOSTNAME_BIT: u16 = 1 << 0;
    pub const REGISTRAR_HOSTNAME_BIT: u16 = 1 << 1;
    pub const REGISTRAR_IPV6_ADDR_BIT: u16 = 1 << 2;

    pub const ALL_BITS: u16 = 0x0007;

    pub fn is_present(&self, bit: u16) -> bool {
        self.present_flags & bit != 0
    }

    pub fn merge(&mut self, src: &Self) {
        macro_rules! overlay {
            ($bit:expr, $field:ident) => {
                if src.present_flags & $bit != 0 {
                    self.$field = src.$field.clone();
                    self.present_flags |= $bit;
                }
            };
        }
        overlay!(Self::TRI_HOSTNAME_BIT, tri_hostname);
        overlay!(Self::REGISTRAR_HOSTNAME_BIT, registrar_hostname);
        overlay!(Self::REGISTRAR_IPV6_ADDR_BIT, registrar_ipv6_addr);
    }

    pub fn get_tlv_types(flags: u16) -> Vec<u8> {
        let table = [
            (Self::TRI_HOSTNAME_BIT, meshcop::TRI_HOSTNAME),
            (Self::REGISTRAR_HOSTNAME_BIT, meshcop::REGISTRAR_HOSTNAME),
            (Self::REGISTRAR_IPV6_ADDR_BIT, meshcop::REGISTRAR_IPV6_ADDRESS),
        ];
        let mut types = Vec::new();
        for (bit, typ) in table {
            if flags & bit != 0 {
                types.push(typ);
            }
        }
        types
    }

    pub fn to_tlvs(&self) -> Vec<Tlv> {
        let mut tlvs = Vec::new();
        if self.is_present(Self::TRI_HOSTNAME_BIT) {
            tlvs.push(Tlv::new(
                meshcop::TRI_HOSTNAME,
                self.tri_hostname.as_bytes().to_vec(),
            ));
        }
        if self.is_present(Self::REGISTRAR_HOSTNAME_BIT) {
            tlvs.push(Tlv::new(
                meshcop::REGISTRAR_HOSTNAME,
                self.registrar_hostname.as_bytes().to_vec(),
            ));
        }
        if self.is_present(Self::REGISTRAR_IPV6_ADDR_BIT) {
            tlvs.push(Tlv::new(
                meshcop::REGISTRAR_IPV6_ADDRESS,
                self.registrar_ipv6_addr.as_bytes().to_vec(),
            ));
        }
        tlvs
    }

    pub fn from_tlvs(tlvs: &[Tlv]) -> Result<Self> {
        let mut dataset = Self::default();
        let read_string = |t: &Tlv, what: &str| {
            String::from_utf8(t.value.clone())
                .map_err(|_| Error::InvalidArgs(format!("{what} is not UTF-8")))
        };
        for t in tlvs {
            match t.typ {
                meshcop::TRI_HOSTNAME => {
                    dataset.tri_hostname = read_string(t, "TRI hostname")?;
                    dataset.present_flags |= Self::TRI_HOSTNAME_BIT;
                }
                meshcop::REGISTRAR_HOSTNAME => {
                    dataset.registrar_hostname = read_string(t, "registrar hostname")?;
                    dataset.present_flags |= Self::REGISTRAR_HOSTNAME_BIT;
                }
                meshcop::REGISTRAR_IPV6_ADDRESS => {
                    dataset.registrar_ipv6_addr = read_string(t, "registrar IPv6 address")?;
                    dataset.present_flags |= Self::REGISTRAR_IPV6_ADDR_BIT;
                }
                _ => {}
            }
        }
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_active() -> ActiveOperationalDataset {
        let mut dataset = ActiveOperationalDataset {
            active_timestamp: Timestamp::new(10, 0, false),
            channel: Channel { page: 0, number: 19 },
            channel_mask: vec![ChannelMaskEntry {
                page: 0,
                masks: 0x07FF_F800,
            }],
            extended_pan_id: [0xDE, 0xAD, 0x00, 0xBE, 0xEF, 0x00, 0xCA, 0xFE],
            mesh_local_prefix: [0xFD, 0x00, 0x0D, 0xB8, 0, 0, 0, 1],
            network_master_key: [0x11; 16],
            network_name: "OpenThread".into(),
            pan_id: 0xFACE,
            pskc: [0x3A; 16],
            security_policy: SecurityPolicy {
                rotation_time: 672,
                flags: vec![0xFF],
            },
            ..Default::default()
        };
        dataset.present_flags = ActiveOperationalDataset::ALL_BITS;
        dataset
    }

    #[test]
    fn test_timestamp_packing() {
        let ts = Timestamp::new(0x1234_5678_9ABC, 0x7FFF, true);
        let decoded = Timestamp::decode(&ts.encode()).unwrap();
        assert_eq!(decoded, ts);
        // authoritative bit lands in the LSB
        assert_eq!(Timestamp::new(0, 0, true).encode()[7], 1);
    }

    #[test]
    fn test_active_tlv_roundtrip() {
        let dataset = sample_active();
        let decoded = ActiveOperationalDataset::from_tlvs(&dataset.to_tlvs()).unwrap();
        assert_eq!(decoded, dataset);
    }

    #[test]
    fn test_absent_fields_not_encoded() {
        let mut dataset = ActiveOperationalDataset::default();
        dataset.pan_id = 0xFACE;
        dataset.present_flags = ActiveOperationalDataset::PAN_ID_BIT;
        let tlvs = dataset.to_tlvs();
        assert_eq!(tlvs.len(), 1);
        assert_eq!(tlvs[0].typ, meshcop::PAN_ID);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut dataset = sample_active();
        let copy = dataset.clone();
        dataset.merge(&copy);
        assert_eq!(dataset, copy);
    }

    #[test]
    fn test_merge_overlays_only_present_fields() {
        let mut dst = sample_active();
        let mut src = ActiveOperationalDataset::default();
        src.pan_id = 0x1234;
        src.present_flags = ActiveOperationalDataset::PAN_ID_BIT;
        dst.merge(&src);
        assert_eq!(dst.pan_id, 0x1234);
        // untouched fields survive
        assert_eq!(dst.network_name, "OpenThread");
        assert_eq!(dst.present_flags, ActiveOperationalDataset::ALL_BITS);
    }

    #[test]
    fn test_pending_roundtrip_with_delay() {
        let mut pending = PendingOperationalDataset::default();
        pending.active.channel = Channel { page: 0, number: 15 };
        pending.active.present_flags |= ActiveOperationalDataset::CHANNEL_BIT;
        pending.delay_timer = 30_000;
        pending.active.present_flags |= PendingOperationalDataset::DELAY_TIMER_BIT;

        let decoded = PendingOperationalDataset::from_tlvs(&pending.to_tlvs()).unwrap();
        assert_eq!(decoded, pending);
        assert!(decoded.is_present(PendingOperationalDataset::DELAY_TIMER_BIT));
    }

    #[test]
    fn test_commissioner_merge_clears_absent_steering() {
        let mut dst = CommissionerDataset::default();
        dst.steering_data = vec![0xFF];
        dst.ae_steering_data = vec![0xFF];
        dst.present_flags = CommissionerDataset::STEERING_DATA_BIT
            | CommissionerDataset::AE_STEERING_DATA_BIT;

        // Server response carries a session id and MeshCoP steering data but
        // omits the AE variant: the AE flag must be cleared.
        let mut src = CommissionerDataset::default();
        src.session_id = 42;
        src.steering_data = vec![0x01];
        src.present_flags =
            CommissionerDataset::SESSION_ID_BIT | CommissionerDataset::STEERING_DATA_BIT;

        dst.merge(&src);
        assert_eq!(dst.session_id, 42);
        assert!(dst.is_present(CommissionerDataset::SESSION_ID_BIT));
        assert_eq!(dst.steering_data, vec![0x01]);
        assert!(!dst.is_present(CommissionerDataset::AE_STEERING_DATA_BIT));
    }

    #[test]
    fn test_commissioner_merge_keeps_locator_when_absent() {
        let mut dst = CommissionerDataset::default();
        dst.border_agent_locator = 0x0400;
        dst.present_flags = CommissionerDataset::BORDER_AGENT_LOCATOR_BIT;

        dst.merge(&CommissionerDataset::default());
        assert!(dst.is_present(CommissionerDataset::BORDER_AGENT_LOCATOR_BIT));
        assert_eq!(dst.border_agent_locator, 0x0400);
    }

    #[test]
    fn test_sanitize_for_set() {
        let mut dataset = CommissionerDataset::default();
        dataset.session_id = 7;
        dataset.border_agent_locator = 0x0400;
        dataset.steering_data = vec![0xFF];
        dataset.present_flags = CommissionerDataset::SESSION_ID_BIT
            | CommissionerDataset::BORDER_AGENT_LOCATOR_BIT
            | CommissionerDataset::STEERING_DATA_BIT;

        dataset.sanitize_for_set();
        assert!(!dataset.is_present(CommissionerDataset::SESSION_ID_BIT));
        assert!(!dataset.is_present(CommissionerDataset::BORDER_AGENT_LOCATOR_BIT));
        assert!(dataset.is_present(CommissionerDataset::STEERING_DATA_BIT));
    }

    #[test]
    fn test_get_tlv_types_follow_flags() {
        let types = ActiveOperationalDataset::get_tlv_types(
            ActiveOperationalDataset::CHANNEL_BIT | ActiveOperationalDataset::PAN_ID_BIT,
        );
        assert_eq!(types, vec![meshcop::CHANNEL, meshcop::PAN_ID]);

        let all = CommissionerDataset::get_tlv_types(0xFFFF);
        assert_eq!(all.len(), 8);
    }

    #[test]
    fn test_bbr_roundtrip() {
        let mut dataset = BbrDataset::default();
        dataset.tri_hostname = "tri.example.com".into();
        dataset.registrar_ipv6_addr = "fd00:db8::1".into();
        dataset.present_flags =
            BbrDataset::TRI_HOSTNAME_BIT | BbrDataset::REGISTRAR_IPV6_ADDR_BIT;

        let decoded = BbrDataset::from_tlvs(&dataset.to_tlvs()).unwrap();
        assert_eq!(decoded, dataset);
    }
}
