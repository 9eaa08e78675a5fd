//! Network data persistence
//!
//! `SaveNetworkData` writes one JSON object with a sub-object per cached
//! dataset. A field appears only while its present-flag is set, so loading
//! the file reconstructs the exact same sparse records.

use std::fs;
use std::path::Path;

use serde_json::{json, Map, Value};

use crate::dataset::{
    ActiveOperationalDataset, BbrDataset, Channel, ChannelMaskEntry, CommissionerDataset,
    PendingOperationalDataset, SecurityPolicy, Timestamp,
};
use crate::error::{Error, Result};

/// Snapshot of the four cached datasets.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NetworkData {
    pub active_dataset: ActiveOperationalDataset,
    pub pending_dataset: PendingOperationalDataset,
    pub commissioner_dataset: CommissionerDataset,
    pub bbr_dataset: BbrDataset,
}

pub fn save_network_data(path: impl AsRef<Path>, network_data: &NetworkData) -> Result<()> {
    let json = network_data_to_json(network_data);
    fs::write(path, serde_json::to_string_pretty(&json)?)?;
    Ok(())
}

pub fn load_network_data(path: impl AsRef<Path>) -> Result<NetworkData> {
    let content = fs::read_to_string(path)?;
    network_data_from_json(&serde_json::from_str(&content)?)
}

pub fn network_data_to_json(network_data: &NetworkData) -> Value {
    json!({
        "ActiveDataset": active_to_json(&network_data.active_dataset),
        "PendingDataset": pending_to_json(&network_data.pending_dataset),
        "CommissionerDataset": commissioner_to_json(&network_data.commissioner_dataset),
        "BbrDataset": bbr_to_json(&network_data.bbr_dataset),
    })
}

pub fn network_data_from_json(value: &Value) -> Result<NetworkData> {
    Ok(NetworkData {
        active_dataset: active_from_json(section(value, "ActiveDataset")?)?,
        pending_dataset: pending_from_json(section(value, "PendingDataset")?)?,
        commissioner_dataset: commissioner_from_json(section(value, "CommissionerDataset")?)?,
        bbr_dataset: bbr_from_json(section(value, "BbrDataset")?)?,
    })
}

fn section<'a>(value: &'a Value, name: &str) -> Result<&'a Value> {
    value
        .get(name)
        .ok_or_else(|| Error::InvalidArgs(format!("network data misses {}", name)))
}

fn timestamp_to_json(timestamp: &Timestamp) -> Value {
    json!({
        "Seconds": timestamp.seconds,
        "Ticks": timestamp.ticks,
        "U": timestamp.authoritative,
    })
}

fn timestamp_from_json(value: &Value) -> Result<Timestamp> {
    Ok(Timestamp {
        seconds: require_u64(value, "Seconds")?,
        ticks: require_u64(value, "Ticks")? as u16,
        authoritative: value.get("U").and_then(Value::as_bool).unwrap_or(false),
    })
}

pub(crate) fn active_to_json(dataset: &ActiveOperationalDataset) -> Value {
    let mut map = Map::new();
    if dataset.is_present(ActiveOperationalDataset::ACTIVE_TIMESTAMP_BIT) {
        map.insert(
            "ActiveTimestamp".into(),
            timestamp_to_json(&dataset.active_timestamp),
        );
    }
    if dataset.is_present(ActiveOperationalDataset::CHANNEL_BIT) {
        map.insert(
            "Channel".into(),
            json!({"Page": dataset.channel.page, "Number": dataset.channel.number}),
        );
    }
    if dataset.is_present(ActiveOperationalDataset::CHANNEL_MASK_BIT) {
        let entries: Vec<Value> = dataset
            .channel_mask
            .iter()
            .map(|entry| json!({"Page": entry.page, "Masks": entry.masks}))
            .collect();
        map.insert("ChannelMask".into(), Value::Array(entries));
    }
    if dataset.is_present(ActiveOperationalDataset::EXTENDED_PAN_ID_BIT) {
        map.insert(
            "ExtendedPanId".into(),
            Value::String(hex::encode(dataset.extended_pan_id)),
        );
    }
    if dataset.is_present(ActiveOperationalDataset::MESH_LOCAL_PREFIX_BIT) {
        map.insert(
            "MeshLocalPrefix".into(),
            Value::String(hex::encode(dataset.mesh_local_prefix)),
        );
    }
    if dataset.is_present(ActiveOperationalDataset::NETWORK_MASTER_KEY_BIT) {
        map.insert(
            "NetworkMasterKey".into(),
            Value::String(hex::encode(dataset.network_master_key)),
        );
    }
    if dataset.is_present(ActiveOperationalDataset::NETWORK_NAME_BIT) {
        map.insert(
            "NetworkName".into(),
            Value::String(dataset.network_name.clone()),
        );
    }
    if dataset.is_present(ActiveOperationalDataset::PAN_ID_BIT) {
        map.insert("PanId".into(), json!(dataset.pan_id));
    }
    if dataset.is_present(ActiveOperationalDataset::PSKC_BIT) {
        map.insert("PSKc".into(), Value::String(hex::encode(dataset.pskc)));
    }
    if dataset.is_present(ActiveOperationalDataset::SECURITY_POLICY_BIT) {
        map.insert(
            "SecurityPolicy".into(),
            json!({
                "RotationTime": dataset.security_policy.rotation_time,
                "Flags": hex::encode(&dataset.security_policy.flags),
            }),
        );
    }
    Value::Object(map)
}

fn active_from_json(value: &Value) -> Result<ActiveOperationalDataset> {
    let mut dataset = ActiveOperationalDataset::default();
    if let Some(ts) = value.get("ActiveTimestamp") {
        dataset.active_timestamp = timestamp_from_json(ts)?;
        dataset.present_flags |= ActiveOperationalDataset::ACTIVE_TIMESTAMP_BIT;
    }
    if let Some(channel) = value.get("Channel") {
        dataset.channel = Channel {
            page: require_u64(channel, "Page")? as u8,
            number: require_u64(channel, "Number")? as u16,
        };
        dataset.present_flags |= ActiveOperationalDataset::CHANNEL_BIT;
    }
    if let Some(mask) = value.get("ChannelMask").and_then(Value::as_array) {
        let mut entries = Vec::with_capacity(mask.len());
        for entry in mask {
            entries.push(ChannelMaskEntry {
                page: require_u64(entry, "Page")? as u8,
                masks: require_u64(entry, "Masks")? as u32,
            });
        }
        dataset.channel_mask = entries;
        dataset.present_flags |= ActiveOperationalDataset::CHANNEL_MASK_BIT;
    }
    if let Some(bytes) = hex_field(value, "ExtendedPanId")? {
        dataset.extended_pan_id = fixed(&bytes, "ExtendedPanId")?;
        dataset.present_flags |= ActiveOperationalDataset::EXTENDED_PAN_ID_BIT;
    }
    if let Some(bytes) = hex_field(value, "MeshLocalPrefix")? {
        dataset.mesh_local_prefix = fixed(&bytes, "MeshLocalPrefix")?;
        dataset.present_flags |= ActiveOperationalDataset::MESH_LOCAL_PREFIX_BIT;
    }
    if let Some(bytes) = hex_field(value, "NetworkMasterKey")? {
        dataset.network_master_key = fixed(&bytes, "NetworkMasterKey")?;
        dataset.present_flags |= ActiveOperationalDataset::NETWORK_MASTER_KEY_BIT;
    }
    if let Some(name) = value.get("NetworkName").and_then(Value::as_str) {
        dataset.network_name = name.to_string();
        dataset.present_flags |= ActiveOperationalDataset::NETWORK_NAME_BIT;
    }
    if let Some(pan_id) = value.get("PanId") {
        dataset.pan_id = pan_id
            .as_u64()
            .ok_or_else(|| Error::InvalidArgs("PanId is not a number".into()))?
            as u16;
        dataset.present_flags |= ActiveOperationalDataset::PAN_ID_BIT;
    }
    if let Some(bytes) = hex_field(value, "PSKc")? {
        dataset.pskc = fixed(&bytes, "PSKc")?;
        dataset.present_flags |= ActiveOperationalDataset::PSKC_BIT;
    }
    if let Some(policy) = value.get("SecurityPolicy") {
        dataset.security_policy = SecurityPolicy {
            rotation_time: require_u64(policy, "RotationTime")? as u16,
            flags: hex_field(policy, "Flags")?.unwrap_or_default(),
        };
        dataset.present_flags |= ActiveOperationalDataset::SECURITY_POLICY_BIT;
    }
    Ok(dataset)
}

pub(crate) fn pending_to_json(dataset: &PendingOperationalDataset) -> Value {
    let mut value = active_to_json(&dataset.active);
    let map = value.as_object_mut().expect("active JSON is an object");
    if dataset.is_present(PendingOperationalDataset::PENDING_TIMESTAMP_BIT) {
        map.insert(
            "PendingTimestamp".into(),
            timestamp_to_json(&dataset.pending_timestamp),
        );
    }
    if dataset.is_present(PendingOperationalDataset::DELAY_TIMER_BIT) {
        map.insert("DelayTimer".into(), json!(dataset.delay_timer));
    }
    value
}

fn pending_from_json(value: &Value) -> Result<PendingOperationalDataset> {
    let mut dataset = PendingOperationalDataset {
        active: active_from_json(value)?,
        ..Default::default()
    };
    if let Some(ts) = value.get("PendingTimestamp") {
        dataset.pending_timestamp = timestamp_from_json(ts)?;
        dataset.active.present_flags |= PendingOperationalDataset::PENDING_TIMESTAMP_BIT;
    }
    if let Some(delay) = value.get("DelayTimer") {
        dataset.delay_timer = delay
            .as_u64()
            .ok_or_else(|| Error::InvalidArgs("DelayTimer is not a number".into()))?
            as u32;
        dataset.active.present_flags |= PendingOperationalDataset::DELAY_TIMER_BIT;
    }
    Ok(dataset)
}

pub(crate) fn commissioner_to_json(dataset: &CommissionerDataset) -> Value {
    let mut map = Map::new();
    if dataset.is_present(CommissionerDataset::BORDER_AGENT_LOCATOR_BIT) {
        map.insert(
            "BorderAgentLocator".into(),
            json!(dataset.border_agent_locator),
        );
    }
    if dataset.is_present(CommissionerDataset::SESSION_ID_BIT) {
        map.insert("SessionId".into(), json!(dataset.session_id));
    }
    if dataset.is_present(CommissionerDataset::STEERING_DATA_BIT) {
        map.insert(
            "SteeringData".into(),
            Value::String(hex::encode(&dataset.steering_data)),
        );
    }
    if dataset.is_present(CommissionerDataset::AE_STEERING_DATA_BIT) {
        map.insert(
            "AeSteeringData".into(),
            Value::String(hex::encode(&dataset.ae_steering_data)),
        );
    }
    if dataset.is_present(CommissionerDataset::NMKP_STEERING_DATA_BIT) {
        map.insert(
            "NmkpSteeringData".into(),
            Value::String(hex::encode(&dataset.nmkp_steering_data)),
        );
    }
    if dataset.is_present(CommissionerDataset::JOINER_UDP_PORT_BIT) {
        map.insert("JoinerUdpPort".into(), json!(dataset.joiner_udp_port));
    }
    if dataset.is_present(CommissionerDataset::AE_UDP_PORT_BIT) {
        map.insert("AeUdpPort".into(), json!(dataset.ae_udp_port));
    }
    if dataset.is_present(CommissionerDataset::NMKP_UDP_PORT_BIT) {
        map.insert("NmkpUdpPort".into(), json!(dataset.nmkp_udp_port));
    }
    Value::Object(map)
}

fn commissioner_from_json(value: &Value) -> Result<CommissionerDataset> {
    let mut dataset = CommissionerDataset::default();
    if let Some(n) = opt_number(value, "BorderAgentLocator")? {
        dataset.border_agent_locator = n as u16;
        dataset.present_flags |= CommissionerDataset::BORDER_AGENT_LOCATOR_BIT;
    }
    if let Some(n) = opt_number(value, "SessionId")? {
        dataset.session_id = n as u16;
        dataset.present_flags |= CommissionerDataset::SESSION_ID_BIT;
    }
    if let Some(n) = opt_number(value, "JoinerUdpPort")? {
        dataset.joiner_udp_port = n as u16;
        dataset.present_flags |= CommissionerDataset::JOINER_UDP_PORT_BIT;
    }
    if let Some(n) = opt_number(value, "AeUdpPort")? {
        dataset.ae_udp_port = n as u16;
        dataset.present_flags |= CommissionerDataset::AE_UDP_PORT_BIT;
    }
    if let Some(n) = opt_number(value, "NmkpUdpPort")? {
        dataset.nmkp_udp_port = n as u16;
        dataset.present_flags |= CommissionerDataset::NMKP_UDP_PORT_BIT;
    }
    if let Some(bytes) = hex_field(value, "SteeringData")? {
        dataset.steering_data = bytes;
        dataset.present_flags |= CommissionerDataset::STEERING_DATA_BIT;
    }
    if let Some(bytes) = hex_field(value, "AeSteeringData")? {
        dataset.ae_steering_data = bytes;
        dataset.present_flags |= CommissionerDataset::AE_STEERING_DATA_BIT;
    }
    if let Some(bytes) = hex_field(value, "NmkpSteeringData")? {
        dataset.nmkp_steering_data = bytes;
        dataset.present_flags |= CommissionerDataset::NMKP_STEERING_DATA_BIT;
    }
    Ok(dataset)
}

pub(crate) fn bbr_to_json(dataset: &BbrDataset) -> Value {
    let mut map = Map::new();
    if dataset.is_present(BbrDataset::TRI_HOSTNAME_BIT) {
        map.insert(
            "TriHostname".into(),
            Value::String(dataset.tri_hostname.clone()),
        );
    }
    if dataset.is_present(BbrDataset::REGISTRAR_HOSTNAME_BIT) {
        map.insert(
            "RegistrarHostname".into(),
            Value::String(dataset.registrar_hostname.clone()),
        );
    }
    if dataset.is_present(BbrDataset::REGISTRAR_IPV6_ADDR_BIT) {
        map.insert(
            "RegistrarIpv6Addr".into(),
            Value::String(dataset.registrar_ipv6_addr.clone()),
        );
    }
    Value::Object(map)
}

fn bbr_from_json(value: &Value) -> Result<BbrDataset> {
    let mut dataset = BbrDataset::default();
    if let Some(hostname) = value.get("TriHostname").and_then(Value::as_str) {
        dataset.tri_hostname = hostname.to_string();
        dataset.present_flags |= BbrDataset::TRI_HOSTNAME_BIT;
    }
    if let Some(hostname) = value.get("RegistrarHostname").and_then(Value::as_str) {
        dataset.registrar_hostname = hostname.to_string();
        dataset.present_flags |= BbrDataset::REGISTRAR_HOSTNAME_BIT;
    }
    if let Some(addr) = value.get("RegistrarIpv6Addr").and_then(Value::as_str) {
        dataset.registrar_ipv6_addr = addr.to_string();
        dataset.present_flags |= BbrDataset::REGISTRAR_IPV6_ADDR_BIT;
    }
    Ok(dataset)
}

fn opt_number(value: &Value, name: &str) -> Result<Option<u64>> {
    match value.get(name) {
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| Error::InvalidArgs(format!("{} is not a number", name))),
        None => Ok(None),
    }
}

fn require_u64(value: &Value, name: &str) -> Result<u64> {
    value
        .get(name)
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::InvalidArgs(format!("{} is missing or not a number", name)))
}

fn hex_field(value: &Value, name: &str) -> Result<Option<Vec<u8>>> {
    match value.get(name).and_then(Value::as_str) {
        Some(text) => {
            let bytes = hex::decode(text)
                .map_err(|err| Error::InvalidArgs(format!("bad hex in {}: {}", name, err)))?;
            Ok(Some(bytes))
        }
        None => Ok(None),
    }
}

fn fixed<const N: usize>(bytes: &[u8], name: &str) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::InvalidArgs(format!("{} must be {} bytes", name, N)))
}
