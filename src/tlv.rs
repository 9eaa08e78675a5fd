//! MeshCoP TLV records
//!
//! The wire unit of the commissioning protocol: Type-Length-Value records
//! with one-byte types, one-byte lengths and an escaped three-byte form for
//! values longer than 254 bytes. TLV types this crate does not know are
//! carried through opaquely.

use crate::error::{Error, Result};

/// MeshCoP-scope TLV types (carried on `/c/*` and `/t/*` URIs)
pub mod meshcop {
    pub const CHANNEL: u8 = 0;
    pub const PAN_ID: u8 = 1;
    pub const EXTENDED_PAN_ID: u8 = 2;
    pub const NETWORK_NAME: u8 = 3;
    pub const PSKC: u8 = 4;
    pub const NETWORK_MASTER_KEY: u8 = 5;
    pub const MESH_LOCAL_PREFIX: u8 = 7;
    pub const STEERING_DATA: u8 = 8;
    pub const BORDER_AGENT_LOCATOR: u8 = 9;
    pub const COMMISSIONER_ID: u8 = 10;
    pub const COMMISSIONER_SESSION_ID: u8 = 11;
    pub const SECURITY_POLICY: u8 = 12;
    pub const GET: u8 = 13;
    pub const ACTIVE_TIMESTAMP: u8 = 14;
    pub const STATE: u8 = 16;
    pub const JOINER_UDP_PORT: u8 = 18;
    pub const PROVISIONING_URL: u8 = 32;
    pub const PENDING_TIMESTAMP: u8 = 51;
    pub const DELAY_TIMER: u8 = 52;
    pub const CHANNEL_MASK: u8 = 53;
    pub const COUNT: u8 = 54;
    pub const PERIOD: u8 = 55;
    pub const SCAN_DURATION: u8 = 56;
    pub const ENERGY_LIST: u8 = 57;
    pub const AE_STEERING_DATA: u8 = 61;
    pub const NMKP_STEERING_DATA: u8 = 62;
    pub const COMMISSIONER_TOKEN: u8 = 63;
    pub const AE_UDP_PORT: u8 = 64;
    pub const NMKP_UDP_PORT: u8 = 65;
    pub const TRI_HOSTNAME: u8 = 66;
    pub const REGISTRAR_HOSTNAME: u8 = 67;
    pub const REGISTRAR_IPV6_ADDRESS: u8 = 68;
    pub const COMMISSIONER_PEN_SIGNATURE: u8 = 69;
}

/// Network-layer-scope TLV types (carried on `/n/*` URIs)
pub mod network {
    pub const STATUS: u8 = 4;
    pub const TIMEOUT: u8 = 11;
    pub const IPV6_ADDRESSES: u8 = 14;
}

/// Values of the State TLV
pub mod state {
    pub const REJECT: u8 = 0xFF;
    pub const PENDING: u8 = 0x00;
    pub const ACCEPT: u8 = 0x01;
}

/// A single TLV record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub typ: u8,
    pub value: Vec<u8>,
}

impl Tlv {
    pub fn new(typ: u8, value: Vec<u8>) -> Self {
        Self { typ, value }
    }

    /// A TLV holding a single byte
    pub fn u8_value(typ: u8, value: u8) -> Self {
        Self::new(typ, vec![value])
    }

    /// A TLV holding a big-endian u16
    pub fn u16_value(typ: u8, value: u16) -> Self {
        Self::new(typ, value.to_be_bytes().to_vec())
    }

    /// A TLV holding a big-endian u32
    pub fn u32_value(typ: u8, value: u32) -> Self {
        Self::new(typ, value.to_be_bytes().to_vec())
    }

    pub fn value_as_u8(&self) -> Result<u8> {
        match self.value.as_slice() {
            [b] => Ok(*b),
            _ => Err(Error::InvalidArgs(format!(
                "TLV {} is not a single byte",
                self.typ
            ))),
        }
    }

    pub fn value_as_u16(&self) -> Result<u16> {
        match self.value.as_slice() {
            [a, b] => Ok(u16::from_be_bytes([*a, *b])),
            _ => Err(Error::InvalidArgs(format!("TLV {} is not a u16", self.typ))),
        }
    }

    pub fn value_as_u32(&self) -> Result<u32> {
        match self.value.as_slice() {
            [a, b, c, d] => Ok(u32::from_be_bytes([*a, *b, *c, *d])),
            _ => Err(Error::InvalidArgs(format!("TLV {} is not a u32", self.typ))),
        }
    }

    /// Serialize this TLV, using the extended-length form when needed.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.typ);
        if self.value.len() < 0xFF {
            out.push(self.value.len() as u8);
        } else {
            out.push(0xFF);
            out.extend_from_slice(&(self.value.len() as u16).to_be_bytes());
        }
        out.extend_from_slice(&self.value);
    }
}

/// Serialize a TLV list in order.
pub fn encode_set(tlvs: &[Tlv]) -> Vec<u8> {
    let mut out = Vec::new();
    for tlv in tlvs {
        tlv.encode_into(&mut out);
    }
    out
}

/// Parse a byte buffer into a TLV list.
///
/// Unknown types are kept as opaque records; a truncated record is an error.
pub fn decode_set(buf: &[u8]) -> Result<Vec<Tlv>> {
    let mut tlvs = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        if pos + 2 > buf.len() {
            return Err(Error::InvalidArgs("truncated TLV header".into()));
        }
        let typ = buf[pos];
        let mut len = buf[pos + 1] as usize;
        pos += 2;
        if len == 0xFF {
            if pos + 2 > buf.len() {
                return Err(Error::InvalidArgs("truncated extended TLV length".into()));
            }
            len = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as usize;
            pos += 2;
        }
        if pos + len > buf.len() {
            return Err(Error::InvalidArgs(format!("truncated TLV {} value", typ)));
        }
        tlvs.push(Tlv::new(typ, buf[pos..pos + len].to_vec()));
        pos += len;
    }
    Ok(tlvs)
}

/// First TLV of the given type, if any.
pub fn find(tlvs: &[Tlv], typ: u8) -> Option<&Tlv> {
    tlvs.iter().find(|t| t.typ == typ)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_set() {
        let tlvs = vec![
            Tlv::u16_value(meshcop::PAN_ID, 0xFACE),
            Tlv::new(meshcop::NETWORK_NAME, b"OpenThread".to_vec()),
            Tlv::u8_value(meshcop::STATE, state::ACCEPT),
        ];
        let encoded = encode_set(&tlvs);
        let decoded = decode_set(&encoded).unwrap();
        assert_eq!(decoded, tlvs);
    }

    #[test]
    fn test_extended_length() {
        let tlv = Tlv::new(meshcop::COMMISSIONER_TOKEN, vec![0xAB; 300]);
        let mut out = Vec::new();
        tlv.encode_into(&mut out);
        assert_eq!(out[1], 0xFF);
        assert_eq!(u16::from_be_bytes([out[2], out[3]]), 300);
        let decoded = decode_set(&out).unwrap();
        assert_eq!(decoded, vec![tlv]);
    }

    #[test]
    fn test_unknown_type_passes_through() {
        let tlv = Tlv::new(0xE0, vec![1, 2, 3]);
        let decoded = decode_set(&encode_set(std::slice::from_ref(&tlv))).unwrap();
        assert_eq!(decoded, vec![tlv]);
    }

    #[test]
    fn test_truncated_value_rejected() {
        // claims 4 value bytes, provides 2
        let buf = [meshcop::PAN_ID, 4, 0x12, 0x34];
        assert!(decode_set(&buf).is_err());
    }

    #[test]
    fn test_find_returns_first_match() {
        let tlvs = vec![
            Tlv::u8_value(meshcop::CHANNEL, 11),
            Tlv::u16_value(meshcop::PAN_ID, 1),
            Tlv::u16_value(meshcop::PAN_ID, 2),
        ];
        assert_eq!(find(&tlvs, meshcop::PAN_ID).unwrap().value, vec![0, 1]);
        assert!(find(&tlvs, meshcop::STATE).is_none());
    }
}
