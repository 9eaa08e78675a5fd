//! Border Agent records
//!
//! mDNS discovery itself is a collaborator; this module holds the record it
//! delivers and the lookup the CLI uses to turn a network name into an
//! address to petition.

use crate::error::Result;

/// One advertised Border Agent service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BorderAgent {
    pub network_name: String,
    pub extended_pan_id: [u8; 8],
    pub addr: String,
    pub port: u16,
    /// Raw state bitmap from the service TXT record
    pub state_bitmap: u32,
    /// CCM domain, when advertised
    pub domain_name: String,
}

/// mDNS browser for `_meshcop._udp` services.
pub trait BorderAgentDiscovery: Send {
    fn discover(&mut self) -> Result<Vec<BorderAgent>>;
}

/// Pick a Border Agent by network name; an empty name takes the first.
pub fn find_border_agent<'a>(agents: &'a [BorderAgent], network_name: &str) -> Option<&'a BorderAgent> {
    agents
        .iter()
        .find(|ba| network_name.is_empty() || ba.network_name == network_name)
}
