//! meshcop-commissioner: an external Thread Commissioner core
//!
//! This crate implements the application layer of an external Thread
//! Commissioner: it petitions a Border Agent for the exclusive commissioner
//! role, caches and edits the network's commissioning datasets, steers
//! joiner admission, and drives network-wide management commands, including
//! the Thread 1.2 Commercial Commissioning Mode (CCM) extensions.
//!
//! # Key Features
//!
//! - **Session lifecycle**: petition, periodic keepalive, resignation, with
//!   at most one active petition per controller
//! - **Sparse datasets**: Active/Pending Operational, Commissioner and BBR
//!   datasets as present-flag records with well-defined merge rules
//! - **Joiner steering**: Bloom-filter steering data rebuilt from the
//!   registry on every removal, with wildcard admission
//! - **Diagnostics**: PAN-ID queries, energy scans, announces, multicast
//!   listener registration against the Primary BBR
//!
//! The DTLS/CoAP stack, mDNS discovery and X.509 machinery stay outside;
//! they plug in through the [`TransportSession`], [`BorderAgentDiscovery`]
//! and [`Crypto`] traits.
//!
//! # Example
//!
//! ```ignore
//! use meshcop_commissioner::{AppConfig, Commissioner, DefaultCrypto};
//! use std::time::Duration;
//!
//! let config = AppConfig::from_file("commissioner.json")?;
//! let credentials = config.load_credentials()?;
//! let transport = my_dtls_backend(&credentials);
//!
//! let mut commissioner = Commissioner::new(
//!     &config.id,
//!     config.enable_ccm,
//!     &config.domain_name,
//!     Duration::from_secs(config.keepalive_interval),
//!     transport,
//!     Box::new(DefaultCrypto),
//! )?;
//!
//! let mut existing = String::new();
//! commissioner.start(&mut existing, "fd00::1", 49191)?;
//! ```

mod border_agent;
mod cli;
mod commissioner;
mod config;
mod crypto;
mod dataset;
mod error;
mod events;
mod joiner;
mod persistence;
mod session;
mod tlv;
mod transport;

pub use border_agent::{find_border_agent, BorderAgent, BorderAgentDiscovery};
pub use cli::Interpreter;
pub use commissioner::{
    mesh_local_addr, Commissioner, EnergyReport, DEFAULT_COMMISSIONER_ID, MLR_STATUS_SUCCESS,
    PRIMARY_BBR_ALOC16,
};
pub use config::{parse_hex, read_hex_string_file, read_pem_file, AppConfig, Credentials, LogLevel};
pub use crypto::{sha256, Crypto, DefaultCrypto};
pub use dataset::{
    ActiveOperationalDataset, BbrDataset, Channel, ChannelMask, ChannelMaskEntry,
    CommissionerDataset, PendingOperationalDataset, SecurityPolicy, Timestamp,
};
pub use error::{Error, Result};
pub use events::{EventDispatcher, TransportEvent};
pub use joiner::{
    add_joiner_to_steering, compute_joiner_id, joiner_id_from_discerner, steering_covers,
    JoinerCredential, JoinerId, JoinerInfo, JoinerRegistry, JoinerType, MAX_STEERING_DATA_LENGTH,
};
pub use persistence::{
    load_network_data, network_data_from_json, network_data_to_json, save_network_data, NetworkData,
};
pub use session::{SessionController, SessionState, DEFAULT_KEEPALIVE_INTERVAL};
pub use tlv::{decode_set, encode_set, Tlv};
pub use transport::{
    uri, CommissioningHandler, CommissioningRequest, DisconnectedTransport, JoinerAdmission,
    PetitionResponse, TransportSession,
};
