//! Application configuration
//!
//! A single JSON document configures the commissioner. Unknown keys are
//! rejected so a typo cannot silently disable a credential. Credential
//! files referenced by the config are loaded eagerly during init; a missing
//! or malformed file is fatal to session creation.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Log verbosity names accepted by the config file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Critical,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    /// Map onto the `log` facade; `critical` folds into `error`.
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Critical | LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
        }
    }
}

fn default_keepalive_interval() -> u64 {
    40
}

fn default_max_connection_num() -> u32 {
    100
}

fn default_log_file() -> String {
    "commissioner.log".into()
}

/// The commissioner's configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Operator-chosen commissioner id presented in the petition
    #[serde(rename = "Id", default)]
    pub id: String,

    #[serde(rename = "EnableCcm", default)]
    pub enable_ccm: bool,

    #[serde(rename = "DomainName", default)]
    pub domain_name: String,

    /// 32 hex characters; required for PSKc-authenticated (non-CCM) use
    #[serde(rename = "PSKc", default)]
    pub pskc: String,

    #[serde(rename = "PrivateKeyFile", default)]
    pub private_key_file: String,

    #[serde(rename = "CertificateFile", default)]
    pub certificate_file: String,

    #[serde(rename = "TrustAnchorFile", default)]
    pub trust_anchor_file: String,

    /// Seconds between keepalives
    #[serde(rename = "KeepAliveInterval", default = "default_keepalive_interval")]
    pub keepalive_interval: u64,

    #[serde(rename = "MaxConnectionNum", default = "default_max_connection_num")]
    pub max_connection_num: u32,

    #[serde(rename = "LogLevel", default)]
    pub log_level: LogLevel,

    #[serde(rename = "LogFile", default = "default_log_file")]
    pub log_file: String,
}

/// Credential material loaded from the files the config names.
#[derive(Debug, Default, Clone)]
pub struct Credentials {
    pub pskc: Option<[u8; 16]>,
    /// PEM private key, NUL-terminated
    pub private_key: Option<Vec<u8>>,
    /// PEM certificate, NUL-terminated
    pub certificate: Option<Vec<u8>>,
    /// PEM trust anchor, NUL-terminated
    pub trust_anchor: Option<Vec<u8>>,
}

impl AppConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Load every credential the config names. A CCM configuration must
    /// name the key, certificate and trust anchor; a non-CCM one must carry
    /// a PSKc.
    pub fn load_credentials(&self) -> Result<Credentials> {
        let mut credentials = Credentials::default();

        if !self.pskc.is_empty() {
            let bytes = parse_hex(&self.pskc)?;
            let pskc: [u8; 16] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| Error::InvalidArgs("PSKc must be 32 hex characters".into()))?;
            credentials.pskc = Some(pskc);
        }
        if !self.private_key_file.is_empty() {
            credentials.private_key = Some(read_pem_file(&self.private_key_file)?);
        }
        if !self.certificate_file.is_empty() {
            credentials.certificate = Some(read_pem_file(&self.certificate_file)?);
        }
        if !self.trust_anchor_file.is_empty() {
            credentials.trust_anchor = Some(read_pem_file(&self.trust_anchor_file)?);
        }

        if self.enable_ccm {
            if credentials.private_key.is_none()
                || credentials.certificate.is_none()
                || credentials.trust_anchor.is_none()
            {
                return Err(Error::InvalidArgs(
                    "CCM mode requires PrivateKeyFile, CertificateFile and TrustAnchorFile".into(),
                ));
            }
        } else if credentials.pskc.is_none() {
            return Err(Error::InvalidArgs(
                "non-CCM mode requires a PSKc".into(),
            ));
        }

        Ok(credentials)
    }
}

/// Decode a hex string after stripping ASCII whitespace; odd length errors.
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    hex::decode(&compact).map_err(|err| Error::InvalidArgs(format!("bad hex string: {}", err)))
}

/// Read a whole file of hex characters (whitespace ignored).
pub fn read_hex_string_file(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let content = fs::read_to_string(path)?;
    parse_hex(&content)
}

/// Read a PEM file as raw bytes with the trailing NUL the DTLS stack wants.
pub fn read_pem_file(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let mut data = fs::read(path)?;
    data.push(0);
    Ok(data)
}
