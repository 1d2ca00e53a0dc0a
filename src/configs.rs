//! Ceremony configuration records
//!
//! These mirror the YAML schema one-to-one. Every field defaults to empty so a
//! missing field is reported by the validator with its fixed message instead
//! of failing in the YAML parser. Validation lives in [`crate::validation`].

use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Key generation parameters (`key` section)
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct KeyGenConfig {
    #[serde(rename = "type")]
    pub key_type: String,
    pub rsa_mod_length: u32,
    pub ecdsa_curve: String,
}

/// PKCS#11 settings for ceremonies that create a new key
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PKCS11KeyGenConfig {
    pub module: String,
    pub pin: String,
    #[serde(rename = "store-key-in-slot")]
    pub store_slot: u64,
    #[serde(rename = "store-key-with-label")]
    pub store_label: String,
}

/// PKCS#11 settings for ceremonies that sign with an existing key
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PKCS11SigningConfig {
    pub module: String,
    pub pin: String,
    #[serde(rename = "signing-key-slot")]
    pub signing_slot: u64,
    #[serde(rename = "signing-key-label")]
    pub signing_label: String,
    #[serde(rename = "signing-key-id")]
    pub signing_key_id: String,
}

/// Declarative certificate profile (`certificate-profile` section)
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct CertProfile {
    pub not_before: String,
    pub not_after: String,
    pub signature_algorithm: String,
    pub common_name: String,
    pub organization: String,
    pub country: String,
    #[serde(rename = "ocsp-url")]
    pub ocsp_url: String,
    #[serde(rename = "crl-url")]
    pub crl_url: String,
    #[serde(rename = "issuer-url")]
    pub issuer_url: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct RootOutputs {
    pub public_key_path: String,
    pub certificate_path: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct IntermediateInputs {
    pub public_key_path: String,
    pub issuer_certificate_path: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct CertificateOutputs {
    pub certificate_path: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct KeyOutputs {
    pub public_key_path: String,
}

/// Root ceremony: generate a key and self-sign a certificate for it
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RootConfig {
    pub pkcs11: PKCS11KeyGenConfig,
    pub key: KeyGenConfig,
    pub outputs: RootOutputs,
    #[serde(rename = "certificate-profile")]
    pub cert_profile: CertProfile,
}

/// Intermediate ceremony: sign an existing public key with an HSM-resident issuer key
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct IntermediateConfig {
    pub pkcs11: PKCS11SigningConfig,
    pub inputs: IntermediateInputs,
    pub outputs: CertificateOutputs,
    #[serde(rename = "certificate-profile")]
    pub cert_profile: CertProfile,
}

/// Key ceremony: generate a key and export its public half
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KeyConfig {
    pub pkcs11: PKCS11KeyGenConfig,
    pub key: KeyGenConfig,
    pub outputs: KeyOutputs,
}

/// One ceremony document, selected by its `ceremony-type`
#[derive(Debug, Clone)]
pub enum CeremonyConfig {
    Root(RootConfig),
    Intermediate(IntermediateConfig),
    Key(KeyConfig),
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct CeremonyHeader {
    #[serde(rename = "ceremony-type")]
    ceremony_type: String,
}

impl CeremonyConfig {
    /// Parse a YAML ceremony document
    ///
    /// The `ceremony-type` field is read first; the rest of the document is then
    /// parsed as the matching record. Fields other than those of the selected
    /// record are ignored.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let header: CeremonyHeader =
            serde_yaml::from_str(text).context("Failed to parse ceremony config")?;

        let config = match header.ceremony_type.as_str() {
            "" => return Err(ConfigError::MissingCeremonyType.into()),
            "root" => CeremonyConfig::Root(
                serde_yaml::from_str(text).context("Failed to parse root ceremony config")?,
            ),
            "intermediate" => CeremonyConfig::Intermediate(
                serde_yaml::from_str(text)
                    .context("Failed to parse intermediate ceremony config")?,
            ),
            "key" => CeremonyConfig::Key(
                serde_yaml::from_str(text).context("Failed to parse key ceremony config")?,
            ),
            _ => return Err(ConfigError::UnknownCeremonyType.into()),
        };
        Ok(config)
    }

    /// Load a ceremony document from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&config_str)
    }

    pub fn ceremony_type(&self) -> &'static str {
        match self {
            CeremonyConfig::Root(_) => "root",
            CeremonyConfig::Intermediate(_) => "intermediate",
            CeremonyConfig::Key(_) => "key",
        }
    }
}
