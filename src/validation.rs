//! Ceremony configuration validation
//!
//! Each record is checked by an ordered list of independent rules; the first
//! violated rule is returned. Presence and exclusivity rules always run before
//! semantic ones, so the reported error is deterministic. Validation is pure:
//! no file, device or network is touched.
//!
//! On success a record is turned into a validated plan whose types make the
//! checked invariants unrepresentable-if-violated (for example [`KeySpec`]
//! rather than the raw `type`/`rsa-mod-length`/`ecdsa-curve` triple).

use crate::algorithms::{EcdsaCurve, KeySpec, RsaModLength, SignatureAlgorithm};
use crate::configs::{
    CeremonyConfig, CertProfile, IntermediateConfig, KeyConfig, KeyGenConfig, PKCS11KeyGenConfig,
    PKCS11SigningConfig, RootConfig,
};
use crate::error::ConfigError;
use crate::hsm::{Pin, SessionTarget};
use crate::templates::{VALIDITY_MAX_YEAR, VALIDITY_MIN_YEAR};
use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use std::path::PathBuf;

/// Layout of `not-before` / `not-after`, interpreted as UTC
pub const PROFILE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn required(value: &str, err: ConfigError) -> Result<(), ConfigError> {
    if value.is_empty() {
        Err(err)
    } else {
        Ok(())
    }
}

fn optional_url(value: &str, field: &'static str) -> Result<Option<String>, ConfigError> {
    if value.is_empty() {
        return Ok(None);
    }
    if !value.is_ascii() {
        return Err(ConfigError::NonAsciiUrl(field));
    }
    Ok(Some(value.to_string()))
}

fn parse_timestamp(value: &str, err: ConfigError) -> Result<DateTime<Utc>, ConfigError> {
    NaiveDateTime::parse_from_str(value, PROFILE_TIME_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| err)
}

/// Timestamps outside the years a certificate can encode are rejected here so a
/// ceremony never fails on them after key generation.
fn encodable_timestamp(
    timestamp: DateTime<Utc>,
    err: ConfigError,
) -> Result<DateTime<Utc>, ConfigError> {
    if (VALIDITY_MIN_YEAR..=VALIDITY_MAX_YEAR).contains(&timestamp.year()) {
        Ok(timestamp)
    } else {
        Err(err)
    }
}

fn optional_pin(pin: &str) -> Option<Pin> {
    if pin.is_empty() {
        None
    } else {
        Some(Pin::new(pin.to_string()))
    }
}

/// Where a newly generated key pair is stored
#[derive(Debug)]
pub struct KeyStorage {
    pub module: PathBuf,
    pub pin: Option<Pin>,
    pub slot: u64,
    pub label: String,
}

impl KeyStorage {
    pub fn session_target(&self) -> SessionTarget<'_> {
        SessionTarget {
            module: &self.module,
            slot: self.slot,
            pin: self.pin.as_ref(),
        }
    }
}

/// Address of an existing HSM-resident issuer key
#[derive(Debug)]
pub struct SigningKey {
    pub module: PathBuf,
    pub pin: Option<Pin>,
    pub slot: u64,
    pub label: String,
    pub key_id: String,
}

impl SigningKey {
    pub fn session_target(&self) -> SessionTarget<'_> {
        SessionTarget {
            module: &self.module,
            slot: self.slot,
            pin: self.pin.as_ref(),
        }
    }
}

/// A certificate profile whose fields have all been checked
#[derive(Debug, Clone)]
pub struct CertificateProfile {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub signature_algorithm: SignatureAlgorithm,
    pub common_name: String,
    pub organization: String,
    pub country: String,
    pub ocsp_url: Option<String>,
    pub crl_url: Option<String>,
    pub issuer_url: Option<String>,
}

#[derive(Debug)]
pub struct RootCeremony {
    pub storage: KeyStorage,
    pub key: KeySpec,
    pub public_key_path: PathBuf,
    pub certificate_path: PathBuf,
    pub profile: CertificateProfile,
}

#[derive(Debug)]
pub struct IntermediateCeremony {
    pub signer: SigningKey,
    pub public_key_path: PathBuf,
    pub issuer_certificate_path: PathBuf,
    pub certificate_path: PathBuf,
    pub profile: CertificateProfile,
}

#[derive(Debug)]
pub struct KeyCeremony {
    pub storage: KeyStorage,
    pub key: KeySpec,
    pub public_key_path: PathBuf,
}

/// A validated ceremony, ready to execute
#[derive(Debug)]
pub enum Ceremony {
    Root(RootCeremony),
    Intermediate(IntermediateCeremony),
    Key(KeyCeremony),
}

impl KeyGenConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.key_spec().map(|_| ())
    }

    pub fn key_spec(&self) -> Result<KeySpec, ConfigError> {
        required(&self.key_type, ConfigError::MissingKeyType)?;
        match self.key_type.as_str() {
            "rsa" => {
                let mod_length = RsaModLength::from_bits(self.rsa_mod_length)
                    .ok_or(ConfigError::InvalidRsaModLength)?;
                if !self.ecdsa_curve.is_empty() {
                    return Err(ConfigError::CurveWithRsa);
                }
                Ok(KeySpec::Rsa { mod_length })
            }
            "ecdsa" => {
                let curve = EcdsaCurve::from_name(&self.ecdsa_curve)
                    .ok_or(ConfigError::InvalidEcdsaCurve)?;
                if self.rsa_mod_length != 0 {
                    return Err(ConfigError::ModLengthWithEcdsa);
                }
                Ok(KeySpec::Ecdsa { curve })
            }
            _ => Err(ConfigError::UnknownKeyType),
        }
    }
}

impl CertProfile {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check().map(|_| ())
    }

    pub fn check(&self) -> Result<CertificateProfile, ConfigError> {
        required(&self.not_before, ConfigError::MissingNotBefore)?;
        required(&self.not_after, ConfigError::MissingNotAfter)?;
        required(
            &self.signature_algorithm,
            ConfigError::MissingSignatureAlgorithm,
        )?;
        required(&self.common_name, ConfigError::MissingCommonName)?;
        required(&self.organization, ConfigError::MissingOrganization)?;
        required(&self.country, ConfigError::MissingCountry)?;

        let not_before = parse_timestamp(&self.not_before, ConfigError::MalformedNotBefore)?;
        let not_after = parse_timestamp(&self.not_after, ConfigError::MalformedNotAfter)?;
        let not_before = encodable_timestamp(not_before, ConfigError::NotBeforeOutOfRange)?;
        let not_after = encodable_timestamp(not_after, ConfigError::NotAfterOutOfRange)?;
        if not_after <= not_before {
            return Err(ConfigError::ValidityOrder);
        }
        let signature_algorithm = SignatureAlgorithm::from_name(&self.signature_algorithm)
            .ok_or(ConfigError::UnknownSignatureAlgorithm)?;
        if self.country.len() != 2 || !self.country.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(ConfigError::InvalidCountry);
        }

        Ok(CertificateProfile {
            not_before,
            not_after,
            signature_algorithm,
            common_name: self.common_name.clone(),
            organization: self.organization.clone(),
            country: self.country.clone(),
            ocsp_url: optional_url(&self.ocsp_url, "ocsp-url")?,
            crl_url: optional_url(&self.crl_url, "crl-url")?,
            issuer_url: optional_url(&self.issuer_url, "issuer-url")?,
        })
    }
}

impl PKCS11KeyGenConfig {
    fn check(&self) -> Result<KeyStorage, ConfigError> {
        required(&self.module, ConfigError::MissingModule)?;
        required(&self.store_label, ConfigError::MissingStoreLabel)?;
        Ok(KeyStorage {
            module: PathBuf::from(&self.module),
            pin: optional_pin(&self.pin),
            slot: self.store_slot,
            label: self.store_label.clone(),
        })
    }
}

impl PKCS11SigningConfig {
    fn check(&self) -> Result<SigningKey, ConfigError> {
        required(&self.module, ConfigError::MissingModule)?;
        required(&self.signing_label, ConfigError::MissingSigningLabel)?;
        required(&self.signing_key_id, ConfigError::MissingSigningKeyId)?;
        Ok(SigningKey {
            module: PathBuf::from(&self.module),
            pin: optional_pin(&self.pin),
            slot: self.signing_slot,
            label: self.signing_label.clone(),
            key_id: self.signing_key_id.clone(),
        })
    }
}

impl RootConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check().map(|_| ())
    }

    pub fn check(&self) -> Result<RootCeremony, ConfigError> {
        let storage = self.pkcs11.check()?;
        let key = self.key.key_spec()?;
        required(
            &self.outputs.public_key_path,
            ConfigError::MissingOutputPublicKey,
        )?;
        required(
            &self.outputs.certificate_path,
            ConfigError::MissingOutputCertificate,
        )?;
        let profile = self.cert_profile.check()?;
        // Self-signed: the new key is also the issuer key.
        profile.signature_algorithm.check_key(key.into())?;

        Ok(RootCeremony {
            storage,
            key,
            public_key_path: PathBuf::from(&self.outputs.public_key_path),
            certificate_path: PathBuf::from(&self.outputs.certificate_path),
            profile,
        })
    }
}

impl IntermediateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check().map(|_| ())
    }

    pub fn check(&self) -> Result<IntermediateCeremony, ConfigError> {
        let signer = self.pkcs11.check()?;
        required(
            &self.inputs.public_key_path,
            ConfigError::MissingInputPublicKey,
        )?;
        required(
            &self.inputs.issuer_certificate_path,
            ConfigError::MissingIssuerCertificate,
        )?;
        required(
            &self.outputs.certificate_path,
            ConfigError::MissingOutputCertificate,
        )?;
        let profile = self.cert_profile.check()?;

        Ok(IntermediateCeremony {
            signer,
            public_key_path: PathBuf::from(&self.inputs.public_key_path),
            issuer_certificate_path: PathBuf::from(&self.inputs.issuer_certificate_path),
            certificate_path: PathBuf::from(&self.outputs.certificate_path),
            profile,
        })
    }
}

impl KeyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check().map(|_| ())
    }

    pub fn check(&self) -> Result<KeyCeremony, ConfigError> {
        let storage = self.pkcs11.check()?;
        let key = self.key.key_spec()?;
        required(
            &self.outputs.public_key_path,
            ConfigError::MissingOutputPublicKey,
        )?;

        Ok(KeyCeremony {
            storage,
            key,
            public_key_path: PathBuf::from(&self.outputs.public_key_path),
        })
    }
}

impl CeremonyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check().map(|_| ())
    }

    pub fn check(&self) -> Result<Ceremony, ConfigError> {
        Ok(match self {
            CeremonyConfig::Root(config) => Ceremony::Root(config.check()?),
            CeremonyConfig::Intermediate(config) => Ceremony::Intermediate(config.check()?),
            CeremonyConfig::Key(config) => Ceremony::Key(config.check()?),
        })
    }
}
