//! Ceremony error types
//!
//! Configuration errors carry fixed operator-facing messages; operators and
//! tests match on the exact text, so the `#[error]` strings below are part of
//! the interface and must not be reworded.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for HSM operations
pub type HsmResult<T> = std::result::Result<T, HsmError>;

/// Configuration rule violations, reported before any hardware or file is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("ceremony-type is required")]
    MissingCeremonyType,

    #[error("ceremony-type can only be 'root', 'intermediate', or 'key'")]
    UnknownCeremonyType,

    #[error("pkcs11.module is required")]
    MissingModule,

    #[error("pkcs11.store-key-with-label is required")]
    MissingStoreLabel,

    #[error("pkcs11.signing-key-label is required")]
    MissingSigningLabel,

    #[error("pkcs11.signing-key-id is required")]
    MissingSigningKeyId,

    #[error("key.type is required")]
    MissingKeyType,

    #[error("key.type can only be 'rsa' or 'ecdsa'")]
    UnknownKeyType,

    #[error("key.rsa-mod-length can only be 2048 or 4096")]
    InvalidRsaModLength,

    #[error("if key.type = 'rsa' then key.ecdsa-curve is not used")]
    CurveWithRsa,

    #[error("key.ecdsa-curve can only be 'P-224', 'P-256', 'P-384', or 'P-521'")]
    InvalidEcdsaCurve,

    #[error("if key.type = 'ecdsa' then key.rsa-mod-length is not used")]
    ModLengthWithEcdsa,

    #[error("inputs.public-key-path is required")]
    MissingInputPublicKey,

    #[error("inputs.issuer-certificate is required")]
    MissingIssuerCertificate,

    #[error("outputs.public-key-path is required")]
    MissingOutputPublicKey,

    #[error("outputs.certificate-path is required")]
    MissingOutputCertificate,

    #[error("not-before is required")]
    MissingNotBefore,

    #[error("not-after is required")]
    MissingNotAfter,

    #[error("signature-algorithm is required")]
    MissingSignatureAlgorithm,

    #[error("common-name is required")]
    MissingCommonName,

    #[error("organization is required")]
    MissingOrganization,

    #[error("country is required")]
    MissingCountry,

    #[error("not-before must use the format 'YYYY-MM-DD HH:MM:SS'")]
    MalformedNotBefore,

    #[error("not-after must use the format 'YYYY-MM-DD HH:MM:SS'")]
    MalformedNotAfter,

    #[error("not-before must be between 1970-01-01 00:00:00 and 9999-12-31 23:59:59")]
    NotBeforeOutOfRange,

    #[error("not-after must be between 1970-01-01 00:00:00 and 9999-12-31 23:59:59")]
    NotAfterOutOfRange,

    #[error("not-after must be after not-before")]
    ValidityOrder,

    #[error(
        "signature-algorithm can only be 'SHA256WithRSA', 'SHA384WithRSA', 'SHA512WithRSA', \
         'ECDSAWithSHA256', 'ECDSAWithSHA384', or 'ECDSAWithSHA512'"
    )]
    UnknownSignatureAlgorithm,

    #[error("country must be a two-letter country code")]
    InvalidCountry,

    #[error("{0} must be an ASCII URL")]
    NonAsciiUrl(&'static str),

    #[error("signature-algorithm {algorithm} cannot be used with a key.type = '{key_type}' key")]
    SignatureKeyTypeMismatch {
        algorithm: &'static str,
        key_type: &'static str,
    },

    #[error("signature-algorithm {algorithm} does not match key.ecdsa-curve {curve}")]
    SignatureCurveMismatch {
        algorithm: &'static str,
        curve: &'static str,
    },
}

impl ConfigError {
    /// The configuration field the violated rule concerns
    pub fn field(&self) -> &'static str {
        match self {
            ConfigError::MissingCeremonyType | ConfigError::UnknownCeremonyType => "ceremony-type",
            ConfigError::MissingModule => "pkcs11.module",
            ConfigError::MissingStoreLabel => "pkcs11.store-key-with-label",
            ConfigError::MissingSigningLabel => "pkcs11.signing-key-label",
            ConfigError::MissingSigningKeyId => "pkcs11.signing-key-id",
            ConfigError::MissingKeyType | ConfigError::UnknownKeyType => "key.type",
            ConfigError::InvalidRsaModLength | ConfigError::ModLengthWithEcdsa => {
                "key.rsa-mod-length"
            }
            ConfigError::CurveWithRsa | ConfigError::InvalidEcdsaCurve => "key.ecdsa-curve",
            ConfigError::MissingInputPublicKey => "inputs.public-key-path",
            ConfigError::MissingIssuerCertificate => "inputs.issuer-certificate-path",
            ConfigError::MissingOutputPublicKey => "outputs.public-key-path",
            ConfigError::MissingOutputCertificate => "outputs.certificate-path",
            ConfigError::MissingNotBefore
            | ConfigError::MalformedNotBefore
            | ConfigError::NotBeforeOutOfRange => "not-before",
            ConfigError::MissingNotAfter
            | ConfigError::MalformedNotAfter
            | ConfigError::NotAfterOutOfRange
            | ConfigError::ValidityOrder => "not-after",
            ConfigError::MissingSignatureAlgorithm
            | ConfigError::UnknownSignatureAlgorithm
            | ConfigError::SignatureKeyTypeMismatch { .. }
            | ConfigError::SignatureCurveMismatch { .. } => "signature-algorithm",
            ConfigError::MissingCommonName => "common-name",
            ConfigError::MissingOrganization => "organization",
            ConfigError::MissingCountry | ConfigError::InvalidCountry => "country",
            ConfigError::NonAsciiUrl(field) => field,
        }
    }
}

/// HSM error types
#[derive(Error, Debug)]
pub enum HsmError {
    /// PKCS#11 module could not be loaded or initialised
    #[error("failed to initialise PKCS#11 module {module}: {reason}")]
    InitFailed { module: String, reason: String },

    /// No token present in the requested slot
    #[error("slot {0} not found or has no token")]
    SlotNotFound(u64),

    /// PIN is required but none could be obtained
    #[error("PIN required")]
    PinRequired,

    /// Invalid PIN provided
    #[error("invalid PIN")]
    InvalidPin,

    /// PIN is locked due to too many failed attempts
    #[error("PIN locked (too many attempts)")]
    PinLocked,

    /// A key already exists under the label requested for a new key
    #[error("a key with label {0:?} already exists")]
    LabelExists(String),

    /// Key not found in HSM
    #[error("no private key with label {label:?} and ID {id}")]
    KeyNotFound { label: String, id: String },

    /// More than one key matches the label/ID pair
    #[error("{count} private keys match label {label:?} and ID {id}")]
    AmbiguousKey {
        label: String,
        id: String,
        count: usize,
    },

    /// Key pair generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Signing operation failed
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Key attributes did not have the expected shape
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// PKCS#11 specific error
    #[error("PKCS#11 error: {0}")]
    Pkcs11Error(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that abort a ceremony
#[derive(Error, Debug)]
pub enum CeremonyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("HSM: {0}")]
    Hsm(#[from] HsmError),

    #[error("failed to read {path}: {source}")]
    ReadInput {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    ParseInput { path: PathBuf, reason: String },

    #[error("{field} {path:?} already exists")]
    OutputExists { field: &'static str, path: PathBuf },

    #[error("{field} directory {dir:?} does not exist")]
    OutputDirMissing { field: &'static str, dir: PathBuf },

    #[error("outputs.public-key-path and outputs.certificate-path must be different files")]
    OutputPathCollision(PathBuf),

    #[error("failed to write {path}: {source}")]
    WriteOutput {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("pkcs11.signing-key-id {0:?} is not a hex string")]
    MalformedKeyId(String),

    #[error("invalid public key from HSM: {0}")]
    InvalidPublicKey(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    #[error("DER encoding error: {0}")]
    Encoding(#[from] x509_cert::der::Error),

    #[error("key self-test failed: signature from the HSM did not verify")]
    SelfTestFailed,

    #[error("certificate signature verification failed")]
    VerificationFailed,
}
