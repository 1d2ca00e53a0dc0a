//! Key and signature algorithm types
//!
//! Configuration arrives as loosely typed strings; once validated it is
//! represented by the enums here, so an RSA key spec cannot carry a curve and
//! an ECDSA key spec cannot carry a modulus length.

use crate::error::ConfigError;
use const_oid::db::rfc5912::{
    ECDSA_WITH_SHA_256, ECDSA_WITH_SHA_384, ECDSA_WITH_SHA_512, SECP_224_R_1, SECP_256_R_1,
    SECP_384_R_1, SECP_521_R_1, SHA_256_WITH_RSA_ENCRYPTION, SHA_384_WITH_RSA_ENCRYPTION,
    SHA_512_WITH_RSA_ENCRYPTION,
};
use const_oid::ObjectIdentifier;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use std::fmt;

/// Allowed RSA modulus lengths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaModLength {
    Bits2048,
    Bits4096,
}

impl RsaModLength {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            2048 => Some(RsaModLength::Bits2048),
            4096 => Some(RsaModLength::Bits4096),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            RsaModLength::Bits2048 => 2048,
            RsaModLength::Bits4096 => 4096,
        }
    }
}

/// Allowed named curves for ECDSA keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcdsaCurve {
    P224,
    P256,
    P384,
    P521,
}

impl EcdsaCurve {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "P-224" => Some(EcdsaCurve::P224),
            "P-256" => Some(EcdsaCurve::P256),
            "P-384" => Some(EcdsaCurve::P384),
            "P-521" => Some(EcdsaCurve::P521),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EcdsaCurve::P224 => "P-224",
            EcdsaCurve::P256 => "P-256",
            EcdsaCurve::P384 => "P-384",
            EcdsaCurve::P521 => "P-521",
        }
    }

    /// Named-curve OID, used as the PKCS#11 `CKA_EC_PARAMS` value
    pub fn oid(self) -> ObjectIdentifier {
        match self {
            EcdsaCurve::P224 => SECP_224_R_1,
            EcdsaCurve::P256 => SECP_256_R_1,
            EcdsaCurve::P384 => SECP_384_R_1,
            EcdsaCurve::P521 => SECP_521_R_1,
        }
    }

    pub fn nid(self) -> Nid {
        match self {
            EcdsaCurve::P224 => Nid::SECP224R1,
            EcdsaCurve::P256 => Nid::X9_62_PRIME256V1,
            EcdsaCurve::P384 => Nid::SECP384R1,
            EcdsaCurve::P521 => Nid::SECP521R1,
        }
    }

    pub fn from_nid(nid: Nid) -> Option<Self> {
        [
            EcdsaCurve::P224,
            EcdsaCurve::P256,
            EcdsaCurve::P384,
            EcdsaCurve::P521,
        ]
        .into_iter()
        .find(|curve| curve.nid() == nid)
    }

    /// Size in bytes of one scalar (r or s) of a signature on this curve
    pub fn scalar_len(self) -> usize {
        match self {
            EcdsaCurve::P224 => 28,
            EcdsaCurve::P256 => 32,
            EcdsaCurve::P384 => 48,
            EcdsaCurve::P521 => 66,
        }
    }

    /// Digest paired with this curve for certificate signatures
    pub fn matching_hash(self) -> HashAlgorithm {
        match self {
            EcdsaCurve::P224 | EcdsaCurve::P256 => HashAlgorithm::Sha256,
            EcdsaCurve::P384 => HashAlgorithm::Sha384,
            EcdsaCurve::P521 => HashAlgorithm::Sha512,
        }
    }
}

impl fmt::Display for EcdsaCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Validated key generation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpec {
    Rsa { mod_length: RsaModLength },
    Ecdsa { curve: EcdsaCurve },
}

impl KeySpec {
    pub fn type_name(&self) -> &'static str {
        match self {
            KeySpec::Rsa { .. } => "rsa",
            KeySpec::Ecdsa { .. } => "ecdsa",
        }
    }

    /// Signature algorithm used for the post-generation self-test
    pub fn self_test_algorithm(&self) -> SignatureAlgorithm {
        match self {
            KeySpec::Rsa { .. } => SignatureAlgorithm::Sha256WithRsa,
            KeySpec::Ecdsa { curve } => SignatureAlgorithm::ecdsa_with(curve.matching_hash()),
        }
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySpec::Rsa { mod_length } => write!(f, "RSA-{}", mod_length.bits()),
            KeySpec::Ecdsa { curve } => write!(f, "ECDSA {}", curve),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn message_digest(self) -> MessageDigest {
        match self {
            HashAlgorithm::Sha256 => MessageDigest::sha256(),
            HashAlgorithm::Sha384 => MessageDigest::sha384(),
            HashAlgorithm::Sha512 => MessageDigest::sha512(),
        }
    }
}

/// Certificate signature algorithms accepted in a certificate profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha256WithRsa,
    Sha384WithRsa,
    Sha512WithRsa,
    EcdsaWithSha256,
    EcdsaWithSha384,
    EcdsaWithSha512,
}

impl SignatureAlgorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SHA256WithRSA" => Some(SignatureAlgorithm::Sha256WithRsa),
            "SHA384WithRSA" => Some(SignatureAlgorithm::Sha384WithRsa),
            "SHA512WithRSA" => Some(SignatureAlgorithm::Sha512WithRsa),
            "ECDSAWithSHA256" => Some(SignatureAlgorithm::EcdsaWithSha256),
            "ECDSAWithSHA384" => Some(SignatureAlgorithm::EcdsaWithSha384),
            "ECDSAWithSHA512" => Some(SignatureAlgorithm::EcdsaWithSha512),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha256WithRsa => "SHA256WithRSA",
            SignatureAlgorithm::Sha384WithRsa => "SHA384WithRSA",
            SignatureAlgorithm::Sha512WithRsa => "SHA512WithRSA",
            SignatureAlgorithm::EcdsaWithSha256 => "ECDSAWithSHA256",
            SignatureAlgorithm::EcdsaWithSha384 => "ECDSAWithSHA384",
            SignatureAlgorithm::EcdsaWithSha512 => "ECDSAWithSHA512",
        }
    }

    fn ecdsa_with(hash: HashAlgorithm) -> Self {
        match hash {
            HashAlgorithm::Sha256 => SignatureAlgorithm::EcdsaWithSha256,
            HashAlgorithm::Sha384 => SignatureAlgorithm::EcdsaWithSha384,
            HashAlgorithm::Sha512 => SignatureAlgorithm::EcdsaWithSha512,
        }
    }

    pub fn hash(self) -> HashAlgorithm {
        match self {
            SignatureAlgorithm::Sha256WithRsa | SignatureAlgorithm::EcdsaWithSha256 => {
                HashAlgorithm::Sha256
            }
            SignatureAlgorithm::Sha384WithRsa | SignatureAlgorithm::EcdsaWithSha384 => {
                HashAlgorithm::Sha384
            }
            SignatureAlgorithm::Sha512WithRsa | SignatureAlgorithm::EcdsaWithSha512 => {
                HashAlgorithm::Sha512
            }
        }
    }

    pub fn is_rsa(self) -> bool {
        matches!(
            self,
            SignatureAlgorithm::Sha256WithRsa
                | SignatureAlgorithm::Sha384WithRsa
                | SignatureAlgorithm::Sha512WithRsa
        )
    }

    pub fn oid(self) -> ObjectIdentifier {
        match self {
            SignatureAlgorithm::Sha256WithRsa => SHA_256_WITH_RSA_ENCRYPTION,
            SignatureAlgorithm::Sha384WithRsa => SHA_384_WITH_RSA_ENCRYPTION,
            SignatureAlgorithm::Sha512WithRsa => SHA_512_WITH_RSA_ENCRYPTION,
            SignatureAlgorithm::EcdsaWithSha256 => ECDSA_WITH_SHA_256,
            SignatureAlgorithm::EcdsaWithSha384 => ECDSA_WITH_SHA_384,
            SignatureAlgorithm::EcdsaWithSha512 => ECDSA_WITH_SHA_512,
        }
    }

    /// Reject pairings of this algorithm with a signing key it cannot serve:
    /// RSA schemes need an RSA key, ECDSA schemes need the hash paired with the curve.
    pub fn check_key(self, key: KeyAlgorithm) -> Result<(), ConfigError> {
        match key {
            KeyAlgorithm::Rsa if self.is_rsa() => Ok(()),
            KeyAlgorithm::Ecdsa(curve) if !self.is_rsa() => {
                if curve.matching_hash() == self.hash() {
                    Ok(())
                } else {
                    Err(ConfigError::SignatureCurveMismatch {
                        algorithm: self.name(),
                        curve: curve.name(),
                    })
                }
            }
            _ => Err(ConfigError::SignatureKeyTypeMismatch {
                algorithm: self.name(),
                key_type: key.type_name(),
            }),
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Algorithm family of an existing signing key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Ecdsa(EcdsaCurve),
}

impl KeyAlgorithm {
    pub fn type_name(self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => "rsa",
            KeyAlgorithm::Ecdsa(_) => "ecdsa",
        }
    }
}

impl From<KeySpec> for KeyAlgorithm {
    fn from(spec: KeySpec) -> Self {
        match spec {
            KeySpec::Rsa { .. } => KeyAlgorithm::Rsa,
            KeySpec::Ecdsa { curve } => KeyAlgorithm::Ecdsa(curve),
        }
    }
}
